//! Agent instance tree: a second tree, parallel to the MIB tree, holding
//! only registered (bound) instances.
//!
//! Every instance carries a full OID and lookups are either exact-match
//! or lexicographic-successor, so a `BTreeMap<Oid, InstanceId>` gives
//! both in O(log n) without re-deriving a parent/child/sibling graph; the
//! arena (`Vec<InstanceNode>`) holds the actual node data, the same
//! arena-index layout the MIB tree uses.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::ber::Value;
use crate::error::{Error, Result};
use crate::mib::MibAccess;
use crate::oid::Oid;

pub type InstanceId = u32;

/// `syntax_tag` sentinel for ancestor placeholder nodes (row/table
/// entries materialized by [`InstanceTree::create_node`] that carry no
/// value of their own). `getnext` skips these.
pub const SYNTAX_NONE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Get,
    Set,
    Create,
    Check,
    Commit,
    Rollback,
}

/// Typed callback payload passed to every binding fired on an instance.
#[derive(Clone)]
pub struct Event {
    pub kind: EventKind,
    pub instance: Oid,
    pub value: Option<Value>,
    pub prior: Option<Value>,
}

pub type Binding = Box<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// A `get` binding may override the cell's stored value with a freshly
/// computed one — this is how a live counter or derived scalar (e.g.
/// `sysUpTime.0`) reports a current value on every read instead of
/// whatever was last written to its cell.
pub type GetBinding = Box<dyn Fn(&Event) -> Result<Option<Value>> + Send + Sync>;

/// Per-node binding table.
#[derive(Default)]
pub struct BindingTable {
    pub get: Vec<GetBinding>,
    pub set: Vec<Binding>,
    pub create: Vec<Binding>,
    pub check: Vec<Binding>,
    pub commit: Vec<Binding>,
    pub rollback: Vec<Binding>,
}

impl BindingTable {
    fn fire(list: &[Binding], event: &Event) -> Result<()> {
        for binding in list {
            binding(event)?;
        }
        Ok(())
    }

    /// Runs every `get` binding in order; the last one to return `Some`
    /// wins over both the cell value and any earlier binding's override.
    pub fn fire_get(&self, ev: &Event) -> Result<Option<Value>> {
        let mut result = None;
        for binding in &self.get {
            if let Some(v) = binding(ev)? {
                result = Some(v);
            }
        }
        Ok(result)
    }

    pub fn fire_set(&self, ev: &Event) -> Result<()> {
        Self::fire(&self.set, ev)
    }
    pub fn fire_create(&self, ev: &Event) -> Result<()> {
        Self::fire(&self.create, ev)
    }
    pub fn fire_check(&self, ev: &Event) -> Result<()> {
        Self::fire(&self.check, ev)
    }
    pub fn fire_commit(&self, ev: &Event) -> Result<()> {
        Self::fire(&self.commit, ev)
    }
    pub fn fire_rollback(&self, ev: &Event) -> Result<()> {
        Self::fire(&self.rollback, ev)
    }
}

pub struct InstanceNode {
    pub oid: Oid,
    pub syntax_tag: u8,
    pub access: MibAccess,
    pub value: Option<Value>,
    pub bindings: BindingTable,
}

#[derive(Default)]
pub struct InstanceTree {
    nodes: Vec<InstanceNode>,
    index: BTreeMap<Oid, InstanceId>,
}

impl InstanceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_node(&self, id: InstanceId) -> &InstanceNode {
        &self.nodes[id as usize]
    }

    pub fn get_node_mut(&mut self, id: InstanceId) -> &mut InstanceNode {
        &mut self.nodes[id as usize]
    }

    pub fn find(&self, oid: &Oid) -> Option<InstanceId> {
        self.index.get(oid).copied()
    }

    /// Lexicographic successor strictly after `oid`, skipping ancestor
    /// placeholders.
    pub fn successor(&self, oid: &Oid) -> Option<InstanceId> {
        self.index
            .range((Bound::Excluded(oid.clone()), Bound::Unbounded))
            .map(|(_, id)| *id)
            .find(|&id| self.nodes[id as usize].syntax_tag != SYNTAX_NONE)
    }

    /// Validates that `oid` names an accessible leaf, materializes any
    /// missing ancestor placeholder nodes, and writes `default` to the
    /// new leaf's cell.
    pub fn create_node(&mut self, oid: Oid, syntax_tag: u8, access: MibAccess, default: Value) -> Result<InstanceId> {
        if access == MibAccess::NotAccessible {
            return Err(Error::dispatch(format!("{oid} is not an accessible leaf")));
        }
        if self.index.contains_key(&oid) {
            return Err(Error::dispatch(format!("instance {oid} already registered")));
        }
        let comps = oid.as_slice().to_vec();
        for depth in 1..comps.len() {
            let ancestor = Oid::new(comps[..depth].to_vec());
            if !self.index.contains_key(&ancestor) {
                self.insert_raw(ancestor, SYNTAX_NONE, MibAccess::NotAccessible, None);
            }
        }
        let id = self.insert_raw(oid.clone(), syntax_tag, access, Some(default));
        let ev = Event {
            kind: EventKind::Create,
            instance: oid,
            value: self.nodes[id as usize].value.clone(),
            prior: None,
        };
        self.nodes[id as usize].bindings.fire_create(&ev)?;
        Ok(id)
    }

    fn insert_raw(&mut self, oid: Oid, syntax_tag: u8, access: MibAccess, value: Option<Value>) -> InstanceId {
        let id = self.nodes.len() as InstanceId;
        self.nodes.push(InstanceNode {
            oid: oid.clone(),
            syntax_tag,
            access,
            value,
            bindings: BindingTable::default(),
        });
        self.index.insert(oid, id);
        id
    }

    /// Ancestor chain from `oid` up through the tree root, nearest first,
    /// restricted to OIDs actually present.
    pub fn ancestor_chain(&self, oid: &Oid) -> Vec<InstanceId> {
        let comps = oid.as_slice();
        let mut out = Vec::new();
        for depth in (1..=comps.len()).rev() {
            let candidate = Oid::new(comps[..depth].to_vec());
            if let Some(&id) = self.index.get(&candidate) {
                out.push(id);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    #[test]
    fn create_node_materializes_ancestors_and_fires_create() {
        let mut tree = InstanceTree::new();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        let id = tree
            .create_node(oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), 0x02, MibAccess::ReadCreate, Value::Integer(0))
            .unwrap();
        tree.get_node_mut(id).bindings.create.push(Box::new(move |_ev| {
            fired2.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }));
        // re-fire manually to exercise the binding we just attached, since
        // create_node already fired with an empty table above.
        let ev = Event { kind: EventKind::Create, instance: oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), value: None, prior: None };
        tree.get_node(id).bindings.fire_create(&ev).unwrap();
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        assert!(tree.find(&oid!(1, 3, 6, 1, 4, 1, 1, 1)).is_some());
    }

    #[test]
    fn successor_skips_placeholders() {
        let mut tree = InstanceTree::new();
        tree.create_node(oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), 0x02, MibAccess::ReadOnly, Value::Integer(1))
            .unwrap();
        tree.create_node(oid!(1, 3, 6, 1, 4, 1, 1, 2, 0), 0x02, MibAccess::ReadOnly, Value::Integer(2))
            .unwrap();
        let first = tree.successor(&oid!(1, 3, 6, 1, 4, 1, 1)).unwrap();
        assert_eq!(tree.get_node(first).oid, oid!(1, 3, 6, 1, 4, 1, 1, 1, 0));
        let second = tree.successor(&tree.get_node(first).oid.clone()).unwrap();
        assert_eq!(tree.get_node(second).oid, oid!(1, 3, 6, 1, 4, 1, 1, 2, 0));
        assert!(tree.successor(&tree.get_node(second).oid.clone()).is_none());
    }

    #[test]
    fn ancestor_chain_returns_nearest_first() {
        let mut tree = InstanceTree::new();
        tree.create_node(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 7), 0x04, MibAccess::ReadWrite, Value::OctetString(vec![]))
            .unwrap();
        let chain = tree.ancestor_chain(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 7));
        assert_eq!(tree.get_node(chain[0]).oid, oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 7));
        assert!(chain.len() > 1);
    }
}
