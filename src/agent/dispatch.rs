//! get/getnext/set dispatch with two-phase commit.

use crate::ber::Value;
use crate::error::ErrorStatus;
use crate::mib::{MibAccess, MibMacro, Repository};
use crate::oid::Oid;

use super::tree::{Event, EventKind, InstanceId, InstanceTree};

/// Outcome of a single-column `get`.
pub enum ReadOutcome {
    Value(Value),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

/// Outcome of a single-column `getnext`: unlike `get`, the resolved
/// instance's OID is not known to the caller in advance, so it travels
/// alongside the value.
pub enum GetNextOutcome {
    Value(Oid, Value),
    EndOfMibView,
}

/// `get(oid)`: exact match, firing the leaf's own `get` binding before
/// returning the cell value.
pub fn get(tree: &mut InstanceTree, repo: &Repository, oid: &Oid) -> ReadOutcome {
    match tree.find(oid) {
        Some(id) => ReadOutcome::Value(fire_get_and_resolve(tree, id, oid.clone())),
        None => classify_missing(repo, oid),
    }
}

/// `getnext(oid)`: lexicographic successor with syntax ≠ none, firing
/// the successor's `get` binding.
pub fn get_next(tree: &mut InstanceTree, oid: &Oid) -> GetNextOutcome {
    match tree.successor(oid) {
        Some(id) => {
            let instance = tree.get_node(id).oid.clone();
            let value = fire_get_and_resolve(tree, id, instance.clone());
            GetNextOutcome::Value(instance, value)
        }
        None => GetNextOutcome::EndOfMibView,
    }
}

/// Fires `id`'s `get` bindings and returns the value to report: a
/// binding's override if one fired, else the cell's stored value. An
/// override is written back into the cell so it is visible to any later
/// read that does not re-fire the binding.
fn fire_get_and_resolve(tree: &mut InstanceTree, id: InstanceId, instance: Oid) -> Value {
    let cell_value = tree.get_node(id).value.clone().unwrap_or(Value::Null);
    let ev = Event { kind: EventKind::Get, instance, value: Some(cell_value.clone()), prior: None };
    match tree.get_node(id).bindings.fire_get(&ev) {
        Ok(Some(live)) => {
            tree.get_node_mut(id).value = Some(live.clone());
            live
        }
        _ => cell_value,
    }
}

/// Distinguishes `noSuchObject` (nothing registered under this name at
/// all) from `noSuchInstance` (the MIB knows this as a scalar/columnar
/// leaf, but no instance has been created) by walking OID prefixes
/// against the MIB repository.
fn classify_missing(repo: &Repository, oid: &Oid) -> ReadOutcome {
    let comps = oid.as_slice();
    for depth in (1..=comps.len()).rev() {
        let prefix = Oid::new(comps[..depth].to_vec());
        if let Some(node_id) = repo.find_by_oid(&prefix) {
            let node = repo.node(node_id);
            if node.macro_kind == MibMacro::ObjectType && node.access != MibAccess::NotAccessible {
                return ReadOutcome::NoSuchInstance;
            }
            break;
        }
    }
    ReadOutcome::NoSuchObject
}

/// Looks up the MIB object's declared access/syntax for a to-be-created
/// instance, by walking OID prefixes.
fn column_declaration(repo: &Repository, oid: &Oid) -> Option<(MibAccess, u8)> {
    let comps = oid.as_slice();
    for depth in (1..=comps.len()).rev() {
        let prefix = Oid::new(comps[..depth].to_vec());
        if let Some(node_id) = repo.find_by_oid(&prefix) {
            let node = repo.node(node_id);
            if node.macro_kind == MibMacro::ObjectType {
                return Some((node.access, node.syntax_tag));
            }
            return None;
        }
    }
    None
}

#[derive(Debug, Clone, Copy)]
pub struct SetFailure {
    pub index: u32,
    pub status: ErrorStatus,
}

/// `set(oid,value)` over a whole PDU's varbind list: walks the ancestor
/// chain of each column firing `set` then `check`; only after every
/// column in the request passes `check` do `commit` bindings fire, in
/// varbind order. A failure at or before commit rolls back every column
/// processed so far, in reverse order, restoring prior cell values.
pub fn set_pdu(
    tree: &mut InstanceTree,
    repo: &Repository,
    assignments: &[(Oid, Value)],
) -> Result<Vec<Value>, SetFailure> {
    let mut touched: Vec<(InstanceId, Option<Value>)> = Vec::new();

    for (i, (oid, new_value)) in assignments.iter().enumerate() {
        let idx = (i + 1) as u32;

        let inst_id = match tree.find(oid) {
            Some(id) => id,
            None => match column_declaration(repo, oid) {
                Some((MibAccess::ReadCreate, syntax_tag)) => {
                    match tree.create_node(oid.clone(), syntax_tag, MibAccess::ReadCreate, Value::Null) {
                        Ok(id) => id,
                        Err(_) => {
                            rollback(tree, &touched);
                            return Err(SetFailure { index: idx, status: ErrorStatus::ResourceUnavailable });
                        }
                    }
                }
                Some(_) => {
                    rollback(tree, &touched);
                    return Err(SetFailure { index: idx, status: ErrorStatus::NotWritable });
                }
                None => {
                    rollback(tree, &touched);
                    return Err(SetFailure { index: idx, status: ErrorStatus::NoCreation });
                }
            },
        };

        let access = tree.get_node(inst_id).access;
        if !matches!(access, MibAccess::ReadWrite | MibAccess::ReadCreate) {
            rollback(tree, &touched);
            return Err(SetFailure { index: idx, status: ErrorStatus::NotWritable });
        }

        let prior = tree.get_node(inst_id).value.clone();
        tree.get_node_mut(inst_id).value = Some(new_value.clone());
        touched.push((inst_id, prior.clone()));

        let chain = tree.ancestor_chain(oid);
        let mut failed = false;
        for anc in &chain {
            let ev_set = Event {
                kind: EventKind::Set,
                instance: oid.clone(),
                value: Some(new_value.clone()),
                prior: prior.clone(),
            };
            if tree.get_node(*anc).bindings.fire_set(&ev_set).is_err() {
                failed = true;
                break;
            }
            let ev_check = Event {
                kind: EventKind::Check,
                instance: oid.clone(),
                value: Some(new_value.clone()),
                prior: prior.clone(),
            };
            if tree.get_node(*anc).bindings.fire_check(&ev_check).is_err() {
                failed = true;
                break;
            }
        }
        if failed {
            rollback(tree, &touched);
            return Err(SetFailure { index: idx, status: ErrorStatus::InconsistentValue });
        }
    }

    for (i, (oid, new_value)) in assignments.iter().enumerate() {
        let chain = tree.ancestor_chain(oid);
        for anc in &chain {
            let ev = Event {
                kind: EventKind::Commit,
                instance: oid.clone(),
                value: Some(new_value.clone()),
                prior: None,
            };
            if tree.get_node(*anc).bindings.fire_commit(&ev).is_err() {
                rollback(tree, &touched);
                return Err(SetFailure { index: (i + 1) as u32, status: ErrorStatus::CommitFailed });
            }
        }
    }

    Ok(assignments.iter().map(|(_, v)| v.clone()).collect())
}

/// Restores prior cell values and fires `rollback` bindings for every
/// touched column, in reverse processing order.
fn rollback(tree: &mut InstanceTree, touched: &[(InstanceId, Option<Value>)]) {
    for (id, prior) in touched.iter().rev() {
        let oid = tree.get_node(*id).oid.clone();
        let current = tree.get_node(*id).value.clone();
        tree.get_node_mut(*id).value = prior.clone();
        let chain = tree.ancestor_chain(&oid);
        for anc in chain.iter().rev() {
            let ev = Event {
                kind: EventKind::Rollback,
                instance: oid.clone(),
                value: prior.clone(),
                prior: current.clone(),
            };
            let _ = tree.get_node(*anc).bindings.fire_rollback(&ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    #[test]
    fn get_missing_with_no_mib_knowledge_is_no_such_object() {
        let mut tree = InstanceTree::new();
        let repo = Repository::new();
        match get(&mut tree, &repo, &oid!(1, 3, 6, 1, 4, 1, 9999, 1, 0)) {
            ReadOutcome::NoSuchObject => {}
            _ => panic!("expected NoSuchObject"),
        }
    }

    #[test]
    fn get_next_past_end_is_end_of_mib_view() {
        let mut tree = InstanceTree::new();
        tree.create_node(oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), 0x02, MibAccess::ReadOnly, Value::Integer(7))
            .unwrap();
        match get_next(&mut tree, &oid!(1, 3, 6, 1, 4, 1, 1, 1, 0)) {
            GetNextOutcome::EndOfMibView => {}
            _ => panic!("expected EndOfMibView"),
        }
    }

    #[test]
    fn set_writes_value_and_fires_bindings_in_order() {
        let mut tree = InstanceTree::new();
        let repo = Repository::new();
        let id = tree
            .create_node(oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), 0x02, MibAccess::ReadWrite, Value::Integer(0))
            .unwrap();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        tree.get_node_mut(id).bindings.set.push(Box::new(move |_| {
            o1.lock().unwrap().push("set");
            Ok(())
        }));
        let o2 = order.clone();
        tree.get_node_mut(id).bindings.check.push(Box::new(move |_| {
            o2.lock().unwrap().push("check");
            Ok(())
        }));
        let o3 = order.clone();
        tree.get_node_mut(id).bindings.commit.push(Box::new(move |_| {
            o3.lock().unwrap().push("commit");
            Ok(())
        }));

        let result = set_pdu(&mut tree, &repo, &[(oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), Value::Integer(42))]);
        assert!(result.is_ok());
        assert_eq!(tree.get_node(id).value, Some(Value::Integer(42)));
        assert_eq!(*order.lock().unwrap(), vec!["set", "check", "commit"]);
    }

    #[test]
    fn failed_check_rolls_back_and_restores_prior_value() {
        let mut tree = InstanceTree::new();
        let repo = Repository::new();
        let id = tree
            .create_node(oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), 0x02, MibAccess::ReadWrite, Value::Integer(5))
            .unwrap();
        tree.get_node_mut(id).bindings.check.push(Box::new(|_| Err(crate::error::Error::dispatch("rejected"))));
        let rolled_back = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let rb = rolled_back.clone();
        tree.get_node_mut(id).bindings.rollback.push(Box::new(move |_| {
            rb.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }));

        let result = set_pdu(&mut tree, &repo, &[(oid!(1, 3, 6, 1, 4, 1, 1, 1, 0), Value::Integer(42))]);
        assert!(result.is_err());
        assert!(rolled_back.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(tree.get_node(id).value, Some(Value::Integer(5)));
    }

    #[test]
    fn set_to_unregistered_leaf_with_no_mib_entry_is_no_creation() {
        let mut tree = InstanceTree::new();
        let repo = Repository::new();
        let result = set_pdu(&mut tree, &repo, &[(oid!(1, 3, 6, 1, 4, 1, 9999, 1, 0), Value::Integer(1))]);
        match result {
            Err(SetFailure { status: ErrorStatus::NoCreation, .. }) => {}
            _ => panic!("expected NoCreation"),
        }
    }

    #[test]
    fn get_binding_override_replaces_cell_value_and_is_cached_back() {
        let mut tree = InstanceTree::new();
        let repo = Repository::new();
        let oid = oid!(1, 3, 6, 1, 2, 1, 1, 3, 0);
        let id = tree.create_node(oid.clone(), 0x43, MibAccess::ReadOnly, Value::TimeTicks(0)).unwrap();
        tree.get_node_mut(id).bindings.get.push(Box::new(|_ev| Ok(Some(Value::TimeTicks(4242)))));

        match get(&mut tree, &repo, &oid) {
            ReadOutcome::Value(Value::TimeTicks(ticks)) => assert_eq!(ticks, 4242),
            _ => panic!("expected overridden TimeTicks value"),
        }
        assert_eq!(tree.get_node(id).value, Some(Value::TimeTicks(4242)));
    }
}
