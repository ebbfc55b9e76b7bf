//! In-memory MIB repository: arena tree, linking, name lookup, value
//! formatting.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::oid::Oid;

use super::node::{MibMacro, MibNode, NodeId};
use super::parser::{ParsedModule, Parser, RawNode, RawType};
use super::types::{MibType, Restriction, TypeId};

pub const ROOT_CCITT: NodeId = 0;
pub const ROOT_ISO: NodeId = 1;
pub const ROOT_JOINT_ISO_CCITT: NodeId = 2;

/// Result of a successful [`Repository::lookup`]: the matched node and
/// the offset in the input string where a trailing numeric suffix began
/// (`None` if the whole input resolved to the node).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupHit {
    pub node: NodeId,
    pub suffix_offset: Option<usize>,
}

pub struct Repository {
    nodes: Vec<MibNode>,
    types: Vec<MibType>,
    /// label -> node, or `None` if the label is ambiguous.
    label_index: HashMap<String, Option<NodeId>>,
    type_index: HashMap<String, TypeId>,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    pub fn new() -> Self {
        let mut nodes = Vec::new();
        nodes.push(MibNode::synthetic_root("ccitt", 0));
        nodes.push(MibNode::synthetic_root("iso", 1));
        nodes.push(MibNode::synthetic_root("joint-iso-ccitt", 2));
        let mut label_index = HashMap::new();
        label_index.insert("ccitt".to_string(), Some(ROOT_CCITT));
        label_index.insert("iso".to_string(), Some(ROOT_ISO));
        label_index.insert("joint-iso-ccitt".to_string(), Some(ROOT_JOINT_ISO_CCITT));
        Self {
            nodes,
            types: Vec::new(),
            label_index,
            type_index: HashMap::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> &MibNode {
        &self.nodes[id as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn type_by_id(&self, id: TypeId) -> Option<&MibType> {
        self.types.get(id as usize)
    }

    /// Parses `text` as one MIB module and merges it in.
    pub fn load_module(&mut self, text: &str, file: &str) -> Result<String> {
        let mut parser = Parser::new(text, file)?;
        let parsed = parser.parse_module()?;
        self.merge(parsed)
    }

    fn merge(&mut self, parsed: ParsedModule) -> Result<String> {
        let name = parsed.name.clone();
        for t in parsed.types {
            self.register_type(t);
        }
        self.link(parsed.nodes)?;
        Ok(name)
    }

    fn register_type(&mut self, raw: RawType) {
        let id = self.types.len() as TypeId;
        let mt = MibType {
            name: raw.name.clone(),
            module: raw.module.clone(),
            base_syntax: raw.base_syntax,
            display_hint: raw.display_hint,
            restriction: raw.restriction,
            status: raw.status,
        };
        let (bare, qualified) = mt.keys();
        self.types.push(mt);
        self.type_index.entry(bare).or_insert(id);
        self.type_index.insert(qualified, id);
    }

    /// Links raw parsed nodes into the tree: (1) bucket every node by its
    /// parent label, (2) recursive descent from each root draining buckets
    /// in sub-id order, (3) repeat while progress is made, (4) anything
    /// left is a parent-resolution error.
    fn link(&mut self, raw_nodes: Vec<RawNode>) -> Result<()> {
        let mut buckets: HashMap<String, Vec<RawNode>> = HashMap::new();
        for n in raw_nodes {
            buckets.entry(n.parent_name.clone()).or_default().push(n);
        }

        loop {
            let mut progressed = false;
            let existing_labels: Vec<String> = self
                .label_index
                .iter()
                .filter_map(|(label, id)| id.map(|_| label.clone()))
                .collect();
            for label in existing_labels {
                if let Some(mut children) = buckets.remove(&label) {
                    progressed = true;
                    children.sort_by_key(|n| n.sub_id);
                    let parent_id = match self.label_index.get(&label).copied().flatten() {
                        Some(id) => id,
                        None => continue,
                    };
                    for raw in children {
                        self.insert_child(parent_id, raw);
                    }
                }
            }
            if !progressed || buckets.is_empty() {
                break;
            }
        }

        if !buckets.is_empty() {
            let unresolved: Vec<String> = buckets.keys().cloned().collect();
            return Err(Error::UnresolvedParent(unresolved.join(", ")));
        }
        Ok(())
    }

    fn insert_child(&mut self, parent_id: NodeId, raw: RawNode) {
        let type_ref = raw.type_name.as_ref().and_then(|n| self.type_index.get(n).copied());
        let node = MibNode {
            sub_id: raw.sub_id,
            label: raw.label.clone(),
            parent: Some(parent_id),
            first_child: None,
            next_sibling: None,
            module: raw.module,
            type_ref,
            syntax_tag: raw.syntax_tag,
            access: raw.access,
            status: raw.status,
            macro_kind: raw.macro_kind,
            index_clause: raw.index_clause,
            implied: raw.implied,
            augments: raw.augments,
            source_file: raw.source_file,
            desc_offset: raw.desc_offset,
        };
        let new_id = self.nodes.len() as NodeId;
        self.nodes.push(node);

        // Insert into the parent's child chain in sub-id order.
        let mut cursor = self.nodes[parent_id as usize].first_child;
        let mut prev: Option<NodeId> = None;
        loop {
            match cursor {
                Some(c) if self.nodes[c as usize].sub_id < self.nodes[new_id as usize].sub_id => {
                    prev = Some(c);
                    cursor = self.nodes[c as usize].next_sibling;
                }
                _ => break,
            }
        }
        self.nodes[new_id as usize].next_sibling = cursor;
        match prev {
            Some(p) => self.nodes[p as usize].next_sibling = Some(new_id),
            None => self.nodes[parent_id as usize].first_child = Some(new_id),
        }

        match self.label_index.get(&raw.label) {
            None => {
                self.label_index.insert(raw.label, Some(new_id));
            }
            Some(_) => {
                // Collides with an existing label; mark ambiguous.
                self.label_index.insert(raw.label, None);
            }
        }
    }

    pub fn oid_of(&self, id: NodeId) -> Oid {
        let mut comps = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = &self.nodes[c as usize];
            comps.push(node.sub_id);
            cur = node.parent;
        }
        comps.reverse();
        Oid::new(comps)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.nodes[id as usize].first_child;
        while let Some(c) = cur {
            out.push(c);
            cur = self.nodes[c as usize].next_sibling;
        }
        out
    }

    /// Find the node matching an OID exactly, walking down from a root.
    pub fn find_by_oid(&self, oid: &Oid) -> Option<NodeId> {
        let comps = oid.as_slice();
        if comps.is_empty() {
            return None;
        }
        let mut cur = match comps[0] {
            0 => ROOT_CCITT,
            1 => ROOT_ISO,
            2 => ROOT_JOINT_ISO_CCITT,
            _ => return None,
        };
        for &sub in &comps[1..] {
            let found = self
                .children(cur)
                .into_iter()
                .find(|&c| self.nodes[c as usize].sub_id == sub)?;
            cur = found;
        }
        Some(cur)
    }

    /// Lookup by OID, bare label, or `label.suffix`.
    pub fn lookup(&self, input: &str) -> Result<LookupHit> {
        if let Ok(oid) = Oid::parse(input) {
            if let Some(node) = self.find_by_oid(&oid) {
                return Ok(LookupHit { node, suffix_offset: None });
            }
        }

        let (label, suffix) = match input.split_once('.') {
            Some((l, s)) => (l, Some(s)),
            None => (input, None),
        };

        let node = match self.label_index.get(label) {
            Some(Some(id)) => *id,
            Some(None) => self
                .structural_find(label)
                .ok_or_else(|| Error::mib_parse(format!("ambiguous label '{label}' not structurally resolvable")))?,
            None => return Err(Error::mib_parse(format!("unknown label '{label}'"))),
        };

        let suffix_offset = suffix.map(|_| label.len() + 1);
        Ok(LookupHit { node, suffix_offset })
    }

    /// Fallback structural descent for ambiguous labels: returns the
    /// first node found whose label matches, preferring shallower depth.
    fn structural_find(&self, label: &str) -> Option<NodeId> {
        (0..self.nodes.len() as NodeId).find(|&id| self.nodes[id as usize].label == label)
    }

    /// DISPLAY-HINT formatting entry point for a node's value.
    pub fn format_value(&self, node: NodeId, value: &crate::ber::Value) -> Result<String> {
        let node = &self.nodes[node as usize];
        let ty = node.type_ref.and_then(|t| self.type_by_id(t));

        match value {
            crate::ber::Value::Oid(oid) => Ok(self.format_oid_value(oid)),
            crate::ber::Value::OctetString(bytes) => {
                if let Some(ty) = ty {
                    if let Some(hint) = &ty.display_hint {
                        return super::types::format_octet_string(hint, bytes);
                    }
                }
                Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
            }
            crate::ber::Value::Integer(v) => {
                if let Some(ty) = ty {
                    if let Restriction::Enums(_) = &ty.restriction {
                        if let Some(label) = ty.restriction.label_for(*v as i64) {
                            return Ok(label.to_string());
                        }
                    }
                    if let Some(hint) = &ty.display_hint {
                        return super::types::format_integer(hint, *v as i64);
                    }
                }
                Ok(v.to_string())
            }
            other => Ok(format!("{other:?}")),
        }
    }

    /// Inverse of [`Self::format_value`]: parses `text` back into a value
    /// of the syntax named by `syntax_tag`, using `node`'s type (if any)
    /// for enum/DISPLAY-HINT scanning.
    pub fn scan_value(&self, node: NodeId, syntax_tag: u8, text: &str) -> Result<crate::ber::Value> {
        use crate::ber::{Value, TAG_INTEGER, TAG_OCTET_STRING, TAG_OID};
        let node_ref = &self.nodes[node as usize];
        let ty = node_ref.type_ref.and_then(|t| self.type_by_id(t));

        match syntax_tag {
            TAG_OID => {
                if let Ok(hit) = self.lookup(text) {
                    return Ok(Value::Oid(self.oid_of(hit.node)));
                }
                Ok(Value::Oid(Oid::parse(text)?))
            }
            TAG_OCTET_STRING => {
                if let Some(ty) = ty {
                    if let Some(hint) = &ty.display_hint {
                        return Ok(Value::OctetString(super::types::scan_octet_string(hint, text)?));
                    }
                }
                hex::decode(text)
                    .map(Value::OctetString)
                    .map_err(|e| Error::mib_parse(format!("invalid hex octet string '{text}': {e}")))
            }
            TAG_INTEGER => {
                if let Some(ty) = ty {
                    if let Restriction::Enums(_) = &ty.restriction {
                        if let Some(v) = ty.restriction.value_for(text) {
                            return Ok(Value::Integer(v as i32));
                        }
                    }
                    if let Some(hint) = &ty.display_hint {
                        return Ok(Value::Integer(super::types::scan_integer(hint, text)? as i32));
                    }
                }
                text.parse::<i32>()
                    .map(Value::Integer)
                    .map_err(|_| Error::mib_parse(format!("invalid integer '{text}'")))
            }
            other => Err(Error::mib_parse(format!("scan unsupported for syntax tag {other:#x}"))),
        }
    }

    /// OID values format as the longest-prefix node label plus any
    /// trailing numeric sub-ids.
    fn format_oid_value(&self, oid: &Oid) -> String {
        if let Some(node) = self.find_by_oid(oid) {
            return self.nodes[node as usize].label.clone();
        }
        let comps = oid.as_slice();
        let mut best: Option<(NodeId, usize)> = None;
        for depth in (1..comps.len()).rev() {
            let prefix = Oid::new(comps[..depth].to_vec());
            if let Some(node) = self.find_by_oid(&prefix) {
                best = Some((node, depth));
                break;
            }
        }
        match best {
            Some((node, depth)) => {
                let trailing: Vec<String> = comps[depth..].iter().map(|c| c.to_string()).collect();
                format!("{}.{}", self.nodes[node as usize].label, trailing.join("."))
            }
            None => oid.to_string(),
        }
    }

    pub fn type_table_len(&self) -> usize {
        self.types.len()
    }

    pub(crate) fn nodes_slice(&self) -> &[MibNode] {
        &self.nodes
    }

    pub(crate) fn types_slice(&self) -> &[MibType] {
        &self.types
    }

    pub(crate) fn from_raw_parts(nodes: Vec<MibNode>, types: Vec<MibType>) -> Self {
        let mut label_index = HashMap::new();
        for (id, node) in nodes.iter().enumerate() {
            match label_index.get(&node.label) {
                None => {
                    label_index.insert(node.label.clone(), Some(id as NodeId));
                }
                Some(_) => {
                    label_index.insert(node.label.clone(), None);
                }
            }
        }
        let mut type_index = HashMap::new();
        for (id, t) in types.iter().enumerate() {
            let (bare, qualified) = t.keys();
            type_index.entry(bare).or_insert(id as TypeId);
            type_index.insert(qualified, id as TypeId);
        }
        debug!(node_count = nodes.len(), type_count = types.len(), "loaded frozen MIB image");
        Self {
            nodes,
            types,
            label_index,
            type_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_repo() -> Repository {
        let mut repo = Repository::new();
        repo.load_module(
            "TEST DEFINITIONS ::= BEGIN\n\
             org OBJECT IDENTIFIER ::= { iso 3 }\n\
             dod OBJECT IDENTIFIER ::= { org 6 }\n\
             internet OBJECT IDENTIFIER ::= { dod 1 }\n\
             END\n",
            "test.mib",
        )
        .unwrap();
        repo
    }

    #[test]
    fn links_simple_chain() {
        let repo = sample_repo();
        let hit = repo.lookup("internet").unwrap();
        assert_eq!(repo.oid_of(hit.node), Oid::parse("1.3.6.1").unwrap());
    }

    #[test]
    fn lookup_accepts_oid_form() {
        let repo = sample_repo();
        let hit = repo.lookup("1.3.6.1").unwrap();
        assert_eq!(repo.node(hit.node).label, "internet");
    }

    #[test]
    fn unresolved_parent_errors() {
        let mut repo = Repository::new();
        let err = repo.load_module(
            "TEST DEFINITIONS ::= BEGIN\nfoo OBJECT IDENTIFIER ::= { nonexistentParent 1 }\nEND\n",
            "test.mib",
        );
        assert!(err.is_err());
    }

    #[test]
    fn oid_value_formats_via_longest_prefix() {
        let repo = sample_repo();
        let oid = Oid::parse("1.3.6.1.99").unwrap();
        let formatted = repo.format_oid_value(&oid);
        assert_eq!(formatted, "internet.99");
    }
}
