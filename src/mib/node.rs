//! MIB tree node.
//!
//! `NodeId` is a `u32` index into the repository's `Vec<MibNode>`; siblings
//! and children are chained by index into that arena rather than by
//! pointer, so the whole tree can be built, walked, and frozen without any
//! unsafe aliasing.

use super::types::TypeId;

pub type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibAccess {
    NotAccessible,
    Notify,
    ReadOnly,
    ReadWrite,
    ReadCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibStatus {
    Current,
    Deprecated,
    Obsolete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibMacro {
    ObjectType,
    ObjectIdentity,
    ModuleIdentity,
    NotificationType,
    TrapType,
    ObjectGroup,
    NotificationGroup,
    ModuleCompliance,
    AgentCapabilities,
    TextualConvention,
    TypeAssignment,
    ValueAssignment,
}

#[derive(Debug, Clone)]
pub struct MibNode {
    pub sub_id: u32,
    pub label: String,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub module: String,
    pub type_ref: Option<TypeId>,
    pub syntax_tag: u8,
    pub access: MibAccess,
    pub status: MibStatus,
    pub macro_kind: MibMacro,
    pub index_clause: Option<String>,
    pub implied: bool,
    pub augments: bool,
    pub source_file: String,
    pub desc_offset: Option<(String, u64)>,
}

impl MibNode {
    pub fn synthetic_root(label: &str, sub_id: u32) -> Self {
        Self {
            sub_id,
            label: label.to_string(),
            parent: None,
            first_child: None,
            next_sibling: None,
            module: "<root>".to_string(),
            type_ref: None,
            syntax_tag: 0,
            access: MibAccess::NotAccessible,
            status: MibStatus::Current,
            macro_kind: MibMacro::ValueAssignment,
            index_clause: None,
            implied: false,
            augments: false,
            source_file: String::new(),
            desc_offset: None,
        }
    }

    /// A conceptual-table `row` node has SEQUENCE syntax, its parent has
    /// SEQUENCE OF syntax.
    pub fn is_row(&self) -> bool {
        self.syntax_tag == crate::ber::TAG_SEQUENCE && self.macro_kind == MibMacro::ObjectType
    }
}
