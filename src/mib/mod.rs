//! MIB module parser and in-memory repository.

pub mod frozen;
pub mod index;
pub mod node;
pub mod parser;
pub mod repository;
pub mod token;
pub mod types;

pub use node::{MibAccess, MibMacro, MibNode, MibStatus, NodeId};
pub use repository::{LookupHit, Repository};
pub use types::{MibType, Restriction, TypeId};
