//! Agent instance tree and get/getnext/set dispatch.

pub mod dispatch;
pub mod standard;
pub mod tree;
pub mod walk;

pub use dispatch::{get, get_next, set_pdu, GetNextOutcome, ReadOutcome, SetFailure};
pub use standard::{register_standard_instances, SnmpCounters, SystemIdentity};
pub use tree::{Binding, Event, EventKind, GetBinding, InstanceId, InstanceTree};
pub use walk::WalkDriver;
