//! An embeddable SNMP protocol engine.
//!
//! The crate covers the binary codec for ASN.1/BER as restricted by SNMP,
//! the MIB module parser and in-memory repository, and a transport-agnostic
//! message engine implementing the four SNMP applications (command
//! generator, command responder, notification originator, notification
//! receiver) across v1, v2c and v3/USM.
//!
//! The host embedding surface, logging backend selection, a CLI, and a
//! privileged trap-port multiplexer's co-process are out of scope; this
//! crate is a library, not an application.

pub mod agent;
pub mod ber;
pub mod engine;
pub mod error;
pub mod message;
pub mod mib;
pub mod oid;
pub mod pdu;
pub mod session;
pub mod tracker;

pub use engine::{Engine, SessionEvent, SessionEventKind, Transport, TrapMuxTransport, UdpTransport};
pub use error::{Error, Result};
pub use oid::Oid;
pub use pdu::{Pdu, PduType, VarBind};

/// Crate version, exposed the way embedding hosts typically want it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
