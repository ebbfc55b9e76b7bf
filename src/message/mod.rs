//! SNMP message engine: PDU wire codec, version headers, USM auth.

pub mod engine;
pub mod header;
pub mod pdu_codec;
pub mod trap_mux;
pub mod usm;

pub use engine::{parse_message, DecodedMessage};
pub use header::{HeaderData, SnmpVersion, UsmSecurityParameters};
pub use trap_mux::{TrapMuxRecord, MULTIPLEXER_PORT};
