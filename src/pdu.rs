//! PDU and Varbind data model.

use std::net::SocketAddr;

use crate::ber::{
    value::Value, TAG_PDU_GET, TAG_PDU_GET_BULK, TAG_PDU_GET_NEXT, TAG_PDU_INFORM,
    TAG_PDU_REPORT, TAG_PDU_RESPONSE, TAG_PDU_SET, TAG_PDU_TRAP_V1, TAG_PDU_TRAP_V2,
};
use crate::error::ErrorStatus;
use crate::oid::Oid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Get,
    GetNext,
    Response,
    Set,
    Trap1,
    GetBulk,
    Inform,
    Trap2,
    Report,
}

impl PduType {
    pub fn tag(self) -> u8 {
        match self {
            PduType::Get => TAG_PDU_GET,
            PduType::GetNext => TAG_PDU_GET_NEXT,
            PduType::Response => TAG_PDU_RESPONSE,
            PduType::Set => TAG_PDU_SET,
            PduType::Trap1 => TAG_PDU_TRAP_V1,
            PduType::GetBulk => TAG_PDU_GET_BULK,
            PduType::Inform => TAG_PDU_INFORM,
            PduType::Trap2 => TAG_PDU_TRAP_V2,
            PduType::Report => TAG_PDU_REPORT,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_PDU_GET => Some(PduType::Get),
            TAG_PDU_GET_NEXT => Some(PduType::GetNext),
            TAG_PDU_RESPONSE => Some(PduType::Response),
            TAG_PDU_SET => Some(PduType::Set),
            TAG_PDU_TRAP_V1 => Some(PduType::Trap1),
            TAG_PDU_GET_BULK => Some(PduType::GetBulk),
            TAG_PDU_INFORM => Some(PduType::Inform),
            TAG_PDU_TRAP_V2 => Some(PduType::Trap2),
            TAG_PDU_REPORT => Some(PduType::Report),
            _ => None,
        }
    }

    pub fn is_response_like(self) -> bool {
        matches!(self, PduType::Response | PduType::Report)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }
}

/// v1 trap fields, carried as an alternative PDU shape (RFC 1157 §4.1.6).
#[derive(Debug, Clone, PartialEq)]
pub struct TrapInfo {
    pub enterprise: Oid,
    pub agent_addr: [u8; 4],
    pub generic_trap: u32,
    pub specific_trap: u32,
    pub timestamp: u32,
}

#[derive(Debug, Clone)]
pub struct Pdu {
    pub peer: Option<SocketAddr>,
    pub pdu_type: PduType,
    pub request_id: i32,
    /// For GetBulk requests this field carries non-repeaters instead.
    pub error_status: u32,
    /// For GetBulk requests this field carries max-repetitions instead.
    pub error_index: u32,
    pub trap: Option<TrapInfo>,
    /// v3 scoped-PDU context; `None` for v1/v2c.
    pub context_engine_id: Option<Vec<u8>>,
    pub context_name: Option<String>,
    pub var_binds: Vec<VarBind>,
}

impl Pdu {
    pub fn new(pdu_type: PduType, request_id: i32) -> Self {
        Self {
            peer: None,
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            trap: None,
            context_engine_id: None,
            context_name: None,
            var_binds: Vec::new(),
        }
    }

    pub fn non_repeaters(&self) -> u32 {
        self.error_status
    }

    pub fn max_repetitions(&self) -> u32 {
        self.error_index
    }

    pub fn set_bulk_params(&mut self, non_repeaters: u32, max_repetitions: u32) {
        self.error_status = non_repeaters;
        self.error_index = max_repetitions;
    }

    pub fn status(&self) -> ErrorStatus {
        ErrorStatus::from_u32(self.error_status)
    }

    pub fn set_status(&mut self, status: ErrorStatus, index: u32) {
        self.error_status = status as u32;
        self.error_index = index;
    }
}
