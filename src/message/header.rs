//! Version-specific message envelope.

use crate::ber::{Reader, Writer, TAG_OCTET_STRING, TAG_SEQUENCE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

impl SnmpVersion {
    pub fn wire_value(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
            SnmpVersion::V3 => 3,
        }
    }

    pub fn from_wire_value(v: i64) -> Result<Self> {
        match v {
            0 => Ok(SnmpVersion::V1),
            1 => Ok(SnmpVersion::V2c),
            3 => Ok(SnmpVersion::V3),
            other => Err(Error::dispatch(format!("unsupported SNMP version {other}"))),
        }
    }
}

/// v3 `HeaderData = SEQUENCE { msgID, msgMaxSize, msgFlags, msgSecurityModel }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderData {
    pub msg_id: i64,
    pub msg_max_size: i64,
    pub auth_flag: bool,
    pub priv_flag: bool,
    pub reportable_flag: bool,
    pub security_model: i64,
}

const FLAG_AUTH: u8 = 0x01;
const FLAG_PRIV: u8 = 0x02;
const FLAG_REPORTABLE: u8 = 0x04;

/// USM security model identifier (RFC 3411).
pub const SECURITY_MODEL_USM: i64 = 3;

impl HeaderData {
    pub fn encode(&self, w: &mut Writer) {
        let tok = w.begin_seq(TAG_SEQUENCE);
        w.write_integer(self.msg_id);
        w.write_integer(self.msg_max_size);
        let mut flags = 0u8;
        if self.auth_flag {
            flags |= FLAG_AUTH;
        }
        if self.priv_flag {
            flags |= FLAG_PRIV;
        }
        if self.reportable_flag {
            flags |= FLAG_REPORTABLE;
        }
        w.write_octet_string(&[flags]);
        w.write_integer(self.security_model);
        w.end_seq(tok);
    }

    pub fn decode(r: &mut Reader) -> Result<Self> {
        let mut seq = r.read_sequence()?;
        let msg_id = seq.read_integer()?;
        let msg_max_size = seq.read_integer()?;
        let flag_bytes = seq.read_octet_string()?;
        let flags = *flag_bytes
            .first()
            .ok_or_else(|| Error::ber("msgFlags octet string must carry one byte"))?;
        let security_model = seq.read_integer()?;
        Ok(Self {
            msg_id,
            msg_max_size,
            auth_flag: flags & FLAG_AUTH != 0,
            priv_flag: flags & FLAG_PRIV != 0,
            reportable_flag: flags & FLAG_REPORTABLE != 0,
            security_model,
        })
    }
}

/// `UsmSecurityParameters` SEQUENCE, carried as the content of the
/// `msgSecurityParameters` OCTET STRING.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsmSecurityParameters {
    pub authoritative_engine_id: Vec<u8>,
    pub authoritative_engine_boots: i64,
    pub authoritative_engine_time: i64,
    pub user_name: String,
    pub auth_parameters: Vec<u8>,
    pub priv_parameters: Vec<u8>,
}

impl UsmSecurityParameters {
    pub fn encode(&self, w: &mut Writer) {
        let tok = w.begin_seq(TAG_SEQUENCE);
        w.write_octet_string(&self.authoritative_engine_id);
        w.write_integer(self.authoritative_engine_boots);
        w.write_integer(self.authoritative_engine_time);
        w.write_octet_string(self.user_name.as_bytes());
        w.write_octet_string(&self.auth_parameters);
        w.write_octet_string(&self.priv_parameters);
        w.end_seq(tok);
    }

    pub fn decode(r: &mut Reader) -> Result<Self> {
        let mut seq = r.read_sequence()?;
        let authoritative_engine_id = seq.read_octet_string()?;
        let authoritative_engine_boots = seq.read_integer()?;
        let authoritative_engine_time = seq.read_integer()?;
        let user_name = String::from_utf8_lossy(&seq.read_octet_string()?).into_owned();
        let auth_parameters = seq.read_octet_string()?;
        let priv_parameters = seq.read_octet_string()?;
        Ok(Self {
            authoritative_engine_id,
            authoritative_engine_boots,
            authoritative_engine_time,
            user_name,
            auth_parameters,
            priv_parameters,
        })
    }

    /// Encodes this SEQUENCE standalone, for wrapping in the outer
    /// `msgSecurityParameters` OCTET STRING.
    pub fn encode_wrapped(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Like [`Self::encode_wrapped`] but also returns the byte offset of
    /// `auth_parameters`'s content within the returned buffer, so a
    /// caller embedding this blob elsewhere can locate the field to
    /// finalize authentication after the fact.
    pub fn encode_wrapped_with_auth_offset(&self) -> (Vec<u8>, usize) {
        let mut w = Writer::new();
        let tok = w.begin_seq(TAG_SEQUENCE);
        w.write_octet_string(&self.authoritative_engine_id);
        w.write_integer(self.authoritative_engine_boots);
        w.write_integer(self.authoritative_engine_time);
        w.write_octet_string(self.user_name.as_bytes());
        // `write_octet_string` always uses the short length form for our
        // fixed 12-octet auth-parameters field, so its content begins
        // exactly 2 bytes (tag + length) after the current position.
        let auth_offset = w.position() + 2;
        w.write_octet_string(&self.auth_parameters);
        w.write_octet_string(&self.priv_parameters);
        let pre_patch_len = w.position();
        w.end_seq(tok);
        let bytes = w.into_bytes();
        // `end_seq` may have spliced extra length-of-length bytes in near
        // the start of the buffer (long-form SEQUENCE length); account for
        // that shift since `auth_offset` was captured before the patch.
        let shift = bytes.len() - pre_patch_len;
        (bytes, auth_offset + shift)
    }

    pub fn decode_wrapped(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        Self::decode(&mut r)
    }
}

pub fn write_security_params_octet_string(w: &mut Writer, params: &UsmSecurityParameters) {
    let encoded = params.encode_wrapped();
    w.write_tlv(TAG_OCTET_STRING, &encoded);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_data_roundtrip() {
        let hd = HeaderData {
            msg_id: 123,
            msg_max_size: 1500,
            auth_flag: true,
            priv_flag: false,
            reportable_flag: true,
            security_model: SECURITY_MODEL_USM,
        };
        let mut w = Writer::new();
        hd.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(HeaderData::decode(&mut r).unwrap(), hd);
    }

    #[test]
    fn usm_security_parameters_roundtrip() {
        let params = UsmSecurityParameters {
            authoritative_engine_id: vec![0x80, 0x00, 0x00, 0x00],
            authoritative_engine_boots: 1,
            authoritative_engine_time: 42,
            user_name: "admin".to_string(),
            auth_parameters: vec![0u8; 12],
            priv_parameters: Vec::new(),
        };
        let encoded = params.encode_wrapped();
        let decoded = UsmSecurityParameters::decode_wrapped(&encoded).unwrap();
        assert_eq!(decoded, params);
    }
}
