//! Dynamically tagged SNMP value: a proper tagged sum type so the
//! compiler enforces at each call site that the right encode/decode path
//! runs for the right syntax, instead of a raw tag-plus-bytes pair.

use crate::error::{Error, Result};
use crate::oid::Oid;

use super::reader::Reader;
use super::writer::Writer;
use super::{
    TAG_COUNTER32, TAG_COUNTER64, TAG_END_OF_MIB_VIEW, TAG_GAUGE32, TAG_INTEGER, TAG_IP_ADDRESS,
    TAG_NO_SUCH_INSTANCE, TAG_NO_SUCH_OBJECT, TAG_NULL, TAG_OCTET_STRING, TAG_OID, TAG_OPAQUE,
    TAG_TIME_TICKS, TAG_UNSIGNED32,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    Counter32(u32),
    Gauge32(u32),
    Unsigned32(u32),
    Counter64(u64),
    TimeTicks(u32),
    IpAddress([u8; 4]),
    Oid(Oid),
    OctetString(Vec<u8>),
    Opaque(Vec<u8>),
    Null,
    /// Exception varbinds: context-class tag, empty value.
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    pub fn syntax_tag(&self) -> u8 {
        match self {
            Value::Integer(_) => TAG_INTEGER,
            Value::Counter32(_) => TAG_COUNTER32,
            Value::Gauge32(_) => TAG_GAUGE32,
            Value::Unsigned32(_) => TAG_UNSIGNED32,
            Value::Counter64(_) => TAG_COUNTER64,
            Value::TimeTicks(_) => TAG_TIME_TICKS,
            Value::IpAddress(_) => TAG_IP_ADDRESS,
            Value::Oid(_) => TAG_OID,
            Value::OctetString(_) => TAG_OCTET_STRING,
            Value::Opaque(_) => TAG_OPAQUE,
            Value::Null => TAG_NULL,
            Value::NoSuchObject => TAG_NO_SUCH_OBJECT,
            Value::NoSuchInstance => TAG_NO_SUCH_INSTANCE,
            Value::EndOfMibView => TAG_END_OF_MIB_VIEW,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    pub fn encode(&self, w: &mut Writer) -> Result<()> {
        match self {
            Value::Integer(v) => w.write_integer(*v as i64),
            Value::Counter32(v) => w.write_unsigned32(TAG_COUNTER32, *v),
            Value::Gauge32(v) => w.write_unsigned32(TAG_GAUGE32, *v),
            Value::Unsigned32(v) => w.write_unsigned32(TAG_UNSIGNED32, *v),
            Value::TimeTicks(v) => w.write_unsigned32(TAG_TIME_TICKS, *v),
            Value::Counter64(v) => w.write_counter64(*v),
            Value::IpAddress(bytes) => w.write_tlv(TAG_IP_ADDRESS, bytes),
            Value::Oid(oid) => w.write_oid(oid)?,
            Value::OctetString(bytes) => w.write_octet_string(bytes),
            Value::Opaque(bytes) => w.write_tlv(TAG_OPAQUE, bytes),
            Value::Null => w.write_null(),
            Value::NoSuchObject => w.write_tlv(TAG_NO_SUCH_OBJECT, &[]),
            Value::NoSuchInstance => w.write_tlv(TAG_NO_SUCH_INSTANCE, &[]),
            Value::EndOfMibView => w.write_tlv(TAG_END_OF_MIB_VIEW, &[]),
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader) -> Result<Value> {
        let tag = r.peek_tag()?;
        match tag.raw {
            TAG_INTEGER => Ok(Value::Integer(r.read_integer()? as i32)),
            TAG_COUNTER32 => Ok(Value::Counter32(r.read_unsigned32(TAG_COUNTER32)?)),
            TAG_GAUGE32 => Ok(Value::Gauge32(r.read_unsigned32(TAG_GAUGE32)?)),
            TAG_TIME_TICKS => Ok(Value::TimeTicks(r.read_unsigned32(TAG_TIME_TICKS)?)),
            TAG_COUNTER64 => Ok(Value::Counter64(r.read_counter64()?)),
            TAG_IP_ADDRESS => {
                let content = r.expect_tlv(TAG_IP_ADDRESS)?;
                if content.len() != 4 {
                    return Err(Error::ber(format!(
                        "invalid length {} for tag IpAddress (expected 4)",
                        content.len()
                    )));
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(content);
                Ok(Value::IpAddress(bytes))
            }
            TAG_OID => Ok(Value::Oid(r.read_oid()?)),
            TAG_OCTET_STRING => Ok(Value::OctetString(r.read_octet_string()?)),
            TAG_OPAQUE => Ok(Value::Opaque(r.expect_tlv(TAG_OPAQUE)?.to_vec())),
            TAG_NULL => {
                r.read_null()?;
                Ok(Value::Null)
            }
            TAG_NO_SUCH_OBJECT => {
                r.expect_tlv(TAG_NO_SUCH_OBJECT)?;
                Ok(Value::NoSuchObject)
            }
            TAG_NO_SUCH_INSTANCE => {
                r.expect_tlv(TAG_NO_SUCH_INSTANCE)?;
                Ok(Value::NoSuchInstance)
            }
            TAG_END_OF_MIB_VIEW => {
                r.expect_tlv(TAG_END_OF_MIB_VIEW)?;
                Ok(Value::EndOfMibView)
            }
            other => Err(Error::ber(format!(
                "invalid tag {other:#04x} at byte {} (expected a known SNMP syntax)",
                r.position()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let mut w = Writer::new();
        v.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Value::decode(&mut r).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn all_syntaxes_roundtrip() {
        roundtrip(Value::Integer(-42));
        roundtrip(Value::Counter32(0xFFFF_FFFF));
        roundtrip(Value::Gauge32(100));
        roundtrip(Value::TimeTicks(12345));
        roundtrip(Value::Counter64(u64::MAX));
        roundtrip(Value::IpAddress([10, 0, 0, 1]));
        roundtrip(Value::Oid(Oid::parse("1.3.6.1.2.1.1.3.0").unwrap()));
        roundtrip(Value::OctetString(b"hello".to_vec()));
        roundtrip(Value::Opaque(vec![1, 2, 3]));
        roundtrip(Value::Null);
        roundtrip(Value::NoSuchObject);
        roundtrip(Value::NoSuchInstance);
        roundtrip(Value::EndOfMibView);
    }

    #[test]
    fn ip_address_rejects_wrong_length() {
        let mut w = Writer::new();
        w.write_tlv(TAG_IP_ADDRESS, &[1, 2, 3]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(Value::decode(&mut r).is_err());
    }
}
