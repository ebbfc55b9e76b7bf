//! INDEX clause pack/unpack for conceptual table rows.

use crate::ber::Value;
use crate::error::{Error, Result};

/// One INDEX column's packing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    IpAddress,
    OctetString { length_prefixed: bool },
    Oid { length_prefixed: bool },
}

/// Pack ordered column values into instance sub-ids.
pub fn pack(columns: &[ColumnKind], values: &[Value]) -> Result<Vec<u32>> {
    if columns.len() != values.len() {
        return Err(Error::index(format!(
            "expected {} index columns, got {} values",
            columns.len(),
            values.len()
        )));
    }
    let mut out = Vec::new();
    for (kind, value) in columns.iter().zip(values) {
        match (kind, value) {
            (ColumnKind::Integer, Value::Integer(v)) => out.push(*v as u32),
            (ColumnKind::Integer, Value::Gauge32(v) | Value::Unsigned32(v) | Value::TimeTicks(v)) => {
                out.push(*v)
            }
            (ColumnKind::IpAddress, Value::IpAddress(bytes)) => {
                out.extend(bytes.iter().map(|b| *b as u32))
            }
            (ColumnKind::OctetString { length_prefixed }, Value::OctetString(bytes)) => {
                if *length_prefixed {
                    out.push(bytes.len() as u32);
                }
                out.extend(bytes.iter().map(|b| *b as u32));
            }
            (ColumnKind::Oid { length_prefixed }, Value::Oid(oid)) => {
                let comps = oid.as_slice();
                if *length_prefixed {
                    out.push(comps.len() as u32);
                }
                out.extend_from_slice(comps);
            }
            _ => return Err(Error::index("index column type mismatch")),
        }
    }
    Ok(out)
}

/// Inverse of [`pack`]; a trailing suffix after all columns, or exhaustion
/// before all columns are satisfied, is an error.
pub fn unpack(columns: &[ColumnKind], sub_ids: &[u32]) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    let mut rest = sub_ids;
    for (i, kind) in columns.iter().enumerate() {
        let is_last = i == columns.len() - 1;
        match kind {
            ColumnKind::Integer => {
                let (v, tail) = take_one(rest)?;
                out.push(Value::Integer(v as i32));
                rest = tail;
            }
            ColumnKind::IpAddress => {
                if rest.len() < 4 {
                    return Err(Error::index("suffix exhausted before IpAddress index column"));
                }
                let mut bytes = [0u8; 4];
                for i in 0..4 {
                    bytes[i] = rest[i] as u8;
                }
                out.push(Value::IpAddress(bytes));
                rest = &rest[4..];
            }
            ColumnKind::OctetString { length_prefixed } => {
                let (len, tail) = if *length_prefixed {
                    let (l, t) = take_one(rest)?;
                    (l as usize, t)
                } else if is_last {
                    (rest.len(), rest)
                } else {
                    return Err(Error::index("non-terminal unsized OCTET STRING index column"));
                };
                if tail.len() < len {
                    return Err(Error::index("suffix exhausted before OCTET STRING index column"));
                }
                let bytes: Vec<u8> = tail[..len].iter().map(|v| *v as u8).collect();
                out.push(Value::OctetString(bytes));
                rest = &tail[len..];
            }
            ColumnKind::Oid { length_prefixed } => {
                let (len, tail) = if *length_prefixed {
                    let (l, t) = take_one(rest)?;
                    (l as usize, t)
                } else if is_last {
                    (rest.len(), rest)
                } else {
                    return Err(Error::index("non-terminal unsized OID index column"));
                };
                if tail.len() < len {
                    return Err(Error::index("suffix exhausted before OID index column"));
                }
                let comps = tail[..len].to_vec();
                out.push(Value::Oid(crate::oid::Oid::new(comps)));
                rest = &tail[len..];
            }
        }
    }
    if !rest.is_empty() {
        return Err(Error::index("trailing suffix after all index columns consumed"));
    }
    Ok(out)
}

fn take_one(rest: &[u32]) -> Result<(u32, &[u32])> {
    rest.split_first()
        .map(|(v, tail)| (*v, tail))
        .ok_or_else(|| Error::index("suffix exhausted before index column"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::Oid;

    #[test]
    fn integer_index_roundtrip() {
        let cols = [ColumnKind::Integer];
        let values = [Value::Integer(7)];
        let packed = pack(&cols, &values).unwrap();
        assert_eq!(packed, vec![7]);
        let unpacked = unpack(&cols, &packed).unwrap();
        assert_eq!(unpacked, values);
    }

    #[test]
    fn ip_address_index_roundtrip() {
        let cols = [ColumnKind::IpAddress];
        let values = [Value::IpAddress([10, 0, 0, 1])];
        let packed = pack(&cols, &values).unwrap();
        assert_eq!(packed, vec![10, 0, 0, 1]);
        assert_eq!(unpack(&cols, &packed).unwrap(), values);
    }

    #[test]
    fn octet_string_implied_last_column_omits_length() {
        let cols = [ColumnKind::OctetString { length_prefixed: false }];
        let values = [Value::OctetString(b"abc".to_vec())];
        let packed = pack(&cols, &values).unwrap();
        assert_eq!(packed, vec![b'a' as u32, b'b' as u32, b'c' as u32]);
        assert_eq!(unpack(&cols, &packed).unwrap(), values);
    }

    #[test]
    fn composite_index_multiple_columns() {
        let cols = [ColumnKind::Integer, ColumnKind::OctetString { length_prefixed: true }];
        let values = [Value::Integer(2), Value::OctetString(b"hi".to_vec())];
        let packed = pack(&cols, &values).unwrap();
        assert_eq!(packed, vec![2, 2, b'h' as u32, b'i' as u32]);
        assert_eq!(unpack(&cols, &packed).unwrap(), values);
    }

    #[test]
    fn trailing_suffix_is_error() {
        let cols = [ColumnKind::Integer];
        assert!(unpack(&cols, &[1, 2]).is_err());
    }

    #[test]
    fn oid_index_roundtrip() {
        let cols = [ColumnKind::Oid { length_prefixed: true }];
        let oid = Oid::parse("1.3.6.1").unwrap();
        let values = [Value::Oid(oid)];
        let packed = pack(&cols, &values).unwrap();
        assert_eq!(unpack(&cols, &packed).unwrap(), values);
    }
}
