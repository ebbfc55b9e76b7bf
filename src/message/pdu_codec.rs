//! PDU ↔ BER codec: `SEQUENCE { request-id, error-status, error-index,
//! varbind-list }` inside a context-tagged constructed wrapper. v1 traps use the distinct RFC 1157 §4.1.6 shape.

use crate::ber::{Reader, Value, Writer, TAG_SEQUENCE};
use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType, TrapInfo, VarBind};

pub fn encode_pdu(pdu: &Pdu, w: &mut Writer) -> Result<()> {
    let tok = w.begin_seq(pdu.pdu_type.tag());
    if pdu.pdu_type == PduType::Trap1 {
        encode_trap1_body(pdu, w)?;
    } else {
        w.write_integer(pdu.request_id as i64);
        w.write_integer(pdu.error_status as i64);
        w.write_integer(pdu.error_index as i64);
        encode_varbind_list(&pdu.var_binds, w)?;
    }
    w.end_seq(tok);
    Ok(())
}

fn encode_trap1_body(pdu: &Pdu, w: &mut Writer) -> Result<()> {
    let trap = pdu
        .trap
        .as_ref()
        .ok_or_else(|| Error::dispatch("trap1 PDU missing TrapInfo"))?;
    w.write_oid(&trap.enterprise)?;
    w.write_tlv(crate::ber::TAG_IP_ADDRESS, &trap.agent_addr);
    w.write_integer(trap.generic_trap as i64);
    w.write_integer(trap.specific_trap as i64);
    w.write_unsigned32(crate::ber::TAG_TIME_TICKS, trap.timestamp);
    encode_varbind_list(&pdu.var_binds, w)?;
    Ok(())
}

fn encode_varbind_list(var_binds: &[VarBind], w: &mut Writer) -> Result<()> {
    let list_tok = w.begin_seq(TAG_SEQUENCE);
    for vb in var_binds {
        let vb_tok = w.begin_seq(TAG_SEQUENCE);
        w.write_oid(&vb.oid)?;
        vb.value.encode(w)?;
        w.end_seq(vb_tok);
    }
    w.end_seq(list_tok);
    Ok(())
}

pub fn decode_pdu(r: &mut Reader) -> Result<Pdu> {
    let tag = r.peek_tag()?;
    let pdu_type = PduType::from_tag(tag.raw)
        .ok_or_else(|| Error::ber(format!("invalid tag {:#04x}: not a known PDU type", tag.raw)))?;
    let mut body = r.read_sequence_tagged(tag.raw)?;

    if pdu_type == PduType::Trap1 {
        let enterprise = body.read_oid()?;
        let agent_addr_bytes = body.expect_tlv(crate::ber::TAG_IP_ADDRESS)?;
        if agent_addr_bytes.len() != 4 {
            return Err(Error::ber("invalid length for tag IpAddress (expected 4)"));
        }
        let mut agent_addr = [0u8; 4];
        agent_addr.copy_from_slice(agent_addr_bytes);
        let generic_trap = body.read_integer()? as u32;
        let specific_trap = body.read_integer()? as u32;
        let timestamp = body.read_unsigned32(crate::ber::TAG_TIME_TICKS)?;
        let var_binds = decode_varbind_list(&mut body)?;
        let mut pdu = Pdu::new(PduType::Trap1, 0);
        pdu.trap = Some(TrapInfo {
            enterprise,
            agent_addr,
            generic_trap,
            specific_trap,
            timestamp,
        });
        pdu.var_binds = var_binds;
        return Ok(pdu);
    }

    let request_id = body.read_integer()? as i32;
    let error_status = body.read_integer()? as u32;
    let error_index = body.read_integer()? as u32;
    let var_binds = decode_varbind_list(&mut body)?;

    let mut pdu = Pdu::new(pdu_type, request_id);
    pdu.error_status = error_status;
    pdu.error_index = error_index;
    pdu.var_binds = var_binds;
    Ok(pdu)
}

fn decode_varbind_list(r: &mut Reader) -> Result<Vec<VarBind>> {
    let mut list = r.read_sequence()?;
    let mut out = Vec::new();
    while !list.is_empty() {
        let mut vb = list.read_sequence()?;
        let oid: Oid = vb.read_oid()?;
        let value = Value::decode(&mut vb)?;
        out.push(VarBind::new(oid, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorStatus;

    #[test]
    fn get_request_roundtrip() {
        let mut pdu = Pdu::new(PduType::Get, 42);
        pdu.var_binds.push(VarBind::new(
            Oid::parse("1.3.6.1.2.1.1.3.0").unwrap(),
            Value::Null,
        ));
        let mut w = Writer::new();
        encode_pdu(&pdu, &mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = decode_pdu(&mut r).unwrap();
        assert_eq!(decoded.pdu_type, PduType::Get);
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.var_binds.len(), 1);
    }

    #[test]
    fn getbulk_reuses_error_fields_as_bulk_params() {
        let mut pdu = Pdu::new(PduType::GetBulk, 7);
        pdu.set_bulk_params(0, 10);
        let mut w = Writer::new();
        encode_pdu(&pdu, &mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = decode_pdu(&mut r).unwrap();
        assert_eq!(decoded.non_repeaters(), 0);
        assert_eq!(decoded.max_repetitions(), 10);
    }

    #[test]
    fn trap1_roundtrip() {
        let mut pdu = Pdu::new(PduType::Trap1, 0);
        pdu.trap = Some(TrapInfo {
            enterprise: Oid::parse("1.3.6.1.4.1.9").unwrap(),
            agent_addr: [10, 0, 0, 1],
            generic_trap: 2,
            specific_trap: 0,
            timestamp: 12345,
        });
        pdu.var_binds.push(VarBind::new(
            Oid::parse("1.3.6.1.2.1.2.2.1.1.7").unwrap(),
            Value::Integer(7),
        ));
        let mut w = Writer::new();
        encode_pdu(&pdu, &mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = decode_pdu(&mut r).unwrap();
        assert_eq!(decoded.trap.unwrap().timestamp, 12345);
    }

    #[test]
    fn error_status_roundtrips_through_response() {
        let mut pdu = Pdu::new(PduType::Response, 1);
        pdu.set_status(ErrorStatus::NoSuchName, 1);
        let mut w = Writer::new();
        encode_pdu(&pdu, &mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = decode_pdu(&mut r).unwrap();
        assert_eq!(decoded.status(), ErrorStatus::NoSuchName);
    }
}
