//! Outbound/inbound message assembly.

use crate::ber::{Reader, Writer, TAG_SEQUENCE};
use crate::error::{ErrorStatus, Result};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType, TrapInfo, VarBind};

use super::header::{HeaderData, SnmpVersion, UsmSecurityParameters};
use super::pdu_codec::{decode_pdu, encode_pdu};

/// Well-known `snmpTraps` registration point (RFC 1907 §3), used for the
/// v1↔v2 generic-trap OID mapping.
pub fn snmp_traps_oid() -> Oid {
    Oid::parse("1.3.6.1.6.3.1.1.5").unwrap()
}

pub fn sys_up_time_oid() -> Oid {
    Oid::parse("1.3.6.1.2.1.1.3.0").unwrap()
}

pub fn snmp_trap_oid_oid() -> Oid {
    Oid::parse("1.3.6.1.6.3.1.1.4.1.0").unwrap()
}

pub fn snmp_trap_enterprise_oid() -> Oid {
    Oid::parse("1.3.6.1.6.3.1.1.4.3.0").unwrap()
}

#[derive(Debug, Clone)]
pub enum DecodedMessage {
    V1 { community: String, pdu: Pdu },
    V2c { community: String, pdu: Pdu },
    V3 {
        header: HeaderData,
        security_params: UsmSecurityParameters,
        context_engine_id: Vec<u8>,
        context_name: String,
        pdu: Pdu,
    },
}

/// Outbound rewrite: v1 sessions never carry getbulk/inform/trap2 on the
/// wire.
pub fn adapt_pdu_for_version(mut pdu: Pdu, version: SnmpVersion) -> Pdu {
    if version != SnmpVersion::V1 {
        return pdu;
    }
    match pdu.pdu_type {
        PduType::GetBulk => {
            pdu.pdu_type = PduType::GetNext;
            pdu.error_status = 0;
            pdu.error_index = 0;
            pdu
        }
        PduType::Inform | PduType::Trap2 => trap2_to_trap1(pdu),
        _ => pdu,
    }
}

/// Maps v2+ error-status codes onto the closest v1 code (RFC 1908),
/// applied whenever a response crosses from v2+ semantics to a v1 peer.
pub fn downgrade_error_status(pdu: &mut Pdu) {
    pdu.error_status = pdu.status().to_v1() as u32;
}

fn encode_community_message(version: SnmpVersion, community: &str, pdu: &Pdu) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    let tok = w.begin_seq(TAG_SEQUENCE);
    w.write_integer(version.wire_value());
    w.write_octet_string(community.as_bytes());
    encode_pdu(pdu, &mut w)?;
    w.end_seq(tok);
    Ok(w.into_bytes())
}

pub fn build_v1_message(community: &str, pdu: Pdu) -> Result<Vec<u8>> {
    let pdu = adapt_pdu_for_version(pdu, SnmpVersion::V1);
    encode_community_message(SnmpVersion::V1, community, &pdu)
}

pub fn build_v2c_message(community: &str, pdu: &Pdu) -> Result<Vec<u8>> {
    encode_community_message(SnmpVersion::V2c, community, pdu)
}

/// Builds a v3 message with a zero-filled auth-parameters placeholder;
/// callers that need authentication call [`super::usm::finalize_auth`]
/// on the returned bytes before sending.
pub fn build_v3_message(
    header: &HeaderData,
    security_params: &UsmSecurityParameters,
    context_engine_id: &[u8],
    context_name: &str,
    pdu: &Pdu,
) -> Result<(Vec<u8>, usize)> {
    let mut w = Writer::new();
    let tok = w.begin_seq(TAG_SEQUENCE);
    w.write_integer(SnmpVersion::V3.wire_value());
    header.encode(&mut w);

    let (sp_encoded, sp_auth_offset) = security_params.encode_wrapped_with_auth_offset();
    let sp_tlv_prefix_at = w.position();
    w.write_tlv(crate::ber::TAG_OCTET_STRING, &sp_encoded);
    // `write_tlv` always uses short-form length here: real USM security
    // parameters blobs are well under 128 bytes.
    let sp_content_at = sp_tlv_prefix_at + 2;

    let scoped_tok = w.begin_seq(TAG_SEQUENCE);
    w.write_octet_string(context_engine_id);
    w.write_octet_string(context_name.as_bytes());
    encode_pdu(pdu, &mut w)?;
    w.end_seq(scoped_tok);

    let pre_patch_len = w.position();
    w.end_seq(tok);
    let bytes = w.into_bytes();
    let shift = bytes.len() - pre_patch_len;

    let auth_offset = sp_content_at + sp_auth_offset + shift;
    Ok((bytes, auth_offset))
}

pub fn parse_message(bytes: &[u8]) -> Result<DecodedMessage> {
    let mut r = Reader::new(bytes);
    let mut outer = r.read_sequence()?;
    let version = SnmpVersion::from_wire_value(outer.read_integer()?)?;
    match version {
        SnmpVersion::V1 | SnmpVersion::V2c => {
            let community = String::from_utf8_lossy(&outer.read_octet_string()?).into_owned();
            let pdu = decode_pdu(&mut outer)?;
            Ok(if version == SnmpVersion::V1 {
                DecodedMessage::V1 { community, pdu }
            } else {
                DecodedMessage::V2c { community, pdu }
            })
        }
        SnmpVersion::V3 => {
            let header = HeaderData::decode(&mut outer)?;
            let sp_bytes = outer.read_octet_string()?;
            let security_params = UsmSecurityParameters::decode_wrapped(&sp_bytes)?;
            let mut scoped = outer.read_sequence()?;
            let context_engine_id = scoped.read_octet_string()?;
            let context_name = String::from_utf8_lossy(&scoped.read_octet_string()?).into_owned();
            let pdu = decode_pdu(&mut scoped)?;
            Ok(DecodedMessage::V3 {
                header,
                security_params,
                context_engine_id,
                context_name,
                pdu,
            })
        }
    }
}

/// Inbound v1 trap canonicalization into v2 varbind form.
pub fn canonicalize_v1_trap(trap: &TrapInfo, mut var_binds: Vec<VarBind>) -> Vec<VarBind> {
    let trap_oid = if trap.generic_trap <= 5 {
        snmp_traps_oid().append(trap.generic_trap + 1)
    } else {
        trap.enterprise.append(0).append(trap.specific_trap)
    };
    let mut out = vec![
        VarBind::new(sys_up_time_oid(), crate::ber::Value::TimeTicks(trap.timestamp)),
        VarBind::new(snmp_trap_oid_oid(), crate::ber::Value::Oid(trap_oid)),
    ];
    out.append(&mut var_binds);
    out.push(VarBind::new(
        snmp_trap_enterprise_oid(),
        crate::ber::Value::Oid(trap.enterprise.clone()),
    ));
    out
}

/// Outbound v2 notification → v1 trap de-canonicalization.
fn trap2_to_trap1(pdu: Pdu) -> Pdu {
    let snmp_traps = snmp_traps_oid();
    let mut trap_oid = None;
    let mut remaining = Vec::new();
    for vb in pdu.var_binds {
        if vb.oid == snmp_trap_oid_oid() {
            if let crate::ber::Value::Oid(oid) = &vb.value {
                trap_oid = Some(oid.clone());
            }
            continue;
        }
        if vb.oid == sys_up_time_oid() || vb.oid == snmp_trap_enterprise_oid() {
            continue;
        }
        remaining.push(vb);
    }

    let (enterprise, generic, specific) = match &trap_oid {
        Some(oid) => decanonicalize_trap_oid(oid, &snmp_traps),
        None => (Oid::parse("1.3.6.1.4.1.0").unwrap(), 6, 0),
    };

    let mut out = Pdu::new(PduType::Trap1, 0);
    out.trap = Some(TrapInfo {
        enterprise,
        agent_addr: [0, 0, 0, 0],
        generic_trap: generic,
        specific_trap: specific,
        timestamp: 0,
    });
    out.var_binds = remaining;
    out
}

/// A v2 trap-OID whose penultimate sub-id is 0 and whose root is the
/// standard `snmpTraps` registration point maps to `generic = last-1,
/// specific = 0`; otherwise `generic = 6, specific = last`.
fn decanonicalize_trap_oid(oid: &Oid, snmp_traps: &Oid) -> (Oid, u32, u32) {
    let comps = oid.as_slice();
    if snmp_traps.is_prefix_of(oid) && comps.len() == snmp_traps.len() + 1 {
        let last = comps[comps.len() - 1];
        if last >= 1 {
            return (snmp_traps.clone(), last - 1, 0);
        }
    }
    if comps.len() >= 2 && comps[comps.len() - 2] == 0 {
        let enterprise = Oid::new(comps[..comps.len() - 2].to_vec());
        let last = comps[comps.len() - 1];
        return (enterprise, 6, last);
    }
    (oid.clone(), 6, *comps.last().unwrap_or(&0))
}

/// Rejects unknown v1 error-status wire values by clamping to `genErr`,
/// mirroring decode-side tolerance for malformed peers.
pub fn clamp_unknown_status(pdu: &mut Pdu) {
    if ErrorStatus::from_u32(pdu.error_status) == ErrorStatus::GenErr && pdu.error_status != 5 {
        pdu.error_status = ErrorStatus::GenErr as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::Value;

    #[test]
    fn v1_community_message_roundtrip() {
        let mut pdu = Pdu::new(PduType::Get, 1);
        pdu.var_binds.push(VarBind::new(
            Oid::parse("1.3.6.1.2.1.1.3.0").unwrap(),
            Value::Null,
        ));
        let bytes = build_v1_message("public", pdu).unwrap();
        match parse_message(&bytes).unwrap() {
            DecodedMessage::V1 { community, pdu } => {
                assert_eq!(community, "public");
                assert_eq!(pdu.request_id, 1);
            }
            other => panic!("expected V1, got {other:?}"),
        }
    }

    #[test]
    fn v1_trap_canonicalization_matches_scenario_s2() {
        let trap = TrapInfo {
            enterprise: Oid::parse("1.3.6.1.4.1.9").unwrap(),
            agent_addr: [10, 0, 0, 1],
            generic_trap: 2,
            specific_trap: 0,
            timestamp: 12345,
        };
        let var_binds = vec![VarBind::new(
            Oid::parse("1.3.6.1.2.1.2.2.1.1.7").unwrap(),
            Value::Integer(7),
        )];
        let canonical = canonicalize_v1_trap(&trap, var_binds);
        assert_eq!(canonical.len(), 4);
        assert_eq!(canonical[0].oid, sys_up_time_oid());
        assert_eq!(canonical[1].value, Value::Oid(Oid::parse("1.3.6.1.6.3.1.1.5.3").unwrap()));
        assert_eq!(canonical[2].oid, Oid::parse("1.3.6.1.2.1.2.2.1.1.7").unwrap());
        assert_eq!(canonical[3].oid, snmp_trap_enterprise_oid());
    }

    #[test]
    fn getbulk_downgrades_to_getnext_for_v1() {
        let mut pdu = Pdu::new(PduType::GetBulk, 5);
        pdu.set_bulk_params(0, 10);
        let adapted = adapt_pdu_for_version(pdu, SnmpVersion::V1);
        assert_eq!(adapted.pdu_type, PduType::GetNext);
        assert_eq!(adapted.error_status, 0);
    }

    #[test]
    fn v3_message_roundtrip_and_locates_auth_offset() {
        let header = HeaderData {
            msg_id: 1,
            msg_max_size: 65507,
            auth_flag: true,
            priv_flag: false,
            reportable_flag: true,
            security_model: super::super::header::SECURITY_MODEL_USM,
        };
        let security_params = UsmSecurityParameters {
            authoritative_engine_id: vec![0x80, 0, 0, 0, 1],
            authoritative_engine_boots: 1,
            authoritative_engine_time: 1,
            user_name: "admin".to_string(),
            auth_parameters: vec![0u8; 12],
            priv_parameters: Vec::new(),
        };
        let pdu = Pdu::new(PduType::Get, 9);
        let (bytes, auth_offset) =
            build_v3_message(&header, &security_params, b"\x80\0\0\0\x01", "", &pdu).unwrap();
        assert_eq!(&bytes[auth_offset..auth_offset + 12], &[0u8; 12]);

        match parse_message(&bytes).unwrap() {
            DecodedMessage::V3 { pdu, security_params: sp, .. } => {
                assert_eq!(pdu.request_id, 9);
                assert_eq!(sp.user_name, "admin");
            }
            other => panic!("expected V3, got {other:?}"),
        }
    }
}
