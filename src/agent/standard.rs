//! Standard instances auto-populated by a responder.
//!
//! Registers `sysDescr.0` .. `sysServices.0` and the SNMP-MIB counters
//! (`snmpInPkts.0`, `snmpOutPkts.0`, the per-PDU-type in/out counters,
//! and the error counters) into a fresh [`InstanceTree`], each backed by
//! a live counter inside the engine rather than a static value.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::ber::Value;
use crate::mib::MibAccess;
use crate::oid;
use crate::oid::Oid;

use super::tree::InstanceTree;

/// System group base, `1.3.6.1.2.1.1` (RFC 1213 §6).
fn sys_oid(leaf: u32) -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, leaf, 0)
}

/// SNMP-MIB group base, `1.3.6.1.2.1.11` (RFC 1213 §6).
fn snmp_oid(leaf: u32) -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 11, leaf, 0)
}

/// Live counters backing the SNMP-MIB group. Each is a plain
/// `AtomicU32` wrapped for cheap sharing between the dispatch path (which
/// increments them) and the instance tree (which reads them on `get`).
#[derive(Default)]
pub struct SnmpCounters {
    pub in_pkts: AtomicU32,
    pub out_pkts: AtomicU32,
    pub in_get_requests: AtomicU32,
    pub in_get_nexts: AtomicU32,
    pub in_set_requests: AtomicU32,
    pub in_get_responses: AtomicU32,
    pub in_traps: AtomicU32,
    pub out_get_requests: AtomicU32,
    pub out_get_nexts: AtomicU32,
    pub out_set_requests: AtomicU32,
    pub out_get_responses: AtomicU32,
    pub out_traps: AtomicU32,
    pub in_too_bigs: AtomicU32,
    pub in_bad_community_names: AtomicU32,
    pub in_asn_parse_errs: AtomicU32,
    pub in_total_req_vars: AtomicU32,
    pub in_total_set_vars: AtomicU32,
    pub out_gen_errs: AtomicU32,
}

impl SnmpCounters {
    pub fn bump(counter: &AtomicU32) -> u32 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// System identity fields supplied by the embedder at startup; these are
/// the only non-counter values among the standard instances.
pub struct SystemIdentity {
    pub descr: String,
    pub object_id: Oid,
    pub contact: String,
    pub name: String,
    pub location: String,
    pub services: i32,
}

/// Registers `sysDescr.0`..`sysServices.0` and the SNMP-MIB counters into
/// `tree`, returning the shared counter block so the dispatch/engine path
/// can bump it on every inbound/outbound message.
///
/// The identity fields (`sysDescr`, `sysObjectID`, `sysContact`,
/// `sysName`, `sysLocation`, `sysServices`) are written once as plain
/// read/write cells, matching the `sysContact`/`sysName`/`sysLocation`
/// read-write access implied by listing them alongside writable
/// system-group conventions (RFC 1213 §6). `sysUpTime.0` and the counters
/// carry a `get` binding that re-derives the live value rather than
/// relying on the cell, since the cell itself is only ever the zero value
/// written at registration.
pub fn register_standard_instances(
    tree: &mut InstanceTree,
    identity: SystemIdentity,
    start_time: Instant,
) -> Arc<SnmpCounters> {
    let counters = Arc::new(SnmpCounters::default());

    tree.create_node(sys_oid(1), 0x04, MibAccess::ReadOnly, Value::OctetString(identity.descr.into_bytes()))
        .expect("sysDescr.0 registration");
    tree.create_node(sys_oid(2), 0x06, MibAccess::ReadOnly, Value::Oid(identity.object_id))
        .expect("sysObjectID.0 registration");

    let uptime_id = tree
        .create_node(sys_oid(3), 0x43, MibAccess::ReadOnly, Value::TimeTicks(0))
        .expect("sysUpTime.0 registration");
    tree.get_node_mut(uptime_id).bindings.get.push(Box::new(move |_ev| {
        let centiseconds = (start_time.elapsed().as_millis() / 10) as u32;
        Ok(Some(Value::TimeTicks(centiseconds)))
    }));

    tree.create_node(sys_oid(4), 0x04, MibAccess::ReadWrite, Value::OctetString(identity.contact.into_bytes()))
        .expect("sysContact.0 registration");
    tree.create_node(sys_oid(5), 0x04, MibAccess::ReadWrite, Value::OctetString(identity.name.into_bytes()))
        .expect("sysName.0 registration");
    tree.create_node(sys_oid(6), 0x04, MibAccess::ReadWrite, Value::OctetString(identity.location.into_bytes()))
        .expect("sysLocation.0 registration");
    tree.create_node(sys_oid(7), 0x02, MibAccess::ReadOnly, Value::Integer(identity.services))
        .expect("sysServices.0 registration");

    // RFC 1213 §6 SNMP group slot numbers.
    register_counter(tree, snmp_oid(1), &counters, |c| &c.in_pkts);
    register_counter(tree, snmp_oid(2), &counters, |c| &c.out_pkts);
    register_counter(tree, snmp_oid(4), &counters, |c| &c.in_bad_community_names);
    register_counter(tree, snmp_oid(6), &counters, |c| &c.in_asn_parse_errs);
    register_counter(tree, snmp_oid(8), &counters, |c| &c.in_too_bigs);
    register_counter(tree, snmp_oid(13), &counters, |c| &c.in_total_req_vars);
    register_counter(tree, snmp_oid(14), &counters, |c| &c.in_total_set_vars);
    register_counter(tree, snmp_oid(15), &counters, |c| &c.in_get_requests);
    register_counter(tree, snmp_oid(16), &counters, |c| &c.in_get_nexts);
    register_counter(tree, snmp_oid(17), &counters, |c| &c.in_set_requests);
    register_counter(tree, snmp_oid(18), &counters, |c| &c.in_get_responses);
    register_counter(tree, snmp_oid(19), &counters, |c| &c.in_traps);
    register_counter(tree, snmp_oid(24), &counters, |c| &c.out_gen_errs);
    register_counter(tree, snmp_oid(25), &counters, |c| &c.out_get_requests);
    register_counter(tree, snmp_oid(26), &counters, |c| &c.out_get_nexts);
    register_counter(tree, snmp_oid(27), &counters, |c| &c.out_set_requests);
    register_counter(tree, snmp_oid(28), &counters, |c| &c.out_get_responses);
    register_counter(tree, snmp_oid(29), &counters, |c| &c.out_traps);

    counters
}

fn register_counter(
    tree: &mut InstanceTree,
    oid: Oid,
    counters: &Arc<SnmpCounters>,
    select: fn(&SnmpCounters) -> &AtomicU32,
) {
    let counters = Arc::clone(counters);
    let id = tree
        .create_node(oid.clone(), 0x41, MibAccess::ReadOnly, Value::Counter32(0))
        .unwrap_or_else(|_| panic!("standard counter registration for {oid}"));
    tree.get_node_mut(id).bindings.get.push(Box::new(move |_ev| {
        let n = select(&counters).load(Ordering::Relaxed);
        Ok(Some(Value::Counter32(n)))
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SystemIdentity {
        SystemIdentity {
            descr: "test agent".into(),
            object_id: oid!(1, 3, 6, 1, 4, 1, 1, 1),
            contact: "ops@example.com".into(),
            name: "test-host".into(),
            location: "lab".into(),
            services: 72,
        }
    }

    #[test]
    fn registers_all_seven_system_scalars() {
        let mut tree = InstanceTree::new();
        let start = Instant::now();
        register_standard_instances(&mut tree, identity(), start);
        for leaf in 1..=7u32 {
            assert!(tree.find(&sys_oid(leaf)).is_some(), "sys.{leaf}.0 missing");
        }
    }

    #[test]
    fn counters_start_at_zero_and_bump() {
        let mut tree = InstanceTree::new();
        let counters = register_standard_instances(&mut tree, identity(), Instant::now());
        assert_eq!(counters.in_pkts.load(Ordering::Relaxed), 0);
        SnmpCounters::bump(&counters.in_pkts);
        assert_eq!(counters.in_pkts.load(Ordering::Relaxed), 1);
        assert!(tree.find(&snmp_oid(1)).is_some());
    }
}
