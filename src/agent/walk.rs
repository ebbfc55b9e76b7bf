//! Manager-side walk driver layering repeated getnext/getbulk over a
//! per-base cursor.
//!
//! This is transport- and I/O-agnostic: a caller (the message engine /
//! session layer) performs the actual round trip and feeds the response
//! varbinds back in; the driver only tracks cursor state and the
//! max-repetitions ramp.

use crate::ber::Value;
use crate::oid::Oid;
use crate::pdu::VarBind;

const INITIAL_MAX_REPETITIONS: u32 = 4;
const MAX_REPETITIONS_STEP: u32 = 4;
const MAX_REPETITIONS_CAP: u32 = 48;

pub struct WalkCursor {
    pub base: Oid,
    pub current: Oid,
    pub done: bool,
}

/// Drives a walk over one or more base OIDs.
pub struct WalkDriver {
    cursors: Vec<WalkCursor>,
    max_repetitions: u32,
}

impl WalkDriver {
    pub fn new(bases: Vec<Oid>) -> Self {
        let cursors = bases
            .into_iter()
            .map(|b| WalkCursor { current: b.clone(), base: b, done: false })
            .collect();
        Self { cursors, max_repetitions: INITIAL_MAX_REPETITIONS }
    }

    pub fn is_done(&self) -> bool {
        self.cursors.iter().all(|c| c.done)
    }

    pub fn max_repetitions(&self) -> u32 {
        self.max_repetitions
    }

    /// Current cursor position per still-active base, in order; this is
    /// what the caller should send as the next round's varbind OIDs.
    pub fn active_bases(&self) -> Vec<Oid> {
        self.cursors.iter().filter(|c| !c.done).map(|c| c.current.clone()).collect()
    }

    /// The original walk root behind each still-active cursor, in the
    /// same order as [`Self::active_bases`] — lets a caller tell which
    /// root a round's returned varbind belongs to without reaching into
    /// cursor internals.
    pub fn active_roots(&self) -> Vec<Oid> {
        self.cursors.iter().filter(|c| !c.done).map(|c| c.base.clone()).collect()
    }

    /// Applies one v1 `getnext` round: exactly one response varbind per
    /// active base, in order.
    pub fn apply_getnext_round(&mut self, responses: &[VarBind]) {
        let mut ri = 0;
        for cursor in self.cursors.iter_mut() {
            if cursor.done {
                continue;
            }
            match responses.get(ri) {
                Some(vb) => advance_cursor(cursor, vb),
                None => cursor.done = true,
            }
            ri += 1;
        }
    }

    /// Applies one v2+ `getbulk` round. The response is row-major:
    /// repetition 0's varbind for every active base, then repetition 1's,
    /// and so on (RFC 3416 §4.2.3). A short final chunk signals a
    /// truncated row set and ramps `max_repetitions` down; a full set of
    /// chunks ramps it up, capped at 48.
    pub fn apply_getbulk_round(&mut self, responses: &[VarBind]) {
        let active_indices: Vec<usize> =
            self.cursors.iter().enumerate().filter(|(_, c)| !c.done).map(|(i, _)| i).collect();
        if active_indices.is_empty() {
            return;
        }
        let repeaters = active_indices.len();
        let mut truncated = false;
        let mut full_chunks = 0u32;

        for chunk in responses.chunks(repeaters) {
            if chunk.len() < repeaters {
                truncated = true;
            } else {
                full_chunks += 1;
            }
            for (slot, vb) in chunk.iter().enumerate() {
                let cursor_idx = active_indices[slot];
                if self.cursors[cursor_idx].done {
                    continue;
                }
                advance_cursor(&mut self.cursors[cursor_idx], vb);
            }
        }

        if truncated || full_chunks < self.max_repetitions {
            self.max_repetitions =
                (self.max_repetitions.saturating_sub(MAX_REPETITIONS_STEP)).max(INITIAL_MAX_REPETITIONS);
        } else {
            self.max_repetitions = (self.max_repetitions + MAX_REPETITIONS_STEP).min(MAX_REPETITIONS_CAP);
        }
    }
}

fn advance_cursor(cursor: &mut WalkCursor, vb: &VarBind) {
    if matches!(vb.value, Value::EndOfMibView) {
        cursor.done = true;
        return;
    }
    if !cursor.base.is_prefix_of(&vb.oid) {
        cursor.done = true;
        return;
    }
    cursor.current = vb.oid.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn vb(oid: Oid, v: Value) -> VarBind {
        VarBind::new(oid, v)
    }

    #[test]
    fn getnext_walk_terminates_on_end_of_mib_view() {
        let mut driver = WalkDriver::new(vec![oid!(1, 3, 6, 1, 2, 1, 1)]);
        driver.apply_getnext_round(&[vb(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::OctetString(b"descr".to_vec()))]);
        assert!(!driver.is_done());
        driver.apply_getnext_round(&[vb(oid!(1, 3, 6, 1, 2, 1, 1, 7, 0), Value::Integer(2))]);
        assert!(!driver.is_done());
        driver.apply_getnext_round(&[vb(oid!(1, 3, 6, 1, 2, 1, 2, 1, 0), Value::EndOfMibView)]);
        assert!(driver.is_done());
    }

    #[test]
    fn getnext_walk_terminates_when_leaving_subtree() {
        let mut driver = WalkDriver::new(vec![oid!(1, 3, 6, 1, 2, 1, 1)]);
        driver.apply_getnext_round(&[vb(oid!(1, 3, 6, 1, 2, 1, 2, 1, 0), Value::Integer(1))]);
        assert!(driver.is_done());
    }

    #[test]
    fn getbulk_ramps_up_on_full_rounds_and_down_on_truncation() {
        let mut driver = WalkDriver::new(vec![oid!(1, 3, 6, 1, 2, 1, 1)]);
        assert_eq!(driver.max_repetitions(), 4);
        let full_round: Vec<VarBind> = (1..=4)
            .map(|i| vb(oid!(1, 3, 6, 1, 2, 1, 1, i, 0), Value::Integer(i as i32)))
            .collect();
        driver.apply_getbulk_round(&full_round);
        assert_eq!(driver.max_repetitions(), 8);

        let truncated_round: Vec<VarBind> = (5..=6)
            .map(|i| vb(oid!(1, 3, 6, 1, 2, 1, 1, i, 0), Value::Integer(i as i32)))
            .collect();
        driver.apply_getbulk_round(&truncated_round);
        assert_eq!(driver.max_repetitions(), 4);
    }
}
