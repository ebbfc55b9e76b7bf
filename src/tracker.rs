//! Request tracker: id allocation, retransmission, windowing, response
//! cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, trace};

pub type SessionId = u64;
pub type RequestId = i32;

/// Process-wide outstanding-request table. `DashMap` covers
/// the id table and response cache, which are keyed by independent
/// request-ids and need no cross-entry coordination; the per-session
/// FIFO queues need ordered pop/push under a single lock instead.
pub struct RequestTracker {
    outstanding: DashMap<RequestId, OutstandingRequest>,
    sessions: Mutex<HashMap<SessionId, SessionQueue>>,
    response_cache: DashMap<(SessionId, RequestId), CachedResponse>,
}

pub struct OutstandingRequest {
    pub session: SessionId,
    pub message: Vec<u8>,
    pub retries_left: u32,
    pub deadline: Instant,
    pub retransmit_interval: Duration,
}

#[derive(Default)]
struct SessionQueue {
    active: usize,
    window: usize,
    waiting: VecDeque<RequestId>,
}

struct CachedResponse {
    fingerprint: u64,
    response: Vec<u8>,
    expires_at: Instant,
}

pub const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(5);

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            outstanding: DashMap::new(),
            sessions: Mutex::new(HashMap::new()),
            response_cache: DashMap::new(),
        }
    }

    pub fn register_session(&self, session: SessionId, window: usize) {
        self.sessions
            .lock()
            .unwrap()
            .entry(session)
            .or_insert_with(|| SessionQueue { active: 0, window, waiting: VecDeque::new() });
    }

    /// Allocates a fresh request-id by uniform random draw, rejecting
    /// collisions with any currently outstanding id.
    pub fn allocate_request_id(&self) -> RequestId {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: RequestId = rng.gen_range(1..=i32::MAX);
            if !self.outstanding.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Enqueues a request onto its session's FIFO; the caller attempts
    /// dispatch immediately afterward via [`Self::try_dispatch_next`].
    pub fn enqueue(&self, session: SessionId, request_id: RequestId) {
        let mut sessions = self.sessions.lock().unwrap();
        let queue = sessions.entry(session).or_default();
        queue.waiting.push_back(request_id);
    }

    /// A request may be sent only if its session has fewer than
    /// `window` active requests and it is at the head of the session's
    /// FIFO.
    pub fn try_dispatch_next(&self, session: SessionId) -> Option<RequestId> {
        let mut sessions = self.sessions.lock().unwrap();
        let queue = sessions.get_mut(&session)?;
        if queue.active >= queue.window {
            return None;
        }
        let request_id = queue.waiting.pop_front()?;
        queue.active += 1;
        Some(request_id)
    }

    pub fn install(&self, request_id: RequestId, outstanding: OutstandingRequest) {
        self.outstanding.insert(request_id, outstanding);
    }

    pub fn take(&self, request_id: RequestId) -> Option<OutstandingRequest> {
        self.outstanding.remove(&request_id).map(|(_, v)| v)
    }

    pub fn peek_session(&self, request_id: RequestId) -> Option<SessionId> {
        self.outstanding.get(&request_id).map(|e| e.session)
    }

    /// Whether `session` still has any request in flight (outstanding
    /// table or FIFO waiting queue), for the explicit `wait` operation.
    pub fn has_outstanding(&self, session: SessionId) -> bool {
        if self.outstanding.iter().any(|e| e.value().session == session) {
            return true;
        }
        self.sessions
            .lock()
            .unwrap()
            .get(&session)
            .map(|q| q.active > 0 || !q.waiting.is_empty())
            .unwrap_or(false)
    }

    /// Completes a request (response received, retries exhausted, or
    /// session torn down): removes it from the outstanding table and
    /// promotes the next FIFO waiter for the same session.
    pub fn complete(&self, request_id: RequestId) -> Option<RequestId> {
        let entry = self.take(request_id)?;
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(queue) = sessions.get_mut(&entry.session) {
            queue.active = queue.active.saturating_sub(1);
        }
        drop(sessions);
        self.try_dispatch_next(entry.session)
    }

    /// Idempotent: cancelling an already-completed or never-issued
    /// request is a no-op.
    pub fn cancel(&self, request_id: RequestId) {
        let _ = self.complete(request_id);
    }

    /// Called on timer expiry; decrements the retry budget and reports
    /// whether another attempt should be sent invariant
    /// 10 (`retries + 1` total transmissions before `noResponse`).
    pub fn on_retransmit_timer(&self, request_id: RequestId) -> RetransmitOutcome {
        let mut entry = match self.outstanding.get_mut(&request_id) {
            Some(e) => e,
            None => return RetransmitOutcome::AlreadyComplete,
        };
        if entry.retries_left == 0 {
            drop(entry);
            self.complete(request_id);
            return RetransmitOutcome::Exhausted;
        }
        entry.retries_left -= 1;
        entry.deadline = Instant::now() + entry.retransmit_interval;
        trace!(request_id, retries_left = entry.retries_left, "retransmitting request");
        RetransmitOutcome::Retransmit
    }

    /// Clears every cache entry for `session`.
    pub fn clear_response_cache_for_session(&self, session: SessionId) {
        self.response_cache.retain(|(s, _), _| *s != session);
    }

    pub fn cache_response(&self, session: SessionId, request_id: RequestId, fingerprint: u64, response: Vec<u8>) {
        self.response_cache.insert(
            (session, request_id),
            CachedResponse {
                fingerprint,
                response,
                expires_at: Instant::now() + RESPONSE_CACHE_TTL,
            },
        );
    }

    /// Returns the cached response if `request_id` was seen before with
    /// the same fingerprint within the retention window.
    pub fn lookup_cached_response(&self, session: SessionId, request_id: RequestId, fingerprint: u64) -> Option<Vec<u8>> {
        let entry = self.response_cache.get(&(session, request_id))?;
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.response_cache.remove(&(session, request_id));
            return None;
        }
        if entry.fingerprint != fingerprint {
            return None;
        }
        Some(entry.response.clone())
    }

    pub fn sweep_expired_cache_entries(&self) {
        let now = Instant::now();
        let before = self.response_cache.len();
        self.response_cache.retain(|_, v| v.expires_at >= now);
        let removed = before - self.response_cache.len();
        if removed > 0 {
            debug!(removed, "swept expired response cache entries");
        }
    }

    pub fn teardown_session(&self, session: SessionId) -> Vec<RequestId> {
        let ids: Vec<RequestId> = self
            .outstanding
            .iter()
            .filter(|e| e.value().session == session)
            .map(|e| *e.key())
            .collect();
        for id in &ids {
            self.outstanding.remove(id);
        }
        self.sessions.lock().unwrap().remove(&session);
        self.response_cache.retain(|(s, _), _| *s != session);
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitOutcome {
    Retransmit,
    Exhausted,
    AlreadyComplete,
}

/// A cheap fingerprint of a decoded request for the at-most-once cache
///: version, pdu type, and varbind OIDs/values are hashed by
/// the caller before calling [`RequestTracker::lookup_cached_response`].
pub fn fingerprint_request(pdu: &crate::pdu::Pdu) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    pdu.request_id.hash(&mut hasher);
    pdu.pdu_type.tag().hash(&mut hasher);
    for vb in &pdu.var_binds {
        vb.oid.as_slice().hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outstanding(session: SessionId) -> OutstandingRequest {
        OutstandingRequest {
            session,
            message: vec![1, 2, 3],
            retries_left: 2,
            deadline: Instant::now() + Duration::from_millis(500),
            retransmit_interval: Duration::from_millis(500),
        }
    }

    #[test]
    fn request_id_allocation_avoids_collisions() {
        let tracker = RequestTracker::new();
        let id = tracker.allocate_request_id();
        tracker.install(id, make_outstanding(1));
        let id2 = tracker.allocate_request_id();
        assert_ne!(id, id2);
    }

    #[test]
    fn window_gates_dispatch() {
        let tracker = RequestTracker::new();
        tracker.register_session(1, 1);
        tracker.enqueue(1, 100);
        tracker.enqueue(1, 101);
        assert_eq!(tracker.try_dispatch_next(1), Some(100));
        assert_eq!(tracker.try_dispatch_next(1), None);
        tracker.install(100, make_outstanding(1));
        tracker.complete(100);
        assert_eq!(tracker.try_dispatch_next(1), Some(101));
    }

    #[test]
    fn retransmit_exhausts_after_retry_budget() {
        let tracker = RequestTracker::new();
        let mut req = make_outstanding(1);
        req.retries_left = 1;
        tracker.install(42, req);
        assert_eq!(tracker.on_retransmit_timer(42), RetransmitOutcome::Retransmit);
        assert_eq!(tracker.on_retransmit_timer(42), RetransmitOutcome::Exhausted);
        assert_eq!(tracker.on_retransmit_timer(42), RetransmitOutcome::AlreadyComplete);
    }

    #[test]
    fn has_outstanding_reflects_both_active_and_waiting() {
        let tracker = RequestTracker::new();
        tracker.register_session(1, 1);
        assert!(!tracker.has_outstanding(1));

        tracker.enqueue(1, 100);
        tracker.enqueue(1, 101);
        assert!(tracker.has_outstanding(1));

        assert_eq!(tracker.try_dispatch_next(1), Some(100));
        tracker.install(100, make_outstanding(1));
        assert!(tracker.has_outstanding(1));

        tracker.complete(100);
        assert!(tracker.has_outstanding(1));

        assert_eq!(tracker.try_dispatch_next(1), Some(101));
        tracker.install(101, make_outstanding(1));
        tracker.complete(101);
        assert!(!tracker.has_outstanding(1));
    }

    #[test]
    fn cancel_is_idempotent() {
        let tracker = RequestTracker::new();
        tracker.cancel(999);
        tracker.cancel(999);
    }

    #[test]
    fn response_cache_roundtrip_and_ttl() {
        let tracker = RequestTracker::new();
        tracker.cache_response(1, 5, 0xABCD, vec![9, 9, 9]);
        assert_eq!(tracker.lookup_cached_response(1, 5, 0xABCD), Some(vec![9, 9, 9]));
        assert_eq!(tracker.lookup_cached_response(1, 5, 0x1234), None);
    }
}
