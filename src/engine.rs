//! Top-level session engine.
//!
//! Ties the message codec (`message`), the MIB repository (`mib`), the
//! agent instance tree (`agent`) and the request tracker (`tracker`)
//! together behind a single `Engine` value, in place of the source's
//! global mutable state (one MIB tree, one outstanding-request list, one
//! manager socket) — see spec §9's design note on this point. Callbacks
//! and dispatch always receive a borrowed `&Engine`/`&Arc<Engine>`
//! instead of reaching into statics.
//!
//! The scheduling model (§5) is a single-threaded cooperative event
//! loop from the host's point of view: nothing here spawns a worker
//! thread, and the only operations that suspend are the ones the spec
//! names (`send_request`, the receive loop). `tokio` supplies that loop
//! the same way it backs the teacher's `services/b2bua.rs` — background
//! `tokio::spawn` tasks reading a channel/socket and dispatching into
//! shared, lock-guarded state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::agent::{
    self, register_standard_instances, GetNextOutcome, InstanceTree, ReadOutcome, SetFailure,
    SnmpCounters, SystemIdentity, WalkDriver,
};
use crate::ber::Value;
use crate::error::{Error, ErrorStatus, Result, UsmError};
use crate::message::engine::{
    build_v1_message, build_v2c_message, build_v3_message, canonicalize_v1_trap,
    downgrade_error_status, parse_message, DecodedMessage,
};
use crate::message::header::{HeaderData, UsmSecurityParameters, SECURITY_MODEL_USM};
use crate::message::trap_mux::{TrapMuxRecord, MULTIPLEXER_PORT};
use crate::message::usm::{finalize_auth, localized_key, verify_auth, AuthProtocol, AUTH_PARAMETERS_LEN};
use crate::mib::Repository;
use crate::oid;
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType, VarBind};
use crate::session::{ApplicationKind, SecurityLevel, SessionConfig, SnmpVersion};
use crate::tracker::{fingerprint_request, OutstandingRequest, RequestId, RequestTracker, RetransmitOutcome, SessionId};

/// A send/receive transport for whole SNMP datagrams. `UdpTransport` is
/// the only general-purpose implementation the crate ships;
/// [`TrapMuxTransport`] covers the privileged co-process framing (§6),
/// and a host embedding some other framing (e.g. TCP-with-length-prefix)
/// implements this trait itself.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<()>;
    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)>;
}

/// Default UDP transport, the one named in §6 for command
/// generator/responder and notification traffic.
pub struct UdpTransport {
    socket: tokio::net::UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<()> {
        self.socket.send_to(bytes, peer).await?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; 65535];
        let (n, peer) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, peer))
    }
}

/// Client side of the privileged trap-port multiplexer protocol (§6):
/// reads [`TrapMuxRecord`]s off a TCP connection to the co-process and
/// presents each as a datagram arriving from its original source. The
/// co-process never accepts traffic back through this connection, so
/// `send_to` is unsupported.
pub struct TrapMuxTransport {
    stream: tokio::sync::Mutex<tokio::net::TcpStream>,
    buffer: tokio::sync::Mutex<Vec<u8>>,
}

impl TrapMuxTransport {
    pub async fn connect() -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(("127.0.0.1", MULTIPLEXER_PORT)).await?;
        Ok(Self { stream: tokio::sync::Mutex::new(stream), buffer: tokio::sync::Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl Transport for TrapMuxTransport {
    async fn send_to(&self, _bytes: &[u8], _peer: SocketAddr) -> Result<()> {
        Err(Error::not_supported("the trap multiplexer co-process is receive-only"))
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
        use tokio::io::AsyncReadExt;
        let mut buffer = self.buffer.lock().await;
        loop {
            if let Some((record, consumed)) = TrapMuxRecord::decode(&buffer)? {
                buffer.drain(..consumed);
                let peer = SocketAddr::new(record.src_addr.into(), record.src_port);
                return Ok((record.message, peer));
            }
            let mut chunk = [0u8; 4096];
            let n = {
                let mut stream = self.stream.lock().await;
                stream.read(&mut chunk).await?
            };
            if n == 0 {
                return Err(Error::transport("trap multiplexer connection closed"));
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Binding event kinds, one per callback surface named in §6: `send`
/// and `recv` apply to every application kind; `begin`/`end` are
/// responder-only; `trap`/`inform` are listener-only. The engine does
/// not enforce that restriction — it simply never fires the events a
/// given application kind cannot produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Send,
    Recv,
    Begin,
    End,
    Trap,
    Inform,
}

/// Payload delivered to a session binding. The `%X` template
/// substitutions named in §6 are a concern of the embedding layer, not
/// the engine — a host builds those from this struct's fields.
#[derive(Clone)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: SessionId,
    pub peer: SocketAddr,
    pub pdu: Pdu,
}

pub type SessionBinding = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct SessionBindings {
    send: Vec<SessionBinding>,
    recv: Vec<SessionBinding>,
    begin: Vec<SessionBinding>,
    end: Vec<SessionBinding>,
    trap: Vec<SessionBinding>,
    inform: Vec<SessionBinding>,
}

impl SessionBindings {
    fn fire(list: &[SessionBinding], ev: &SessionEvent) {
        for binding in list {
            binding(ev);
        }
    }

    fn push(&mut self, kind: SessionEventKind, binding: SessionBinding) {
        match kind {
            SessionEventKind::Send => self.send.push(binding),
            SessionEventKind::Recv => self.recv.push(binding),
            SessionEventKind::Begin => self.begin.push(binding),
            SessionEventKind::End => self.end.push(binding),
            SessionEventKind::Trap => self.trap.push(binding),
            SessionEventKind::Inform => self.inform.push(binding),
        }
    }

    fn fire_kind(&self, kind: SessionEventKind, ev: &SessionEvent) {
        match kind {
            SessionEventKind::Send => Self::fire(&self.send, ev),
            SessionEventKind::Recv => Self::fire(&self.recv, ev),
            SessionEventKind::Begin => Self::fire(&self.begin, ev),
            SessionEventKind::End => Self::fire(&self.end, ev),
            SessionEventKind::Trap => Self::fire(&self.trap, ev),
            SessionEventKind::Inform => Self::fire(&self.inform, ev),
        }
    }
}

/// Cached authoritative USM state for a v3 session, populated by engine
/// discovery (§8 scenario S6) and kept current from every REPORT.
#[derive(Default, Clone)]
struct V3Cache {
    engine_id: Vec<u8>,
    engine_boots: u32,
    engine_time: u32,
}

struct SessionState {
    config: SessionConfig,
    bindings: Mutex<SessionBindings>,
    last_send: Mutex<Option<Instant>>,
    v3_cache: Mutex<V3Cache>,
}

/// Outcome of waiting on an outstanding request: a matched Response, a
/// Report that should trigger a resend (discovery/time resync), or a
/// forced completion from session teardown.
enum Inbound {
    Response(Pdu),
    Report(Pdu),
    Teardown,
}

/// Process-wide USM error counters (RFC 3414 §5), reported back to
/// initiators via REPORT PDUs under `1.3.6.1.6.3.15.1.1.*`.
#[derive(Default)]
struct UsmCounters {
    unsupported_sec_levels: AtomicU32,
    not_in_time_windows: AtomicU32,
    unknown_user_names: AtomicU32,
    unknown_engine_ids: AtomicU32,
    wrong_digests: AtomicU32,
}

fn usm_stat_oid(err: UsmError) -> Oid {
    let leaf = match err {
        UsmError::UnsupportedSecurityLevel => 1,
        UsmError::NotInTimeWindow => 2,
        UsmError::UnknownUserName => 3,
        UsmError::UnknownEngineID => 4,
        UsmError::WrongDigest => 5,
    };
    oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, leaf, 0)
}

/// Locates the 12-octet authentication-parameters field inside a raw
/// received datagram by byte-subsequence search.
///
/// `ber::Reader`'s `position()` is relative to whichever sub-slice a
/// given reader wraps (each nested `read_sequence` starts a fresh
/// reader over just its own content), so there is no absolute offset
/// available after [`parse_message`] has already fully decoded a
/// message. A genuine 12-octet HMAC digest is vanishingly unlikely to
/// recur elsewhere in a short SNMP datagram, so searching for it is a
/// safe, cheap substitute for threading an absolute offset through the
/// decode path.
fn locate_auth_params_offset(raw: &[u8], claimed: &[u8]) -> Option<usize> {
    if claimed.len() != AUTH_PARAMETERS_LEN {
        return None;
    }
    raw.windows(AUTH_PARAMETERS_LEN).position(|w| w == claimed)
}

/// The explicit engine value called for by §9: owns the shared MIB
/// repository, the request tracker, per-session state and trees, and
/// the transport used to send and receive datagrams.
pub struct Engine {
    repository: Arc<RwLock<Repository>>,
    tracker: Arc<RequestTracker>,
    transport: Arc<dyn Transport>,
    local_engine_id: Vec<u8>,
    sessions: DashMap<SessionId, SessionState>,
    trees: DashMap<SessionId, Mutex<InstanceTree>>,
    counters: DashMap<SessionId, Arc<SnmpCounters>>,
    waiters: DashMap<RequestId, oneshot::Sender<Inbound>>,
    usm_counters: UsmCounters,
    next_session_id: AtomicU64,
    next_msg_id: AtomicI64,
    start_time: Instant,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, repository: Arc<RwLock<Repository>>, local_engine_id: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            repository,
            tracker: Arc::new(RequestTracker::new()),
            transport,
            local_engine_id,
            sessions: DashMap::new(),
            trees: DashMap::new(),
            counters: DashMap::new(),
            waiters: DashMap::new(),
            usm_counters: UsmCounters::default(),
            next_session_id: AtomicU64::new(1),
            next_msg_id: AtomicI64::new(1),
            start_time: Instant::now(),
        })
    }

    pub fn repository(&self) -> &Arc<RwLock<Repository>> {
        &self.repository
    }

    /// Registers a new session and returns its id. The session's tracker
    /// queue is created empty; a responder session additionally needs
    /// [`Self::attach_responder`] before it can answer requests.
    pub fn add_session(&self, config: SessionConfig) -> SessionId {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.tracker.register_session(id, config.window.max(1));
        self.sessions.insert(
            id,
            SessionState {
                config,
                bindings: Mutex::new(SessionBindings::default()),
                last_send: Mutex::new(None),
                v3_cache: Mutex::new(V3Cache::default()),
            },
        );
        id
    }

    /// Tears a session down per §5: cancels its outstanding requests
    /// (delivering a synthetic `noResponse` to any waiter still
    /// reachable), drops its tree/counters, and releases its slot.
    pub fn remove_session(&self, session: SessionId) {
        for request_id in self.tracker.teardown_session(session) {
            if let Some((_, tx)) = self.waiters.remove(&request_id) {
                let _ = tx.send(Inbound::Teardown);
            }
        }
        self.sessions.remove(&session);
        self.trees.remove(&session);
        self.counters.remove(&session);
    }

    /// Builds a fresh instance tree seeded with the standard instances
    /// (§6) and attaches it to `session`, returning the shared counter
    /// block so the host can bump counters outside the request path too
    /// (e.g. `snmpInBadCommunityNames` from a transport-layer filter).
    pub fn attach_responder(&self, session: SessionId, identity: SystemIdentity) -> Arc<SnmpCounters> {
        let mut tree = InstanceTree::new();
        let counters = register_standard_instances(&mut tree, identity, self.start_time);
        self.trees.insert(session, Mutex::new(tree));
        self.counters.insert(session, Arc::clone(&counters));
        counters
    }

    /// Attaches a caller-constructed tree/counter pair directly, for
    /// hosts that build their own instance set rather than starting
    /// from [`register_standard_instances`].
    pub fn attach_responder_tree(&self, session: SessionId, tree: InstanceTree, counters: Arc<SnmpCounters>) {
        self.trees.insert(session, Mutex::new(tree));
        self.counters.insert(session, counters);
    }

    /// Runs `f` against a responder session's instance tree, e.g. to
    /// register table rows or additional scalars after attachment.
    pub fn with_tree<R>(&self, session: SessionId, f: impl FnOnce(&mut InstanceTree) -> R) -> Option<R> {
        self.trees.get(&session).map(|entry| f(&mut entry.lock().unwrap()))
    }

    pub fn bind(&self, session: SessionId, kind: SessionEventKind, binding: SessionBinding) {
        if let Some(state) = self.sessions.get(&session) {
            state.bindings.lock().unwrap().push(kind, binding);
        }
    }

    fn fire(&self, session: SessionId, kind: SessionEventKind, peer: SocketAddr, pdu: Pdu) {
        if let Some(state) = self.sessions.get(&session) {
            let ev = SessionEvent { kind, session, peer, pdu };
            state.bindings.lock().unwrap().fire_kind(kind, &ev);
        }
    }

    fn bump(&self, session: SessionId, select: impl FnOnce(&SnmpCounters) -> &AtomicU32) {
        if let Some(counters) = self.counters.get(&session) {
            SnmpCounters::bump(select(&counters));
        }
    }

    /// Spawns a background task reading datagrams for `session` off its
    /// shared transport and dispatching them, the way
    /// `services/b2bua.rs` drives its protocol handlers off an event
    /// channel. Intended for UDP/TrapMux transports that are genuinely
    /// receive-looped; a host driving its own event loop can call
    /// [`Self::handle_datagram`] directly instead.
    pub fn spawn_recv_loop(self: &Arc<Self>, session: SessionId) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match engine.transport.recv_from().await {
                    Ok((bytes, peer)) => {
                        if let Err(e) = engine.handle_datagram(session, bytes, peer).await {
                            warn!(session, error = %e, "failed to handle inbound datagram");
                        }
                    }
                    Err(e) => {
                        error!(session, error = %e, "transport recv failed, halting receive loop");
                        break;
                    }
                }
            }
        });
    }

    // ---- outbound ---------------------------------------------------

    /// Sends `pdu` on `session` and waits for the matching response,
    /// per §4.4's outbound path: fresh request-id, FIFO/window gating,
    /// per-attempt timeout of `timeout / (retries + 1)`, retransmission
    /// on expiry (re-authenticating for v3), and v3 discovery/REPORT
    /// resync before the next attempt.
    pub async fn send_request(self: &Arc<Self>, session: SessionId, mut pdu: Pdu) -> Result<Pdu> {
        let config = {
            let state = self.sessions.get(&session).ok_or_else(|| Error::invalid_state("unknown session"))?;
            state.config.clone()
        };
        let peer = SocketAddr::new(config.peer, config.port);
        let request_id = self.tracker.allocate_request_id();
        pdu.request_id = request_id;

        self.tracker.enqueue(session, request_id);
        // The tracker promotes the next FIFO waiter from `complete`/
        // `on_retransmit_timer` calls made elsewhere; here we only need
        // to wait for our own turn at the head of the queue.
        loop {
            if self.tracker.try_dispatch_next(session) == Some(request_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let per_attempt = config.per_attempt_timeout();
        let mut bytes = self.build_outbound_message(&config, &pdu, session)?;

        let (tx, mut rx) = oneshot::channel();
        self.waiters.insert(request_id, tx);
        self.tracker.install(
            request_id,
            OutstandingRequest {
                session,
                message: bytes.clone(),
                retries_left: config.retries,
                deadline: Instant::now() + per_attempt,
                retransmit_interval: per_attempt,
            },
        );

        self.pace_and_send(session, &config, &bytes, peer).await?;
        self.fire(session, SessionEventKind::Send, peer, pdu.clone());

        let outcome = loop {
            match tokio::time::timeout(per_attempt, &mut rx).await {
                Ok(Ok(Inbound::Response(resp))) => break Ok(resp),
                Ok(Ok(Inbound::Report(report))) => {
                    self.apply_report(session, &report);
                    let (tx2, rx2) = oneshot::channel();
                    self.waiters.insert(request_id, tx2);
                    rx = rx2;
                    bytes = self.build_outbound_message(&config, &pdu, session)?;
                    self.pace_and_send(session, &config, &bytes, peer).await?;
                    continue;
                }
                Ok(Ok(Inbound::Teardown)) | Ok(Err(_)) => break Err(Error::NoResponse),
                Err(_elapsed) => match self.tracker.on_retransmit_timer(request_id) {
                    RetransmitOutcome::Retransmit => {
                        bytes = self.build_outbound_message(&config, &pdu, session)?;
                        self.pace_and_send(session, &config, &bytes, peer).await?;
                        continue;
                    }
                    RetransmitOutcome::Exhausted | RetransmitOutcome::AlreadyComplete => break Err(Error::NoResponse),
                },
            }
        };

        self.waiters.remove(&request_id);
        self.tracker.cancel(request_id);
        outcome
    }

    /// Async counterpart to [`Self::send_request`] (§4.4, §5): fires the
    /// same windowed/retried send but returns immediately, handing the
    /// eventual `Result<Pdu>` to `on_complete` from whatever task ends up
    /// resolving it instead of the caller's own stack.
    pub fn send_request_async<F>(self: &Arc<Self>, session: SessionId, pdu: Pdu, on_complete: F)
    where
        F: FnOnce(Result<Pdu>) + Send + 'static,
    {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = engine.send_request(session, pdu).await;
            on_complete(outcome);
        });
    }

    /// Blocks until `session` has no requests outstanding or waiting in
    /// its FIFO (§5's explicit `wait` operation). A session with nothing
    /// ever sent returns immediately.
    pub async fn wait(&self, session: SessionId) {
        while self.tracker.has_outstanding(session) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Blocks until the specific `request_id` has completed (response,
    /// exhaustion, or teardown) — the single-request form of
    /// [`Self::wait`].
    pub async fn wait_for(&self, request_id: RequestId) {
        while self.tracker.peek_session(request_id).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn pace_and_send(&self, session: SessionId, config: &SessionConfig, bytes: &[u8], peer: SocketAddr) -> Result<()> {
        if config.delay_ms > 0 {
            let wait = {
                let state = self.sessions.get(&session);
                match state.and_then(|s| *s.last_send.lock().unwrap()) {
                    Some(last) => {
                        let elapsed = last.elapsed();
                        config.delay().checked_sub(elapsed)
                    }
                    None => None,
                }
            };
            if let Some(remaining) = wait {
                tokio::time::sleep(remaining).await;
            }
        }
        self.transport.send_to(bytes, peer).await?;
        if let Some(state) = self.sessions.get(&session) {
            *state.last_send.lock().unwrap() = Some(Instant::now());
        }
        Ok(())
    }

    fn apply_report(&self, session: SessionId, report: &Pdu) {
        // The REPORT's own v3 security parameters already updated the
        // cache in `handle_v3_pdu`; this hook exists for callers that
        // construct reports out-of-band. Nothing further to do here for
        // the in-band path.
        let _ = (session, report);
    }

    fn build_outbound_message(&self, config: &SessionConfig, pdu: &Pdu, session: SessionId) -> Result<Vec<u8>> {
        match config.version {
            SnmpVersion::V1 => build_v1_message(&config.community, pdu.clone()),
            SnmpVersion::V2c => build_v2c_message(&config.community, pdu),
            SnmpVersion::V3 => self.build_v3_outbound(config, pdu, session),
        }
    }

    fn build_v3_outbound(&self, config: &SessionConfig, pdu: &Pdu, session: SessionId) -> Result<Vec<u8>> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let v3 = &config.v3;
        let (engine_id, engine_boots, engine_time) = {
            let cached = self.sessions.get(&session).map(|s| s.v3_cache.lock().unwrap().clone());
            match cached {
                Some(c) if !c.engine_id.is_empty() => (c.engine_id, c.engine_boots, c.engine_time),
                _ => (v3.engine_id.clone(), v3.engine_boots, v3.engine_time),
            }
        };
        let auth = config.security_level == SecurityLevel::Auth;
        let header = HeaderData {
            msg_id,
            msg_max_size: 65507,
            auth_flag: auth,
            priv_flag: false,
            reportable_flag: true,
            security_model: SECURITY_MODEL_USM,
        };
        let security_params = UsmSecurityParameters {
            authoritative_engine_id: engine_id.clone(),
            authoritative_engine_boots: engine_boots as i64,
            authoritative_engine_time: engine_time as i64,
            user_name: v3.user_name.clone(),
            auth_parameters: vec![0u8; AUTH_PARAMETERS_LEN],
            priv_parameters: Vec::new(),
        };
        let (mut bytes, auth_offset) =
            build_v3_message(&header, &security_params, &engine_id, &v3.context_name, pdu)?;
        if auth {
            let password = v3
                .auth_password
                .as_deref()
                .ok_or_else(|| Error::invalid_state("auth requested with no password configured"))?;
            let key = localized_key(AuthProtocol::HmacMd5, password, &engine_id);
            finalize_auth(AuthProtocol::HmacMd5, &key, &mut bytes, auth_offset)?;
        }
        Ok(bytes)
    }

    /// Walks one or more subtrees against a remote responder (§4.4,
    /// scenario S3): v1 sessions drive the walk with repeated `getnext`,
    /// v2c/v3 sessions with `getbulk` and the ramped `max-repetitions`
    /// [`WalkDriver`] already tracks. Stops each base's cursor the
    /// moment a round returns `endOfMibView` or an OID outside that
    /// base's subtree, and never includes either in the result.
    pub async fn walk(self: &Arc<Self>, session: SessionId, bases: Vec<Oid>) -> Result<Vec<VarBind>> {
        let version = {
            let state = self.sessions.get(&session).ok_or_else(|| Error::invalid_state("unknown session"))?;
            state.config.version
        };
        let mut driver = WalkDriver::new(bases);
        let mut collected = Vec::new();

        while !driver.is_done() {
            let roots = driver.active_roots();
            let cursors = driver.active_bases();
            if cursors.is_empty() {
                break;
            }

            let mut request = if version == SnmpVersion::V1 {
                Pdu::new(PduType::GetNext, 0)
            } else {
                let mut p = Pdu::new(PduType::GetBulk, 0);
                p.set_bulk_params(0, driver.max_repetitions());
                p
            };
            request.var_binds = cursors.iter().map(|oid| VarBind::new(oid.clone(), Value::Null)).collect();

            let response = self.send_request(session, request).await?;

            for (i, vb) in response.var_binds.iter().enumerate() {
                let root = &roots[i % roots.len()];
                if !matches!(vb.value, Value::EndOfMibView) && root.is_prefix_of(&vb.oid) {
                    collected.push(vb.clone());
                }
            }

            if version == SnmpVersion::V1 {
                driver.apply_getnext_round(&response.var_binds);
            } else {
                driver.apply_getbulk_round(&response.var_binds);
            }
        }

        Ok(collected)
    }

    // ---- inbound ------------------------------------------------------

    /// Parses and dispatches one inbound datagram addressed to
    /// `session`, per §4.4's inbound path.
    pub async fn handle_datagram(self: &Arc<Self>, session: SessionId, bytes: Vec<u8>, peer: SocketAddr) -> Result<()> {
        self.bump(session, |c| &c.in_pkts);
        let decoded = match parse_message(&bytes) {
            Ok(d) => d,
            Err(e) => {
                self.bump(session, |c| &c.in_asn_parse_errs);
                return Err(e);
            }
        };
        match decoded {
            DecodedMessage::V1 { community, pdu } => {
                self.handle_community_pdu(session, SnmpVersion::V1, community, pdu, peer).await
            }
            DecodedMessage::V2c { community, pdu } => {
                self.handle_community_pdu(session, SnmpVersion::V2c, community, pdu, peer).await
            }
            DecodedMessage::V3 { header, security_params, context_name, pdu, .. } => {
                self.handle_v3_pdu(session, header, security_params, context_name, pdu, peer, &bytes).await
            }
        }
    }

    async fn handle_community_pdu(
        self: &Arc<Self>,
        session: SessionId,
        wire_version: SnmpVersion,
        community: String,
        pdu: Pdu,
        peer: SocketAddr,
    ) -> Result<()> {
        let config = {
            let state = self.sessions.get(&session).ok_or_else(|| Error::invalid_state("unknown session"))?;
            state.config.clone()
        };
        if community != config.community {
            self.bump(session, |c| &c.in_bad_community_names);
            return Err(Error::invalid_state("community mismatch"));
        }

        self.fire(session, SessionEventKind::Recv, peer, pdu.clone());

        match pdu.pdu_type {
            PduType::Response | PduType::Report => {
                self.complete_outstanding(pdu.request_id, Inbound::Response(pdu));
                Ok(())
            }
            PduType::Trap1 => {
                self.bump(session, |c| &c.in_traps);
                let trap = pdu.trap.clone().ok_or_else(|| Error::dispatch("trap1 pdu missing trap info"))?;
                let mut canon = pdu.clone();
                canon.var_binds = canonicalize_v1_trap(&trap, pdu.var_binds);
                self.fire(session, SessionEventKind::Trap, peer, canon);
                Ok(())
            }
            PduType::Trap2 => {
                self.bump(session, |c| &c.in_traps);
                self.fire(session, SessionEventKind::Trap, peer, pdu);
                Ok(())
            }
            PduType::Inform => {
                self.fire(session, SessionEventKind::Inform, peer, pdu.clone());
                let mut response = Pdu::new(PduType::Response, pdu.request_id);
                response.var_binds = pdu.var_binds.clone();
                let bytes = self.build_community_response(&config, wire_version, response)?;
                self.transport.send_to(&bytes, peer).await?;
                Ok(())
            }
            PduType::Get | PduType::GetNext | PduType::GetBulk | PduType::Set => {
                self.bump_request_kind(session, pdu.pdu_type);
                self.fire(session, SessionEventKind::Begin, peer, pdu.clone());
                let (response, from_cache) = self.dispatch_with_cache(session, &pdu)?;
                self.fire(session, SessionEventKind::End, peer, response.clone());
                let mut wire_response = response;
                if wire_version == SnmpVersion::V1 {
                    downgrade_error_status(&mut wire_response);
                }
                let bytes = self.build_community_response(&config, wire_version, wire_response)?;
                self.transport.send_to(&bytes, peer).await?;
                if !from_cache {
                    self.bump(session, |c| &c.out_get_responses);
                }
                Ok(())
            }
        }
    }

    fn build_community_response(&self, config: &SessionConfig, wire_version: SnmpVersion, pdu: Pdu) -> Result<Vec<u8>> {
        match wire_version {
            SnmpVersion::V1 => build_v1_message(&config.community, pdu),
            _ => build_v2c_message(&config.community, &pdu),
        }
    }

    fn bump_request_kind(&self, session: SessionId, pdu_type: PduType) {
        match pdu_type {
            PduType::Get => self.bump(session, |c| &c.in_get_requests),
            PduType::GetNext | PduType::GetBulk => self.bump(session, |c| &c.in_get_nexts),
            PduType::Set => self.bump(session, |c| &c.in_set_requests),
            _ => {}
        }
    }

    /// Runs the responder dispatch, honoring the at-most-once response
    /// cache (§4.5, §8 property 7) for `set` requests: an identical
    /// retransmission within the 5-second window is answered from cache
    /// without re-running `check`/`commit`.
    fn dispatch_with_cache(&self, session: SessionId, pdu: &Pdu) -> Result<(Pdu, bool)> {
        if pdu.pdu_type == PduType::Set {
            let fingerprint = fingerprint_request(pdu);
            if let Some(cached) = self.tracker.lookup_cached_response(session, pdu.request_id, fingerprint) {
                if let Ok(DecodedMessage::V1 { pdu: cached_pdu, .. } | DecodedMessage::V2c { pdu: cached_pdu, .. }) =
                    parse_message(&cached)
                {
                    return Ok((cached_pdu, true));
                }
            }
            let response = self.run_responder(session, pdu)?;
            let bytes = build_v2c_message("cache", &response)?;
            self.tracker.cache_response(session, pdu.request_id, fingerprint, bytes);
            return Ok((response, false));
        }
        Ok((self.run_responder(session, pdu)?, false))
    }

    /// Executes one Get/GetNext/GetBulk/Set request against a
    /// responder's instance tree (§4.6).
    fn run_responder(&self, session: SessionId, request: &Pdu) -> Result<Pdu> {
        let tree_entry = self
            .trees
            .get(&session)
            .ok_or_else(|| Error::invalid_state("session has no responder tree attached"))?;
        let mut tree = tree_entry.lock().unwrap();
        let repo = self.repository.read().unwrap();

        let mut response = Pdu::new(PduType::Response, request.request_id);

        match request.pdu_type {
            PduType::Get => {
                for (i, vb) in request.var_binds.iter().enumerate() {
                    match agent::get(&mut tree, &repo, &vb.oid) {
                        ReadOutcome::Value(v) => response.var_binds.push(VarBind::new(vb.oid.clone(), v)),
                        ReadOutcome::NoSuchObject => {
                            set_v1_status_once(&mut response, ErrorStatus::NoSuchName, (i + 1) as u32);
                            response.var_binds.push(VarBind::new(vb.oid.clone(), Value::NoSuchObject));
                        }
                        ReadOutcome::NoSuchInstance => {
                            set_v1_status_once(&mut response, ErrorStatus::NoSuchName, (i + 1) as u32);
                            response.var_binds.push(VarBind::new(vb.oid.clone(), Value::NoSuchInstance));
                        }
                        ReadOutcome::EndOfMibView => {
                            response.var_binds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView));
                        }
                    }
                }
            }
            PduType::GetNext => {
                for vb in &request.var_binds {
                    match agent::get_next(&mut tree, &vb.oid) {
                        GetNextOutcome::Value(oid, v) => response.var_binds.push(VarBind::new(oid, v)),
                        GetNextOutcome::EndOfMibView => {
                            response.var_binds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView));
                        }
                    }
                }
            }
            PduType::GetBulk => {
                let non_repeaters = request.non_repeaters() as usize;
                let max_repetitions = request.max_repetitions();
                for vb in request.var_binds.iter().take(non_repeaters) {
                    match agent::get_next(&mut tree, &vb.oid) {
                        GetNextOutcome::Value(oid, v) => response.var_binds.push(VarBind::new(oid, v)),
                        GetNextOutcome::EndOfMibView => {
                            response.var_binds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView))
                        }
                    }
                }
                let mut cursors: Vec<Oid> = request.var_binds.iter().skip(non_repeaters).map(|vb| vb.oid.clone()).collect();
                let mut finished = vec![false; cursors.len()];
                for _ in 0..max_repetitions {
                    if finished.iter().all(|f| *f) {
                        break;
                    }
                    for (i, cursor) in cursors.iter_mut().enumerate() {
                        if finished[i] {
                            response.var_binds.push(VarBind::new(cursor.clone(), Value::EndOfMibView));
                            continue;
                        }
                        match agent::get_next(&mut tree, cursor) {
                            GetNextOutcome::Value(oid, v) => {
                                *cursor = oid.clone();
                                response.var_binds.push(VarBind::new(oid, v));
                            }
                            GetNextOutcome::EndOfMibView => {
                                finished[i] = true;
                                response.var_binds.push(VarBind::new(cursor.clone(), Value::EndOfMibView));
                            }
                        }
                    }
                }
            }
            PduType::Set => {
                let assignments: Vec<(Oid, Value)> =
                    request.var_binds.iter().map(|vb| (vb.oid.clone(), vb.value.clone())).collect();
                match agent::set_pdu(&mut tree, &repo, &assignments) {
                    Ok(values) => {
                        response.var_binds =
                            request.var_binds.iter().zip(values).map(|(vb, v)| VarBind::new(vb.oid.clone(), v)).collect();
                    }
                    Err(SetFailure { index, status }) => {
                        response.set_status(status, index);
                        response.var_binds = request.var_binds.clone();
                    }
                }
            }
            other => return Err(Error::not_supported(format!("{other:?} is not a responder operation"))),
        }

        Ok(response)
    }

    async fn handle_v3_pdu(
        self: &Arc<Self>,
        session: SessionId,
        header: HeaderData,
        security_params: UsmSecurityParameters,
        context_name: String,
        pdu: Pdu,
        peer: SocketAddr,
        raw: &[u8],
    ) -> Result<()> {
        let config = {
            let state = self.sessions.get(&session).ok_or_else(|| Error::invalid_state("unknown session"))?;
            state.config.clone()
        };
        let is_authoritative = matches!(config.application, ApplicationKind::Responder | ApplicationKind::Listener);

        if pdu.pdu_type == PduType::Report {
            if let Some(state) = self.sessions.get(&session) {
                let mut cache = state.v3_cache.lock().unwrap();
                cache.engine_id = security_params.authoritative_engine_id.clone();
                cache.engine_boots = security_params.authoritative_engine_boots as u32;
                cache.engine_time = security_params.authoritative_engine_time as u32;
            }
            self.complete_outstanding(pdu.request_id, Inbound::Report(pdu));
            return Ok(());
        }

        let authoritative_id = if is_authoritative {
            self.local_engine_id.clone()
        } else {
            self.sessions.get(&session).map(|s| s.v3_cache.lock().unwrap().engine_id.clone()).unwrap_or_default()
        };

        if is_authoritative
            && (security_params.authoritative_engine_id.is_empty()
                || security_params.authoritative_engine_id != self.local_engine_id)
        {
            self.usm_counters.unknown_engine_ids.fetch_add(1, Ordering::Relaxed);
            return self
                .send_report(&config, UsmError::UnknownEngineID, pdu.request_id, &context_name, peer)
                .await;
        }

        if config.security_level == SecurityLevel::Auth && !header.auth_flag {
            self.usm_counters.unsupported_sec_levels.fetch_add(1, Ordering::Relaxed);
            return self
                .send_report(&config, UsmError::UnsupportedSecurityLevel, pdu.request_id, &context_name, peer)
                .await;
        }

        if header.auth_flag {
            let password = match config.v3.auth_password.as_deref() {
                Some(p) => p,
                None => {
                    self.usm_counters.unknown_user_names.fetch_add(1, Ordering::Relaxed);
                    return self
                        .send_report(&config, UsmError::UnknownUserName, pdu.request_id, &context_name, peer)
                        .await;
                }
            };
            if security_params.user_name != config.v3.user_name {
                self.usm_counters.unknown_user_names.fetch_add(1, Ordering::Relaxed);
                return self
                    .send_report(&config, UsmError::UnknownUserName, pdu.request_id, &context_name, peer)
                    .await;
            }
            let key = localized_key(AuthProtocol::HmacMd5, password, &authoritative_id);
            let verified = locate_auth_params_offset(raw, &security_params.auth_parameters)
                .map(|offset| verify_auth(AuthProtocol::HmacMd5, &key, raw, offset, &security_params.auth_parameters))
                .unwrap_or(Err(UsmError::WrongDigest.into()));
            if verified.is_err() {
                self.usm_counters.wrong_digests.fetch_add(1, Ordering::Relaxed);
                return self
                    .send_report(&config, UsmError::WrongDigest, pdu.request_id, &context_name, peer)
                    .await;
            }
        }

        self.fire(session, SessionEventKind::Recv, peer, pdu.clone());

        if pdu.pdu_type.is_response_like() {
            self.complete_outstanding(pdu.request_id, Inbound::Response(pdu));
            return Ok(());
        }

        match pdu.pdu_type {
            PduType::Trap2 => {
                self.bump(session, |c| &c.in_traps);
                self.fire(session, SessionEventKind::Trap, peer, pdu);
                Ok(())
            }
            PduType::Inform => {
                self.fire(session, SessionEventKind::Inform, peer, pdu.clone());
                let mut response = Pdu::new(PduType::Response, pdu.request_id);
                response.var_binds = pdu.var_binds.clone();
                let bytes = self.build_v3_response(&config, &context_name, response)?;
                self.transport.send_to(&bytes, peer).await?;
                Ok(())
            }
            PduType::Get | PduType::GetNext | PduType::GetBulk | PduType::Set => {
                self.bump_request_kind(session, pdu.pdu_type);
                self.fire(session, SessionEventKind::Begin, peer, pdu.clone());
                let (response, from_cache) = self.dispatch_with_cache(session, &pdu)?;
                self.fire(session, SessionEventKind::End, peer, response.clone());
                let bytes = self.build_v3_response(&config, &context_name, response)?;
                self.transport.send_to(&bytes, peer).await?;
                if !from_cache {
                    self.bump(session, |c| &c.out_get_responses);
                }
                Ok(())
            }
            _ => Err(Error::not_supported("unexpected v3 PDU type on the inbound path")),
        }
    }

    fn build_v3_response(&self, config: &SessionConfig, context_name: &str, pdu: Pdu) -> Result<Vec<u8>> {
        let header = HeaderData {
            msg_id: self.next_msg_id.fetch_add(1, Ordering::Relaxed),
            msg_max_size: 65507,
            auth_flag: config.security_level == SecurityLevel::Auth,
            priv_flag: false,
            reportable_flag: false,
            security_model: SECURITY_MODEL_USM,
        };
        let security_params = UsmSecurityParameters {
            authoritative_engine_id: self.local_engine_id.clone(),
            authoritative_engine_boots: config.v3.engine_boots as i64,
            authoritative_engine_time: config.v3.engine_time as i64,
            user_name: config.v3.user_name.clone(),
            auth_parameters: vec![0u8; AUTH_PARAMETERS_LEN],
            priv_parameters: Vec::new(),
        };
        let (mut bytes, auth_offset) =
            build_v3_message(&header, &security_params, &self.local_engine_id, context_name, &pdu)?;
        if header.auth_flag {
            if let Some(password) = config.v3.auth_password.as_deref() {
                let key = localized_key(AuthProtocol::HmacMd5, password, &self.local_engine_id);
                finalize_auth(AuthProtocol::HmacMd5, &key, &mut bytes, auth_offset)?;
            }
        }
        Ok(bytes)
    }

    /// Builds and sends an unauthenticated REPORT carrying the named USM
    /// counter, per §4.4/§7: inbound authenticity failures never proceed
    /// to dispatch, and (when the inbound PDU asked for one) always get
    /// a REPORT back instead of silent drop.
    async fn send_report(
        &self,
        config: &SessionConfig,
        err: UsmError,
        request_id: RequestId,
        context_name: &str,
        peer: SocketAddr,
    ) -> Result<()> {
        let counter = match err {
            UsmError::UnsupportedSecurityLevel => &self.usm_counters.unsupported_sec_levels,
            UsmError::NotInTimeWindow => &self.usm_counters.not_in_time_windows,
            UsmError::UnknownUserName => &self.usm_counters.unknown_user_names,
            UsmError::UnknownEngineID => &self.usm_counters.unknown_engine_ids,
            UsmError::WrongDigest => &self.usm_counters.wrong_digests,
        };
        let n = SnmpCounters::bump(counter);
        let mut report = Pdu::new(PduType::Report, request_id);
        report.var_binds.push(VarBind::new(usm_stat_oid(err), Value::Counter32(n)));

        let header = HeaderData {
            msg_id: self.next_msg_id.fetch_add(1, Ordering::Relaxed),
            msg_max_size: 65507,
            auth_flag: false,
            priv_flag: false,
            reportable_flag: false,
            security_model: SECURITY_MODEL_USM,
        };
        let security_params = UsmSecurityParameters {
            authoritative_engine_id: self.local_engine_id.clone(),
            authoritative_engine_boots: config.v3.engine_boots as i64,
            authoritative_engine_time: config.v3.engine_time as i64,
            user_name: String::new(),
            auth_parameters: Vec::new(),
            priv_parameters: Vec::new(),
        };
        let (bytes, _) = build_v3_message(&header, &security_params, &self.local_engine_id, context_name, &report)?;
        trace!(?err, "sending USM report");
        self.transport.send_to(&bytes, peer).await?;
        Ok(())
    }

    /// Delivers a decoded Response/Report to whichever `send_request`
    /// call is waiting on `request_id`. The tracker entry is only
    /// released for terminal (Response) outcomes; a Report is meant to
    /// trigger a resend against the same outstanding slot.
    fn complete_outstanding(&self, request_id: RequestId, inbound: Inbound) {
        let is_report = matches!(inbound, Inbound::Report(_));
        if let Some((_, tx)) = self.waiters.remove(&request_id) {
            let _ = tx.send(inbound);
        } else {
            debug!(request_id, "no waiter for inbound message; delivered via recv binding only");
        }
        if !is_report {
            self.tracker.complete(request_id);
        }
    }
}

/// Sets `status`/`index` on a responder's Get response only if nothing
/// has claimed the slot yet — the first varbind to fail wins, matching
/// the v1/v2 "first error stops further processing" semantics described
/// in §7, while every varbind still gets its own exception value.
fn set_v1_status_once(pdu: &mut Pdu, status: ErrorStatus, index: u32) {
    if pdu.status() == ErrorStatus::NoError {
        pdu.set_status(status, index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicU32 as StdAtomicU32;

    use crate::message::engine::build_v3_message;
    use crate::session::{ApplicationKind, SessionConfig, V3Params};

    struct CapturingTransport {
        sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    }

    impl CapturingTransport {
        fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<()> {
            self.sent.lock().unwrap().push((bytes.to_vec(), peer));
            Ok(())
        }

        async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
            std::future::pending().await
        }
    }

    fn test_peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 161)
    }

    fn responder_config() -> SessionConfig {
        SessionConfig {
            application: ApplicationKind::Responder,
            peer: test_peer().ip(),
            port: 161,
            transport: crate::session::Transport::Udp,
            version: SnmpVersion::V2c,
            community: "public".into(),
            v3: V3Params::default(),
            security_level: SecurityLevel::NoAuth,
            timeout_ms: 3000,
            retries: 2,
            window: 4,
            delay_ms: 0,
            tags: vec![],
            enterprise_oid: None,
        }
    }

    fn test_identity() -> SystemIdentity {
        SystemIdentity {
            descr: "test engine".into(),
            object_id: oid!(1, 3, 6, 1, 4, 1, 1, 1),
            contact: "ops@example.com".into(),
            name: "agent".into(),
            location: "lab".into(),
            services: 72,
        }
    }

    fn new_engine(transport: Arc<CapturingTransport>) -> Arc<Engine> {
        Engine::new(transport, Arc::new(RwLock::new(Repository::new())), vec![0x80, 0, 0, 0, 1])
    }

    #[tokio::test]
    async fn get_request_through_handle_datagram_returns_standard_instance() {
        let transport = Arc::new(CapturingTransport::new());
        let engine = new_engine(transport.clone());
        let session = engine.add_session(responder_config());
        engine.attach_responder(session, test_identity());

        let mut req = Pdu::new(PduType::Get, 7);
        req.var_binds.push(VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Null));
        let bytes = build_v2c_message("public", &req).unwrap();

        engine.handle_datagram(session, bytes, test_peer()).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match parse_message(&sent[0].0).unwrap() {
            DecodedMessage::V2c { pdu, .. } => {
                assert_eq!(pdu.request_id, 7);
                assert_eq!(pdu.error_status, 0);
                assert_eq!(pdu.var_binds[0].value, Value::OctetString(b"test engine".to_vec()));
            }
            other => panic!("expected V2c, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn getnext_walks_into_next_standard_instance() {
        let transport = Arc::new(CapturingTransport::new());
        let engine = new_engine(transport.clone());
        let session = engine.add_session(responder_config());
        engine.attach_responder(session, test_identity());

        let mut req = Pdu::new(PduType::GetNext, 1);
        req.var_binds.push(VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1), Value::Null));
        let bytes = build_v2c_message("public", &req).unwrap();
        engine.handle_datagram(session, bytes, test_peer()).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        match parse_message(&sent[0].0).unwrap() {
            DecodedMessage::V2c { pdu, .. } => {
                assert_eq!(pdu.var_binds[0].oid, oid!(1, 3, 6, 1, 2, 1, 1, 1, 0));
            }
            other => panic!("expected V2c, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_replay_within_cache_window_does_not_refire_commit() {
        let transport = Arc::new(CapturingTransport::new());
        let engine = new_engine(transport.clone());
        let session = engine.add_session(responder_config());
        engine.attach_responder(session, test_identity());

        let commit_count = Arc::new(StdAtomicU32::new(0));
        let cc = commit_count.clone();
        engine.with_tree(session, |tree| {
            let id = tree.find(&oid!(1, 3, 6, 1, 2, 1, 1, 4, 0)).expect("sysContact.0 registered");
            tree.get_node_mut(id).bindings.commit.push(Box::new(move |_ev| {
                cc.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        });

        let mut req = Pdu::new(PduType::Set, 55);
        req.var_binds.push(VarBind::new(
            oid!(1, 3, 6, 1, 2, 1, 1, 4, 0),
            Value::OctetString(b"new-contact".to_vec()),
        ));
        let bytes = build_v2c_message("public", &req).unwrap();

        engine.handle_datagram(session, bytes.clone(), test_peer()).await.unwrap();
        engine.handle_datagram(session, bytes, test_peer()).await.unwrap();

        assert_eq!(commit_count.load(Ordering::SeqCst), 1);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, sent[1].0);
    }

    #[tokio::test]
    async fn v3_request_with_unknown_engine_id_triggers_report() {
        let transport = Arc::new(CapturingTransport::new());
        let engine = new_engine(transport.clone());
        let mut cfg = responder_config();
        cfg.version = SnmpVersion::V3;
        let session = engine.add_session(cfg);
        engine.attach_responder(session, test_identity());

        let header = HeaderData {
            msg_id: 1,
            msg_max_size: 65507,
            auth_flag: false,
            priv_flag: false,
            reportable_flag: true,
            security_model: SECURITY_MODEL_USM,
        };
        let security_params = UsmSecurityParameters {
            authoritative_engine_id: Vec::new(),
            authoritative_engine_boots: 0,
            authoritative_engine_time: 0,
            user_name: String::new(),
            auth_parameters: Vec::new(),
            priv_parameters: Vec::new(),
        };
        let mut req = Pdu::new(PduType::Get, 99);
        req.var_binds.push(VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Null));
        let (bytes, _) = build_v3_message(&header, &security_params, b"", "", &req).unwrap();

        engine.handle_datagram(session, bytes, test_peer()).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match parse_message(&sent[0].0).unwrap() {
            DecodedMessage::V3 { pdu, .. } => {
                assert_eq!(pdu.pdu_type, PduType::Report);
                assert_eq!(pdu.var_binds[0].oid, usm_stat_oid(UsmError::UnknownEngineID));
            }
            other => panic!("expected V3, got {other:?}"),
        }
    }

    struct PairedTransport {
        to_peer: tokio::sync::mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
        from_peer: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    }

    #[async_trait]
    impl Transport for PairedTransport {
        async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<()> {
            self.to_peer.send((bytes.to_vec(), peer)).map_err(|_| Error::transport("peer channel closed"))
        }

        async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
            self.from_peer.lock().await.recv().await.ok_or_else(|| Error::transport("peer channel closed"))
        }
    }

    #[tokio::test]
    async fn send_request_round_trips_against_an_in_process_responder() {
        let (a_to_b_tx, a_to_b_rx) = tokio::sync::mpsc::unbounded_channel();
        let (b_to_a_tx, b_to_a_rx) = tokio::sync::mpsc::unbounded_channel();

        let generator_transport =
            Arc::new(PairedTransport { to_peer: a_to_b_tx, from_peer: tokio::sync::Mutex::new(b_to_a_rx) });
        let responder_transport =
            Arc::new(PairedTransport { to_peer: b_to_a_tx, from_peer: tokio::sync::Mutex::new(a_to_b_rx) });

        let generator = Engine::new(generator_transport, Arc::new(RwLock::new(Repository::new())), vec![1]);
        let responder = Engine::new(responder_transport, Arc::new(RwLock::new(Repository::new())), vec![2]);

        let mut gen_cfg = responder_config();
        gen_cfg.application = ApplicationKind::Generator;
        let gen_session = generator.add_session(gen_cfg);

        let resp_session = responder.add_session(responder_config());
        responder.attach_responder(resp_session, test_identity());
        responder.spawn_recv_loop(resp_session);
        generator.spawn_recv_loop(gen_session);

        let mut req = Pdu::new(PduType::Get, 0);
        req.var_binds.push(VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Null));

        let response = generator.send_request(gen_session, req).await.unwrap();
        assert_eq!(response.error_status, 0);
        assert_eq!(response.var_binds[0].value, Value::OctetString(b"test engine".to_vec()));
    }
}
