//! SIP Transaction Layer.
//!
//! Four state machines (RFC 3261 section 17) share a [`TransactionCore`]
//! holding the transport binding, current state, last message and
//! retransmission bookkeeping. All timers run on one [`TimerWheel`]
//! polled by a single engine task; per-transaction events are serialized
//! through an event gate so at most one transition runs at a time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::message::{SipMethod, StatusCode};
use crate::transport::{
    IncomingRequest, IncomingResponse, OutgoingRequest, OutgoingResponse, ToBytes, Transport,
};

pub mod key;

mod client;
mod inv_client;
mod inv_server;
mod server;
mod timer;

pub use client::ClientTransaction;
pub use inv_client::InviteClientTransaction;
pub use inv_server::InviteServerTransaction;
pub use key::TsxKey;
pub use server::ServerTransaction;

pub(crate) use timer::TimerWheel;

/// RTT estimate, the base of every retransmission schedule.
pub const T1: Duration = Duration::from_millis(500);

/// Retransmission interval cap.
pub const T2: Duration = Duration::from_secs(4);

/// Maximum lifetime of a message in the network.
pub const T4: Duration = Duration::from_secs(5);

/// Quiet time an unreliable INVITE client lingers in Completed.
pub(crate) const TIMER_D: Duration = Duration::from_secs(32);

/// Delay before an INVITE server transaction answers 100 on its own.
pub(crate) const AUTO_TRYING_DELAY: Duration = Duration::from_millis(200);

/// Per-transaction timer configuration.
#[derive(Debug, Clone, Copy)]
pub struct TimerSettings {
    pub t1: Duration,
    pub t2: Duration,
    pub t4: Duration,
    /// Suppresses the retransmission timers (A, E and G). Timeout and
    /// quiet-time timers still run.
    pub retransmission_disabled: bool,
}

impl TimerSettings {
    /// T6, the transaction timeout: 64 times T1.
    pub fn t6(&self) -> Duration {
        self.t1 * 64
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: T1,
            t2: T2,
            t4: T4,
            retransmission_disabled: false,
        }
    }
}

/// The role an endpoint plays for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Uac,
    Uas,
}

/// Transaction states across all four machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsxState {
    #[default]
    Initial,
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

/// The timers of RFC 3261 section 17, plus the provisional auto-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    Trying100,
}

/// One scheduled wheel entry.
pub(crate) struct TimerEvent {
    pub key: TsxKey,
    pub kind: TimerKind,
}

/// What a client transaction reports to the transaction user.
pub enum TsxEvent {
    /// A provisional or final response. A 2xx to INVITE arrives here and
    /// the transaction is already terminated; the dialog layer ACKs.
    Response(IncomingResponse),
    /// Timer B/F fired without a final response.
    Timeout,
    /// The transaction reached Terminated.
    Terminated,
}

pub type TsxEventRx = mpsc::UnboundedReceiver<TsxEvent>;
pub(crate) type TsxEventTx = mpsc::UnboundedSender<TsxEvent>;

struct CoreInner {
    role: Role,
    key: TsxKey,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    addr: SocketAddr,
    settings: TimerSettings,
    state: Mutex<TsxState>,
    last_status: RwLock<Option<StatusCode>>,
    last_msg: tokio::sync::RwLock<Option<Bytes>>,
    retransmit_count: AtomicUsize,
    /// Current interval of the doubling retransmission timer.
    retransmit_interval: Mutex<Duration>,
    /// Wheel handles of this transaction's pending timers.
    pending_timers: Mutex<Vec<u64>>,
    /// Serializes state transitions: one handler at a time.
    event_gate: tokio::sync::Mutex<()>,
}

/// State shared by all four state machines.
#[derive(Clone)]
pub struct TransactionCore(Arc<CoreInner>);

impl TransactionCore {
    pub(crate) fn new_uac(
        request: &OutgoingRequest,
        endpoint: &Endpoint,
        state: TsxState,
    ) -> Result<Self> {
        let key = TsxKey::for_outgoing(request)?;
        Ok(Self::build(
            Role::Uac,
            key,
            endpoint,
            request.transport.clone(),
            request.addr,
            state,
        ))
    }

    pub(crate) fn new_uas(request: &IncomingRequest, endpoint: &Endpoint, state: TsxState) -> Self {
        let key = TsxKey::for_incoming(request);
        Self::build(
            Role::Uas,
            key,
            endpoint,
            request.transport.clone(),
            request.packet.addr,
            state,
        )
    }

    fn build(
        role: Role,
        key: TsxKey,
        endpoint: &Endpoint,
        transport: Arc<dyn Transport>,
        addr: SocketAddr,
        state: TsxState,
    ) -> Self {
        let settings = endpoint.timer_settings();
        let core = TransactionCore(Arc::new(CoreInner {
            role,
            key,
            endpoint: endpoint.clone(),
            transport,
            addr,
            settings,
            state: Mutex::new(state),
            last_status: RwLock::new(None),
            last_msg: tokio::sync::RwLock::new(None),
            retransmit_count: AtomicUsize::new(0),
            retransmit_interval: Mutex::new(settings.t1),
            pending_timers: Mutex::new(Vec::new()),
            event_gate: tokio::sync::Mutex::new(()),
        }));
        log::trace!("Transaction created [{:?}] {:?}", role, core.key());
        core
    }

    pub(crate) fn key(&self) -> &TsxKey {
        &self.0.key
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.0.endpoint
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.0.transport
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.0.addr
    }

    pub(crate) fn settings(&self) -> &TimerSettings {
        &self.0.settings
    }

    /// Whether the underlying transport is reliable.
    pub fn reliable(&self) -> bool {
        self.0.transport.reliable()
    }

    /// The current state.
    pub fn state(&self) -> TsxState {
        *self.0.state.lock().expect("Lock failed")
    }

    pub(crate) fn change_state(&self, state: TsxState) {
        let old = {
            let mut guard = self.0.state.lock().expect("Lock failed");
            std::mem::replace(&mut *guard, state)
        };
        log::trace!("State changed [{old:?} -> {state:?}] {:?}", self.key());
    }

    /// Count of retransmissions performed so far.
    pub fn retransmit_count(&self) -> u32 {
        self.0.retransmit_count.load(Ordering::SeqCst) as u32
    }

    /// The last status code sent (UAS) or received (UAC).
    pub fn last_status(&self) -> Option<StatusCode> {
        *self.0.last_status.read().expect("Lock failed")
    }

    pub(crate) fn set_last_status(&self, code: StatusCode) {
        *self.0.last_status.write().expect("Lock failed") = Some(code);
    }

    pub(crate) async fn event_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.0.event_gate.lock().await
    }

    // ----- timers -----

    pub(crate) fn schedule(&self, kind: TimerKind, delay: Duration) {
        let wheel = self.0.endpoint.tsx_layer().wheel();
        let id = wheel.schedule(
            delay,
            TimerEvent {
                key: self.0.key.clone(),
                kind,
            },
        );
        self.0.pending_timers.lock().expect("Lock failed").push(id);
    }

    /// Restart the doubling retransmission timer (A/E/G), honoring the
    /// per-transaction disable flag.
    pub(crate) fn schedule_retransmit(&self, kind: TimerKind) {
        if self.reliable() || self.0.settings.retransmission_disabled {
            return;
        }
        let interval = *self.0.retransmit_interval.lock().expect("Lock failed");
        self.schedule(kind, interval);
    }

    /// Double the retransmission interval, capped at T2.
    pub(crate) fn back_off_retransmit(&self) {
        let mut interval = self.0.retransmit_interval.lock().expect("Lock failed");
        *interval = std::cmp::min(*interval * 2, self.0.settings.t2);
    }

    pub(crate) fn cancel_timers(&self) {
        let wheel = self.0.endpoint.tsx_layer().wheel();
        let ids: Vec<u64> = self.0.pending_timers.lock().expect("Lock failed").drain(..).collect();
        for id in ids {
            wheel.cancel(id);
        }
    }

    // ----- sending -----

    pub(crate) async fn send_request(&self, msg: &mut OutgoingRequest) -> Result<()> {
        log::debug!("<= Request {} to /{}", msg.method(), msg.addr);
        let buf = match msg.buf.take() {
            Some(buf) => buf,
            None => msg.to_bytes()?,
        };
        self.0.transport.send(&buf, &self.0.addr).await?;
        *self.0.last_msg.write().await = Some(buf);
        Ok(())
    }

    pub(crate) async fn send_response(&self, msg: &mut OutgoingResponse) -> Result<()> {
        let code = msg.status_code();
        log::debug!("=> Response {} {}", code.code(), msg.reason());
        let buf = match msg.buf.take() {
            Some(buf) => buf,
            None => msg.to_bytes()?,
        };
        self.0.transport.send(&buf, &self.0.addr).await?;
        self.set_last_status(code);
        *self.0.last_msg.write().await = Some(buf);
        Ok(())
    }

    /// Resend the last message, returning the updated retransmission
    /// count.
    pub(crate) async fn retransmit(&self) -> Result<u32> {
        let resent = {
            let last = self.0.last_msg.read().await;
            match last.as_ref() {
                Some(buf) => {
                    self.0.transport.send(buf, &self.0.addr).await?;
                    true
                }
                None => false,
            }
        };
        if !resent {
            return Err(Error::ProtocolViolation("nothing to retransmit"));
        }
        Ok(self.0.retransmit_count.fetch_add(1, Ordering::SeqCst) as u32 + 1)
    }

    /// Final teardown: Terminated, timers gone, removed from the table.
    pub(crate) fn on_terminated(&self) {
        self.change_state(TsxState::Terminated);
        self.cancel_timers();

        let layer = self.0.endpoint.tsx_layer();
        match self.0.role {
            Role::Uac => {
                layer.remove_client(&self.0.key);
            }
            Role::Uas => {
                layer.remove_server(&self.0.key);
            }
        };
    }
}

/// A client transaction of either kind.
#[derive(Clone)]
pub enum ClientTsx {
    Invite(InviteClientTransaction),
    NonInvite(ClientTransaction),
}

impl ClientTsx {
    pub fn key(&self) -> &TsxKey {
        match self {
            ClientTsx::Invite(tsx) => tsx.key(),
            ClientTsx::NonInvite(tsx) => tsx.key(),
        }
    }

    pub fn state(&self) -> TsxState {
        match self {
            ClientTsx::Invite(tsx) => tsx.state(),
            ClientTsx::NonInvite(tsx) => tsx.state(),
        }
    }

    pub(crate) async fn receive(&self, response: IncomingResponse) -> Result<()> {
        match self {
            ClientTsx::Invite(tsx) => tsx.receive(response).await,
            ClientTsx::NonInvite(tsx) => tsx.receive(response).await,
        }
    }

    pub(crate) async fn on_timer(&self, kind: TimerKind) -> Result<()> {
        match self {
            ClientTsx::Invite(tsx) => tsx.on_timer(kind).await,
            ClientTsx::NonInvite(tsx) => tsx.on_timer(kind).await,
        }
    }
}

/// A server transaction of either kind.
#[derive(Clone)]
pub enum ServerTsx {
    Invite(InviteServerTransaction),
    NonInvite(ServerTransaction),
}

impl std::fmt::Debug for ServerTsx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerTsx::Invite(_) => write!(f, "ServerTsx::Invite(..)"),
            ServerTsx::NonInvite(_) => write!(f, "ServerTsx::NonInvite(..)"),
        }
    }
}

impl ServerTsx {
    pub fn key(&self) -> &TsxKey {
        match self {
            ServerTsx::Invite(tsx) => tsx.key(),
            ServerTsx::NonInvite(tsx) => tsx.key(),
        }
    }

    pub fn last_status(&self) -> Option<StatusCode> {
        match self {
            ServerTsx::Invite(tsx) => tsx.last_status(),
            ServerTsx::NonInvite(tsx) => tsx.last_status(),
        }
    }

    pub(crate) async fn on_timer(&self, kind: TimerKind) -> Result<()> {
        match self {
            ServerTsx::Invite(tsx) => tsx.on_timer(kind).await,
            ServerTsx::NonInvite(tsx) => tsx.on_timer(kind).await,
        }
    }
}

/// Holds every live transaction, keyed per RFC 3261 section 17.2.3.
pub struct TransactionLayer {
    client_transactions: Mutex<HashMap<TsxKey, ClientTsx>>,
    server_transactions: Mutex<HashMap<TsxKey, ServerTsx>>,
    wheel: TimerWheel<TimerEvent>,
}

impl Default for TransactionLayer {
    fn default() -> Self {
        TransactionLayer {
            client_transactions: Default::default(),
            server_transactions: Default::default(),
            wheel: TimerWheel::new(),
        }
    }
}

impl TransactionLayer {
    pub(crate) fn wheel(&self) -> &TimerWheel<TimerEvent> {
        &self.wheel
    }

    pub(crate) fn add_client(&self, tsx: ClientTsx) {
        let key = tsx.key().clone();
        self.client_transactions
            .lock()
            .expect("Lock failed")
            .insert(key, tsx);
    }

    pub(crate) fn add_server(&self, tsx: ServerTsx) {
        let key = tsx.key().clone();
        self.server_transactions
            .lock()
            .expect("Lock failed")
            .insert(key, tsx);
    }

    pub fn remove_client(&self, key: &TsxKey) -> Option<ClientTsx> {
        self.client_transactions
            .lock()
            .expect("Lock failed")
            .remove(key)
    }

    pub fn remove_server(&self, key: &TsxKey) -> Option<ServerTsx> {
        self.server_transactions
            .lock()
            .expect("Lock failed")
            .remove(key)
    }

    pub(crate) fn find_client(&self, key: &TsxKey) -> Option<ClientTsx> {
        self.client_transactions
            .lock()
            .expect("Lock failed")
            .get(key)
            .cloned()
    }

    pub(crate) fn find_server(&self, key: &TsxKey) -> Option<ServerTsx> {
        self.server_transactions
            .lock()
            .expect("Lock failed")
            .get(key)
            .cloned()
    }

    /// Route an inbound response to its client transaction. Returns the
    /// response back when no transaction claims it.
    pub(crate) async fn handle_response(
        &self,
        response: IncomingResponse,
    ) -> Result<Option<IncomingResponse>> {
        let Some(key) = TsxKey::for_response(&response) else {
            return Ok(Some(response));
        };
        let Some(tsx) = self.find_client(&key) else {
            return Ok(Some(response));
        };

        tsx.receive(response).await?;
        Ok(None)
    }

    /// Route an inbound request to an existing server transaction.
    /// Returns `true` when the transaction consumed it.
    pub(crate) async fn handle_request(
        &self,
        endpoint: &Endpoint,
        request: &IncomingRequest,
    ) -> Result<bool> {
        let key = TsxKey::for_incoming(request);
        let Some(tsx) = self.find_server(&key) else {
            return Ok(false);
        };

        match tsx {
            ServerTsx::NonInvite(uas) => {
                uas.receive_retransmission().await?;
                Ok(true)
            }
            ServerTsx::Invite(uas_inv) => match request.method() {
                SipMethod::Ack => {
                    uas_inv.on_ack().await?;
                    Ok(true)
                }
                SipMethod::Cancel => {
                    uas_inv.on_cancel(endpoint, request).await?;
                    Ok(true)
                }
                _ => {
                    uas_inv.receive_retransmission().await?;
                    Ok(true)
                }
            },
        }
    }

    /// One engine task services every transaction timer.
    pub(crate) async fn timer_task(endpoint: Endpoint) {
        let mut tick = tokio::time::interval(Duration::from_millis(10));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            let layer = endpoint.tsx_layer();
            for event in layer.wheel.poll(Instant::now()) {
                if let Err(err) = layer.dispatch_timer(event).await {
                    log::debug!("Timer dispatch failed: {err}");
                }
            }
        }
    }

    async fn dispatch_timer(&self, event: TimerEvent) -> Result<()> {
        if let Some(tsx) = self.find_client(&event.key) {
            return tsx.on_timer(event.kind).await;
        }
        if let Some(tsx) = self.find_server(&event.key) {
            return tsx.on_timer(event.kind).await;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::time::SystemTime;

    use super::*;
    use crate::endpoint;
    use crate::headers::{CSeq, CallId, Contact, From, Header, Headers, To, Via};
    use crate::headers::SipHeaderParse;
    use crate::message::{
        NameAddr, Request, Response, SipMethod, StatusCode, StatusLine, Uri,
    };
    use crate::transport::udp::mock::MockUdpTransport;
    use crate::transport::{OutgoingAddr, Packet, RequestHeaders};

    pub fn base_headers(method: SipMethod) -> (Headers, RequestHeaders) {
        let via = Via::from_value("SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bK3060200;received=127.0.0.1")
            .unwrap();
        let from = From::from_value("<sip:alice@127.0.0.1:5060>;tag=9fxced76sl").unwrap();
        let to = To::from_value("<sip:bob@127.0.0.1:5060>").unwrap();
        let call_id = CallId::new("bs9ki9iqbee8k5kal8mpqb");
        let cseq = CSeq::new(1, method);

        let mut headers = Headers::with_capacity(5);
        headers.push(Header::Via(via.clone()));
        headers.push(Header::From(from.clone()));
        headers.push(Header::To(to.clone()));
        headers.push(Header::CallId(call_id.clone()));
        headers.push(Header::CSeq(cseq.clone()));

        let head = RequestHeaders {
            via,
            from,
            to,
            call_id,
            cseq,
        };
        (headers, head)
    }

    pub fn incoming_request(method: SipMethod) -> IncomingRequest {
        let (headers, head) = base_headers(method.clone());
        let transport = Arc::new(MockUdpTransport);
        let uri = Uri::from_static("sip:bob@127.0.0.1:5060").unwrap();

        let mut request = Request::new(method, uri);
        request.headers = headers;

        IncomingRequest {
            request,
            packet: Packet {
                payload: Bytes::new(),
                addr: transport.addr(),
                time: SystemTime::now(),
            },
            transport,
            transaction: None,
            head,
        }
    }

    pub fn outgoing_request(method: SipMethod) -> OutgoingRequest {
        let (headers, _) = base_headers(method.clone());
        let transport = Arc::new(MockUdpTransport);
        let addr = transport.addr();
        let uri = Uri::from_static("sip:bob@127.0.0.1:5060").unwrap();

        let mut request = Request::new(method, uri);
        request.headers = headers;

        OutgoingRequest {
            request,
            addr,
            transport,
            buf: None,
        }
    }

    pub fn incoming_response(code: StatusCode) -> IncomingResponse {
        let (headers, head) = base_headers(SipMethod::Invite);
        let transport = Arc::new(MockUdpTransport);

        let mut response = Response::new(StatusLine::from_code(code));
        response.headers = headers;

        IncomingResponse {
            response,
            packet: Packet {
                payload: Bytes::new(),
                addr: transport.addr(),
                time: SystemTime::now(),
            },
            transport,
            transaction: None,
            head,
        }
    }

    pub fn incoming_response_for(code: StatusCode, method: SipMethod) -> IncomingResponse {
        let mut response = incoming_response(code);
        response.head.cseq = CSeq::new(1, method);
        response
    }

    pub fn outgoing_response(code: StatusCode) -> OutgoingResponse {
        let (headers, _) = base_headers(SipMethod::Invite);
        let transport = Arc::new(MockUdpTransport);
        let addr = transport.addr();

        let mut response = Response::new(StatusLine::from_code(code));
        response.headers = headers;

        OutgoingResponse {
            response,
            addr: OutgoingAddr::Addr { addr, transport },
            buf: None,
        }
    }

    pub fn contact() -> Contact {
        let uri = Uri::from_static("sip:bob@127.0.0.1:5060").unwrap();
        Contact::new(NameAddr::new(uri))
    }

    pub async fn default_endpoint() -> Endpoint {
        endpoint::Builder::new()
            .with_name("test-endpoint")
            .build()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMethod;

    #[tokio::test]
    async fn test_server_tsx_registered_and_removed() {
        let endpoint = mock::default_endpoint().await;
        let mut request = mock::incoming_request(SipMethod::Register);

        let tsx = ServerTransaction::new(&endpoint, &mut request);
        let key = request.tsx_key().unwrap().clone();

        let layer = endpoint.tsx_layer();
        assert_matches!(layer.find_server(&key), Some(ServerTsx::NonInvite(_)));

        tsx.on_terminated();
        assert!(layer.find_server(&key).is_none());
    }

    #[tokio::test]
    async fn test_invite_server_tsx_registered() {
        let endpoint = mock::default_endpoint().await;
        let mut request = mock::incoming_request(SipMethod::Invite);

        let _tsx = InviteServerTransaction::new(&endpoint, &mut request);
        let key = request.tsx_key().unwrap().clone();

        assert_matches!(
            endpoint.tsx_layer().find_server(&key),
            Some(ServerTsx::Invite(_))
        );
    }

    #[tokio::test]
    async fn test_cancel_matches_invite_server_tsx() {
        let endpoint = mock::default_endpoint().await;
        let mut invite = mock::incoming_request(SipMethod::Invite);

        InviteServerTransaction::new(&endpoint, &mut invite);

        let cancel = mock::incoming_request(SipMethod::Cancel);
        let key = TsxKey::for_incoming(&cancel);

        assert!(endpoint.tsx_layer().find_server(&key).is_some());
    }
}
