//! SIP Transport Layer.
//!
//! A [`Transport`] is one channel a message can travel over: UDP, TCP,
//! TLS or WebSocket. The [`TransportLayer`] owns every live channel,
//! pools stream connections by remote address, and funnels inbound
//! packets through one event channel into the endpoint.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::headers::{
    CSeq, CallId, ContentLength, From as FromHdr, Header, Headers, Rport, SipHeaderParse, To, Via,
};
use crate::message::{
    HostPort, Request, Response, SipMethod, SipMsg, StatusCode, TransportKind, Uri,
};
use crate::parser::Parser;
use crate::transaction::key::TsxKey;
use crate::transaction::{ClientTsx, ServerTsx};

pub mod tcp;
pub mod tls;
pub mod udp;
pub mod ws;

mod decoder;

pub(crate) use decoder::StreamDecoder;

/// Datagram payloads above this many bytes must move to a reliable
/// transport (RFC 3261 section 18.1.1).
pub const UDP_SIZE_LIMIT: usize = 1300;

/// Largest datagram the stack accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65_527;

/// One channel messages travel over.
#[async_trait::async_trait]
pub trait Transport: Sync + Send + 'static {
    /// Send a buffer to the remote address, returning the bytes written.
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize>;

    /// The transport kind of this channel.
    fn kind(&self) -> TransportKind;

    /// The local binding of this channel.
    fn addr(&self) -> SocketAddr;

    /// Printable local binding, used in Via and Contact construction.
    fn local_name(&self) -> Cow<'_, str>;

    /// Whether the channel neither loses nor duplicates messages.
    fn reliable(&self) -> bool {
        self.kind().is_reliable()
    }

    fn secure(&self) -> bool {
        self.kind().is_secure()
    }

    /// Whether `addr` shares this channel's address family.
    fn is_same_af(&self, addr: &SocketAddr) -> bool {
        let ours = self.addr();
        (addr.is_ipv4() && ours.is_ipv4()) || (addr.is_ipv6() && ours.is_ipv6())
    }

    /// The key this channel is pooled under.
    fn key(&self) -> TransportKey {
        TransportKey::new(self.addr(), self.kind())
    }
}

/// Pool key for a channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TransportKey {
    addr: SocketAddr,
    kind: TransportKind,
}

impl TransportKey {
    pub fn new(addr: SocketAddr, kind: TransportKind) -> Self {
        TransportKey { addr, kind }
    }
}

/// Creates outbound connections for connection-oriented kinds.
#[async_trait::async_trait]
pub trait Factory: Sync + Send {
    async fn create(&self, addr: SocketAddr) -> Result<Arc<dyn Transport>>;

    fn kind(&self) -> TransportKind;
}

/// A datagram or framed stream chunk as it came off a channel.
#[derive(Clone)]
pub struct Packet {
    pub payload: Bytes,
    pub addr: SocketAddr,
    pub time: SystemTime,
}

/// Where an outbound response goes: straight back over the channel it
/// arrived on, or to a host still needing resolution (Via maddr).
pub enum OutgoingAddr {
    HostPort {
        host: HostPort,
        kind: TransportKind,
    },
    Addr {
        addr: SocketAddr,
        transport: Arc<dyn Transport>,
    },
}

/// Serialize into canonical wire form.
pub trait ToBytes {
    fn to_bytes(&self) -> Result<Bytes>;
}

/// Canonical message encoding: start line, mandatory headers first,
/// Content-Length recomputed from the body, CRLF, body.
pub(crate) fn encode_message(
    start_line: &str,
    headers: &Headers,
    body: Option<&Bytes>,
) -> Result<Bytes> {
    let estimated = if body.is_none() { 800 } else { 1500 };
    let mut writer = BytesMut::with_capacity(estimated).writer();

    writer.write_all(start_line.as_bytes())?;

    for header in headers.wire_order() {
        // Content-Length is always recomputed below.
        if matches!(header, Header::ContentLength(_)) {
            continue;
        }
        write!(writer, "{header}\r\n")?;
    }

    let body_len = body.map(|b| b.len()).unwrap_or(0);
    write!(writer, "{}: {body_len}\r\n\r\n", ContentLength::NAME)?;

    if let Some(body) = body {
        writer.write_all(body)?;
    }

    Ok(writer.into_inner().freeze())
}

/// An outbound SIP request bound to a resolved destination.
pub struct OutgoingRequest {
    pub request: Request,
    pub addr: SocketAddr,
    pub transport: Arc<dyn Transport>,
    /// The encoded form, cached after first serialization.
    pub buf: Option<Bytes>,
}

impl OutgoingRequest {
    pub fn new(request: Request, transport: Arc<dyn Transport>, addr: SocketAddr) -> Self {
        OutgoingRequest {
            request,
            addr,
            transport,
            buf: None,
        }
    }

    pub fn method(&self) -> &SipMethod {
        self.request.method()
    }
}

impl ToBytes for OutgoingRequest {
    fn to_bytes(&self) -> Result<Bytes> {
        encode_message(
            &self.request.req_line.to_string(),
            &self.request.headers,
            self.request.body.as_ref(),
        )
    }
}

/// An outbound SIP response.
pub struct OutgoingResponse {
    pub response: Response,
    pub addr: OutgoingAddr,
    pub buf: Option<Bytes>,
}

impl OutgoingResponse {
    pub fn status_code(&self) -> StatusCode {
        self.response.status_line.code
    }

    pub fn reason(&self) -> &str {
        &self.response.status_line.reason
    }

    pub fn is_provisional(&self) -> bool {
        self.status_code().is_provisional()
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.response.body = Some(body);
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.response.headers
    }

    pub fn append_headers(&mut self, other: &mut Headers) {
        self.response.append_headers(other);
    }
}

impl ToBytes for OutgoingResponse {
    fn to_bytes(&self) -> Result<Bytes> {
        encode_message(
            &self.response.status_line.to_string(),
            &self.response.headers,
            self.response.body.as_ref(),
        )
    }
}

/// The headers every dispatchable message must carry.
#[derive(Clone)]
pub struct RequestHeaders {
    pub via: Via,
    pub from: FromHdr,
    pub to: To,
    pub call_id: CallId,
    pub cseq: CSeq,
}

/// An inbound SIP request.
pub struct IncomingRequest {
    pub(crate) request: Request,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) packet: Packet,
    pub(crate) transaction: Option<ServerTsx>,
    pub(crate) head: RequestHeaders,
}

impl IncomingRequest {
    pub fn method(&self) -> &SipMethod {
        self.request.method()
    }

    pub fn is_method(&self, method: &SipMethod) -> bool {
        self.request.method() == method
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.request.body.as_ref()
    }

    pub fn to(&self) -> &To {
        &self.head.to
    }

    pub fn from(&self) -> &FromHdr {
        &self.head.from
    }

    pub fn via(&self) -> &Via {
        &self.head.via
    }

    pub fn call_id(&self) -> &CallId {
        &self.head.call_id
    }

    pub fn cseq(&self) -> &CSeq {
        &self.head.cseq
    }

    pub fn source(&self) -> &SocketAddr {
        &self.packet.addr
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The transaction key once a server transaction exists.
    pub fn tsx_key(&self) -> Option<&TsxKey> {
        self.transaction.as_ref().map(|tsx| tsx.key())
    }

    pub fn transaction(&self) -> Option<&ServerTsx> {
        self.transaction.as_ref()
    }

    pub(crate) fn set_transaction(&mut self, tsx: ServerTsx) {
        self.transaction = Some(tsx);
    }

    pub(crate) fn take_transaction(&mut self) -> Option<ServerTsx> {
        self.transaction.take()
    }
}

/// An inbound SIP response.
pub struct IncomingResponse {
    pub(crate) response: Response,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) packet: Packet,
    pub(crate) transaction: Option<ClientTsx>,
    pub(crate) head: RequestHeaders,
}

impl IncomingResponse {
    pub fn code(&self) -> StatusCode {
        self.response.code()
    }

    pub fn reason(&self) -> &str {
        self.response.reason()
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.response.body.as_ref()
    }

    pub fn to(&self) -> &To {
        &self.head.to
    }

    pub fn from(&self) -> &FromHdr {
        &self.head.from
    }

    pub fn cseq(&self) -> &CSeq {
        &self.head.cseq
    }

    pub fn call_id(&self) -> &CallId {
        &self.head.call_id
    }

    pub fn source(&self) -> &SocketAddr {
        &self.packet.addr
    }
}

/// Events flowing from channels into the endpoint loop.
pub(crate) enum TransportEvent {
    Packet {
        transport: Arc<dyn Transport>,
        packet: Packet,
    },
    Created(Arc<dyn Transport>),
    Closed(TransportKey),
}

pub(crate) type TransportTx = mpsc::Sender<TransportEvent>;
type TransportRx = mpsc::Receiver<TransportEvent>;

/// Starts a channel's accept/receive machinery, registering listeners
/// and factories with the layer before any traffic flows.
#[async_trait::async_trait]
pub(crate) trait TransportStartup: Sync + Send {
    async fn start(&self, layer: &TransportLayer, tx: TransportTx) -> Result<()>;
}

/// Owns every live channel and the inbound event funnel.
pub struct TransportLayer {
    transports: Mutex<HashMap<TransportKey, Arc<dyn Transport>>>,
    factories: Mutex<Vec<Arc<dyn Factory>>>,
    event_tx: TransportTx,
    event_rx: Mutex<Option<TransportRx>>,
}

impl Default for TransportLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportLayer {
    pub(crate) fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(1_000);
        TransportLayer {
            transports: Default::default(),
            factories: Default::default(),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub(crate) fn sender(&self) -> &TransportTx {
        &self.event_tx
    }

    pub(crate) fn add_transport(&self, transport: Arc<dyn Transport>) {
        self.transports
            .lock()
            .expect("Lock failed")
            .insert(transport.key(), transport);
    }

    pub(crate) fn remove_transport(&self, key: TransportKey) -> Option<Arc<dyn Transport>> {
        self.transports.lock().expect("Lock failed").remove(&key)
    }

    pub(crate) fn add_factory(&self, factory: Arc<dyn Factory>) {
        self.factories.lock().expect("Lock failed").push(factory);
    }

    pub(crate) fn transport_count(&self) -> usize {
        self.transports.lock().expect("Lock failed").len()
    }

    /// The local binding of any registered channel, preferring UDP.
    pub fn any_local_binding(&self) -> Option<(TransportKind, SocketAddr)> {
        let transports = self.transports.lock().expect("Lock failed");
        transports
            .values()
            .min_by_key(|t| if t.kind() == TransportKind::Udp { 0 } else { 1 })
            .map(|t| (t.kind(), t.addr()))
    }

    /// An existing channel able to reach `dst` over `kind`.
    pub fn find(&self, dst: SocketAddr, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        let transports = self.transports.lock().expect("Lock failed");

        // A pooled connection to this exact peer wins.
        let key = TransportKey::new(dst, kind);
        if let Some(transport) = transports.get(&key) {
            return Some(transport.clone());
        }

        transports
            .values()
            .filter(|t| t.kind() == kind && t.is_same_af(&dst))
            .min_by_key(|t| Arc::strong_count(t))
            .cloned()
    }

    /// An existing channel, or a fresh connection through the factory
    /// registered for `kind`.
    pub(crate) async fn obtain(
        &self,
        dst: SocketAddr,
        kind: TransportKind,
    ) -> Result<Arc<dyn Transport>> {
        if kind == TransportKind::Udp {
            return self
                .find(dst, kind)
                .ok_or_else(|| Error::TransportUnavailable(format!("{kind} {dst}")));
        }

        // Pooled connection keyed by the remote address.
        let pooled = {
            let transports = self.transports.lock().expect("Lock failed");
            transports.get(&TransportKey::new(dst, kind)).cloned()
        };
        if let Some(transport) = pooled {
            return Ok(transport);
        }

        let factory = {
            let factories = self.factories.lock().expect("Lock failed");
            factories.iter().find(|f| f.kind() == kind).cloned()
        };
        let Some(factory) = factory else {
            return Err(Error::TransportUnavailable(format!("{kind} {dst}")));
        };

        log::debug!("Connecting {kind} channel to {dst}");
        let transport = factory.create(dst).await?;

        self.add_transport(transport.clone());
        Ok(transport)
    }

    /// Drains transport events, dispatching packets into the endpoint.
    pub(crate) async fn handle_events(&self, endpoint: &Endpoint) -> Result<()> {
        let mut rx = self
            .event_rx
            .lock()
            .expect("Lock failed")
            .take()
            .ok_or(Error::ChannelClosed)?;

        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Packet { transport, packet } => {
                    let endpoint = endpoint.clone();
                    tokio::spawn(async move {
                        if let Err(err) = Self::on_packet(transport, packet, endpoint).await {
                            log::debug!("Inbound packet dropped: {err}");
                        }
                    });
                }
                TransportEvent::Created(transport) => {
                    self.add_transport(transport);
                }
                TransportEvent::Closed(key) => {
                    self.remove_transport(key);
                }
            }
        }

        Ok(())
    }

    /// Parse one packet and hand it to the endpoint.
    async fn on_packet(
        transport: Arc<dyn Transport>,
        packet: Packet,
        endpoint: Endpoint,
    ) -> Result<()> {
        let bytes = &packet.payload;

        // CRLF keep-alives (RFC 5626 section 4.4.1).
        if bytes.as_ref() == b"\r\n\r\n" {
            transport.send(b"\r\n", &packet.addr).await?;
            return Ok(());
        } else if bytes.as_ref() == b"\r\n" {
            return Ok(());
        }

        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::ProtocolViolation("datagram exceeds 65527 bytes"));
        }

        let msg = match Parser::new(bytes).parse_message() {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!(
                    "Ignoring {} byte packet from {} {}: {}",
                    bytes.len(),
                    transport.kind(),
                    packet.addr,
                    err
                );
                return Err(err);
            }
        };

        let head = match extract_request_headers(&msg, &packet) {
            Ok(head) => head,
            Err(err) => {
                // A request with a recoverable Via still gets a 400.
                if let (SipMsg::Request(_), Some(via)) = (&msg, msg.headers().via()) {
                    reject_unrecoverable(&transport, &packet, via).await;
                }
                return Err(err);
            }
        };

        match msg {
            SipMsg::Request(request) => {
                let mut request = Some(IncomingRequest {
                    request,
                    transport,
                    packet,
                    transaction: None,
                    head,
                });
                endpoint.process_request(&mut request).await
            }
            SipMsg::Response(response) => {
                let mut response = Some(IncomingResponse {
                    response,
                    transport,
                    packet,
                    transaction: None,
                    head,
                });
                endpoint.process_response(&mut response).await
            }
        }
    }
}

/// Pull the mandatory headers out of a parsed message, filling the top
/// Via's `received` and `rport` from the source socket for requests
/// (RFC 3581 section 4).
fn extract_request_headers(msg: &SipMsg, packet: &Packet) -> Result<RequestHeaders> {
    let headers = msg.headers();

    let mut via = headers
        .via()
        .cloned()
        .ok_or(Error::MissingRequiredHeader(Via::NAME))?;
    let from = headers
        .from()
        .cloned()
        .ok_or(Error::MissingRequiredHeader(FromHdr::NAME))?;
    let to = headers
        .to()
        .cloned()
        .ok_or(Error::MissingRequiredHeader(To::NAME))?;
    let call_id = headers
        .call_id()
        .cloned()
        .ok_or(Error::MissingRequiredHeader(CallId::NAME))?;
    let cseq = headers
        .cseq()
        .cloned()
        .ok_or(Error::MissingRequiredHeader(CSeq::NAME))?;

    if msg.is_request() {
        via.set_received(packet.addr.ip());
        if via.rport().is_requested() {
            via.set_rport(Rport::Value(packet.addr.port()));
        }
    }

    Ok(RequestHeaders {
        via,
        from,
        to,
        call_id,
        cseq,
    })
}

/// Statelessly answer 400 for a request missing mandatory headers, using
/// whatever the message did carry.
async fn reject_unrecoverable(transport: &Arc<dyn Transport>, packet: &Packet, via: &Via) {
    let mut headers = Headers::with_capacity(1);
    headers.push(Header::Via(via.clone()));

    let status = crate::message::StatusLine::from_code(StatusCode::BadRequest);
    let encoded = encode_message(&status.to_string(), &headers, None);

    if let Ok(buf) = encoded {
        let _ = transport.send(&buf, &packet.addr).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::udp::mock::MockUdpTransport;

    #[test]
    fn test_add_and_find_transport() {
        let layer = TransportLayer::default();
        let addr = "127.0.0.1:8080".parse().unwrap();

        layer.add_transport(Arc::new(MockUdpTransport::default()));

        assert!(layer.find(addr, TransportKind::Udp).is_some());
        assert_eq!(layer.transport_count(), 1);
    }

    #[test]
    fn test_remove_transport() {
        let layer = TransportLayer::default();
        let transport = Arc::new(MockUdpTransport::default());
        let addr = "127.0.0.1:8080".parse().unwrap();
        let key = transport.key();

        layer.add_transport(transport);
        assert!(layer.find(addr, TransportKind::Udp).is_some());

        layer.remove_transport(key);
        assert!(layer.find(addr, TransportKind::Udp).is_none());
    }

    #[test]
    fn test_encode_orders_mandatory_headers() {
        let mut headers = Headers::new();
        headers.push(Header::ContentLength(ContentLength::new(99)));
        headers.push(Header::CallId(CallId::new("abc")));
        headers.push(Header::Via(Via::from_value("SIP/2.0/UDP a.com;branch=z9hG4bK1").unwrap()));

        let encoded = encode_message("SIP/2.0 200 OK\r\n", &headers, None).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();

        let via_pos = text.find("Via:").unwrap();
        let call_id_pos = text.find("Call-ID:").unwrap();
        let cl_pos = text.find("Content-Length:").unwrap();

        assert!(via_pos < call_id_pos);
        assert!(call_id_pos < cl_pos);
        // The stored Content-Length is discarded, the real one written.
        assert!(text.contains("Content-Length: 0\r\n\r\n"));
    }
}
