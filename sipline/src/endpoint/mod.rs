//! The SIP endpoint: the hub wiring transports, transactions, dialogs
//! and services together.

pub mod builder;

pub use builder::Builder;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::dialog::DialogLayer;
use crate::error::{Error, Result};
use crate::headers::{Header, Headers, UserAgent, Via};
use crate::message::{
    Host, Request, Response, SipMethod, StatusCode, StatusLine, TransportKind,
};
use crate::resolver::Resolver;
use crate::transaction::{TimerSettings, TransactionLayer};
use crate::transport::{
    IncomingRequest, IncomingResponse, OutgoingAddr, OutgoingRequest, OutgoingResponse, ToBytes,
    Transport, TransportLayer, UDP_SIZE_LIMIT,
};
use crate::SipService;

pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) config: EndpointConfig,
    pub(crate) transport: TransportLayer,
    pub(crate) transaction: TransactionLayer,
    pub(crate) dialogs: DialogLayer,
    pub(crate) resolver: Resolver,
    pub(crate) services: Box<[Box<dyn SipService>]>,
}

/// A running SIP endpoint. Cheap to clone; all clones share one core.
#[derive(Clone)]
pub struct Endpoint(pub(crate) Arc<Inner>);

impl Endpoint {
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// The endpoint name, used in log lines.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.0.config
    }

    pub fn timer_settings(&self) -> TimerSettings {
        self.0.config.timers
    }

    pub fn transports(&self) -> &TransportLayer {
        &self.0.transport
    }

    pub fn tsx_layer(&self) -> &TransactionLayer {
        &self.0.transaction
    }

    pub fn dialogs(&self) -> &DialogLayer {
        &self.0.dialogs
    }

    pub fn resolver(&self) -> &Resolver {
        &self.0.resolver
    }

    /// Create a server transaction for an inbound non-INVITE request.
    pub fn new_server_tsx(
        &self,
        request: &mut IncomingRequest,
    ) -> crate::transaction::ServerTransaction {
        crate::transaction::ServerTransaction::new(self, request)
    }

    /// Create a server transaction for an inbound INVITE.
    pub fn new_invite_server_tsx(
        &self,
        request: &mut IncomingRequest,
    ) -> crate::transaction::InviteServerTransaction {
        crate::transaction::InviteServerTransaction::new(self, request)
    }

    /// Process inbound traffic until the transport funnel closes.
    /// The transaction timer task runs alongside.
    pub async fn run(self) -> Result<()> {
        tracing::debug!(name = %self.0.name, "endpoint event loop starting");
        tokio::spawn(TransactionLayer::timer_task(self.clone()));
        self.0.transport.handle_events(&self).await
    }

    /// Run for at most `timeout`, for tests and examples.
    pub async fn run_with_timeout(self, timeout: Duration) -> Result<()> {
        let _ = tokio::time::timeout(timeout, self.run()).await;
        Ok(())
    }

    // ----- outbound path -----

    /// Resolve a request's destination (RFC 3263) and bind it to a
    /// channel. Fails with [`Error::CongestionRequiresReliable`] when a
    /// non-ACK request exceeds the datagram threshold over UDP; the
    /// caller retries with `transport=tcp` and a fresh branch.
    pub async fn prepare_request(&self, mut request: Request) -> Result<OutgoingRequest> {
        // 8.1.2: the next hop is the topmost loose route when one exists.
        let target_uri = request
            .headers
            .routes()
            .next()
            .filter(|route| route.is_loose())
            .map(|route| route.addr.uri.clone())
            .unwrap_or_else(|| request.req_line.uri.clone());

        if !target_uri.scheme.is_supported() {
            return Err(Error::ProtocolViolation("unsupported URI scheme"));
        }

        let candidates = self.0.resolver.resolve(&target_uri).await?;
        let mut last_err = Error::Unresolvable(target_uri.host_port.to_string());

        for candidate in candidates {
            let transport = match self
                .0
                .transport
                .obtain(candidate.addr, candidate.kind)
                .await
            {
                Ok(transport) => transport,
                Err(err) => {
                    last_err = err;
                    continue;
                }
            };

            self.fill_via(&mut request, &transport);

            let mut outgoing = OutgoingRequest::new(request, transport, candidate.addr);
            let buf = outgoing.to_bytes()?;

            if candidate.kind == TransportKind::Udp
                && buf.len() > UDP_SIZE_LIMIT
                && !matches!(outgoing.method(), SipMethod::Ack)
            {
                return Err(Error::CongestionRequiresReliable { size: buf.len() });
            }

            outgoing.buf = Some(buf);
            return Ok(outgoing);
        }

        Err(last_err)
    }

    /// Stamp the top Via with the chosen channel's binding, keeping the
    /// branch the caller generated.
    fn fill_via(&self, request: &mut Request, transport: &Arc<dyn Transport>) {
        let kind = transport.kind();
        let local = transport.addr();
        if let Some(via) = request.headers.iter_mut().find_map(|h| match h {
            Header::Via(via) => Some(via),
            _ => None,
        }) {
            via.transport = kind;
            via.sent_by = local.into();
        }
    }

    /// Send a request outside any transaction (ACK for 2xx).
    pub(crate) async fn send_stateless(&self, outgoing: &mut OutgoingRequest) -> Result<()> {
        let buf = match outgoing.buf.take() {
            Some(buf) => buf,
            None => outgoing.to_bytes()?,
        };
        log::debug!("<= Request {} to /{}", outgoing.method(), outgoing.addr);
        outgoing.transport.send(&buf, &outgoing.addr).await?;
        outgoing.buf = Some(buf);
        Ok(())
    }

    // ----- responses -----

    /// Build a response to an inbound request, copying the Via chain,
    /// Record-Routes and identity headers. Responses above 100 get a To
    /// tag when the request carried none (8.2.6.2).
    pub fn new_response(
        &self,
        request: &IncomingRequest,
        code: StatusCode,
        reason: Option<&str>,
    ) -> OutgoingResponse {
        let mut headers = response_headers(request);

        if code.code() > 100 {
            let to = headers.iter_mut().find_map(|h| match h {
                Header::To(to) => Some(to),
                _ => None,
            });
            if let Some(to) = to {
                if to.tag().is_none() {
                    to.set_tag(request.via().branch().map(str::to_string));
                }
            }
        }
        headers.push(Header::UserAgent(UserAgent::new(
            self.0.config.user_agent.clone(),
        )));

        let status_line = match reason {
            Some(reason) => StatusLine::new(code, reason),
            None => StatusLine::from_code(code),
        };
        let mut response = Response::new(status_line);
        response.headers = headers;

        OutgoingResponse {
            response,
            addr: self.outbound_addr(request.via(), request.transport()),
            buf: None,
        }
    }

    /// Answer a request statelessly: no server transaction is created.
    pub async fn respond(
        &self,
        request: &IncomingRequest,
        code: StatusCode,
        reason: Option<&str>,
    ) -> Result<()> {
        assert!(
            request.transaction().is_none(),
            "Request already has a transaction"
        );
        let response = self.new_response(request, code, reason);
        self.send_response(response).await
    }

    /// Where a response goes (18.2.2 plus RFC 3581 symmetric routing).
    fn outbound_addr(&self, via: &Via, transport: &Arc<dyn Transport>) -> OutgoingAddr {
        if transport.reliable() {
            return OutgoingAddr::Addr {
                addr: transport.addr(),
                transport: transport.clone(),
            };
        }

        if let Some(maddr) = via.maddr() {
            OutgoingAddr::HostPort {
                host: crate::message::HostPort {
                    host: maddr.clone(),
                    port: Some(via.sent_by().port_or(5060)),
                },
                kind: via.transport,
            }
        } else if let Some(rport) = via.rport().value() {
            let ip = via
                .received()
                .expect("received is stamped on every inbound request");
            OutgoingAddr::Addr {
                addr: SocketAddr::new(ip, rport),
                transport: transport.clone(),
            }
        } else {
            let ip = via
                .received()
                .expect("received is stamped on every inbound request");
            OutgoingAddr::Addr {
                addr: SocketAddr::new(ip, via.sent_by().port_or(5060)),
                transport: transport.clone(),
            }
        }
    }

    /// Encode and transmit a response.
    pub async fn send_response(&self, mut response: OutgoingResponse) -> Result<()> {
        log::debug!(
            "=> Response {} {}",
            response.status_code().code(),
            response.reason()
        );
        let buf = response.to_bytes()?;

        match &response.addr {
            OutgoingAddr::HostPort { host, kind } => {
                let ip = match &host.host {
                    Host::IpAddr(ip) => *ip,
                    Host::DomainName(_) => {
                        let uri = crate::message::Uri::new(
                            crate::message::Scheme::Sip,
                            host.clone(),
                        );
                        let entries = self.0.resolver.resolve(&uri).await?;
                        entries
                            .first()
                            .ok_or_else(|| Error::Unresolvable(host.to_string()))?
                            .addr
                            .ip()
                    }
                };
                let addr = SocketAddr::new(ip, host.port_or(kind.default_port()));
                let transport = self
                    .0
                    .transport
                    .find(addr, *kind)
                    .ok_or_else(|| Error::TransportUnavailable(format!("{kind} {addr}")))?;
                transport.send(&buf, &addr).await?;
            }
            OutgoingAddr::Addr { addr, transport } => {
                transport.send(&buf, addr).await?;
            }
        }
        Ok(())
    }

    // ----- inbound dispatch -----

    pub(crate) async fn process_request(
        &self,
        msg: &mut Option<IncomingRequest>,
    ) -> Result<()> {
        {
            let request = msg.as_ref().ok_or(Error::ChannelClosed)?;
            log::debug!("<= Request {} from /{}", request.method(), request.source());

            // Boundary checks answered before any transaction exists.
            if let Some(mf) = request.request.headers.max_forwards() {
                if mf.is_exhausted() && !matches!(request.method(), SipMethod::Ack) {
                    return self.respond(request, StatusCode::TooManyHops, None).await;
                }
            }
            if !request.uri().scheme.is_supported() {
                return self
                    .respond(request, StatusCode::UnsupportedUriScheme, None)
                    .await;
            }
        }

        // Retransmissions, ACKs for non-2xx and CANCELs land on their
        // existing transaction.
        {
            let request = msg.as_ref().ok_or(Error::ChannelClosed)?;
            if self.0.transaction.handle_request(self, request).await? {
                return Ok(());
            }

            // A CANCEL with nothing to cancel gets 481 (9.2).
            if matches!(request.method(), SipMethod::Cancel) {
                return self
                    .respond(request, StatusCode::CallOrTransactionDoesNotExist, None)
                    .await;
            }
        }

        for service in self.0.services.iter() {
            service.on_request(self, msg).await?;
            if msg.is_none() {
                return Ok(());
            }
        }

        if let Some(request) = msg.take() {
            log::debug!(
                "Request {} from /{} unhandled by any service",
                request.method(),
                request.source()
            );
            if !matches!(request.method(), SipMethod::Ack) {
                self.respond(&request, StatusCode::NotImplemented, None).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn process_response(
        &self,
        msg: &mut Option<IncomingResponse>,
    ) -> Result<()> {
        {
            let response = msg.as_ref().ok_or(Error::ChannelClosed)?;
            log::debug!(
                "<= Response ({} {}) from /{}",
                response.code().code(),
                response.reason(),
                response.source()
            );
        }

        // The transaction layer consumes everything it can match.
        let response = msg.take().ok_or(Error::ChannelClosed)?;
        match self.0.transaction.handle_response(response).await? {
            None => return Ok(()),
            Some(unclaimed) => *msg = Some(unclaimed),
        }

        for service in self.0.services.iter() {
            service.on_response(self, msg).await?;
            if msg.is_none() {
                return Ok(());
            }
        }

        if let Some(response) = msg.take() {
            log::debug!(
                "Response ({} {}) from /{} unhandled by any service",
                response.code().code(),
                response.reason(),
                response.source()
            );
        }
        Ok(())
    }
}

/// Response headers copied from a request per 8.2.6: full Via chain
/// (top one carrying `received`/`rport`), Record-Routes, From, To,
/// Call-ID and CSeq.
pub(crate) fn response_headers(request: &IncomingRequest) -> Headers {
    let mut headers = Headers::with_capacity(8);

    headers.push(Header::Via(request.via().clone()));
    headers.extend(
        request
            .request
            .headers
            .iter()
            .filter(|h| matches!(h, Header::Via(_)))
            .skip(1)
            .cloned(),
    );
    headers.extend(
        request
            .request
            .headers
            .iter()
            .filter(|h| matches!(h, Header::RecordRoute(_)))
            .cloned(),
    );
    headers.push(Header::From(request.from().clone()));
    headers.push(Header::To(request.to().clone()));
    headers.push(Header::CallId(request.call_id().clone()));
    headers.push(Header::CSeq(request.cseq().clone()));

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::mock;

    #[tokio::test]
    async fn test_new_response_copies_identity() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::incoming_request(SipMethod::Options);

        let response = endpoint.new_response(&request, StatusCode::Ok, None);

        assert_eq!(response.status_code(), StatusCode::Ok);
        assert!(response.response.headers.via().is_some());
        assert!(response.response.headers.from().is_some());
        assert_eq!(
            response.response.headers.cseq().unwrap().method(),
            &SipMethod::Options
        );
    }

    #[tokio::test]
    async fn test_new_response_adds_to_tag_above_100() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::incoming_request(SipMethod::Invite);

        let response = endpoint.new_response(&request, StatusCode::Ringing, None);
        assert!(response.response.headers.to().unwrap().tag().is_some());

        let trying = endpoint.new_response(&request, StatusCode::Trying, None);
        assert!(trying.response.headers.to().unwrap().tag().is_none());
    }
}
