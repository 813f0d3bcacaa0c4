//! User agent layer: call, registration and transfer primitives on top
//! of the dialog and transaction machinery.

pub mod invite;
pub mod refer;
pub mod register;

pub use invite::{CallHandle, CallOutcome, IncomingCall};
pub use refer::TransferProgress;
pub use register::RegistrationOutcome;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::auth::{AuthCredential, NonceCache};
use crate::dialog::{Dialog, DialogId};
use crate::endpoint;
use crate::error::{Error, Result};
use crate::headers::{
    CSeq, CallId, Contact, From as FromHdr, Header, Headers, MaxForwards, To,
    UserAgent as UserAgentHdr,
};
use crate::message::{NameAddr, Request, RequestLine, SipMethod, StatusCode, Uri};
use crate::transaction::key::generate_branch;
use crate::transport::{IncomingRequest, IncomingResponse};
use crate::{Endpoint, SipService};

/// Supplies and consumes session descriptions. The stack never inspects
/// the bodies; they travel as opaque bytes.
#[async_trait::async_trait]
pub trait SdpNegotiator: Sync + Send + 'static {
    /// The local offer for a new call or an in-call modification.
    async fn local_offer(&self, hold: bool) -> Bytes;

    /// The local answer to a remote offer.
    async fn local_answer(&self, remote_offer: Bytes) -> Bytes;

    /// The remote answer to an offer this side made.
    async fn on_remote_answer(&self, remote_answer: Bytes) {
        let _ = remote_answer;
    }
}

/// A negotiator returning empty bodies, for signaling-only tests.
pub struct NullNegotiator;

#[async_trait::async_trait]
impl SdpNegotiator for NullNegotiator {
    async fn local_offer(&self, _hold: bool) -> Bytes {
        Bytes::new()
    }

    async fn local_answer(&self, _remote_offer: Bytes) -> Bytes {
        Bytes::new()
    }
}

/// What the user agent reports to the application.
pub enum UaEvent {
    /// A new INVITE arrived; answer through the carried handle.
    IncomingCall(IncomingCall),
    /// A confirmed call was answered by the remote side.
    CallAnswered(DialogId),
    /// A call ended: BYE, CANCEL, rejection or failure.
    CallEnded(DialogId),
    /// The remote side asked this endpoint to call somewhere else.
    TransferRequested {
        dialog: DialogId,
        target: Uri,
    },
    /// Progress of a transfer this endpoint asked for.
    TransferProgress {
        dialog: DialogId,
        progress: TransferProgress,
    },
}

pub type UaEventRx = mpsc::UnboundedReceiver<UaEvent>;

pub(crate) struct UaInner {
    pub(crate) endpoint: OnceLock<Endpoint>,
    /// The local identity placed in From headers.
    pub(crate) identity: NameAddr,
    pub(crate) events_tx: mpsc::UnboundedSender<UaEvent>,
    events_rx: Mutex<Option<UaEventRx>>,
    pub(crate) credentials: Mutex<Vec<AuthCredential>>,
    pub(crate) nonce_cache: NonceCache,
    pub(crate) sdp: Arc<dyn SdpNegotiator>,
    /// Live call sessions by dialog identity.
    pub(crate) sessions: Mutex<HashMap<DialogId, invite::Session>>,
    /// Implicit REFER subscriptions awaiting NOTIFYs.
    pub(crate) transfers: Mutex<HashMap<String, refer::TransferState>>,
    contact: RwLock<Option<Contact>>,
}

impl UaInner {
    pub(crate) fn endpoint(&self) -> &Endpoint {
        self.endpoint.get().expect("endpoint set during build")
    }

    /// The Contact this endpoint advertises, derived from the first
    /// bound channel.
    pub(crate) fn contact(&self) -> Contact {
        if let Some(contact) = self.contact.read().expect("Lock failed").clone() {
            return contact;
        }

        let endpoint = self.endpoint();
        let uri = match endpoint.transports().any_local_binding() {
            Some((kind, addr)) => {
                let mut uri = Uri::new(Default::default(), addr.into());
                if let Some(user) = &self.identity.uri.user {
                    uri.user = Some(user.clone());
                }
                // Non-default transports must be named so the peer's
                // in-dialog requests come back the same way.
                if kind != crate::message::TransportKind::Udp {
                    uri.transport_param = Some(kind);
                }
                uri
            }
            None => self.identity.uri.clone(),
        };

        let contact = Contact::new(NameAddr::new(uri));
        *self.contact.write().expect("Lock failed") = Some(contact.clone());
        contact
    }

    /// A new out-of-dialog request skeleton with fresh branch, tag and
    /// Call-ID.
    pub(crate) fn new_request(&self, method: SipMethod, target: Uri, to: NameAddr) -> Request {
        let endpoint = self.endpoint();
        let mut headers = Headers::with_capacity(8);

        headers.push(Header::Via(crate::headers::Via::new(
            Default::default(),
            Default::default(),
            generate_branch(),
        )));
        headers.push(Header::MaxForwards(MaxForwards::new(
            endpoint.config().max_forwards,
        )));
        headers.push(Header::From(FromHdr::new(
            self.identity.clone(),
            Some(generate_tag()),
        )));
        headers.push(Header::To(To::new(to, None)));
        headers.push(Header::CallId(CallId::generate()));
        headers.push(Header::CSeq(CSeq::new(1, method.clone())));
        headers.push(Header::Contact(self.contact()));
        headers.push(Header::UserAgent(UserAgentHdr::new(
            endpoint.config().user_agent.clone(),
        )));

        Request {
            req_line: RequestLine {
                method,
                uri: target,
            },
            headers,
            body: None,
        }
    }

    pub(crate) fn find_credential(&self, realm: &str) -> Option<AuthCredential> {
        let credentials = self.credentials.lock().expect("Lock failed");
        credentials
            .iter()
            .find(|c| c.realm.as_deref().is_none_or(|r| r.eq_ignore_ascii_case(realm)))
            .cloned()
    }

    pub(crate) fn emit(&self, event: UaEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// A fresh tag for From/To headers.
pub(crate) fn generate_tag() -> String {
    crate::random_token(10)
}

/// The user agent: places and answers calls, registers, transfers.
///
/// Built around an [`endpoint::Builder`]; the agent registers itself as
/// the endpoint's service and drives the dialog layer from the message
/// events it receives.
#[derive(Clone)]
pub struct UserAgent {
    inner: Arc<UaInner>,
}

impl UserAgent {
    /// Assemble a user agent with the given local identity (the From
    /// URI) and media negotiator.
    pub async fn build(
        builder: endpoint::Builder,
        identity: Uri,
        sdp: Arc<dyn SdpNegotiator>,
    ) -> UserAgent {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(UaInner {
            endpoint: OnceLock::new(),
            identity: NameAddr::new(identity),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            credentials: Mutex::new(Vec::new()),
            nonce_cache: NonceCache::default(),
            sdp,
            sessions: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            contact: RwLock::new(None),
        });

        let endpoint = builder
            .with_service(UaService(inner.clone()))
            .build()
            .await;
        tracing::debug!(identity = %inner.identity.uri, "user agent ready");
        inner
            .endpoint
            .set(endpoint)
            .unwrap_or_else(|_| unreachable!("endpoint set once"));

        UserAgent { inner }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.inner.endpoint()
    }

    /// The application-facing event stream. Yields `None` after the
    /// first call.
    pub fn events(&self) -> Option<UaEventRx> {
        self.inner.events_rx.lock().expect("Lock failed").take()
    }

    /// Store a credential answering digest challenges.
    pub fn add_credential(&self, credential: AuthCredential) {
        self.inner
            .credentials
            .lock()
            .expect("Lock failed")
            .push(credential);
    }

    /// Start a call: send INVITE with the negotiator's offer and drive
    /// it to an outcome.
    pub async fn place_call(&self, target: Uri) -> Result<CallHandle> {
        invite::place_call(self.inner.clone(), target).await
    }

    /// Register the local identity at a registrar.
    pub async fn register(&self, registrar: Uri, expires: u32) -> Result<RegistrationOutcome> {
        register::register(&self.inner, registrar, expires).await
    }

    /// Clear the binding at a registrar (Expires: 0).
    pub async fn unregister(&self, registrar: Uri) -> Result<RegistrationOutcome> {
        register::register(&self.inner, registrar, 0).await
    }
}

/// Bridges endpoint message events into user agent behavior.
struct UaService(Arc<UaInner>);

#[async_trait::async_trait]
impl SipService for UaService {
    fn name(&self) -> &str {
        "user-agent"
    }

    async fn on_request(
        &self,
        endpoint: &Endpoint,
        request: &mut Option<IncomingRequest>,
    ) -> Result<()> {
        let Some(req) = request.as_ref() else {
            return Ok(());
        };

        // In-dialog requests correlate through the dialog table.
        if let Some(dialog) = endpoint.dialogs().match_request(req) {
            let req = request.take().ok_or(Error::ChannelClosed)?;
            return self.on_dialog_request(endpoint, dialog, req).await;
        }

        match req.method() {
            SipMethod::Invite => {
                let req = request.take().ok_or(Error::ChannelClosed)?;
                invite::on_invite(self.0.clone(), endpoint, req).await
            }
            SipMethod::Options => {
                let req = request.take().ok_or(Error::ChannelClosed)?;
                let mut tsx_req = req;
                let tsx = endpoint.new_server_tsx(&mut tsx_req);
                let mut response =
                    endpoint.new_response(&tsx_req, StatusCode::Ok, None);
                response
                    .headers_mut()
                    .push(Header::Allow(crate::headers::Allow::supported()));
                tsx.respond(&mut response).await
            }
            SipMethod::Ack => {
                // ACK for a 2xx whose dialog is already gone.
                request.take();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_response(
        &self,
        _endpoint: &Endpoint,
        response: &mut Option<IncomingResponse>,
    ) -> Result<()> {
        let Some(resp) = response.as_ref() else {
            return Ok(());
        };

        // A 2xx INVITE retransmission arrives outside any transaction;
        // the dialog answers it with another ACK (13.2.2.4).
        if matches!(resp.cseq().method(), SipMethod::Invite) && resp.code().is_success() {
            let id = DialogId::from_response(resp);
            let session = id.and_then(|id| {
                let sessions = self.0.sessions.lock().expect("Lock failed");
                sessions.get(&id).cloned()
            });
            if let Some(session) = session {
                response.take();
                return session.retransmit_ack().await;
            }
        }
        Ok(())
    }
}

impl UaService {
    async fn on_dialog_request(
        &self,
        endpoint: &Endpoint,
        dialog: Dialog,
        mut request: IncomingRequest,
    ) -> Result<()> {
        if dialog.is_terminated() {
            return endpoint
                .respond(&request, StatusCode::CallOrTransactionDoesNotExist, None)
                .await;
        }

        // 12.2.2: out-of-order CSeq is answered 500.
        if !dialog.check_remote_cseq(request.cseq()) {
            return endpoint
                .respond(&request, StatusCode::ServerInternalError, None)
                .await;
        }

        match request.method().clone() {
            SipMethod::Ack => {
                let sessions = self.0.sessions.lock().expect("Lock failed");
                if let Some(session) = sessions.get(dialog.id()) {
                    session.on_ack();
                }
                Ok(())
            }
            SipMethod::Bye => {
                let tsx = endpoint.new_server_tsx(&mut request);
                let mut response = endpoint.new_response(&request, StatusCode::Ok, None);
                tsx.respond(&mut response).await?;

                dialog.terminate();
                self.0.sessions.lock().expect("Lock failed").remove(dialog.id());
                self.0.emit(UaEvent::CallEnded(dialog.id().clone()));
                Ok(())
            }
            SipMethod::Invite => {
                invite::on_reinvite(self.0.clone(), endpoint, dialog, request).await
            }
            SipMethod::Refer => {
                refer::on_refer(self.0.clone(), endpoint, dialog, request).await
            }
            SipMethod::Notify => {
                refer::on_notify(self.0.clone(), endpoint, dialog, request).await
            }
            SipMethod::Info | SipMethod::Options | SipMethod::Update => {
                let tsx = endpoint.new_server_tsx(&mut request);
                let mut response = endpoint.new_response(&request, StatusCode::Ok, None);
                tsx.respond(&mut response).await
            }
            _ => {
                let tsx = endpoint.new_server_tsx(&mut request);
                let mut response =
                    endpoint.new_response(&request, StatusCode::MethodNotAllowed, None);
                tsx.respond(&mut response).await
            }
        }
    }
}
