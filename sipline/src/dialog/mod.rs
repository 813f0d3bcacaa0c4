//! Dialog layer (RFC 3261 section 12).
//!
//! A dialog is the peer-to-peer state created by a dialog-forming
//! request and its tagged responses: the (Call-ID, local tag, remote
//! tag) identity, both CSeq counters, the remote target and the route
//! set. In-dialog requests are built here with the loose/strict routing
//! rules of section 12.2.1.1.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::headers::{
    CSeq, CallId, Contact, From as FromHdr, Header, Headers, MaxForwards, SipHeaderParse, To,
};
use crate::message::{NameAddr, Request, RequestLine, Scheme, SipMethod, Uri};
use crate::transaction::Role;
use crate::transport::{IncomingRequest, IncomingResponse};
use crate::Endpoint;

/// A dialog's identity: Call-ID plus both tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    /// Identity seen from the UAS side of an inbound request.
    pub fn from_request(request: &IncomingRequest) -> Option<Self> {
        Some(DialogId {
            call_id: request.call_id().as_str().to_string(),
            local_tag: request.to().tag()?.to_string(),
            remote_tag: request.from().tag()?.to_string(),
        })
    }

    /// Identity seen from the UAC side of an inbound response.
    pub fn from_response(response: &IncomingResponse) -> Option<Self> {
        Some(DialogId {
            call_id: response.call_id().as_str().to_string(),
            local_tag: response.from().tag()?.to_string(),
            remote_tag: response.to().tag()?.to_string(),
        })
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// Dialog lifetime states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Created by a 1xx with a To tag.
    Early,
    /// Created or promoted by a 2xx.
    Confirmed,
    /// BYE sent/received, or the early INVITE failed.
    Terminated,
}

struct Inner {
    endpoint: Endpoint,
    id: DialogId,
    role: Role,
    state: Mutex<DialogState>,
    /// Local identity: goes into From of outbound in-dialog requests.
    local: NameAddr,
    /// Remote identity: goes into To of outbound in-dialog requests.
    remote: NameAddr,
    call_id: CallId,
    local_cseq: AtomicU32,
    remote_cseq: AtomicU32,
    local_contact: Contact,
    remote_target: RwLock<Uri>,
    /// Route set in the order outbound requests traverse it.
    route_set: Vec<NameAddr>,
    secure: bool,
}

/// One established (or early) dialog.
#[derive(Clone)]
pub struct Dialog {
    inner: Arc<Inner>,
}

impl Dialog {
    /// UAC dialog from the original request and a dialog-forming
    /// response carrying a To tag.
    pub(crate) fn new_uac(
        endpoint: &Endpoint,
        request: &Request,
        contact: Contact,
        response: &IncomingResponse,
    ) -> Result<Dialog> {
        let to = response.to();
        let remote_tag = to
            .tag()
            .ok_or(Error::ProtocolViolation("dialog-forming response without To tag"))?
            .to_string();
        let from = request
            .headers
            .from()
            .ok_or(Error::MissingRequiredHeader(FromHdr::NAME))?;
        let local_tag = from
            .tag()
            .ok_or(Error::ProtocolViolation("request without From tag"))?
            .to_string();
        let call_id = request
            .headers
            .call_id()
            .ok_or(Error::MissingRequiredHeader(CallId::NAME))?
            .clone();
        let cseq = request
            .headers
            .cseq()
            .ok_or(Error::MissingRequiredHeader(CSeq::NAME))?;

        let remote_target = response
            .response
            .headers
            .contact()
            .map(|c| c.uri().clone())
            .unwrap_or_else(|| request.req_line.uri.clone());

        // 12.1.2: the UAC route set is the Record-Route list reversed.
        let mut route_set: Vec<NameAddr> = response
            .response
            .headers
            .record_routes()
            .map(|rr| rr.addr.clone())
            .collect();
        route_set.reverse();

        let state = if response.code().is_success() {
            DialogState::Confirmed
        } else {
            DialogState::Early
        };
        let secure = response.transport.secure() && request.req_line.uri.scheme == Scheme::Sips;

        let id = DialogId {
            call_id: call_id.as_str().to_string(),
            local_tag,
            remote_tag,
        };

        Ok(Dialog {
            inner: Arc::new(Inner {
                endpoint: endpoint.clone(),
                id,
                role: Role::Uac,
                state: Mutex::new(state),
                local: from.addr.clone(),
                remote: to.addr.clone(),
                call_id,
                local_cseq: AtomicU32::new(cseq.seq()),
                remote_cseq: AtomicU32::new(0),
                local_contact: contact,
                remote_target: RwLock::new(remote_target),
                route_set,
                secure,
            }),
        })
    }

    /// UAS dialog from an inbound dialog-forming request; `local_tag` is
    /// the tag this endpoint will answer with.
    pub(crate) fn new_uas(
        endpoint: &Endpoint,
        request: &IncomingRequest,
        local_tag: String,
        contact: Contact,
    ) -> Result<Dialog> {
        if !request.method().can_establish_dialog() {
            return Err(Error::ProtocolViolation("method cannot establish a dialog"));
        }
        let remote_tag = request
            .from()
            .tag()
            .ok_or(Error::ProtocolViolation("request without From tag"))?
            .to_string();

        let remote_target = request
            .request
            .headers
            .contact()
            .map(|c| c.uri().clone())
            .unwrap_or_else(|| request.from().uri().clone());

        // 12.1.1: the UAS route set keeps Record-Route order.
        let route_set: Vec<NameAddr> = request
            .request
            .headers
            .record_routes()
            .map(|rr| rr.addr.clone())
            .collect();

        let secure = request.transport.secure() && request.uri().scheme == Scheme::Sips;

        let id = DialogId {
            call_id: request.call_id().as_str().to_string(),
            local_tag: local_tag.clone(),
            remote_tag,
        };

        let mut local = request.to().addr.clone();
        local.display = None;

        Ok(Dialog {
            inner: Arc::new(Inner {
                endpoint: endpoint.clone(),
                id,
                role: Role::Uas,
                state: Mutex::new(DialogState::Early),
                local,
                remote: request.from().addr.clone(),
                call_id: request.call_id().clone(),
                // The local counter starts fresh; the first in-dialog
                // request picks the next value.
                local_cseq: AtomicU32::new(0),
                remote_cseq: AtomicU32::new(request.cseq().seq()),
                local_contact: contact,
                remote_target: RwLock::new(remote_target),
                route_set,
                secure,
            }),
        })
    }

    pub fn id(&self) -> &DialogId {
        &self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn state(&self) -> DialogState {
        *self.inner.state.lock().expect("Lock failed")
    }

    pub fn is_secure(&self) -> bool {
        self.inner.secure
    }

    pub fn local_contact(&self) -> &Contact {
        &self.inner.local_contact
    }

    pub fn remote_target(&self) -> Uri {
        self.inner.remote_target.read().expect("Lock failed").clone()
    }

    /// Promote an early dialog on its 2xx; the remote target follows the
    /// Contact of the confirming response.
    pub(crate) fn confirm(&self, response: &IncomingResponse) {
        let mut state = self.inner.state.lock().expect("Lock failed");
        if *state == DialogState::Early {
            *state = DialogState::Confirmed;
        }
        drop(state);

        if let Some(contact) = response.response.headers.contact() {
            *self.inner.remote_target.write().expect("Lock failed") = contact.uri().clone();
        }
    }

    pub(crate) fn confirm_uas(&self) {
        let mut state = self.inner.state.lock().expect("Lock failed");
        if *state == DialogState::Early {
            *state = DialogState::Confirmed;
        }
    }

    pub fn terminate(&self) {
        *self.inner.state.lock().expect("Lock failed") = DialogState::Terminated;
        self.inner.endpoint.dialogs().remove(&self.inner.id);
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == DialogState::Terminated
    }

    /// Update the remote target from a re-INVITE's Contact.
    pub(crate) fn set_remote_target(&self, target: Uri) {
        *self.inner.remote_target.write().expect("Lock failed") = target;
    }

    pub fn remote_cseq(&self) -> u32 {
        self.inner.remote_cseq.load(Ordering::Relaxed)
    }

    pub fn local_cseq(&self) -> u32 {
        self.inner.local_cseq.load(Ordering::Relaxed)
    }

    /// Enforce 12.2.2: mid-dialog requests must carry a CSeq strictly
    /// above the last one seen. Returns false when the request must be
    /// rejected with 500. ACK and CANCEL reuse their target's number.
    pub(crate) fn check_remote_cseq(&self, cseq: &CSeq) -> bool {
        if !cseq.method().increments_cseq() {
            return true;
        }
        let seen = self.inner.remote_cseq.load(Ordering::SeqCst);
        if seen != 0 && cseq.seq() <= seen {
            return false;
        }
        self.inner.remote_cseq.store(cseq.seq(), Ordering::SeqCst);
        true
    }

    /// Build an in-dialog request (12.2.1.1): identity from the dialog,
    /// next CSeq, route set applied with loose/strict rules.
    pub fn create_request(&self, method: SipMethod) -> Request {
        let seq = if method.increments_cseq() {
            self.inner.local_cseq.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            // ACK and CANCEL reuse the INVITE's number.
            self.inner.local_cseq.load(Ordering::SeqCst)
        };
        self.create_request_with_cseq(method, seq)
    }

    pub(crate) fn create_request_with_cseq(&self, method: SipMethod, seq: u32) -> Request {
        let remote_target = self.remote_target();

        // Loose routing keeps the remote target in the Request-URI;
        // strict routing puts the first route there and the target last.
        let (uri, routes) = match self.inner.route_set.first() {
            None => (remote_target, Vec::new()),
            Some(first) if first.uri.lr_param => {
                (remote_target, self.inner.route_set.clone())
            }
            Some(first) => {
                let mut routes: Vec<NameAddr> =
                    self.inner.route_set.iter().skip(1).cloned().collect();
                routes.push(NameAddr::new(remote_target));
                (first.uri.clone(), routes)
            }
        };

        let mut headers = Headers::with_capacity(8 + routes.len());
        headers.push(Header::From(FromHdr::new(
            self.inner.local.clone(),
            Some(self.inner.id.local_tag.clone()),
        )));
        headers.push(Header::To(To::new(
            self.inner.remote.clone(),
            Some(self.inner.id.remote_tag.clone()),
        )));
        headers.push(Header::CallId(self.inner.call_id.clone()));
        headers.push(Header::CSeq(CSeq::new(seq, method.clone())));
        headers.push(Header::MaxForwards(MaxForwards::new(
            self.inner.endpoint.config().max_forwards,
        )));
        for route in &routes {
            headers.push(Header::Route(crate::headers::Route::new(route.clone())));
        }
        if !matches!(method, SipMethod::Ack | SipMethod::Cancel | SipMethod::Bye) {
            headers.push(Header::Contact(self.inner.local_contact.clone()));
        }

        Request {
            req_line: RequestLine { method, uri },
            headers,
            body: None,
        }
    }
}

/// Concurrent dialog table keyed by [`DialogId`].
#[derive(Default)]
pub struct DialogLayer {
    dialogs: Mutex<HashMap<DialogId, Dialog>>,
}

impl DialogLayer {
    pub fn insert(&self, dialog: Dialog) {
        let id = dialog.id().clone();
        self.dialogs.lock().expect("Lock failed").insert(id, dialog);
    }

    pub fn remove(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.lock().expect("Lock failed").remove(id)
    }

    pub fn find(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.lock().expect("Lock failed").get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.dialogs.lock().expect("Lock failed").len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.lock().expect("Lock failed").is_empty()
    }

    /// The dialog an inbound mid-dialog request belongs to.
    pub fn match_request(&self, request: &IncomingRequest) -> Option<Dialog> {
        let id = DialogId::from_request(request)?;
        self.find(&id)
    }

    /// The dialog an inbound response correlates to.
    pub fn match_response(&self, response: &IncomingResponse) -> Option<Dialog> {
        let id = DialogId::from_response(response)?;
        self.find(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::SipHeaderParse;
    use crate::message::StatusCode;
    use crate::transaction::mock;

    fn uas_dialog(endpoint: &Endpoint) -> Dialog {
        let request = mock::incoming_request(SipMethod::Invite);
        Dialog::new_uas(endpoint, &request, "4542".into(), mock::contact()).unwrap()
    }

    #[tokio::test]
    async fn test_uas_dialog_identity() {
        let endpoint = mock::default_endpoint().await;
        let dialog = uas_dialog(&endpoint);

        assert_eq!(dialog.id().local_tag, "4542");
        assert_eq!(dialog.id().remote_tag, "9fxced76sl");
        assert_eq!(dialog.state(), DialogState::Early);
        assert_eq!(dialog.remote_cseq(), 1);
    }

    #[tokio::test]
    async fn test_uac_dialog_from_response() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);
        let mut response = mock::incoming_response(StatusCode::Ok);
        response.head.to.set_tag(Some("a6c85cf".into()));
        if let Some(to) = response.response.headers.iter_mut().find_map(|h| match h {
            Header::To(to) => Some(to),
            _ => None,
        }) {
            to.set_tag(Some("a6c85cf".into()));
        }

        let dialog =
            Dialog::new_uac(&endpoint, &request.request, mock::contact(), &response).unwrap();

        assert_eq!(dialog.state(), DialogState::Confirmed);
        assert_eq!(dialog.id().remote_tag, "a6c85cf");
        assert_eq!(dialog.id().local_tag, "9fxced76sl");
    }

    #[tokio::test]
    async fn test_in_dialog_cseq_increases() {
        let endpoint = mock::default_endpoint().await;
        let dialog = uas_dialog(&endpoint);

        let first = dialog.create_request(SipMethod::Bye);
        let second_seq = dialog.local_cseq();

        assert_eq!(first.headers.cseq().unwrap().seq(), second_seq);
        let second = dialog.create_request(SipMethod::Info);
        assert!(second.headers.cseq().unwrap().seq() > first.headers.cseq().unwrap().seq());
    }

    #[tokio::test]
    async fn test_remote_cseq_must_increase() {
        let endpoint = mock::default_endpoint().await;
        let dialog = uas_dialog(&endpoint);

        assert!(!dialog.check_remote_cseq(&CSeq::new(1, SipMethod::Bye)));
        assert!(dialog.check_remote_cseq(&CSeq::new(2, SipMethod::Bye)));
        assert!(!dialog.check_remote_cseq(&CSeq::new(2, SipMethod::Info)));
        // ACK is exempt.
        assert!(dialog.check_remote_cseq(&CSeq::new(2, SipMethod::Ack)));
    }

    #[tokio::test]
    async fn test_loose_route_keeps_target_in_uri() {
        let endpoint = mock::default_endpoint().await;
        let mut request = mock::incoming_request(SipMethod::Invite);
        request.request.headers.push(Header::RecordRoute(
            crate::headers::RecordRoute::from_value("<sip:p1.example.com;lr>").unwrap(),
        ));

        let dialog =
            Dialog::new_uas(&endpoint, &request, "tag1".into(), mock::contact()).unwrap();
        let bye = dialog.create_request(SipMethod::Bye);

        assert_eq!(bye.req_line.uri.host_port.host.as_string(), "127.0.0.1");
        let routes: Vec<_> = bye.headers.routes().collect();
        assert_eq!(routes.len(), 1);
        assert!(routes[0].is_loose());
    }

    #[tokio::test]
    async fn test_strict_route_moves_target_last() {
        let endpoint = mock::default_endpoint().await;
        let mut request = mock::incoming_request(SipMethod::Invite);
        request.request.headers.push(Header::RecordRoute(
            crate::headers::RecordRoute::from_value("<sip:p1.example.com>").unwrap(),
        ));

        let dialog =
            Dialog::new_uas(&endpoint, &request, "tag1".into(), mock::contact()).unwrap();
        let bye = dialog.create_request(SipMethod::Bye);

        assert_eq!(bye.req_line.uri.host_port.host.as_string(), "p1.example.com");
        let routes: Vec<_> = bye.headers.routes().collect();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].addr.uri.host_port.host.as_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_terminate_removes_from_layer() {
        let endpoint = mock::default_endpoint().await;
        let dialog = uas_dialog(&endpoint);
        endpoint.dialogs().insert(dialog.clone());

        assert!(endpoint.dialogs().find(dialog.id()).is_some());
        dialog.terminate();
        assert!(endpoint.dialogs().find(dialog.id()).is_none());
        assert!(dialog.is_terminated());
    }
}
