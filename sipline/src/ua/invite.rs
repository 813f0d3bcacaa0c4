//! Call control: INVITE client and server sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tokio::sync::watch;

use crate::dialog::{Dialog, DialogId};
use crate::error::{Error, Result};
use crate::headers::{ContentType, Header, MediaType};
use crate::message::{NameAddr, Request, SipMethod, StatusCode, TransportKind, Uri};
use crate::transaction::key::generate_branch;
use crate::transaction::{
    ClientTransaction, InviteClientTransaction, InviteServerTransaction, TsxEvent, TsxState,
};
use crate::transport::{IncomingRequest, OutgoingRequest};
use crate::ua::{generate_tag, UaEvent, UaInner};
use crate::Endpoint;

/// How a placed call resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// 2xx received and ACKed; the dialog is confirmed.
    Established,
    /// A 3xx–6xx final answer.
    Rejected { code: StatusCode, reason: String },
    /// No final response before timer B.
    Timeout,
    /// Cancelled locally before the call was answered.
    Cancelled,
    /// The request could not be delivered.
    TransportFailure,
}

/// Shared per-call state: the dialog plus ACK bookkeeping on both
/// sides of the 2xx exchange.
#[derive(Clone)]
pub(crate) struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    dialog: Dialog,
    endpoint: Endpoint,
    /// UAC: the ACK answering the 2xx, resent on 2xx retransmissions.
    ack: tokio::sync::Mutex<Option<OutgoingRequest>>,
    /// UAS: whether the ACK for our 2xx arrived.
    ack_received: AtomicBool,
    ack_notify: tokio::sync::Notify,
}

impl Session {
    pub(crate) fn new(dialog: Dialog, endpoint: Endpoint) -> Self {
        Session {
            inner: Arc::new(SessionInner {
                dialog,
                endpoint,
                ack: tokio::sync::Mutex::new(None),
                ack_received: AtomicBool::new(false),
                ack_notify: tokio::sync::Notify::new(),
            }),
        }
    }

    pub(crate) fn dialog(&self) -> &Dialog {
        &self.inner.dialog
    }

    pub(crate) fn on_ack(&self) {
        self.inner.ack_received.store(true, Ordering::SeqCst);
        self.inner.ack_notify.notify_waiters();
    }

    pub(crate) async fn store_ack(&self, ack: OutgoingRequest) {
        *self.inner.ack.lock().await = Some(ack);
    }

    /// Answer a retransmitted 2xx with the same ACK (13.2.2.4).
    pub(crate) async fn retransmit_ack(&self) -> Result<()> {
        let mut guard = self.inner.ack.lock().await;
        if let Some(ack) = guard.as_mut() {
            self.inner.endpoint.send_stateless(ack).await?;
        }
        Ok(())
    }

    /// UAS side: keep re-sending the 2xx until its ACK arrives, with
    /// the usual doubling schedule, giving up after 64·T1.
    pub(crate) fn retransmit_2xx_until_ack(
        &self,
        buf: Bytes,
        transport: Arc<dyn crate::transport::Transport>,
        addr: std::net::SocketAddr,
    ) {
        let session = self.clone();
        let settings = self.inner.endpoint.timer_settings();

        tokio::spawn(async move {
            if transport.reliable() || settings.retransmission_disabled {
                return;
            }
            let mut interval = settings.t1;
            let deadline = tokio::time::Instant::now() + settings.t6();

            loop {
                let wait = tokio::time::sleep(interval);
                tokio::select! {
                    _ = session.inner.ack_notify.notified() => break,
                    _ = wait => {
                        if session.inner.ack_received.load(Ordering::SeqCst) {
                            break;
                        }
                        if tokio::time::Instant::now() >= deadline {
                            // The ACK never came; the dialog is torn down.
                            session.inner.dialog.terminate();
                            break;
                        }
                        let _ = transport.send(&buf, &addr).await;
                        interval = std::cmp::min(interval * 2, settings.t2);
                    }
                }
            }
        });
    }
}

struct UacParts {
    tsx: InviteClientTransaction,
    original: Arc<Request>,
}

struct HandleInner {
    ua: Arc<UaInner>,
    dialog: OnceLock<Dialog>,
    session: Mutex<Option<Session>>,
    outcome_tx: watch::Sender<Option<CallOutcome>>,
    outcome_rx: watch::Receiver<Option<CallOutcome>>,
    cancelled: AtomicBool,
    uac: Option<UacParts>,
}

/// One call, client or server side: await the outcome, then hold,
/// transfer or hang up.
#[derive(Clone)]
pub struct CallHandle {
    inner: Arc<HandleInner>,
}

impl CallHandle {
    fn new(ua: Arc<UaInner>, uac: Option<UacParts>) -> Self {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        CallHandle {
            inner: Arc::new(HandleInner {
                ua,
                dialog: OnceLock::new(),
                session: Mutex::new(None),
                outcome_tx,
                outcome_rx,
                cancelled: AtomicBool::new(false),
                uac: None,
            }),
        }
        .with_uac(uac)
    }

    fn with_uac(mut self, uac: Option<UacParts>) -> Self {
        // Arc::new just happened; the handle is still unique.
        let inner = Arc::get_mut(&mut self.inner).expect("fresh handle");
        inner.uac = uac;
        self
    }

    /// The dialog identity, once one exists.
    pub fn dialog_id(&self) -> Option<DialogId> {
        self.inner.dialog.get().map(|d| d.id().clone())
    }

    /// Wait for the call to resolve.
    pub async fn wait(&self) -> CallOutcome {
        let mut rx = self.inner.outcome_rx.clone();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return CallOutcome::TransportFailure;
            }
        }
    }

    fn resolve(&self, outcome: CallOutcome) {
        self.inner.outcome_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }

    fn session(&self) -> Option<Session> {
        self.inner.session.lock().expect("Lock failed").clone()
    }

    /// End the call. Before the final response this cancels the INVITE;
    /// after it, a BYE tears the dialog down.
    pub async fn hangup(&self) -> Result<()> {
        if let Some(session) = self.session() {
            return self.send_bye(session).await;
        }
        self.cancel().await
    }

    /// CANCEL a pending INVITE (9.1). Legal only while the client
    /// transaction is in Calling or Proceeding.
    pub async fn cancel(&self) -> Result<()> {
        let Some(uac) = &self.inner.uac else {
            return Err(Error::ProtocolViolation("nothing to cancel"));
        };
        self.inner.cancelled.store(true, Ordering::SeqCst);

        if !matches!(
            uac.tsx.state(),
            TsxState::Calling | TsxState::Proceeding
        ) {
            return Ok(());
        }

        let endpoint = self.inner.ua.endpoint();
        let cancel = cancel_request(&uac.original);
        let outgoing = endpoint.prepare_request(cancel).await?;
        let (_tsx, mut rx) = ClientTransaction::send(outgoing, endpoint).await?;

        // The CANCEL's own 200 carries no call semantics; drain it.
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Ok(())
    }

    async fn send_bye(&self, session: Session) -> Result<()> {
        let endpoint = self.inner.ua.endpoint();
        let dialog = session.dialog().clone();
        let request = dialog.create_request(SipMethod::Bye);
        let outgoing = endpoint.prepare_request(request).await?;
        let (_tsx, mut rx) = ClientTransaction::send(outgoing, endpoint).await?;

        while let Some(event) = rx.recv().await {
            match event {
                TsxEvent::Response(response) if response.code().is_final() => break,
                TsxEvent::Timeout | TsxEvent::Terminated => break,
                _ => {}
            }
        }

        dialog.terminate();
        self.inner
            .ua
            .sessions
            .lock()
            .expect("Lock failed")
            .remove(dialog.id());
        self.inner.ua.emit(UaEvent::CallEnded(dialog.id().clone()));
        Ok(())
    }

    /// Toggle hold: a re-INVITE carrying the negotiator's updated offer.
    pub async fn hold(&self, on: bool) -> Result<()> {
        let session = self
            .session()
            .ok_or(Error::ProtocolViolation("call not established"))?;
        let dialog = session.dialog().clone();
        let endpoint = self.inner.ua.endpoint();

        let offer = self.inner.ua.sdp.local_offer(on).await;
        let mut request = dialog.create_request(SipMethod::Invite);
        attach_sdp(&mut request, offer);

        let invite_cseq = request.headers.cseq().map(|c| c.seq()).unwrap_or(0);
        let outgoing = endpoint.prepare_request(request).await?;
        let (_tsx, mut rx) = InviteClientTransaction::send(outgoing, endpoint).await?;

        while let Some(event) = rx.recv().await {
            match event {
                TsxEvent::Response(response) if response.code().is_success() => {
                    if let Some(body) = response.body().cloned() {
                        self.inner.ua.sdp.on_remote_answer(body).await;
                    }
                    if let Some(contact) = response.response().headers.contact() {
                        dialog.set_remote_target(contact.uri().clone());
                    }
                    let ack = dialog.create_request_with_cseq(SipMethod::Ack, invite_cseq);
                    let mut ack = endpoint.prepare_request(ack).await?;
                    endpoint.send_stateless(&mut ack).await?;
                    session.store_ack(ack).await;
                    return Ok(());
                }
                TsxEvent::Response(response) if response.code().is_final() => {
                    return Err(Error::ProtocolViolation("re-INVITE rejected"));
                }
                TsxEvent::Timeout => return Err(Error::TsxTimeout),
                _ => {}
            }
        }
        Err(Error::ChannelClosed)
    }

    /// Blind or attended transfer via REFER (RFC 3515). Progress
    /// NOTIFYs arrive on the returned stream.
    pub async fn transfer(
        &self,
        target: Uri,
        attended: bool,
    ) -> Result<crate::ua::refer::TransferProgressRx> {
        let session = self
            .session()
            .ok_or(Error::ProtocolViolation("call not established"))?;
        crate::ua::refer::send_refer(&self.inner.ua, session.dialog().clone(), target, attended)
            .await
    }
}

/// Build a CANCEL from the INVITE it cancels: same Request-URI, Via
/// branch, identity and CSeq number (9.1).
fn cancel_request(original: &Request) -> Request {
    let mut headers = crate::headers::Headers::with_capacity(6);

    if let Some(via) = original.headers.via() {
        headers.push(Header::Via(via.clone()));
    }
    if let Some(from) = original.headers.from() {
        headers.push(Header::From(from.clone()));
    }
    if let Some(to) = original.headers.to() {
        headers.push(Header::To(to.clone()));
    }
    if let Some(call_id) = original.headers.call_id() {
        headers.push(Header::CallId(call_id.clone()));
    }
    if let Some(cseq) = original.headers.cseq() {
        headers.push(Header::CSeq(crate::headers::CSeq::new(
            cseq.seq(),
            SipMethod::Cancel,
        )));
    }
    if let Some(mf) = original.headers.max_forwards() {
        headers.push(Header::MaxForwards(*mf));
    }
    for route in original.headers.routes() {
        headers.push(Header::Route(route.clone()));
    }

    Request {
        req_line: crate::message::RequestLine {
            method: SipMethod::Cancel,
            uri: original.req_line.uri.clone(),
        },
        headers,
        body: None,
    }
}

fn attach_sdp(request: &mut Request, offer: Bytes) {
    if offer.is_empty() {
        return;
    }
    request
        .headers
        .push(Header::ContentType(ContentType::new(MediaType::sdp())));
    request.body = Some(offer);
}

/// Place a call: INVITE with the negotiator's offer, retrying once over
/// TCP when the datagram threshold rejects the request.
pub(crate) async fn place_call(ua: Arc<UaInner>, target: Uri) -> Result<CallHandle> {
    let endpoint = ua.endpoint().clone();
    let offer = ua.sdp.local_offer(false).await;

    let mut request = ua.new_request(
        SipMethod::Invite,
        target.clone(),
        NameAddr::new(target.clone()),
    );
    attach_sdp(&mut request, offer);

    let fallback = request.clone();
    let outgoing = match endpoint.prepare_request(request).await {
        Ok(outgoing) => outgoing,
        Err(Error::CongestionRequiresReliable { size }) => {
            // Too big for UDP: regenerate the branch and go reliable.
            log::debug!("INVITE of {size} bytes moves to TCP");
            let mut retry = fallback;
            retry.req_line.uri.transport_param = Some(TransportKind::Tcp);
            if let Some(via) = retry.headers.iter_mut().find_map(|h| match h {
                Header::Via(via) => Some(via),
                _ => None,
            }) {
                via.set_branch(generate_branch());
            }
            endpoint.prepare_request(retry).await?
        }
        Err(err) => return Err(err),
    };

    let (tsx, rx) = InviteClientTransaction::send(outgoing, &endpoint).await?;
    let original = tsx.original().clone();

    let handle = CallHandle::new(
        ua.clone(),
        Some(UacParts {
            tsx,
            original: original.clone(),
        }),
    );

    let driver = handle.clone();
    tokio::spawn(async move {
        if let Err(err) = drive_uac(driver, ua, original, rx).await {
            log::warn!("Call driver failed: {err}");
        }
    });

    Ok(handle)
}

async fn drive_uac(
    handle: CallHandle,
    ua: Arc<UaInner>,
    original: Arc<Request>,
    mut rx: crate::transaction::TsxEventRx,
) -> Result<()> {
    let endpoint = ua.endpoint().clone();
    let invite_cseq = original.headers.cseq().map(|c| c.seq()).unwrap_or(1);

    while let Some(event) = rx.recv().await {
        match event {
            TsxEvent::Response(response) => {
                let code = response.code();

                if code.is_provisional() {
                    // A tagged 1xx creates an early dialog.
                    if code.code() > 100 && response.to().tag().is_some()
                        && handle.inner.dialog.get().is_none()
                    {
                        if let Ok(dialog) = Dialog::new_uac(
                            &endpoint,
                            &original,
                            ua.contact(),
                            &response,
                        ) {
                            endpoint.dialogs().insert(dialog.clone());
                            let _ = handle.inner.dialog.set(dialog);
                        }
                    }
                    continue;
                }

                if code.is_success() {
                    let dialog = match handle.inner.dialog.get() {
                        Some(dialog)
                            if response
                                .to()
                                .tag()
                                .is_some_and(|tag| tag == dialog.id().remote_tag) =>
                        {
                            dialog.confirm(&response);
                            dialog.clone()
                        }
                        _ => {
                            let dialog = Dialog::new_uac(
                                &endpoint,
                                &original,
                                ua.contact(),
                                &response,
                            )?;
                            endpoint.dialogs().insert(dialog.clone());
                            let _ = handle.inner.dialog.set(dialog.clone());
                            dialog
                        }
                    };

                    // ACK end to end, outside any transaction (13.2.2.4).
                    let ack = dialog.create_request_with_cseq(SipMethod::Ack, invite_cseq);
                    let mut ack = endpoint.prepare_request(ack).await?;
                    endpoint.send_stateless(&mut ack).await?;

                    let session = Session::new(dialog.clone(), endpoint.clone());
                    session.store_ack(ack).await;
                    ua.sessions
                        .lock()
                        .expect("Lock failed")
                        .insert(dialog.id().clone(), session.clone());
                    *handle.inner.session.lock().expect("Lock failed") = Some(session);

                    if let Some(body) = response.body().cloned() {
                        ua.sdp.on_remote_answer(body).await;
                    }

                    if handle.inner.cancelled.load(Ordering::SeqCst) {
                        // The 200 beat our CANCEL: accept then BYE.
                        let session = handle.session().expect("session just stored");
                        handle.resolve(CallOutcome::Cancelled);
                        handle.send_bye(session).await?;
                    } else {
                        ua.emit(UaEvent::CallAnswered(dialog.id().clone()));
                        handle.resolve(CallOutcome::Established);
                    }
                    continue;
                }

                // Final failure: an early dialog dies with it (12.3).
                if let Some(dialog) = handle.inner.dialog.get() {
                    dialog.terminate();
                    ua.emit(UaEvent::CallEnded(dialog.id().clone()));
                }
                let outcome = if code == StatusCode::RequestTerminated
                    && handle.inner.cancelled.load(Ordering::SeqCst)
                {
                    CallOutcome::Cancelled
                } else {
                    CallOutcome::Rejected {
                        code,
                        reason: response.reason().to_string(),
                    }
                };
                handle.resolve(outcome);
            }
            TsxEvent::Timeout => {
                handle.resolve(CallOutcome::Timeout);
            }
            TsxEvent::Terminated => break,
        }
    }
    Ok(())
}

// ----- server side -----

struct IncomingInner {
    ua: Arc<UaInner>,
    request: IncomingRequest,
    tsx: InviteServerTransaction,
    dialog: OnceLock<Dialog>,
    answered: AtomicBool,
}

/// An unanswered inbound INVITE.
pub struct IncomingCall {
    inner: Arc<IncomingInner>,
}

impl IncomingCall {
    /// Who is calling.
    pub fn remote(&self) -> &NameAddr {
        &self.inner.request.from().addr
    }

    /// The remote session offer, untouched.
    pub fn sdp_offer(&self) -> Option<Bytes> {
        self.inner.request.body().cloned()
    }

    pub fn dialog_id(&self) -> Option<DialogId> {
        self.inner.dialog.get().map(|d| d.id().clone())
    }

    fn ensure_dialog(&self) -> Result<Dialog> {
        if let Some(dialog) = self.inner.dialog.get() {
            return Ok(dialog.clone());
        }
        let endpoint = self.inner.ua.endpoint();
        let dialog = Dialog::new_uas(
            endpoint,
            &self.inner.request,
            generate_tag(),
            self.inner.ua.contact(),
        )?;
        endpoint.dialogs().insert(dialog.clone());
        let _ = self.inner.dialog.set(dialog.clone());
        Ok(dialog)
    }

    fn build_response(&self, code: StatusCode, dialog: Option<&Dialog>) -> crate::transport::OutgoingResponse {
        let endpoint = self.inner.ua.endpoint();
        let mut response = endpoint.new_response(&self.inner.request, code, None);
        if let Some(dialog) = dialog {
            if let Some(to) = response.headers_mut().iter_mut().find_map(|h| match h {
                Header::To(to) => Some(to),
                _ => None,
            }) {
                to.set_tag(Some(dialog.id().local_tag.clone()));
            }
        }
        response
    }

    /// Send a provisional (default 180 Ringing), creating the early
    /// dialog.
    pub async fn ring(&self) -> Result<()> {
        let dialog = self.ensure_dialog()?;
        let mut response = self.build_response(StatusCode::Ringing, Some(&dialog));
        self.inner.tsx.respond(&mut response).await
    }

    /// Answer the call: negotiate the body, send 2xx, keep re-sending
    /// it until the ACK arrives.
    pub async fn accept(&self) -> Result<CallHandle> {
        let dialog = self.ensure_dialog()?;
        let endpoint = self.inner.ua.endpoint().clone();
        self.inner.answered.store(true, Ordering::SeqCst);

        let offer = self.sdp_offer().unwrap_or_default();
        let answer = self.inner.ua.sdp.local_answer(offer).await;

        let mut response = self.build_response(StatusCode::Ok, Some(&dialog));
        response
            .headers_mut()
            .push(Header::Contact(self.inner.ua.contact()));
        if !answer.is_empty() {
            response
                .headers_mut()
                .push(Header::ContentType(ContentType::new(MediaType::sdp())));
            response.set_body(answer);
        }

        let buf = crate::transport::ToBytes::to_bytes(&response)?;
        response.buf = Some(buf.clone());
        self.inner.tsx.respond(&mut response).await?;
        dialog.confirm_uas();

        let session = Session::new(dialog.clone(), endpoint.clone());
        self.inner
            .ua
            .sessions
            .lock()
            .expect("Lock failed")
            .insert(dialog.id().clone(), session.clone());
        session.retransmit_2xx_until_ack(
            buf,
            self.inner.tsx.transport().clone(),
            self.inner.tsx.addr(),
        );

        let handle = CallHandle::new(self.inner.ua.clone(), None);
        let _ = handle.inner.dialog.set(dialog);
        *handle.inner.session.lock().expect("Lock failed") = Some(session);
        handle.resolve(CallOutcome::Established);
        Ok(handle)
    }

    /// Decline with a final status (486 when in doubt).
    pub async fn reject(&self, code: StatusCode) -> Result<()> {
        self.inner.answered.store(true, Ordering::SeqCst);
        let mut response = self.build_response(code, self.inner.dialog.get());
        self.inner.tsx.respond(&mut response).await?;

        if let Some(dialog) = self.inner.dialog.get() {
            dialog.terminate();
        }
        Ok(())
    }

    /// Redirect the caller elsewhere (302 with a Contact).
    pub async fn redirect(&self, target: Uri) -> Result<()> {
        self.inner.answered.store(true, Ordering::SeqCst);
        let mut response =
            self.build_response(StatusCode::MovedTemporarily, self.inner.dialog.get());
        response
            .headers_mut()
            .push(Header::Contact(crate::headers::Contact::new(NameAddr::new(
                target,
            ))));
        self.inner.tsx.respond(&mut response).await?;

        if let Some(dialog) = self.inner.dialog.get() {
            dialog.terminate();
        }
        Ok(())
    }

    async fn on_cancelled(&self) -> Result<()> {
        if self.inner.answered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut response =
            self.build_response(StatusCode::RequestTerminated, self.inner.dialog.get());
        self.inner.tsx.respond(&mut response).await?;

        if let Some(dialog) = self.inner.dialog.get() {
            dialog.terminate();
            self.inner.ua.emit(UaEvent::CallEnded(dialog.id().clone()));
        }
        Ok(())
    }
}

/// A new out-of-dialog INVITE: wrap it and hand it to the application.
pub(crate) async fn on_invite(
    ua: Arc<UaInner>,
    endpoint: &Endpoint,
    mut request: IncomingRequest,
) -> Result<()> {
    let tsx = endpoint.new_invite_server_tsx(&mut request);
    let cancel_rx = tsx.take_cancel_rx();

    let call = IncomingCall {
        inner: Arc::new(IncomingInner {
            ua: ua.clone(),
            request,
            tsx,
            dialog: OnceLock::new(),
            answered: AtomicBool::new(false),
        }),
    };

    if let Some(cancel_rx) = cancel_rx {
        let watcher = IncomingCall {
            inner: call.inner.clone(),
        };
        tokio::spawn(async move {
            if cancel_rx.await.is_ok() {
                if let Err(err) = watcher.on_cancelled().await {
                    log::warn!("CANCEL handling failed: {err}");
                }
            }
        });
    }

    ua.emit(UaEvent::IncomingCall(call));
    Ok(())
}

/// A re-INVITE inside a confirmed dialog: negotiate and answer 200.
pub(crate) async fn on_reinvite(
    ua: Arc<UaInner>,
    endpoint: &Endpoint,
    dialog: Dialog,
    mut request: IncomingRequest,
) -> Result<()> {
    let tsx = endpoint.new_invite_server_tsx(&mut request);

    if let Some(contact) = request.request().headers.contact() {
        dialog.set_remote_target(contact.uri().clone());
    }

    let offer = request.body().cloned().unwrap_or_default();
    let answer = ua.sdp.local_answer(offer).await;

    let mut response = endpoint.new_response(&request, StatusCode::Ok, None);
    if let Some(to) = response.headers_mut().iter_mut().find_map(|h| match h {
        Header::To(to) => Some(to),
        _ => None,
    }) {
        to.set_tag(Some(dialog.id().local_tag.clone()));
    }
    response
        .headers_mut()
        .push(Header::Contact(ua.contact()));
    if !answer.is_empty() {
        response
            .headers_mut()
            .push(Header::ContentType(ContentType::new(MediaType::sdp())));
        response.set_body(answer);
    }

    tsx.respond(&mut response).await
}
