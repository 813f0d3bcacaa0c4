//! INVITE server transaction (RFC 3261 section 17.2.1).

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::Result;
use crate::headers::Headers;
use crate::message::{SipMethod, StatusCode, StatusLine};
use crate::transaction::{
    ServerTsx, TimerKind, TransactionCore, TsxState, AUTO_TRYING_DELAY,
};
use crate::transport::{IncomingRequest, OutgoingAddr, OutgoingResponse};
use crate::Endpoint;

type CancelTx = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// Answers one INVITE: Proceeding → Completed → Confirmed → Terminated.
///
/// A 2xx tears the transaction down at once; its retransmission until
/// ACK is the dialog layer's job. Non-2xx finals are retransmitted here
/// (timer G) until the ACK confirms receipt.
#[derive(Clone)]
pub struct InviteServerTransaction {
    core: TransactionCore,
    /// Headers for the automatic 100 Trying.
    trying_headers: Arc<Headers>,
    /// Fired when a CANCEL matches this transaction while a final
    /// response is still pending.
    cancel_tx: CancelTx,
    cancel_rx: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

impl InviteServerTransaction {
    pub fn new(endpoint: &Endpoint, request: &mut IncomingRequest) -> Self {
        assert!(
            matches!(request.method(), SipMethod::Invite),
            "INVITE server transaction requires an INVITE, got {}",
            request.method()
        );

        let core = TransactionCore::new_uas(request, endpoint, TsxState::Proceeding);
        let trying_headers = Arc::new(crate::endpoint::response_headers(request));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let tsx = InviteServerTransaction {
            core,
            trying_headers,
            cancel_tx: Arc::new(Mutex::new(Some(cancel_tx))),
            cancel_rx: Arc::new(Mutex::new(Some(cancel_rx))),
        };

        endpoint
            .tsx_layer()
            .add_server(ServerTsx::Invite(tsx.clone()));
        request.set_transaction(ServerTsx::Invite(tsx.clone()));

        if endpoint.config().auto_100_trying {
            tsx.schedule(TimerKind::Trying100, AUTO_TRYING_DELAY);
        }

        tsx
    }

    /// The receiver resolving when a CANCEL hits this transaction. The
    /// transaction user answers 487 through [`Self::respond`].
    pub fn take_cancel_rx(&self) -> Option<oneshot::Receiver<()>> {
        self.cancel_rx.lock().expect("Lock failed").take()
    }

    /// Send a response, advancing the machine.
    pub async fn respond(&self, response: &mut OutgoingResponse) -> Result<()> {
        let _guard = self.event_guard().await;

        self.send_response(response).await?;

        match response.status_code().code() {
            100..=199 => {
                // Stay in Proceeding.
            }
            200..=299 => {
                // 2xx handled end to end by the dialog layer.
                self.on_terminated();
            }
            _ => {
                self.change_state(TsxState::Completed);
                self.schedule(TimerKind::H, self.settings().t6());
                self.schedule_retransmit(TimerKind::G);
            }
        }
        Ok(())
    }

    /// A retransmitted INVITE re-triggers the last response.
    pub(crate) async fn receive_retransmission(&self) -> Result<()> {
        let _guard = self.event_guard().await;

        if matches!(self.state(), TsxState::Proceeding | TsxState::Completed) {
            // Nothing sent yet (auto-100 pending) means nothing to repeat.
            if self.last_status().is_some() {
                self.retransmit().await?;
            }
        }
        Ok(())
    }

    /// ACK receipt for a non-2xx final.
    pub(crate) async fn on_ack(&self) -> Result<()> {
        let _guard = self.event_guard().await;

        if self.state() != TsxState::Completed {
            return Ok(());
        }
        self.change_state(TsxState::Confirmed);
        self.cancel_timers();

        if self.reliable() {
            self.on_terminated();
        } else {
            self.schedule(TimerKind::I, self.settings().t4);
        }
        Ok(())
    }

    /// CANCEL matched this transaction: answer the CANCEL with 200 and
    /// wake the transaction user if the INVITE is still unanswered.
    pub(crate) async fn on_cancel(
        &self,
        endpoint: &Endpoint,
        cancel: &IncomingRequest,
    ) -> Result<()> {
        let response = endpoint.new_response(cancel, StatusCode::Ok, None);
        endpoint.send_response(response).await?;

        let _guard = self.event_guard().await;
        if self.state() == TsxState::Proceeding {
            if let Some(tx) = self.cancel_tx.lock().expect("Lock failed").take() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    pub(crate) async fn on_timer(&self, kind: TimerKind) -> Result<()> {
        let _guard = self.event_guard().await;

        match kind {
            TimerKind::Trying100 => {
                // Answer 100 when the TU has not responded within 200 ms.
                if self.last_status().is_none() && self.state() == TsxState::Proceeding {
                    let mut trying = OutgoingResponse {
                        response: crate::message::Response {
                            status_line: StatusLine::from_code(StatusCode::Trying),
                            headers: (*self.trying_headers).clone(),
                            body: None,
                        },
                        addr: OutgoingAddr::Addr {
                            addr: self.addr(),
                            transport: self.transport().clone(),
                        },
                        buf: None,
                    };
                    self.send_response(&mut trying).await?;
                }
            }
            TimerKind::G if self.state() == TsxState::Completed => {
                match self.retransmit().await {
                    Ok(count) => log::trace!("Final response retransmission #{count}"),
                    Err(err) => log::info!("Failed to retransmit: {err}"),
                }
                self.back_off_retransmit();
                self.schedule_retransmit(TimerKind::G);
            }
            TimerKind::H if self.state() == TsxState::Completed => {
                // The ACK never came.
                self.on_terminated();
            }
            TimerKind::I => {
                self.on_terminated();
            }
            _ => {}
        }
        Ok(())
    }
}

impl Deref for InviteServerTransaction {
    type Target = TransactionCore;

    fn deref(&self) -> &TransactionCore {
        &self.core
    }
}
