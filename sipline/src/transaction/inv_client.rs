//! INVITE client transaction (RFC 3261 section 17.1.1).

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::headers::{CSeq, Header, Headers};
use crate::message::{Request, RequestLine, SipMethod};
use crate::transaction::{
    ClientTsx, TimerKind, TransactionCore, TsxEvent, TsxEventRx, TsxEventTx, TsxState, TIMER_D,
};
use crate::transport::{IncomingResponse, OutgoingRequest};
use crate::Endpoint;

/// Drives one outbound INVITE through Calling → Proceeding →
/// Completed/Terminated.
///
/// A 2xx terminates the transaction at once; it is delivered upward and
/// the dialog layer ACKs end-to-end. Non-2xx finals are ACKed here and
/// the ACK is what gets retransmitted during the Completed quiet time.
#[derive(Clone)]
pub struct InviteClientTransaction {
    core: TransactionCore,
    original: Arc<Request>,
    events: TsxEventTx,
}

impl InviteClientTransaction {
    /// Send `request` and register the new transaction. The returned
    /// receiver yields responses, timeout and termination.
    pub async fn send(
        mut request: OutgoingRequest,
        endpoint: &Endpoint,
    ) -> Result<(Self, TsxEventRx)> {
        assert!(
            matches!(request.method(), SipMethod::Invite),
            "INVITE client transaction requires an INVITE, got {}",
            request.method()
        );

        let core = TransactionCore::new_uac(&request, endpoint, TsxState::Calling)?;
        core.send_request(&mut request).await?;

        let (events, rx) = mpsc::unbounded_channel();
        let tsx = InviteClientTransaction {
            core,
            original: Arc::new(request.request),
            events,
        };

        endpoint.tsx_layer().add_client(ClientTsx::Invite(tsx.clone()));

        tsx.schedule(TimerKind::B, tsx.settings().t6());
        tsx.schedule_retransmit(TimerKind::A);

        Ok((tsx, rx))
    }

    /// The request this transaction sent, as the CANCEL builder needs it.
    pub fn original(&self) -> &Arc<Request> {
        &self.original
    }

    pub(crate) async fn on_timer(&self, kind: TimerKind) -> Result<()> {
        let _guard = self.event_guard().await;

        match kind {
            TimerKind::A if self.state() == TsxState::Calling => {
                match self.retransmit().await {
                    Ok(count) => log::trace!("INVITE retransmission #{count}"),
                    Err(err) => log::info!("Failed to retransmit: {err}"),
                }
                self.back_off_retransmit();
                self.schedule_retransmit(TimerKind::A);
            }
            TimerKind::B
                if matches!(self.state(), TsxState::Calling | TsxState::Proceeding) =>
            {
                let _ = self.events.send(TsxEvent::Timeout);
                self.on_terminated();
                let _ = self.events.send(TsxEvent::Terminated);
            }
            TimerKind::D => {
                self.on_terminated();
                let _ = self.events.send(TsxEvent::Terminated);
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) async fn receive(&self, response: IncomingResponse) -> Result<()> {
        let _guard = self.event_guard().await;

        let code = response.code();
        self.set_last_status(code);

        match self.state() {
            TsxState::Calling | TsxState::Proceeding if code.is_provisional() => {
                self.change_state(TsxState::Proceeding);
                let _ = self.events.send(TsxEvent::Response(response));
            }
            TsxState::Calling | TsxState::Proceeding if code.is_success() => {
                // 2xx ends the transaction; ACK is the dialog's business.
                self.on_terminated();
                let _ = self.events.send(TsxEvent::Response(response));
                let _ = self.events.send(TsxEvent::Terminated);
            }
            TsxState::Calling | TsxState::Proceeding => {
                self.change_state(TsxState::Completed);

                let mut ack = self.build_ack(&response);
                // The ACK replaces the INVITE as the retransmitted
                // message for the rest of the quiet time.
                self.core.send_request(&mut ack).await?;

                let _ = self.events.send(TsxEvent::Response(response));

                if self.reliable() {
                    self.on_terminated();
                    let _ = self.events.send(TsxEvent::Terminated);
                } else {
                    self.schedule(TimerKind::D, TIMER_D);
                }
            }
            TsxState::Completed => {
                // 17.1.1.2: retransmitted finals re-trigger the ACK but
                // are not passed up.
                self.core.retransmit().await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// ACK for a non-2xx final (17.1.1.3): same branch, same CSeq number,
    /// To taken from the response, Route set copied from the INVITE.
    fn build_ack(&self, response: &IncomingResponse) -> OutgoingRequest {
        let mut headers = Headers::with_capacity(6);

        if let Some(via) = self.original.headers.via() {
            headers.push(Header::Via(via.clone()));
        }
        if let Some(from) = self.original.headers.from() {
            headers.push(Header::From(from.clone()));
        }
        headers.push(Header::To(response.to().clone()));
        if let Some(call_id) = self.original.headers.call_id() {
            headers.push(Header::CallId(call_id.clone()));
        }
        if let Some(cseq) = self.original.headers.cseq() {
            headers.push(Header::CSeq(CSeq::new(cseq.seq(), SipMethod::Ack)));
        }
        for route in self.original.headers.routes() {
            headers.push(Header::Route(route.clone()));
        }
        if let Some(mf) = self.original.headers.max_forwards() {
            headers.push(Header::MaxForwards(*mf));
        }

        let request = Request {
            req_line: RequestLine {
                method: SipMethod::Ack,
                uri: self.original.req_line.uri.clone(),
            },
            headers,
            body: None,
        };

        OutgoingRequest::new(request, self.transport().clone(), self.addr())
    }
}

impl Deref for InviteClientTransaction {
    type Target = TransactionCore;

    fn deref(&self) -> &TransactionCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::mock;
    use crate::message::StatusCode;
    use tokio::time::{self, Duration};

    async fn started_endpoint() -> Endpoint {
        let endpoint = mock::default_endpoint().await;
        tokio::spawn(crate::transaction::TransactionLayer::timer_task(
            endpoint.clone(),
        ));
        endpoint
    }

    #[tokio::test]
    async fn test_state_calling_after_send() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);

        let (tsx, _rx) = InviteClientTransaction::send(request, &endpoint).await.unwrap();

        assert_eq!(tsx.state(), TsxState::Calling);
    }

    #[tokio::test]
    async fn test_state_proceeding_on_1xx() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::Trying);

        let (tsx, _rx) = InviteClientTransaction::send(request, &endpoint).await.unwrap();
        tsx.receive(response).await.unwrap();

        assert_eq!(tsx.state(), TsxState::Proceeding);
    }

    #[tokio::test]
    async fn test_state_completed_on_busy() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::BusyHere);

        let (tsx, _rx) = InviteClientTransaction::send(request, &endpoint).await.unwrap();
        tsx.receive(response).await.unwrap();

        assert_eq!(tsx.last_status(), Some(StatusCode::BusyHere));
        assert_eq!(tsx.state(), TsxState::Completed);
    }

    #[tokio::test]
    async fn test_2xx_terminates_immediately() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::Ok);

        let (tsx, mut rx) = InviteClientTransaction::send(request, &endpoint).await.unwrap();
        tsx.receive(response).await.unwrap();

        assert_eq!(tsx.state(), TsxState::Terminated);
        assert!(matches!(rx.recv().await, Some(TsxEvent::Response(_))));
        assert!(matches!(rx.recv().await, Some(TsxEvent::Terminated)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_a_backoff() {
        let endpoint = started_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);

        let (tsx, _rx) = InviteClientTransaction::send(request, &endpoint).await.unwrap();

        assert_eq!(tsx.retransmit_count(), 0);

        time::sleep(Duration::from_millis(500 + 20)).await;
        assert_eq!(tsx.retransmit_count(), 1);

        time::sleep(Duration::from_secs(1) + Duration::from_millis(20)).await;
        assert_eq!(tsx.retransmit_count(), 2);

        time::sleep(Duration::from_secs(2) + Duration::from_millis(20)).await;
        assert_eq!(tsx.retransmit_count(), 3);

        time::sleep(Duration::from_secs(4) + Duration::from_millis(20)).await;
        assert_eq!(tsx.retransmit_count(), 4);

        time::sleep(Duration::from_secs(4) + Duration::from_millis(20)).await;
        assert_eq!(tsx.retransmit_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_b_times_out() {
        let endpoint = started_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);

        let (tsx, mut rx) = InviteClientTransaction::send(request, &endpoint).await.unwrap();
        assert_eq!(tsx.state(), TsxState::Calling);

        time::sleep(crate::transaction::T1 * 64 + Duration::from_millis(20)).await;

        assert_eq!(tsx.state(), TsxState::Terminated);
        assert!(matches!(rx.recv().await, Some(TsxEvent::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_d_quiet_time() {
        let endpoint = started_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Invite);
        let response = mock::incoming_response(StatusCode::BusyHere);

        let (tsx, _rx) = InviteClientTransaction::send(request, &endpoint).await.unwrap();
        tsx.receive(response).await.unwrap();
        assert_eq!(tsx.state(), TsxState::Completed);

        time::sleep(TIMER_D + Duration::from_millis(20)).await;
        assert_eq!(tsx.state(), TsxState::Terminated);
    }
}
