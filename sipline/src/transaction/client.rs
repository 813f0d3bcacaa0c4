//! Non-INVITE client transaction (RFC 3261 section 17.1.2).

use std::ops::Deref;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::SipMethod;
use crate::transaction::{
    ClientTsx, TimerKind, TransactionCore, TsxEvent, TsxEventRx, TsxEventTx, TsxState,
};
use crate::transport::{IncomingResponse, OutgoingRequest};
use crate::Endpoint;

/// Drives one non-INVITE request through Trying → Proceeding →
/// Completed → Terminated.
#[derive(Clone)]
pub struct ClientTransaction {
    core: TransactionCore,
    events: TsxEventTx,
}

impl ClientTransaction {
    pub async fn send(
        mut request: OutgoingRequest,
        endpoint: &Endpoint,
    ) -> Result<(Self, TsxEventRx)> {
        assert!(
            !matches!(request.method(), SipMethod::Invite | SipMethod::Ack),
            "non-INVITE client transaction cannot carry {}",
            request.method()
        );

        let core = TransactionCore::new_uac(&request, endpoint, TsxState::Trying)?;
        core.send_request(&mut request).await?;

        let (events, rx) = mpsc::unbounded_channel();
        let tsx = ClientTransaction { core, events };

        endpoint
            .tsx_layer()
            .add_client(ClientTsx::NonInvite(tsx.clone()));

        tsx.schedule(TimerKind::F, tsx.settings().t6());
        tsx.schedule_retransmit(TimerKind::E);

        Ok((tsx, rx))
    }

    pub(crate) async fn on_timer(&self, kind: TimerKind) -> Result<()> {
        let _guard = self.event_guard().await;

        match kind {
            TimerKind::E
                if matches!(self.state(), TsxState::Trying | TsxState::Proceeding) =>
            {
                match self.retransmit().await {
                    Ok(count) => log::trace!("Request retransmission #{count}"),
                    Err(err) => log::info!("Failed to retransmit: {err}"),
                }
                self.back_off_retransmit();
                self.schedule_retransmit(TimerKind::E);
            }
            TimerKind::F
                if matches!(self.state(), TsxState::Trying | TsxState::Proceeding) =>
            {
                let _ = self.events.send(TsxEvent::Timeout);
                self.on_terminated();
                let _ = self.events.send(TsxEvent::Terminated);
            }
            TimerKind::K => {
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
            TsxState::Trying | TsxState::Proceeding if code.is_provisional() => {
                self.change_state(TsxState::Proceeding);
                let _ = self.events.send(TsxEvent::Response(response));
            }
            TsxState::Trying | TsxState::Proceeding => {
                self.change_state(TsxState::Completed);
                let _ = self.events.send(TsxEvent::Response(response));

                if self.reliable() {
                    self.on_terminated();
                    let _ = self.events.send(TsxEvent::Terminated);
                } else {
                    self.schedule(TimerKind::K, self.settings().t4);
                }
            }
            // Completed: response retransmissions are absorbed.
            _ => {}
        }
        Ok(())
    }
}

impl Deref for ClientTransaction {
    type Target = TransactionCore;

    fn deref(&self) -> &TransactionCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StatusCode;
    use crate::transaction::{mock, TransactionLayer, T1, T4};
    use tokio::time::{self, Duration};

    async fn started_endpoint() -> Endpoint {
        let endpoint = mock::default_endpoint().await;
        tokio::spawn(TransactionLayer::timer_task(endpoint.clone()));
        endpoint
    }

    #[tokio::test]
    async fn test_state_trying_after_send() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Options);

        let (tsx, _rx) = ClientTransaction::send(request, &endpoint).await.unwrap();

        assert_eq!(tsx.state(), TsxState::Trying);
    }

    #[tokio::test]
    async fn test_final_response_completes() {
        let endpoint = mock::default_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Options);
        let response = mock::incoming_response_for(StatusCode::Ok, SipMethod::Options);

        let (tsx, mut rx) = ClientTransaction::send(request, &endpoint).await.unwrap();
        tsx.receive(response).await.unwrap();

        assert_eq!(tsx.state(), TsxState::Completed);
        assert!(matches!(rx.recv().await, Some(TsxEvent::Response(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_e_retransmits() {
        let endpoint = started_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Options);

        let (tsx, _rx) = ClientTransaction::send(request, &endpoint).await.unwrap();

        time::sleep(T1 + Duration::from_millis(20)).await;
        assert_eq!(tsx.retransmit_count(), 1);

        time::sleep(T1 * 2 + Duration::from_millis(20)).await;
        assert_eq!(tsx.retransmit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_f_times_out() {
        let endpoint = started_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Options);

        let (tsx, mut rx) = ClientTransaction::send(request, &endpoint).await.unwrap();

        time::sleep(T1 * 64 + Duration::from_millis(20)).await;

        assert_eq!(tsx.state(), TsxState::Terminated);
        assert!(matches!(rx.recv().await, Some(TsxEvent::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_k_quiet_time() {
        let endpoint = started_endpoint().await;
        let request = mock::outgoing_request(SipMethod::Options);
        let response = mock::incoming_response_for(StatusCode::Ok, SipMethod::Options);

        let (tsx, _rx) = ClientTransaction::send(request, &endpoint).await.unwrap();
        tsx.receive(response).await.unwrap();
        assert_eq!(tsx.state(), TsxState::Completed);

        time::sleep(T4 + Duration::from_millis(20)).await;
        assert_eq!(tsx.state(), TsxState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmission_disabled() {
        let endpoint = crate::endpoint::Builder::new()
            .with_retransmission_disabled(true)
            .build()
            .await;
        tokio::spawn(TransactionLayer::timer_task(endpoint.clone()));

        let request = mock::outgoing_request(SipMethod::Options);
        let (tsx, _rx) = ClientTransaction::send(request, &endpoint).await.unwrap();

        time::sleep(T1 * 8).await;
        assert_eq!(tsx.retransmit_count(), 0);
        // The F timeout still runs.
        time::sleep(T1 * 64).await;
        assert_eq!(tsx.state(), TsxState::Terminated);
    }
}
