//! Non-INVITE server transaction (RFC 3261 section 17.2.2).

use std::ops::Deref;

use crate::error::Result;
use crate::message::SipMethod;
use crate::transaction::{ServerTsx, TimerKind, TransactionCore, TsxState};
use crate::transport::{IncomingRequest, OutgoingResponse};
use crate::Endpoint;

/// Answers one non-INVITE request: Trying → Proceeding → Completed →
/// Terminated. Request retransmissions re-trigger the last response.
#[derive(Clone)]
pub struct ServerTransaction {
    core: TransactionCore,
}

impl ServerTransaction {
    pub fn new(endpoint: &Endpoint, request: &mut IncomingRequest) -> Self {
        assert!(
            !matches!(
                request.method(),
                SipMethod::Invite | SipMethod::Ack | SipMethod::Cancel
            ),
            "non-INVITE server transaction cannot carry {}",
            request.method()
        );

        let core = TransactionCore::new_uas(request, endpoint, TsxState::Trying);
        let tsx = ServerTransaction { core };

        endpoint
            .tsx_layer()
            .add_server(ServerTsx::NonInvite(tsx.clone()));
        request.set_transaction(ServerTsx::NonInvite(tsx.clone()));

        tsx
    }

    /// Send a response, advancing the machine.
    pub async fn respond(&self, response: &mut OutgoingResponse) -> Result<()> {
        let _guard = self.event_guard().await;

        self.send_response(response).await?;

        match self.state() {
            TsxState::Trying if response.is_provisional() => {
                self.change_state(TsxState::Proceeding);
            }
            TsxState::Trying | TsxState::Proceeding => {
                self.change_state(TsxState::Completed);
                if self.reliable() {
                    self.on_terminated();
                } else {
                    self.schedule(TimerKind::J, self.settings().t6());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// A retransmitted request re-triggers the last response.
    pub(crate) async fn receive_retransmission(&self) -> Result<()> {
        let _guard = self.event_guard().await;

        if matches!(self.state(), TsxState::Proceeding | TsxState::Completed) {
            self.retransmit().await?;
        }
        Ok(())
    }

    pub(crate) async fn on_timer(&self, kind: TimerKind) -> Result<()> {
        let _guard = self.event_guard().await;

        if kind == TimerKind::J {
            self.on_terminated();
        }
        Ok(())
    }
}

impl Deref for ServerTransaction {
    type Target = TransactionCore;

    fn deref(&self) -> &TransactionCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StatusCode;
    use crate::transaction::{mock, TransactionLayer, T1};
    use tokio::time::{self, Duration};

    #[tokio::test]
    async fn test_provisional_moves_to_proceeding() {
        let endpoint = mock::default_endpoint().await;
        let mut request = mock::incoming_request(SipMethod::Options);
        let tsx = ServerTransaction::new(&endpoint, &mut request);

        let mut response = mock::outgoing_response(StatusCode::Trying);
        tsx.respond(&mut response).await.unwrap();

        assert_eq!(tsx.last_status(), Some(StatusCode::Trying));
        assert_eq!(tsx.state(), TsxState::Proceeding);
    }

    #[tokio::test]
    async fn test_final_moves_to_completed() {
        let endpoint = mock::default_endpoint().await;
        let mut request = mock::incoming_request(SipMethod::Options);
        let tsx = ServerTransaction::new(&endpoint, &mut request);

        let mut response = mock::outgoing_response(StatusCode::Ok);
        tsx.respond(&mut response).await.unwrap();

        assert_eq!(tsx.state(), TsxState::Completed);
    }

    #[tokio::test]
    async fn test_retransmission_repeats_last_response() {
        let endpoint = mock::default_endpoint().await;
        let mut request = mock::incoming_request(SipMethod::Options);
        let tsx = ServerTransaction::new(&endpoint, &mut request);

        let mut response = mock::outgoing_response(StatusCode::Ok);
        tsx.respond(&mut response).await.unwrap();
        tsx.receive_retransmission().await.unwrap();

        assert_eq!(tsx.retransmit_count(), 1);
        assert_eq!(tsx.state(), TsxState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_j_terminates() {
        let endpoint = mock::default_endpoint().await;
        tokio::spawn(TransactionLayer::timer_task(endpoint.clone()));

        let mut request = mock::incoming_request(SipMethod::Options);
        let tsx = ServerTransaction::new(&endpoint, &mut request);

        let mut response = mock::outgoing_response(StatusCode::Ok);
        tsx.respond(&mut response).await.unwrap();

        time::sleep(T1 * 64 + Duration::from_millis(20)).await;

        assert_eq!(tsx.state(), TsxState::Terminated);
        assert!(endpoint.tsx_layer().find_server(tsx.key()).is_none());
    }
}
