use crate::transport::{IncomingRequest, IncomingResponse};
use crate::{Endpoint, Result};

/// Extends the endpoint with application behavior.
///
/// Services see every message no transaction consumed, in registration
/// order. Taking the message out of the `Option` marks it handled and
/// stops the chain.
#[async_trait::async_trait]
#[allow(unused_variables)]
pub trait SipService: Sync + Send + 'static {
    /// The service name, unique per endpoint.
    fn name(&self) -> &str;

    /// An inbound request no server transaction claimed.
    async fn on_request(
        &self,
        endpoint: &Endpoint,
        request: &mut Option<IncomingRequest>,
    ) -> Result<()> {
        Ok(())
    }

    /// An inbound response no client transaction claimed.
    async fn on_response(
        &self,
        endpoint: &Endpoint,
        response: &mut Option<IncomingResponse>,
    ) -> Result<()> {
        Ok(())
    }
}
