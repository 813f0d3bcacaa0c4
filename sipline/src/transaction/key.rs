//! Transaction matching keys (RFC 3261 section 17.2.3).

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;
use crate::message::{HostPort, SipMethod};
use crate::transport::{IncomingRequest, IncomingResponse, OutgoingRequest};

/// Branches carrying this prefix follow the RFC 3261 matching rules.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A fresh branch parameter, unique within the process.
pub fn generate_branch() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{BRANCH_MAGIC_COOKIE}{suffix}")
}

/// Key a live transaction is indexed under.
///
/// ACK and CANCEL fold onto the INVITE method server-side so they reach
/// the INVITE server transaction; an ACK for a 2xx never matches
/// because that transaction terminated when the 2xx was sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TsxKey {
    Rfc3261(Rfc3261Key),
    Rfc2543(Rfc2543Key),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rfc3261Key {
    Client {
        branch: String,
        method: SipMethod,
    },
    Server {
        branch: String,
        sent_by: HostPort,
        method: SipMethod,
    },
}

/// Composite key for peers predating the magic cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rfc2543Key {
    pub cseq: u32,
    pub call_id: String,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
    pub sent_by: HostPort,
    pub method: SipMethod,
}

/// CANCEL and ACK match the transaction of the request they refer to.
fn server_method(method: &SipMethod) -> SipMethod {
    match method {
        SipMethod::Ack | SipMethod::Cancel => SipMethod::Invite,
        other => other.clone(),
    }
}

impl TsxKey {
    /// Client key from a method and the branch it was sent with.
    pub fn client(method: &SipMethod, branch: &str) -> Self {
        TsxKey::Rfc3261(Rfc3261Key::Client {
            branch: branch.to_string(),
            method: method.clone(),
        })
    }

    /// Key for a request this endpoint originates. The top Via must
    /// already carry a branch.
    pub fn for_outgoing(request: &OutgoingRequest) -> Result<Self> {
        let via = request
            .request
            .headers
            .via()
            .ok_or(Error::MissingRequiredHeader(crate::headers::Via::NAME))?;
        let branch = via
            .branch()
            .ok_or(Error::ProtocolViolation("outbound request without branch"))?;

        Ok(TsxKey::client(request.method(), branch))
    }

    /// Key a response is matched against on the client side.
    pub fn for_response(response: &IncomingResponse) -> Option<Self> {
        let branch = response.head.via.branch()?;
        Some(TsxKey::client(response.head.cseq.method(), branch))
    }

    /// Server-side key for an inbound request, falling back to the RFC
    /// 2543 composite when the branch lacks the magic cookie.
    pub fn for_incoming(request: &IncomingRequest) -> Self {
        let via = &request.head.via;
        let method = server_method(request.method());

        match via.branch() {
            Some(branch) if branch.starts_with(BRANCH_MAGIC_COOKIE) => {
                TsxKey::Rfc3261(Rfc3261Key::Server {
                    branch: branch.to_string(),
                    sent_by: via.sent_by().clone(),
                    method,
                })
            }
            _ => TsxKey::Rfc2543(Rfc2543Key {
                cseq: request.head.cseq.seq(),
                call_id: request.head.call_id.as_str().to_string(),
                from_tag: request.head.from.tag().map(str::to_string),
                to_tag: request.head.to.tag().map(str::to_string),
                sent_by: via.sent_by().clone(),
                method,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_branch_has_cookie() {
        let branch = generate_branch();
        assert!(branch.starts_with(BRANCH_MAGIC_COOKIE));
        assert_ne!(branch, generate_branch());
    }

    #[test]
    fn test_cancel_folds_to_invite() {
        assert_eq!(server_method(&SipMethod::Cancel), SipMethod::Invite);
        assert_eq!(server_method(&SipMethod::Ack), SipMethod::Invite);
        assert_eq!(server_method(&SipMethod::Bye), SipMethod::Bye);
    }

    #[test]
    fn test_client_keys_differ_by_method() {
        let invite = TsxKey::client(&SipMethod::Invite, "z9hG4bKabc");
        let cancel = TsxKey::client(&SipMethod::Cancel, "z9hG4bKabc");
        assert_ne!(invite, cancel);
    }
}
