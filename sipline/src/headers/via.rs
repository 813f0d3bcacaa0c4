use core::fmt;
use std::net::IpAddr;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::{Host, HostPort, Params, TransportKind};
use crate::parser::{Parser, SIPV2};

const BRANCH_PARAM: &str = "branch";
const RECEIVED_PARAM: &str = "received";
const RPORT_PARAM: &str = "rport";
const MADDR_PARAM: &str = "maddr";
const TTL_PARAM: &str = "ttl";

/// The response-port parameter of RFC 3581.
///
/// A request asks for symmetric response routing with a bare `rport`;
/// the receiving server fills the value in before forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rport {
    #[default]
    Unset,
    Requested,
    Value(u16),
}

impl Rport {
    pub fn value(&self) -> Option<u16> {
        match self {
            Rport::Value(port) => Some(*port),
            _ => None,
        }
    }

    pub fn is_requested(&self) -> bool {
        matches!(self, Rport::Requested | Rport::Value(_))
    }
}

/// The `Via` header: one hop on the path a request took.
///
/// # Examples
///
/// ```
/// use sipline::headers::{SipHeaderParse, Via};
///
/// let via = Via::from_value("SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds").unwrap();
/// assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Via {
    pub transport: TransportKind,
    pub sent_by: HostPort,
    branch: Option<String>,
    received: Option<IpAddr>,
    rport: Rport,
    maddr: Option<Host>,
    ttl: Option<u8>,
    params: Params,
}

impl Via {
    /// A Via for an outbound request from the given local binding.
    pub fn new(transport: TransportKind, sent_by: HostPort, branch: String) -> Self {
        Via {
            transport,
            sent_by,
            branch: Some(branch),
            ..Default::default()
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn set_branch(&mut self, branch: String) {
        self.branch = Some(branch);
    }

    pub fn received(&self) -> Option<IpAddr> {
        self.received
    }

    pub fn set_received(&mut self, received: IpAddr) {
        self.received = Some(received);
    }

    pub fn rport(&self) -> Rport {
        self.rport
    }

    pub fn set_rport(&mut self, rport: Rport) {
        self.rport = rport;
    }

    pub fn request_rport(&mut self) {
        self.rport = Rport::Requested;
    }

    pub fn maddr(&self) -> Option<&Host> {
        self.maddr.as_ref()
    }

    pub fn sent_by(&self) -> &HostPort {
        &self.sent_by
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {SIPV2}/{} {}", Via::NAME, self.transport, self.sent_by)?;
        match self.rport {
            Rport::Unset => {}
            Rport::Requested => write!(f, ";rport")?,
            Rport::Value(port) => write!(f, ";rport={port}")?,
        }
        if let Some(received) = &self.received {
            write!(f, ";received={received}")?;
        }
        if let Some(ttl) = &self.ttl {
            write!(f, ";ttl={ttl}")?;
        }
        if let Some(maddr) = &self.maddr {
            write!(f, ";maddr={maddr}")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={branch}")?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for Via {
    const NAME: &'static str = "Via";
    const SHORT: Option<&'static str> = Some("v");

    /*
     * Via        = ( "Via" / "v" ) HCOLON via-parm *(COMMA via-parm)
     * via-parm   = sent-protocol LWS sent-by *( SEMI via-params )
     * via-params = via-ttl / via-maddr / via-received / via-branch
     *              / response-port / via-extension
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.expect_sip_version()?;
        parser.expect(b'/')?;

        let transport = TransportKind::from(parser.parse_token()?.as_bytes());
        parser.take_ws();

        let sent_by = parser.parse_host_port()?;
        let mut params = parser.parse_param_list()?;

        let branch = params.remove(BRANCH_PARAM).and_then(|p| p.value);
        let received = params
            .remove(RECEIVED_PARAM)
            .and_then(|p| p.value)
            .and_then(|v| v.parse().ok());
        let maddr = params
            .remove(MADDR_PARAM)
            .and_then(|p| p.value)
            .map(|v| v.parse().unwrap_or(Host::DomainName(v)));
        let ttl = params
            .remove(TTL_PARAM)
            .and_then(|p| p.value)
            .and_then(|v| v.parse().ok());
        let rport = match params.remove(RPORT_PARAM) {
            None => Rport::Unset,
            Some(param) => match param.value.as_deref().and_then(|v| v.parse().ok()) {
                Some(port) => Rport::Value(port),
                None => Rport::Requested,
            },
        };

        Ok(Via {
            transport,
            sent_by,
            branch,
            received,
            rport,
            maddr,
            ttl,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Host;

    #[test]
    fn test_parse_basic() {
        let via = Via::from_value("SIP/2.0/UDP bobspc.biloxi.com:5060;received=192.0.2.4").unwrap();

        assert_eq!(via.transport, TransportKind::Udp);
        assert_eq!(
            via.sent_by,
            HostPort {
                host: Host::DomainName("bobspc.biloxi.com".into()),
                port: Some(5060)
            }
        );
        assert_eq!(via.received(), Some("192.0.2.4".parse().unwrap()));
    }

    #[test]
    fn test_parse_rport_forms() {
        let via = Via::from_value("SIP/2.0/UDP 10.0.0.1;rport;branch=z9hG4bK87a").unwrap();
        assert_eq!(via.rport(), Rport::Requested);

        let via = Via::from_value("SIP/2.0/UDP 10.0.0.1;rport=5066;branch=z9hG4bK87a").unwrap();
        assert_eq!(via.rport(), Rport::Value(5066));
    }

    #[test]
    fn test_display_roundtrip() {
        let src = "SIP/2.0/TCP client.atlanta.com:5062;branch=z9hG4bK74bf9";
        let via = Via::from_value(src).unwrap();
        assert_eq!(via.to_string(), format!("Via: {src}"));
    }

    #[test]
    fn test_extension_params_survive() {
        let via = Via::from_value("SIP/2.0/UDP u1.example.com;branch=z9hG4bKkdj;hidden").unwrap();
        assert_eq!(via.branch(), Some("z9hG4bKkdj"));
        assert!(via.params.contains("hidden"));
    }
}
