use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::{NameAddr, Params};
use crate::parser::Parser;

/// The `Refer-To` header (RFC 3515): where the recipient of a REFER is
/// being asked to send a new request. Embedded URI headers such as
/// `Replaces` ride inside the URI for attended transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferTo {
    pub addr: NameAddr,
    pub params: Params,
}

impl ReferTo {
    pub fn new(addr: NameAddr) -> Self {
        ReferTo {
            addr,
            params: Params::new(),
        }
    }
}

impl fmt::Display for ReferTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ReferTo::NAME, self.addr)?;
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for ReferTo {
    const NAME: &'static str = "Refer-To";
    const SHORT: Option<&'static str> = Some("r");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let addr = parser.parse_name_addr()?;
        let params = parser.parse_param_list()?;
        Ok(ReferTo { addr, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_target() {
        let refer_to = ReferTo::from_value("<sip:carol@cleveland.example.org>").unwrap();
        assert_eq!(refer_to.addr.uri.to_string(), "sip:carol@cleveland.example.org");
    }

    #[test]
    fn test_parse_attended_target() {
        let refer_to = ReferTo::from_value(
            "<sip:bob@biloxi.example.com?Replaces=12345%40192.168.118.3%3Bto-tag%3D12345%3Bfrom-tag%3D5FFE-3994>",
        )
        .unwrap();
        assert!(refer_to.addr.uri.headers.contains("Replaces"));
    }
}
