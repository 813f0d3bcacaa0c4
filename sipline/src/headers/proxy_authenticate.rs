use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::auth::Challenge;
use crate::parser::Parser;

/// The `Proxy-Authenticate` header carried by 407 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuthenticate(pub Challenge);

impl ProxyAuthenticate {
    pub fn new(challenge: Challenge) -> Self {
        ProxyAuthenticate(challenge)
    }

    pub fn challenge(&self) -> &Challenge {
        &self.0
    }
}

impl fmt::Display for ProxyAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ProxyAuthenticate::NAME, self.0)
    }
}

impl SipHeaderParse for ProxyAuthenticate {
    const NAME: &'static str = "Proxy-Authenticate";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(ProxyAuthenticate(parser.parse_challenge()?))
    }
}
