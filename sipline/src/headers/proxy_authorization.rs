use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::auth::Credential;
use crate::parser::Parser;

/// The `Proxy-Authorization` header: credentials answering a 407.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuthorization(pub Credential);

impl ProxyAuthorization {
    pub fn new(credential: Credential) -> Self {
        ProxyAuthorization(credential)
    }

    pub fn credential(&self) -> &Credential {
        &self.0
    }
}

impl fmt::Display for ProxyAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ProxyAuthorization::NAME, self.0)
    }
}

impl SipHeaderParse for ProxyAuthorization {
    const NAME: &'static str = "Proxy-Authorization";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(ProxyAuthorization(parser.parse_credential()?))
    }
}
