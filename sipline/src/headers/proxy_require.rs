use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Proxy-Require` header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProxyRequire(Vec<String>);

impl ProxyRequire {
    pub fn new(tags: Vec<String>) -> Self {
        ProxyRequire(tags)
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ProxyRequire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ProxyRequire::NAME, self.0.join(", "))
    }
}

impl SipHeaderParse for ProxyRequire {
    const NAME: &'static str = "Proxy-Require";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(ProxyRequire(parser.parse_token_list()?))
    }
}
