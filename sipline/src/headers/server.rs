use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Server` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server(String);

impl Server {
    pub fn new<S: Into<String>>(server: S) -> Self {
        Server(server.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Server::NAME, self.0)
    }
}

impl SipHeaderParse for Server {
    const NAME: &'static str = "Server";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(Server(parser.rest_trimmed()?.to_string()))
    }
}
