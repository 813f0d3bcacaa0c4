use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `User-Agent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent(String);

impl UserAgent {
    pub fn new<S: Into<String>>(agent: S) -> Self {
        UserAgent(agent.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", UserAgent::NAME, self.0)
    }
}

impl SipHeaderParse for UserAgent {
    const NAME: &'static str = "User-Agent";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(UserAgent(parser.rest_trimmed()?.to_string()))
    }
}
