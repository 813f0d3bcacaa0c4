use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Require` header: option tags the receiver must support.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Require(Vec<String>);

impl Require {
    pub fn new(tags: Vec<String>) -> Self {
        Require(tags)
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Require::NAME, self.0.join(", "))
    }
}

impl SipHeaderParse for Require {
    const NAME: &'static str = "Require";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(Require(parser.parse_token_list()?))
    }
}
