use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Unsupported` header carried by 420 responses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Unsupported(Vec<String>);

impl Unsupported {
    pub fn new(tags: Vec<String>) -> Self {
        Unsupported(tags)
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Unsupported::NAME, self.0.join(", "))
    }
}

impl SipHeaderParse for Unsupported {
    const NAME: &'static str = "Unsupported";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(Unsupported(parser.parse_token_list()?))
    }
}
