use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Supported` header: option tags the sender understands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Supported(Vec<String>);

impl Supported {
    pub fn new(tags: Vec<String>) -> Self {
        Supported(tags)
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Supported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Supported::NAME, self.0.join(", "))
    }
}

impl SipHeaderParse for Supported {
    const NAME: &'static str = "Supported";
    const SHORT: Option<&'static str> = Some("k");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(Supported(parser.parse_token_list()?))
    }
}
