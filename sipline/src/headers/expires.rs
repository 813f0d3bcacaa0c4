use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Expires` header, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expires(u32);

impl Expires {
    pub fn new(seconds: u32) -> Self {
        Expires(seconds)
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Expires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Expires::NAME, self.0)
    }
}

impl SipHeaderParse for Expires {
    const NAME: &'static str = "Expires";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(Expires(parser.parse_u32()?))
    }
}
