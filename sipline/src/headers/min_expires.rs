use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Min-Expires` header carried by 423 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinExpires(u32);

impl MinExpires {
    pub fn new(seconds: u32) -> Self {
        MinExpires(seconds)
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MinExpires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", MinExpires::NAME, self.0)
    }
}

impl SipHeaderParse for MinExpires {
    const NAME: &'static str = "Min-Expires";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(MinExpires(parser.parse_u32()?))
    }
}
