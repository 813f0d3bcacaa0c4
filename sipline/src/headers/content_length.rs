use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Content-Length` header, in octets.
///
/// The serializer always recomputes this from the actual body; a stored
/// value only matters on the inbound path where it frames stream
/// transports and validates datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLength(u32);

impl ContentLength {
    pub fn new(length: u32) -> Self {
        ContentLength(length)
    }

    pub fn octets(&self) -> u32 {
        self.0
    }
}

impl std::convert::From<u32> for ContentLength {
    fn from(length: u32) -> Self {
        ContentLength(length)
    }
}

impl fmt::Display for ContentLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ContentLength::NAME, self.0)
    }
}

impl SipHeaderParse for ContentLength {
    const NAME: &'static str = "Content-Length";
    const SHORT: Option<&'static str> = Some("l");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(ContentLength(parser.parse_u32()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let cl = ContentLength::from_value("349").unwrap();
        assert_eq!(cl.octets(), 349);
        assert_eq!(cl.to_string(), "Content-Length: 349");
    }
}
