use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Max-Forwards` header: remaining hop budget, 0–255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxForwards(u8);

impl MaxForwards {
    pub fn new(hops: u8) -> Self {
        MaxForwards(hops)
    }

    pub fn hops(&self) -> u8 {
        self.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MaxForwards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", MaxForwards::NAME, self.0)
    }
}

impl SipHeaderParse for MaxForwards {
    const NAME: &'static str = "Max-Forwards";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(MaxForwards(parser.parse_u8()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let mf = MaxForwards::from_value("70").unwrap();
        assert_eq!(mf.hops(), 70);
        assert!(!mf.is_exhausted());
        assert!(MaxForwards::new(0).is_exhausted());
    }
}
