use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::{NameAddr, Params};
use crate::parser::Parser;

/// The `Record-Route` header: a proxy that wants to stay on the path of
/// future in-dialog requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRoute {
    pub addr: NameAddr,
    pub params: Params,
}

impl RecordRoute {
    pub fn new(addr: NameAddr) -> Self {
        RecordRoute {
            addr,
            params: Params::new(),
        }
    }
}

impl fmt::Display for RecordRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", RecordRoute::NAME, self.addr)?;
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for RecordRoute {
    const NAME: &'static str = "Record-Route";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let addr = parser.parse_name_addr()?;
        let params = parser.parse_param_list()?;
        Ok(RecordRoute { addr, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let rr = RecordRoute::from_value("<sip:ss2.biloxi.example.com;lr>").unwrap();
        assert!(rr.addr.uri.lr_param);
        assert_eq!(rr.to_string(), "Record-Route: <sip:ss2.biloxi.example.com;lr>");
    }
}
