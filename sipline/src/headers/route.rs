use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::{NameAddr, Params};
use crate::parser::Parser;

/// The `Route` header: forces a request through the listed hop.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub addr: NameAddr,
    pub params: Params,
}

impl Route {
    pub fn new(addr: NameAddr) -> Self {
        Route {
            addr,
            params: Params::new(),
        }
    }

    /// Whether this hop does loose routing.
    pub fn is_loose(&self) -> bool {
        self.addr.uri.lr_param
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Route::NAME, self.addr)?;
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for Route {
    const NAME: &'static str = "Route";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let addr = parser.parse_name_addr()?;
        let params = parser.parse_param_list()?;
        Ok(Route { addr, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loose_route() {
        let route = Route::from_value("<sip:ss1.atlanta.example.com;lr>").unwrap();
        assert!(route.is_loose());
    }

    #[test]
    fn test_strict_route() {
        let route = Route::from_value("<sip:p1.example.com>").unwrap();
        assert!(!route.is_loose());
    }
}
