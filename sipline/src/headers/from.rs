use core::fmt;

use crate::error::Result;
use crate::headers::{SipHeaderParse, TAG_PARAM};
use crate::message::{NameAddr, Params};
use crate::parser::Parser;

/// The `From` header: logical identity of the request originator.
///
/// # Examples
///
/// ```
/// use sipline::headers::{From, SipHeaderParse};
///
/// let from = From::from_value("Alice <sip:alice@atlanta.com>;tag=1928301774").unwrap();
/// assert_eq!(from.tag(), Some("1928301774"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct From {
    pub addr: NameAddr,
    tag: Option<String>,
    params: Params,
}

impl From {
    pub fn new(addr: NameAddr, tag: Option<String>) -> Self {
        From {
            addr,
            tag,
            params: Params::new(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    pub fn uri(&self) -> &crate::message::Uri {
        &self.addr.uri
    }
}

impl fmt::Display for From {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", From::NAME, self.addr)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for From {
    const NAME: &'static str = "From";
    const SHORT: Option<&'static str> = Some("f");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let addr = parser.parse_name_addr()?;
        let mut params = parser.parse_param_list()?;
        let tag = params.remove(TAG_PARAM).and_then(|p| p.value);

        Ok(From { addr, tag, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_uri_form() {
        let from = From::from_value("sip:alice@atlanta.com;tag=88sja8x").unwrap();
        assert_eq!(from.tag(), Some("88sja8x"));
        assert_eq!(from.addr.uri.to_string(), "sip:alice@atlanta.com");
    }

    #[test]
    fn test_parse_quoted_display_name() {
        let from = From::from_value("\"A. G. Bell\" <sip:agb@bell-telephone.com>;tag=a48s").unwrap();
        assert_eq!(from.addr.display.as_deref(), Some("A. G. Bell"));
        assert_eq!(from.tag(), Some("a48s"));
    }

    #[test]
    fn test_display() {
        let from = From::from_value("Alice <sip:alice@atlanta.com>;tag=19").unwrap();
        assert_eq!(from.to_string(), "From: Alice <sip:alice@atlanta.com>;tag=19");
    }
}
