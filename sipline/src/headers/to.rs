use core::fmt;

use crate::error::Result;
use crate::headers::{SipHeaderParse, TAG_PARAM};
use crate::message::{NameAddr, Params};
use crate::parser::Parser;

/// The `To` header: logical recipient of the request.
#[derive(Debug, Clone, PartialEq)]
pub struct To {
    pub addr: NameAddr,
    tag: Option<String>,
    params: Params,
}

impl To {
    pub fn new(addr: NameAddr, tag: Option<String>) -> Self {
        To {
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

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", To::NAME, self.addr)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for To {
    const NAME: &'static str = "To";
    const SHORT: Option<&'static str> = Some("t");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let addr = parser.parse_name_addr()?;
        let mut params = parser.parse_param_list()?;
        let tag = params.remove(TAG_PARAM).and_then(|p| p.value);

        Ok(To { addr, tag, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_tag() {
        let to = To::from_value("Bob <sip:bob@biloxi.com>;tag=a6c85cf").unwrap();
        assert_eq!(to.tag(), Some("a6c85cf"));
        assert_eq!(to.addr.display.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_set_tag() {
        let mut to = To::from_value("<sip:bob@biloxi.com>").unwrap();
        assert!(to.tag().is_none());
        to.set_tag(Some("4542".into()));
        assert_eq!(to.to_string(), "To: <sip:bob@biloxi.com>;tag=4542");
    }
}
