use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::{NameAddr, Params};
use crate::parser::Parser;

const Q_PARAM: &str = "q";
const EXPIRES_PARAM: &str = "expires";

/// The `Contact` header: where subsequent requests should be sent
/// directly. `Contact: *` (used to clear registrations) is carried by
/// the `star` flag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Contact {
    pub star: bool,
    pub addr: NameAddr,
    q: Option<String>,
    expires: Option<u32>,
    params: Params,
}

impl Contact {
    pub fn new(addr: NameAddr) -> Self {
        Contact {
            addr,
            ..Default::default()
        }
    }

    pub fn star() -> Self {
        Contact {
            star: true,
            ..Default::default()
        }
    }

    pub fn uri(&self) -> &crate::message::Uri {
        &self.addr.uri
    }

    pub fn expires(&self) -> Option<u32> {
        self.expires
    }

    pub fn set_expires(&mut self, expires: Option<u32>) {
        self.expires = expires;
    }

    pub fn q(&self) -> Option<&str> {
        self.q.as_deref()
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.star {
            return write!(f, "{}: *", Contact::NAME);
        }
        write!(f, "{}: {}", Contact::NAME, self.addr)?;
        if let Some(q) = &self.q {
            write!(f, ";q={q}")?;
        }
        if let Some(expires) = &self.expires {
            write!(f, ";expires={expires}")?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for Contact {
    const NAME: &'static str = "Contact";
    const SHORT: Option<&'static str> = Some("m");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        if parser.eat(b'*') {
            return Ok(Contact::star());
        }

        let addr = parser.parse_name_addr()?;
        let mut params = parser.parse_param_list()?;
        let q = params.remove(Q_PARAM).and_then(|p| p.value);
        let expires = params
            .remove(EXPIRES_PARAM)
            .and_then(|p| p.value)
            .and_then(|v| v.parse().ok());

        Ok(Contact {
            star: false,
            addr,
            q,
            expires,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_q_and_expires() {
        let contact = Contact::from_value("<sips:bob@192.0.2.4>;q=0.7;expires=3600").unwrap();
        assert_eq!(contact.q(), Some("0.7"));
        assert_eq!(contact.expires(), Some(3600));
    }

    #[test]
    fn test_star() {
        let contact = Contact::from_value("*").unwrap();
        assert!(contact.star);
        assert_eq!(contact.to_string(), "Contact: *");
    }

    #[test]
    fn test_display_name_form() {
        let contact = Contact::from_value("Mr. Watson <sip:watson@worcester.bell-telephone.com>").unwrap();
        assert_eq!(contact.addr.display.as_deref(), Some("Mr. Watson"));
    }
}
