use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::Params;
use crate::parser::Parser;

const ID_PARAM: &str = "id";

/// The `Event` header (RFC 6665). The implicit subscription created by a
/// REFER uses the `refer` package.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub package: String,
    pub id: Option<String>,
    pub params: Params,
}

impl Event {
    pub fn new<S: Into<String>>(package: S) -> Self {
        Event {
            package: package.into(),
            id: None,
            params: Params::new(),
        }
    }

    pub fn refer() -> Self {
        Event::new("refer")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Event::NAME, self.package)?;
        if let Some(id) = &self.id {
            write!(f, ";id={id}")?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for Event {
    const NAME: &'static str = "Event";
    const SHORT: Option<&'static str> = Some("o");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let package = parser.parse_token()?.to_string();
        let mut params = parser.parse_param_list()?;
        let id = params.remove(ID_PARAM).and_then(|p| p.value);

        Ok(Event {
            package,
            id,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_refer_event() {
        let event = Event::from_value("refer;id=93809824").unwrap();
        assert_eq!(event.package, "refer");
        assert_eq!(event.id.as_deref(), Some("93809824"));
    }
}
