use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::parser::Parser;

/// The `Call-ID` header: an opaque token grouping all messages of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        CallId(id.into())
    }

    /// A fresh, process-unique Call-ID.
    pub fn generate() -> Self {
        CallId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", CallId::NAME, self.0)
    }
}

impl SipHeaderParse for CallId {
    const NAME: &'static str = "Call-ID";
    const SHORT: Option<&'static str> = Some("i");

    /*
     * Call-ID = ( "Call-ID" / "i" ) HCOLON callid
     * callid  = word [ "@" word ]
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let id = parser.rest_trimmed()?;
        Ok(CallId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let call_id = CallId::from_value("843817637684230@998sdasdh09").unwrap();
        assert_eq!(call_id.as_str(), "843817637684230@998sdasdh09");
        assert_eq!(call_id.to_string(), "Call-ID: 843817637684230@998sdasdh09");
    }

    #[test]
    fn test_generate_unique() {
        assert_ne!(CallId::generate(), CallId::generate());
    }
}
