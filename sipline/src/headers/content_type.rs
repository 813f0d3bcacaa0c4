use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::Params;
use crate::parser::Parser;

/// A `type/subtype` media type with optional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    pub mtype: String,
    pub subtype: String,
    pub params: Params,
}

impl MediaType {
    pub fn new(mtype: &str, subtype: &str) -> Self {
        MediaType {
            mtype: mtype.to_string(),
            subtype: subtype.to_string(),
            params: Params::new(),
        }
    }

    /// The media type SDP bodies are labelled with.
    pub fn sdp() -> Self {
        MediaType::new("application", "sdp")
    }

    /// The media type REFER NOTIFY bodies are labelled with (RFC 3515).
    pub fn sipfrag() -> Self {
        let mut media = MediaType::new("message", "sipfrag");
        media
            .params
            .set("version", Some("2.0".to_string()));
        media
    }

    pub fn matches(&self, mtype: &str, subtype: &str) -> bool {
        self.mtype.eq_ignore_ascii_case(mtype) && self.subtype.eq_ignore_ascii_case(subtype)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mtype, self.subtype)?;
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

/// The `Content-Type` header.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentType(pub MediaType);

impl ContentType {
    pub fn new(media: MediaType) -> Self {
        ContentType(media)
    }

    pub fn media(&self) -> &MediaType {
        &self.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ContentType::NAME, self.0)
    }
}

impl SipHeaderParse for ContentType {
    const NAME: &'static str = "Content-Type";
    const SHORT: Option<&'static str> = Some("c");

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let mtype = parser.parse_token()?.to_string();
        parser.expect(b'/')?;
        let subtype = parser.parse_token()?.to_string();
        let params = parser.parse_param_list()?;

        Ok(ContentType(MediaType {
            mtype,
            subtype,
            params,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sdp() {
        let ct = ContentType::from_value("application/sdp").unwrap();
        assert!(ct.media().matches("application", "sdp"));
    }

    #[test]
    fn test_parse_with_params() {
        let ct = ContentType::from_value("multipart/mixed;boundary=unique-boundary-1").unwrap();
        assert_eq!(ct.media().params.get("boundary"), Some("unique-boundary-1"));
    }

    #[test]
    fn test_sipfrag_display() {
        let ct = ContentType::new(MediaType::sipfrag());
        assert_eq!(ct.to_string(), "Content-Type: message/sipfrag;version=2.0");
    }
}
