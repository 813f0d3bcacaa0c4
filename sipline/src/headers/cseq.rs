use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::SipMethod;
use crate::parser::Parser;

/// The `CSeq` header: sequence number plus method, ordering requests
/// within a dialog.
///
/// # Examples
///
/// ```
/// use sipline::headers::CSeq;
/// use sipline::message::SipMethod;
///
/// let cseq = CSeq::new(314159, SipMethod::Invite);
/// assert_eq!(cseq.to_string(), "CSeq: 314159 INVITE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: SipMethod,
}

impl CSeq {
    pub fn new(seq: u32, method: SipMethod) -> Self {
        CSeq { seq, method }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn method(&self) -> &SipMethod {
        &self.method
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", CSeq::NAME, self.seq, self.method)
    }
}

impl SipHeaderParse for CSeq {
    const NAME: &'static str = "CSeq";

    /*
     * CSeq = "CSeq" HCOLON 1*DIGIT LWS Method
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let seq = parser.parse_u32()?;
        parser.take_ws();
        let method = SipMethod::from(parser.parse_token()?.as_bytes());

        Ok(CSeq { seq, method })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let cseq = CSeq::from_value("4711 INVITE").unwrap();
        assert_eq!(cseq.seq(), 4711);
        assert_eq!(cseq.method(), &SipMethod::Invite);
    }
}
