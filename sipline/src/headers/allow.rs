use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::SipMethod;
use crate::parser::Parser;

/// The `Allow` header: methods the sender supports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Allow(Vec<SipMethod>);

impl Allow {
    pub fn new(methods: Vec<SipMethod>) -> Self {
        Allow(methods)
    }

    /// The method set this stack advertises.
    pub fn supported() -> Self {
        Allow(vec![
            SipMethod::Invite,
            SipMethod::Ack,
            SipMethod::Bye,
            SipMethod::Cancel,
            SipMethod::Options,
            SipMethod::Register,
            SipMethod::Refer,
            SipMethod::Notify,
        ])
    }

    pub fn allows(&self, method: &SipMethod) -> bool {
        self.0.contains(method)
    }

    pub fn methods(&self) -> &[SipMethod] {
        &self.0
    }
}

impl fmt::Display for Allow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", Allow::NAME)?;
        for (i, method) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{method}")?;
        }
        Ok(())
    }
}

impl SipHeaderParse for Allow {
    const NAME: &'static str = "Allow";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let methods = parser
            .parse_token_list()?
            .into_iter()
            .map(|token| SipMethod::from(token.as_bytes()))
            .collect();
        Ok(Allow(methods))
    }
}
