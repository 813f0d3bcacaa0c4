use core::fmt;
use std::str::FromStr;

/// The method of a SIP request.
///
/// Extension methods not defined by the core RFCs are carried in the
/// [`SipMethod::Other`] variant.
///
/// # Examples
///
/// ```
/// use sipline::message::SipMethod;
///
/// let method: SipMethod = "INVITE".parse().unwrap();
/// assert_eq!(method, SipMethod::Invite);
/// assert_eq!(method.to_string(), "INVITE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Subscribe,
    Notify,
    Refer,
    Info,
    Message,
    Prack,
    Update,
    Publish,
    /// An extension method.
    Other(String),
}

impl SipMethod {
    pub fn as_str(&self) -> &str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Options => "OPTIONS",
            SipMethod::Register => "REGISTER",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Refer => "REFER",
            SipMethod::Info => "INFO",
            SipMethod::Message => "MESSAGE",
            SipMethod::Prack => "PRACK",
            SipMethod::Update => "UPDATE",
            SipMethod::Publish => "PUBLISH",
            SipMethod::Other(name) => name,
        }
    }

    /// Whether a request with this method can create a dialog.
    pub fn can_establish_dialog(&self) -> bool {
        matches!(self, SipMethod::Invite | SipMethod::Subscribe | SipMethod::Refer)
    }

    /// ACK and CANCEL never increment the local CSeq.
    pub fn increments_cseq(&self) -> bool {
        !matches!(self, SipMethod::Ack | SipMethod::Cancel)
    }
}

impl From<&[u8]> for SipMethod {
    fn from(src: &[u8]) -> Self {
        match src {
            b"INVITE" => SipMethod::Invite,
            b"ACK" => SipMethod::Ack,
            b"BYE" => SipMethod::Bye,
            b"CANCEL" => SipMethod::Cancel,
            b"OPTIONS" => SipMethod::Options,
            b"REGISTER" => SipMethod::Register,
            b"SUBSCRIBE" => SipMethod::Subscribe,
            b"NOTIFY" => SipMethod::Notify,
            b"REFER" => SipMethod::Refer,
            b"INFO" => SipMethod::Info,
            b"MESSAGE" => SipMethod::Message,
            b"PRACK" => SipMethod::Prack,
            b"UPDATE" => SipMethod::Update,
            b"PUBLISH" => SipMethod::Publish,
            other => SipMethod::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

impl FromStr for SipMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(SipMethod::from(s.as_bytes()))
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for name in ["INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "REGISTER", "REFER"] {
            let method: SipMethod = name.parse().unwrap();
            assert_eq!(method.to_string(), name);
        }
    }

    #[test]
    fn test_extension_method() {
        let method = SipMethod::from(&b"PING"[..]);
        assert_eq!(method, SipMethod::Other("PING".into()));
    }

    #[test]
    fn test_cseq_rules() {
        assert!(!SipMethod::Ack.increments_cseq());
        assert!(!SipMethod::Cancel.increments_cseq());
        assert!(SipMethod::Bye.increments_cseq());
    }
}
