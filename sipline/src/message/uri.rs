use core::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Error, ParseError, ParseErrorKind};
use crate::message::{Params, TransportKind};
use crate::parser::Parser;

/// The scheme of a SIP URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Scheme {
    #[default]
    Sip,
    Sips,
    Tel,
    /// A scheme this stack does not route; requests carrying one are
    /// answered 416.
    Other(String),
}

impl Scheme {
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
            Scheme::Tel => "tel",
            Scheme::Other(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Scheme::Other(_))
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host: domain name, IPv4 or IPv6 address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    DomainName(String),
    IpAddr(IpAddr),
}

impl Host {
    pub fn as_string(&self) -> String {
        match self {
            Host::DomainName(name) => name.clone(),
            Host::IpAddr(ip) => ip.to_string(),
        }
    }

    /// Case-insensitive comparison for domain names.
    pub fn matches(&self, other: &Host) -> bool {
        match (self, other) {
            (Host::DomainName(a), Host::DomainName(b)) => a.eq_ignore_ascii_case(b),
            (Host::IpAddr(a), Host::IpAddr(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for Host {
    fn default() -> Self {
        Host::DomainName(String::new())
    }
}

impl FromStr for Host {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.parse::<IpAddr>() {
            Ok(ip) => Ok(Host::IpAddr(ip)),
            Err(_) => Ok(Host::DomainName(s.to_string())),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::DomainName(name) => f.write_str(name),
            // IPv6 references go in brackets on the wire.
            Host::IpAddr(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Host::IpAddr(ip) => write!(f, "{ip}"),
        }
    }
}

/// Host plus optional port, as found in URIs and Via sent-by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn new(host: Host, port: Option<u16>) -> Self {
        HostPort { host, port }
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

impl From<std::net::SocketAddr> for HostPort {
    fn from(addr: std::net::SocketAddr) -> Self {
        HostPort {
            host: Host::IpAddr(addr.ip()),
            port: Some(addr.port()),
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// The user-info part of a URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UriUser {
    pub user: String,
    pub password: Option<String>,
}

impl fmt::Display for UriUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)?;
        if let Some(password) = &self.password {
            write!(f, ":{password}")?;
        }
        Ok(())
    }
}

/// A SIP URI.
///
/// The parameters with defined semantics (`transport`, `user`, `method`,
/// `ttl`, `maddr`, `lr`) are broken out; anything else lands in `params`.
///
/// # Examples
///
/// ```
/// use sipline::message::Uri;
///
/// let uri: Uri = "sip:alice@atlanta.com;transport=tcp".parse().unwrap();
/// assert_eq!(uri.user.as_ref().unwrap().user, "alice");
/// assert!(uri.transport_param.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<UriUser>,
    pub host_port: HostPort,
    pub transport_param: Option<TransportKind>,
    pub user_param: Option<String>,
    pub method_param: Option<String>,
    pub ttl_param: Option<u8>,
    pub maddr_param: Option<Host>,
    pub lr_param: bool,
    pub params: Params,
    pub headers: Params,
}

impl Uri {
    pub fn new(scheme: Scheme, host_port: HostPort) -> Self {
        Uri {
            scheme,
            host_port,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(UriUser {
            user: user.to_string(),
            password: None,
        });
        self
    }

    /// Parse from a string literal.
    pub fn from_static(src: &'static str) -> crate::Result<Self> {
        let mut parser = Parser::new(src.as_bytes());
        parser.parse_uri(true)
    }

    /// Whether this URI requires a secure transport.
    pub fn is_sips(&self) -> bool {
        self.scheme == Scheme::Sips
    }

    /// The port to contact when none is given, derived from the scheme.
    pub fn default_port(&self) -> u16 {
        if self.is_sips() {
            5061
        } else {
            5060
        }
    }

    /// URI equivalence per RFC 3261 section 19.1.4.
    ///
    /// Scheme and user are case-sensitive where the RFC says so, host is
    /// not; the special parameters must agree when either side carries
    /// one, other parameters only when both do; URI headers always.
    pub fn equivalent(&self, other: &Uri) -> bool {
        if self.scheme != other.scheme {
            return false;
        }
        match (&self.user, &other.user) {
            (Some(a), Some(b)) => {
                if a.user != b.user || a.password != b.password {
                    return false;
                }
            }
            (None, None) => {}
            _ => return false,
        }
        if !self.host_port.host.matches(&other.host_port.host) {
            return false;
        }
        if self.host_port.port != other.host_port.port {
            return false;
        }
        if self.transport_param != other.transport_param
            || self.user_param != other.user_param
            || self.method_param != other.method_param
            || self.ttl_param != other.ttl_param
        {
            return false;
        }
        match (&self.maddr_param, &other.maddr_param) {
            (Some(a), Some(b)) if !a.matches(b) => return false,
            (Some(_), None) | (None, Some(_)) => return false,
            _ => {}
        }
        // Generic params: compare only those present on both sides.
        for param in self.params.iter() {
            if let Some(other_value) = other.params.get(&param.name) {
                if param.value.as_deref() != Some(other_value) {
                    return false;
                }
            }
        }
        // URI headers are never ignored.
        if self.headers.len() != other.headers.len() {
            return false;
        }
        for header in self.headers.iter() {
            match other
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(&header.name))
            {
                Some(found) if found.value == header.value => {}
                _ => return false,
            }
        }
        true
    }
}

impl FromStr for Uri {
    type Err = ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parser = Parser::new(s.as_bytes());
        parser.parse_uri(true).map_err(|err| match err {
            Error::Parse(parse) => parse,
            other => ParseError::new(ParseErrorKind::UriSyntax, other.to_string()),
        })
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host_port)?;
        if let Some(transport) = &self.transport_param {
            write!(f, ";transport={}", transport.as_str().to_ascii_lowercase())?;
        }
        if let Some(user) = &self.user_param {
            write!(f, ";user={user}")?;
        }
        if let Some(method) = &self.method_param {
            write!(f, ";method={method}")?;
        }
        if let Some(ttl) = &self.ttl_param {
            write!(f, ";ttl={ttl}")?;
        }
        if let Some(maddr) = &self.maddr_param {
            write!(f, ";maddr={maddr}")?;
        }
        if self.lr_param {
            write!(f, ";lr")?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        if !self.headers.is_empty() {
            let mut first = true;
            for header in self.headers.iter() {
                write!(f, "{}{}", if first { "?" } else { "&" }, header.name)?;
                if let Some(value) = &header.value {
                    write!(f, "={value}")?;
                }
                first = false;
            }
        }
        Ok(())
    }
}

/// `display-name <uri>` as it appears in From, To, Contact, Route and
/// Record-Route headers. A bare URI parses into one with no display name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameAddr {
    pub display: Option<String>,
    pub uri: Uri,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        NameAddr { display: None, uri }
    }

    pub fn with_display(display: &str, uri: Uri) -> Self {
        NameAddr {
            display: Some(display.to_string()),
            uri,
        }
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(display) = &self.display {
            // Quote when the name carries anything beyond token chars.
            let needs_quotes = display
                .bytes()
                .any(|b| !(b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'+')));
            if needs_quotes {
                write!(f, "\"{display}\" ")?;
            } else {
                write!(f, "{display} ")?;
            }
        }
        write!(f, "<{}>", self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrip() {
        let uri: Uri = "sips:alice@atlanta.com:5061".parse().unwrap();
        assert_eq!(uri.to_string(), "sips:alice@atlanta.com:5061");
    }

    #[test]
    fn test_ipv6_reference() {
        let uri: Uri = "sip:[2001:db8::10]:5070".parse().unwrap();
        assert_eq!(
            uri.host_port.host,
            Host::IpAddr("2001:db8::10".parse().unwrap())
        );
        assert_eq!(uri.to_string(), "sip:[2001:db8::10]:5070");
    }

    #[test]
    fn test_equivalence_host_case() {
        let a: Uri = "sip:alice@AtLanTa.CoM;Transport=udp".parse().unwrap();
        let b: Uri = "sip:alice@atlanta.com;transport=UDP".parse().unwrap();
        assert!(a.equivalent(&b));
    }

    #[test]
    fn test_equivalence_user_case_sensitive() {
        let a: Uri = "sip:alice@atlanta.com".parse().unwrap();
        let b: Uri = "sip:ALICE@atlanta.com".parse().unwrap();
        assert!(!a.equivalent(&b));
    }

    #[test]
    fn test_equivalence_special_param_one_sided() {
        let a: Uri = "sip:carol@chicago.com".parse().unwrap();
        let b: Uri = "sip:carol@chicago.com;transport=tcp".parse().unwrap();
        assert!(!a.equivalent(&b));
    }

    #[test]
    fn test_equivalence_generic_param_ignored_when_one_sided() {
        let a: Uri = "sip:carol@chicago.com;newparam=5".parse().unwrap();
        let b: Uri = "sip:carol@chicago.com".parse().unwrap();
        assert!(a.equivalent(&b));
    }

    #[test]
    fn test_name_addr_display_quoting() {
        let uri: Uri = "sip:bob@biloxi.com".parse().unwrap();
        let addr = NameAddr::with_display("Bob", uri.clone());
        assert_eq!(addr.to_string(), "Bob <sip:bob@biloxi.com>");

        let addr = NameAddr::with_display("Bob Smith", uri);
        assert_eq!(addr.to_string(), "\"Bob Smith\" <sip:bob@biloxi.com>");
    }
}
