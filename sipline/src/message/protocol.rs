use core::fmt;

/// The transport kind a message travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    #[default]
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl TransportKind {
    /// The token used in Via sent-protocol and `transport=` parameters.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Ws => "WS",
        }
    }

    /// Default port when the URI does not carry one.
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Udp | TransportKind::Tcp => 5060,
            TransportKind::Tls => 5061,
            TransportKind::Ws => 80,
        }
    }

    /// Stream transports do not lose or duplicate messages.
    pub fn is_reliable(&self) -> bool {
        !matches!(self, TransportKind::Udp)
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, TransportKind::Tls)
    }

    /// DNS SRV service label per RFC 3263.
    pub fn srv_service(&self) -> &'static str {
        match self {
            TransportKind::Udp => "_sip._udp",
            TransportKind::Tcp => "_sip._tcp",
            TransportKind::Tls => "_sips._tcp",
            TransportKind::Ws => "_sip._ws",
        }
    }
}

impl From<&[u8]> for TransportKind {
    fn from(src: &[u8]) -> Self {
        if src.eq_ignore_ascii_case(b"TCP") {
            TransportKind::Tcp
        } else if src.eq_ignore_ascii_case(b"TLS") {
            TransportKind::Tls
        } else if src.eq_ignore_ascii_case(b"WS") || src.eq_ignore_ascii_case(b"WSS") {
            TransportKind::Ws
        } else {
            TransportKind::Udp
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(TransportKind::from(&b"tcp"[..]), TransportKind::Tcp);
        assert_eq!(TransportKind::from(&b"TLS"[..]), TransportKind::Tls);
        assert_eq!(TransportKind::from(&b"udp"[..]), TransportKind::Udp);
    }

    #[test]
    fn test_reliability() {
        assert!(!TransportKind::Udp.is_reliable());
        assert!(TransportKind::Tcp.is_reliable());
        assert!(TransportKind::Tls.is_secure());
    }
}
