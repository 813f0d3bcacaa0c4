//! Digest authentication value types shared by the `Authorization`,
//! `WWW-Authenticate`, `Proxy-Authenticate` and `Proxy-Authorization`
//! headers.

use core::fmt;

/// Hash algorithm negotiated in a digest challenge (RFC 7616).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Md5,
    Sha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha256 => "SHA-256",
        }
    }

    pub fn parse(src: &str) -> Option<Self> {
        if src.eq_ignore_ascii_case("MD5") {
            Some(Algorithm::Md5)
        } else if src.eq_ignore_ascii_case("SHA-256") {
            Some(Algorithm::Sha256)
        } else {
            None
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The challenge carried by a 401/407 response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestChallenge {
    pub realm: Option<String>,
    pub domain: Option<String>,
    pub nonce: Option<String>,
    pub opaque: Option<String>,
    pub stale: Option<bool>,
    pub algorithm: Option<Algorithm>,
    pub qop: Option<String>,
}

impl fmt::Display for DigestChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Digest")?;
        let mut sep = " ";
        if let Some(realm) = &self.realm {
            write!(f, "{sep}realm=\"{realm}\"")?;
            sep = ", ";
        }
        if let Some(domain) = &self.domain {
            write!(f, "{sep}domain=\"{domain}\"")?;
            sep = ", ";
        }
        if let Some(nonce) = &self.nonce {
            write!(f, "{sep}nonce=\"{nonce}\"")?;
            sep = ", ";
        }
        if let Some(opaque) = &self.opaque {
            write!(f, "{sep}opaque=\"{opaque}\"")?;
            sep = ", ";
        }
        if let Some(stale) = &self.stale {
            write!(f, "{sep}stale={}", if *stale { "true" } else { "false" })?;
            sep = ", ";
        }
        if let Some(algorithm) = &self.algorithm {
            write!(f, "{sep}algorithm={algorithm}")?;
            sep = ", ";
        }
        if let Some(qop) = &self.qop {
            write!(f, "{sep}qop=\"{qop}\"")?;
        }
        Ok(())
    }
}

/// A challenge, digest or otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Digest(DigestChallenge),
    Other { scheme: String, data: String },
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Challenge::Digest(digest) => write!(f, "{digest}"),
            Challenge::Other { scheme, data } => write!(f, "{scheme} {data}"),
        }
    }
}

/// The credential carried by an Authorization/Proxy-Authorization header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestCredential {
    pub username: Option<String>,
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub uri: Option<String>,
    pub response: Option<String>,
    pub algorithm: Option<Algorithm>,
    pub cnonce: Option<String>,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub nc: Option<String>,
}

impl fmt::Display for DigestCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Digest")?;
        let mut sep = " ";
        if let Some(username) = &self.username {
            write!(f, "{sep}username=\"{username}\"")?;
            sep = ", ";
        }
        if let Some(realm) = &self.realm {
            write!(f, "{sep}realm=\"{realm}\"")?;
            sep = ", ";
        }
        if let Some(nonce) = &self.nonce {
            write!(f, "{sep}nonce=\"{nonce}\"")?;
            sep = ", ";
        }
        if let Some(uri) = &self.uri {
            write!(f, "{sep}uri=\"{uri}\"")?;
            sep = ", ";
        }
        if let Some(response) = &self.response {
            write!(f, "{sep}response=\"{response}\"")?;
            sep = ", ";
        }
        if let Some(algorithm) = &self.algorithm {
            write!(f, "{sep}algorithm={algorithm}")?;
            sep = ", ";
        }
        if let Some(cnonce) = &self.cnonce {
            write!(f, "{sep}cnonce=\"{cnonce}\"")?;
            sep = ", ";
        }
        if let Some(opaque) = &self.opaque {
            write!(f, "{sep}opaque=\"{opaque}\"")?;
            sep = ", ";
        }
        if let Some(qop) = &self.qop {
            write!(f, "{sep}qop={qop}")?;
            sep = ", ";
        }
        if let Some(nc) = &self.nc {
            write!(f, "{sep}nc={nc}")?;
        }
        Ok(())
    }
}

/// A credential, digest or otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Digest(DigestCredential),
    Other { scheme: String, data: String },
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Digest(digest) => write!(f, "{digest}"),
            Credential::Other { scheme, data } => write!(f, "{scheme} {data}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_display() {
        let challenge = DigestChallenge {
            realm: Some("atlanta.example.com".into()),
            nonce: Some("f84f1cec41e6cbe5aea9c8e88d359".into()),
            algorithm: Some(Algorithm::Md5),
            qop: Some("auth".into()),
            ..Default::default()
        };
        assert_eq!(
            challenge.to_string(),
            "Digest realm=\"atlanta.example.com\", \
             nonce=\"f84f1cec41e6cbe5aea9c8e88d359\", algorithm=MD5, qop=\"auth\""
        );
    }
}
