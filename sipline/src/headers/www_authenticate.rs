use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::auth::Challenge;
use crate::parser::Parser;

/// The `WWW-Authenticate` header carried by 401 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WWWAuthenticate(pub Challenge);

impl WWWAuthenticate {
    pub fn new(challenge: Challenge) -> Self {
        WWWAuthenticate(challenge)
    }

    pub fn challenge(&self) -> &Challenge {
        &self.0
    }
}

impl fmt::Display for WWWAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", WWWAuthenticate::NAME, self.0)
    }
}

impl SipHeaderParse for WWWAuthenticate {
    const NAME: &'static str = "WWW-Authenticate";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(WWWAuthenticate(parser.parse_challenge()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::auth::{Algorithm, Challenge};

    #[test]
    fn test_parse_digest_challenge() {
        let www = WWWAuthenticate::from_value(
            "Digest realm=\"atlanta.example.com\", qop=\"auth\", \
             nonce=\"f84f1cec41e6cbe5aea9c8e88d359\", \
             opaque=\"\", stale=FALSE, algorithm=MD5",
        )
        .unwrap();

        let Challenge::Digest(digest) = www.challenge() else {
            panic!("expected digest challenge");
        };
        assert_eq!(digest.realm.as_deref(), Some("atlanta.example.com"));
        assert_eq!(digest.algorithm, Some(Algorithm::Md5));
        assert_eq!(digest.stale, Some(false));
        assert_eq!(digest.qop.as_deref(), Some("auth"));
    }
}
