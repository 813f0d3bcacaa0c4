use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::auth::Credential;
use crate::parser::Parser;

/// The `Authorization` header: credentials answering a 401 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization(pub Credential);

impl Authorization {
    pub fn new(credential: Credential) -> Self {
        Authorization(credential)
    }

    pub fn credential(&self) -> &Credential {
        &self.0
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Authorization::NAME, self.0)
    }
}

impl SipHeaderParse for Authorization {
    const NAME: &'static str = "Authorization";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(Authorization(parser.parse_credential()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::auth::Credential;

    #[test]
    fn test_parse_digest() {
        let auth = Authorization::from_value(
            "Digest username=\"bob\", realm=\"biloxi.example.com\", \
             nonce=\"ea9c8e88df84f1cec4341ae6cbe5a359\", opaque=\"\", \
             uri=\"sips:ss2.biloxi.example.com\", \
             response=\"dfe56131d1958046689d83306477ecc4\"",
        )
        .unwrap();

        let Credential::Digest(digest) = auth.credential() else {
            panic!("expected digest credential");
        };
        assert_eq!(digest.username.as_deref(), Some("bob"));
        assert_eq!(digest.realm.as_deref(), Some("biloxi.example.com"));
        assert_eq!(
            digest.response.as_deref(),
            Some("dfe56131d1958046689d83306477ecc4")
        );
    }
}
