//! Digest access authentication (RFC 7616, MD5 and SHA-256).
//!
//! A 401/407 challenge is answered once per request; nonces are cached
//! per realm so re-registrations and in-dialog requests can preemptively
//! authenticate without a fresh challenge round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::message::auth::{Algorithm, DigestChallenge, DigestCredential};

/// What a user proves possession of.
#[derive(Debug, Clone)]
pub struct AuthCredential {
    pub username: String,
    pub password: String,
    /// Restricts this credential to one realm; `None` answers any.
    pub realm: Option<String>,
}

impl AuthCredential {
    pub fn new(username: &str, password: &str) -> Self {
        AuthCredential {
            username: username.to_string(),
            password: password.to_string(),
            realm: None,
        }
    }

    pub fn for_realm(mut self, realm: &str) -> Self {
        self.realm = Some(realm.to_string());
        self
    }
}

fn hash(algorithm: Algorithm, input: &str) -> String {
    match algorithm {
        Algorithm::Md5 => format!("{:x}", md5::compute(input.as_bytes())),
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            format!("{:x}", hasher.finalize())
        }
    }
}

/// The digest response value for one request.
///
/// With a qop the RFC 7616 shape applies; without one the original RFC
/// 2069 shape is used.
#[allow(clippy::too_many_arguments)]
pub fn digest_response(
    algorithm: Algorithm,
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
    qop: Option<&str>,
    cnonce: &str,
    nc: u32,
) -> String {
    let ha1 = hash(algorithm, &format!("{username}:{realm}:{password}"));
    let ha2 = hash(algorithm, &format!("{method}:{uri}"));

    match qop {
        Some(qop) => hash(
            algorithm,
            &format!("{ha1}:{nonce}:{nc:08x}:{cnonce}:{qop}:{ha2}"),
        ),
        None => hash(algorithm, &format!("{ha1}:{nonce}:{ha2}")),
    }
}

/// Answer a challenge with a full credential header value.
pub fn answer_challenge(
    challenge: &DigestChallenge,
    credential: &AuthCredential,
    method: &str,
    uri: &str,
    nc: u32,
) -> Result<DigestCredential> {
    let realm = challenge
        .realm
        .as_deref()
        .ok_or(Error::AuthenticationFailed("challenge without realm".into()))?;
    let nonce = challenge
        .nonce
        .as_deref()
        .ok_or(Error::AuthenticationFailed("challenge without nonce".into()))?;

    if let Some(bound) = &credential.realm {
        if !bound.eq_ignore_ascii_case(realm) {
            return Err(Error::AuthenticationFailed(format!(
                "no credential for realm {realm}"
            )));
        }
    }

    let algorithm = challenge.algorithm.unwrap_or_default();
    // qop lists are offered comma separated; plain "auth" is what this
    // stack speaks.
    let qop = challenge.qop.as_deref().and_then(|offered| {
        offered
            .split(',')
            .map(str::trim)
            .find(|q| q.eq_ignore_ascii_case("auth"))
    });
    let cnonce = crate::random_token(16);

    let response = digest_response(
        algorithm,
        &credential.username,
        realm,
        &credential.password,
        method,
        uri,
        nonce,
        qop,
        &cnonce,
        nc,
    );

    Ok(DigestCredential {
        username: Some(credential.username.clone()),
        realm: Some(realm.to_string()),
        nonce: Some(nonce.to_string()),
        uri: Some(uri.to_string()),
        response: Some(response),
        algorithm: Some(algorithm),
        cnonce: qop.map(|_| cnonce),
        opaque: challenge.opaque.clone(),
        qop: qop.map(str::to_string),
        nc: qop.map(|_| format!("{nc:08x}")),
    })
}

struct CachedChallenge {
    challenge: DigestChallenge,
    nc: AtomicU32,
}

/// Challenges remembered per realm for the lifetime of a registration.
#[derive(Default)]
pub struct NonceCache {
    realms: Mutex<HashMap<String, CachedChallenge>>,
}

impl NonceCache {
    /// Remember a challenge, resetting the nonce count.
    pub fn store(&self, challenge: &DigestChallenge) {
        let Some(realm) = challenge.realm.clone() else {
            return;
        };
        self.realms.lock().expect("Lock failed").insert(
            realm,
            CachedChallenge {
                challenge: challenge.clone(),
                nc: AtomicU32::new(0),
            },
        );
    }

    /// The cached challenge for a realm plus the next nonce count.
    pub fn next_for(&self, realm: &str) -> Option<(DigestChallenge, u32)> {
        let realms = self.realms.lock().expect("Lock failed");
        let cached = realms.get(realm)?;
        let nc = cached.nc.fetch_add(1, Ordering::SeqCst) + 1;
        Some((cached.challenge.clone(), nc))
    }

    pub fn forget(&self, realm: &str) {
        self.realms.lock().expect("Lock failed").remove(realm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The worked example of RFC 2617 section 3.5.
    #[test]
    fn test_md5_with_qop_vector() {
        let response = digest_response(
            Algorithm::Md5,
            "Mufasa",
            "testrealm@host.com",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            Some("auth"),
            "0a4f113b",
            1,
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_rfc2069_shape_without_qop() {
        let with_qop = digest_response(
            Algorithm::Md5,
            "bob",
            "biloxi.example.com",
            "zanzibar",
            "REGISTER",
            "sip:ss2.biloxi.example.com",
            "ea9c8e88df84f1cec4341ae6cbe5a359",
            Some("auth"),
            "cn",
            1,
        );
        let without_qop = digest_response(
            Algorithm::Md5,
            "bob",
            "biloxi.example.com",
            "zanzibar",
            "REGISTER",
            "sip:ss2.biloxi.example.com",
            "ea9c8e88df84f1cec4341ae6cbe5a359",
            None,
            "cn",
            1,
        );
        assert_ne!(with_qop, without_qop);
    }

    #[test]
    fn test_sha256_differs_from_md5() {
        let md5 = digest_response(
            Algorithm::Md5,
            "alice", "example.com", "pw", "INVITE", "sip:bob@example.com", "abc", None, "", 1,
        );
        let sha = digest_response(
            Algorithm::Sha256,
            "alice", "example.com", "pw", "INVITE", "sip:bob@example.com", "abc", None, "", 1,
        );
        assert_ne!(md5, sha);
        assert_eq!(sha.len(), 64);
    }

    #[test]
    fn test_answer_challenge_fills_fields() {
        let challenge = DigestChallenge {
            realm: Some("example.com".into()),
            nonce: Some("abc".into()),
            qop: Some("auth".into()),
            algorithm: Some(Algorithm::Md5),
            ..Default::default()
        };
        let credential = AuthCredential::new("alice", "secret");

        let answer =
            answer_challenge(&challenge, &credential, "REGISTER", "sip:example.com", 1).unwrap();

        assert_eq!(answer.username.as_deref(), Some("alice"));
        assert_eq!(answer.nc.as_deref(), Some("00000001"));
        assert!(answer.cnonce.is_some());
        assert!(answer.response.is_some());
    }

    #[test]
    fn test_realm_bound_credential_rejects_other_realm() {
        let challenge = DigestChallenge {
            realm: Some("other.com".into()),
            nonce: Some("abc".into()),
            ..Default::default()
        };
        let credential = AuthCredential::new("alice", "secret").for_realm("example.com");

        assert!(answer_challenge(&challenge, &credential, "REGISTER", "sip:x", 1).is_err());
    }

    #[test]
    fn test_nonce_cache_counts_up() {
        let cache = NonceCache::default();
        let challenge = DigestChallenge {
            realm: Some("example.com".into()),
            nonce: Some("abc".into()),
            ..Default::default()
        };
        cache.store(&challenge);

        let (_, first) = cache.next_for("example.com").unwrap();
        let (_, second) = cache.next_for("example.com").unwrap();
        assert_eq!((first, second), (1, 2));

        cache.forget("example.com");
        assert!(cache.next_for("example.com").is_none());
    }
}
