//! # sipline
//!
//! A SIP signaling stack: message codec, multi-channel transport,
//! RFC 3261 transactions, dialogs and a user agent.
//!
//! The layers stack the way the RFC draws them: bytes move through the
//! [`transport`] module, the [`parser`] turns them into [`message`]
//! values, the [`transaction`] engine gives each exchange its
//! retransmission and timeout behavior, the [`dialog`] layer tracks
//! call state, and [`ua`] exposes call primitives on top.

pub mod auth;
pub mod config;
pub mod dialog;
pub mod endpoint;
pub mod headers;
pub mod message;
pub mod parser;
pub mod resolver;
pub mod service;
pub mod transaction;
pub mod transport;
pub mod ua;

pub(crate) mod error;

pub use endpoint::Endpoint;
pub use error::{Error, ParseError, ParseErrorKind, Result};
pub use service::SipService;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

use std::net::SocketAddr;

use rand::distr::Alphanumeric;
use rand::Rng;

/// A printable name for a local binding, preferring a routable
/// interface address over wildcard binds.
pub(crate) fn local_binding_name(addr: &SocketAddr) -> String {
    let ip = if addr.ip().is_unspecified() {
        local_ip_address::local_ip().unwrap_or(addr.ip())
    } else {
        addr.ip()
    };
    format!("{}:{}", ip, addr.port())
}

/// A short random alphanumeric token, for tags and cnonces.
pub(crate) fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_length_and_uniqueness() {
        let a = random_token(10);
        let b = random_token(10);
        assert_eq!(a.len(), 10);
        assert_ne!(a, b);
    }
}
