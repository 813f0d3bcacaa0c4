//! REGISTER client with automatic digest retry.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::headers::{Authorization, Contact, Expires, Header, ProxyAuthorization};
use crate::message::auth::{Challenge, DigestChallenge};
use crate::message::{NameAddr, Request, SipMethod, StatusCode, Uri};
use crate::transaction::key::generate_branch;
use crate::transaction::{ClientTransaction, TsxEvent};
use crate::transport::IncomingResponse;
use crate::ua::UaInner;

/// How a registration attempt resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// 200 with the granted binding lifetime.
    Registered { expires: u32 },
    /// A final non-2xx after any authentication retry.
    Rejected { code: StatusCode, reason: String },
    /// No final response before timer F.
    Timeout,
}

/// Register the agent's identity at `registrar`.
///
/// A 401/407 challenge is answered exactly once from the credential
/// store; the challenge is cached per realm so later refreshes can
/// reuse the nonce.
pub(crate) async fn register(
    ua: &Arc<UaInner>,
    registrar: Uri,
    expires: u32,
) -> Result<RegistrationOutcome> {
    let endpoint = ua.endpoint().clone();

    let mut request = ua.new_request(
        SipMethod::Register,
        registrar.clone(),
        ua.identity.clone(),
    );
    // REGISTER's To is the address of record, not the registrar host.
    set_to_aor(&mut request, &ua.identity);
    request.headers.push(Header::Expires(Expires::new(expires)));

    let mut cseq = 1u32;
    let mut auth_sent = false;

    loop {
        let outgoing = endpoint.prepare_request(request.clone()).await?;
        let (_tsx, mut rx) = ClientTransaction::send(outgoing, &endpoint).await?;

        let final_response = loop {
            match rx.recv().await {
                Some(TsxEvent::Response(response)) if response.code().is_final() => {
                    break Some(response)
                }
                Some(TsxEvent::Response(_)) => continue,
                Some(TsxEvent::Timeout) => break None,
                Some(TsxEvent::Terminated) | None => break None,
            }
        };

        let Some(response) = final_response else {
            return Ok(RegistrationOutcome::Timeout);
        };

        match response.code() {
            StatusCode::Ok => {
                return Ok(RegistrationOutcome::Registered {
                    expires: granted_expires(&response, expires),
                });
            }
            StatusCode::Unauthorized | StatusCode::ProxyAuthenticationRequired
                if !auth_sent =>
            {
                let proxy = response.code() == StatusCode::ProxyAuthenticationRequired;
                let Some(challenge) = extract_challenge(&response, proxy) else {
                    return Ok(rejected(&response));
                };

                let realm = challenge.realm.clone().unwrap_or_default();
                let Some(credential) = ua.find_credential(&realm) else {
                    return Err(Error::AuthenticationFailed(format!(
                        "no credential for realm {realm}"
                    )));
                };

                ua.nonce_cache.store(&challenge);
                let (challenge, nc) = ua
                    .nonce_cache
                    .next_for(&realm)
                    .unwrap_or((challenge, 1));

                let digest = crate::auth::answer_challenge(
                    &challenge,
                    &credential,
                    SipMethod::Register.as_str(),
                    &registrar.to_string(),
                    nc,
                )?;

                // New attempt: fresh branch, next CSeq, credentials on.
                cseq += 1;
                refresh_for_retry(&mut request, cseq);
                let credential = crate::message::auth::Credential::Digest(digest);
                if proxy {
                    request
                        .headers
                        .push(Header::ProxyAuthorization(ProxyAuthorization::new(
                            credential,
                        )));
                } else {
                    request
                        .headers
                        .push(Header::Authorization(Authorization::new(credential)));
                }
                auth_sent = true;
            }
            _ => return Ok(rejected(&response)),
        }
    }
}

fn rejected(response: &IncomingResponse) -> RegistrationOutcome {
    RegistrationOutcome::Rejected {
        code: response.code(),
        reason: response.reason().to_string(),
    }
}

fn set_to_aor(request: &mut Request, aor: &NameAddr) {
    if let Some(to) = request.headers.iter_mut().find_map(|h| match h {
        Header::To(to) => Some(to),
        _ => None,
    }) {
        to.addr = aor.clone();
    }
}

fn refresh_for_retry(request: &mut Request, cseq: u32) {
    for header in request.headers.iter_mut() {
        match header {
            Header::Via(via) => via.set_branch(generate_branch()),
            Header::CSeq(c) => c.seq = cseq,
            _ => {}
        }
    }
}

/// The binding lifetime the registrar granted: the matching Contact's
/// `expires` parameter, else the Expires header, else what was asked.
fn granted_expires(response: &IncomingResponse, requested: u32) -> u32 {
    let from_contact = response
        .response()
        .headers
        .contact()
        .and_then(Contact::expires);

    from_contact
        .or_else(|| {
            response
                .response()
                .headers
                .expires()
                .map(|e| e.seconds())
        })
        .unwrap_or(requested)
}

fn extract_challenge(response: &IncomingResponse, proxy: bool) -> Option<DigestChallenge> {
    let headers = &response.response().headers;
    let challenge = if proxy {
        headers
            .find_map(|h| match h {
                Header::ProxyAuthenticate(auth) => Some(auth),
                _ => None,
            })
            .map(|auth| auth.challenge().clone())
    } else {
        headers
            .find_map(|h| match h {
                Header::WWWAuthenticate(auth) => Some(auth),
                _ => None,
            })
            .map(|auth| auth.challenge().clone())
    };
    match challenge {
        Some(Challenge::Digest(digest)) => Some(digest),
        _ => None,
    }
}
