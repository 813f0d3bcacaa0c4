//! End-to-end signaling over loopback UDP: two user agents place,
//! answer, cancel and tear down calls, and register against a digest
//! challenging registrar.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sipline::auth::{digest_response, AuthCredential};
use sipline::endpoint;
use sipline::headers::{Expires, Header, SipHeaderParse, WWWAuthenticate};
use sipline::message::auth::{Algorithm, Challenge, Credential, DigestChallenge};
use sipline::message::{SipMethod, StatusCode, Uri};
use sipline::transaction::{ClientTransaction, TsxEvent};
use sipline::transport::IncomingRequest;
use sipline::ua::{CallOutcome, NullNegotiator, UaEvent, UserAgent};
use sipline::{Endpoint, Result, SipService};

async fn spawn_agent(name: &str, identity: &str) -> (UserAgent, SocketAddr) {
    let builder = endpoint::Builder::new()
        .with_name(name)
        .with_udp("127.0.0.1:0".parse().unwrap());

    let agent = UserAgent::build(
        builder,
        identity.parse().unwrap(),
        Arc::new(NullNegotiator),
    )
    .await;

    let (_, addr) = agent
        .endpoint()
        .transports()
        .any_local_binding()
        .expect("udp bound");

    tokio::spawn(agent.endpoint().clone().run());
    (agent, addr)
}

fn call_target(user: &str, addr: SocketAddr) -> Uri {
    format!("sip:{user}@{addr}").parse().unwrap()
}

#[test_log::test(tokio::test)]
async fn test_basic_call_setup_and_teardown() {
    let (alice, _alice_addr) = spawn_agent("alice", "sip:alice@example.com").await;
    let (bob, bob_addr) = spawn_agent("bob", "sip:bob@example.com").await;
    let mut bob_events = bob.events().unwrap();

    let handle = alice
        .place_call(call_target("bob", bob_addr))
        .await
        .unwrap();

    // Bob rings, then answers.
    let answerer = tokio::spawn(async move {
        loop {
            match bob_events.recv().await.expect("event stream open") {
                UaEvent::IncomingCall(call) => {
                    call.ring().await.unwrap();
                    call.accept().await.unwrap();
                }
                UaEvent::CallEnded(_) => return,
                _ => {}
            }
        }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("call resolves");
    assert_eq!(outcome, CallOutcome::Established);
    assert!(handle.dialog_id().is_some());

    // Give the ACK a moment to land before tearing down.
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.hangup().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), answerer)
        .await
        .expect("bob sees the BYE")
        .unwrap();

    assert!(alice.endpoint().dialogs().is_empty());
    assert!(bob.endpoint().dialogs().is_empty());
}

#[tokio::test]
async fn test_rejected_call() {
    let (alice, _) = spawn_agent("alice", "sip:alice@example.com").await;
    let (bob, bob_addr) = spawn_agent("bob", "sip:bob@example.com").await;
    let mut bob_events = bob.events().unwrap();

    let handle = alice
        .place_call(call_target("bob", bob_addr))
        .await
        .unwrap();

    tokio::spawn(async move {
        while let Some(event) = bob_events.recv().await {
            if let UaEvent::IncomingCall(call) = event {
                call.reject(StatusCode::BusyHere).await.unwrap();
                break;
            }
        }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("call resolves");
    assert_eq!(
        outcome,
        CallOutcome::Rejected {
            code: StatusCode::BusyHere,
            reason: "Busy Here".to_string()
        }
    );
    assert!(alice.endpoint().dialogs().is_empty());
}

#[tokio::test]
async fn test_cancel_before_answer() {
    let (alice, _) = spawn_agent("alice", "sip:alice@example.com").await;
    let (bob, bob_addr) = spawn_agent("bob", "sip:bob@example.com").await;
    let mut bob_events = bob.events().unwrap();

    let handle = alice
        .place_call(call_target("bob", bob_addr))
        .await
        .unwrap();

    // Bob only rings; Alice gives up.
    let ringer = tokio::spawn(async move {
        let mut rang = false;
        while let Some(event) = bob_events.recv().await {
            match event {
                UaEvent::IncomingCall(call) => {
                    call.ring().await.unwrap();
                    rang = true;
                }
                UaEvent::CallEnded(_) => return rang,
                _ => {}
            }
        }
        rang
    });

    // Wait for the early dialog before cancelling.
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.hangup().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("call resolves");
    assert_eq!(outcome, CallOutcome::Cancelled);

    let rang = tokio::time::timeout(Duration::from_secs(5), ringer)
        .await
        .expect("bob sees the cancel")
        .unwrap();
    assert!(rang);
    assert!(bob.endpoint().dialogs().is_empty());
}

#[tokio::test]
async fn test_options_answered_with_allow() {
    let (_bob, bob_addr) = spawn_agent("bob", "sip:bob@example.com").await;
    let (alice, _) = spawn_agent("alice", "sip:alice@example.com").await;

    // A bare OPTIONS through the transaction layer.
    let endpoint = alice.endpoint().clone();
    let target: Uri = call_target("bob", bob_addr);
    let request = {
        // Borrow the UA's request scaffolding through a throwaway call
        // structure: OPTIONS is out-of-dialog.
        let mut request = sipline::message::Request::new(SipMethod::Options, target.clone());
        request.headers.push(Header::Via(sipline::headers::Via::new(
            Default::default(),
            Default::default(),
            sipline::transaction::key::generate_branch(),
        )));
        request.headers.push(Header::From(
            sipline::headers::From::from_value("<sip:alice@example.com>;tag=opt1").unwrap(),
        ));
        request.headers.push(Header::To(
            sipline::headers::To::from_value("<sip:bob@example.com>").unwrap(),
        ));
        request
            .headers
            .push(Header::CallId(sipline::headers::CallId::generate()));
        request.headers.push(Header::CSeq(sipline::headers::CSeq::new(
            1,
            SipMethod::Options,
        )));
        request
            .headers
            .push(Header::MaxForwards(sipline::headers::MaxForwards::new(70)));
        request
    };

    let outgoing = endpoint.prepare_request(request).await.unwrap();
    let (_tsx, mut rx) = ClientTransaction::send(outgoing, &endpoint).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(TsxEvent::Response(response)) if response.code().is_final() => {
                    return response
                }
                Some(_) => continue,
                None => panic!("transaction died"),
            }
        }
    })
    .await
    .expect("final response");

    assert_eq!(response.code(), StatusCode::Ok);
    let allow = response.response().headers.find_map(|h| match h {
        Header::Allow(allow) => Some(allow),
        _ => None,
    });
    assert!(allow.unwrap().allows(&SipMethod::Invite));
}

/// A one-realm digest registrar, enough to drive the 401 retry path.
struct TestRegistrar {
    realm: &'static str,
    nonce: &'static str,
    password: &'static str,
}

#[async_trait::async_trait]
impl SipService for TestRegistrar {
    fn name(&self) -> &str {
        "test-registrar"
    }

    async fn on_request(
        &self,
        endpoint: &Endpoint,
        request: &mut Option<IncomingRequest>,
    ) -> Result<()> {
        let Some(req) = request.as_ref() else {
            return Ok(());
        };
        if !matches!(req.method(), SipMethod::Register) {
            return Ok(());
        }
        let mut req = request.take().unwrap();

        let verified = req.request().headers.find_map(|h| match h {
            Header::Authorization(auth) => Some(auth),
            _ => None,
        });
        let verified = match verified.map(|a| a.credential()) {
            Some(Credential::Digest(digest)) => {
                let nc = digest
                    .nc
                    .as_deref()
                    .and_then(|nc| u32::from_str_radix(nc, 16).ok())
                    .unwrap_or(1);
                let expected = digest_response(
                    digest.algorithm.unwrap_or_default(),
                    digest.username.as_deref().unwrap_or(""),
                    self.realm,
                    self.password,
                    "REGISTER",
                    digest.uri.as_deref().unwrap_or(""),
                    self.nonce,
                    digest.qop.as_deref(),
                    digest.cnonce.as_deref().unwrap_or(""),
                    nc,
                );
                digest.response.as_deref() == Some(expected.as_str())
            }
            _ => false,
        };

        let tsx = endpoint.new_server_tsx(&mut req);
        if verified {
            let mut response = endpoint.new_response(&req, StatusCode::Ok, None);
            response
                .headers_mut()
                .push(Header::Expires(Expires::new(3600)));
            tsx.respond(&mut response).await
        } else {
            let mut response = endpoint.new_response(&req, StatusCode::Unauthorized, None);
            response
                .headers_mut()
                .push(Header::WWWAuthenticate(WWWAuthenticate::new(
                    Challenge::Digest(DigestChallenge {
                        realm: Some(self.realm.to_string()),
                        nonce: Some(self.nonce.to_string()),
                        qop: Some("auth".to_string()),
                        algorithm: Some(Algorithm::Md5),
                        ..Default::default()
                    }),
                )));
            tsx.respond(&mut response).await
        }
    }
}

#[tokio::test]
async fn test_register_with_digest_retry() {
    let registrar_endpoint = endpoint::Builder::new()
        .with_name("registrar")
        .with_udp("127.0.0.1:0".parse().unwrap())
        .with_service(TestRegistrar {
            realm: "example.com",
            nonce: "abc",
            password: "zanzibar",
        })
        .build()
        .await;
    let (_, registrar_addr) = registrar_endpoint
        .transports()
        .any_local_binding()
        .unwrap();
    tokio::spawn(registrar_endpoint.run());

    let (alice, _) = spawn_agent("alice", "sip:alice@example.com").await;
    alice.add_credential(AuthCredential::new("alice", "zanzibar").for_realm("example.com"));

    let registrar: Uri = format!("sip:{registrar_addr}").parse().unwrap();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        alice.register(registrar, 600),
    )
    .await
    .expect("registration resolves")
    .unwrap();

    assert_eq!(
        outcome,
        sipline::ua::RegistrationOutcome::Registered { expires: 3600 }
    );
}

#[tokio::test]
async fn test_register_without_credential_fails() {
    let registrar_endpoint = endpoint::Builder::new()
        .with_name("registrar")
        .with_udp("127.0.0.1:0".parse().unwrap())
        .with_service(TestRegistrar {
            realm: "example.com",
            nonce: "abc",
            password: "zanzibar",
        })
        .build()
        .await;
    let (_, registrar_addr) = registrar_endpoint
        .transports()
        .any_local_binding()
        .unwrap();
    tokio::spawn(registrar_endpoint.run());

    let (alice, _) = spawn_agent("alice", "sip:alice@example.com").await;

    let registrar: Uri = format!("sip:{registrar_addr}").parse().unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        alice.register(registrar, 600),
    )
    .await
    .expect("registration resolves");

    assert!(result.is_err());
}

/// A negotiator whose offer exceeds the datagram threshold, forcing the
/// UDP→TCP fallback with a regenerated branch.
struct LargeOffer;

#[async_trait::async_trait]
impl sipline::ua::SdpNegotiator for LargeOffer {
    async fn local_offer(&self, _hold: bool) -> bytes::Bytes {
        let mut body = String::from("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n");
        for i in 0..60 {
            body.push_str(&format!(
                "a=candidate:{i} 1 udp 2130706431 198.51.100.{} 49152 typ host\r\n",
                i + 1
            ));
        }
        bytes::Bytes::from(body)
    }

    async fn local_answer(&self, _remote_offer: bytes::Bytes) -> bytes::Bytes {
        bytes::Bytes::from_static(b"v=0\r\n")
    }
}

#[tokio::test]
async fn test_large_invite_falls_back_to_tcp() {
    // Bob listens on TCP only; Alice carries both kinds.
    let bob_builder = endpoint::Builder::new()
        .with_name("bob")
        .with_tcp("127.0.0.1:0".parse().unwrap());
    let bob = UserAgent::build(
        bob_builder,
        "sip:bob@example.com".parse().unwrap(),
        Arc::new(LargeOffer),
    )
    .await;
    let (_, bob_addr) = bob.endpoint().transports().any_local_binding().unwrap();
    tokio::spawn(bob.endpoint().clone().run());
    let mut bob_events = bob.events().unwrap();

    let alice_builder = endpoint::Builder::new()
        .with_name("alice")
        .with_udp("127.0.0.1:0".parse().unwrap())
        .with_tcp("127.0.0.1:0".parse().unwrap());
    let alice = UserAgent::build(
        alice_builder,
        "sip:alice@example.com".parse().unwrap(),
        Arc::new(LargeOffer),
    )
    .await;
    tokio::spawn(alice.endpoint().clone().run());

    // The target names no transport: resolution starts at UDP, the
    // size check rejects it, and the retry goes out reliable.
    let handle = alice
        .place_call(call_target("bob", bob_addr))
        .await
        .unwrap();

    tokio::spawn(async move {
        while let Some(event) = bob_events.recv().await {
            if let UaEvent::IncomingCall(call) = event {
                call.accept().await.unwrap();
                break;
            }
        }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("call resolves");
    assert_eq!(outcome, CallOutcome::Established);

    handle.hangup().await.unwrap();
}
