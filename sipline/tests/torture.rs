//! Parser robustness against the RFC 4475 style torture set: the
//! well-formed-but-strange messages must parse, the broken ones must
//! fail with a specific error kind, and nothing may panic.

use sipline::headers::Header;
use sipline::message::{SipMethod, TransportKind};
use sipline::parser::Parser;
use sipline::{Error, ParseErrorKind};

fn parse(buf: &[u8]) -> Result<sipline::message::SipMsg, Error> {
    Parser::new(buf).parse_message()
}

fn parse_err_kind(buf: &[u8]) -> ParseErrorKind {
    match parse(buf) {
        Err(Error::Parse(err)) => err.kind,
        Err(other) => panic!("expected parse error, got {other}"),
        Ok(_) => panic!("expected rejection"),
    }
}

#[test]
fn test_torture_lws_and_folding() {
    // LWS around the colon, folded continuation lines, odd spacing.
    let buf = b"INVITE sip:vivekg@chair-dnrc.example.com;unknownparam SIP/2.0\r\n\
        TO :\r\n sip:vivekg@chair-dnrc.example.com ;   tag    = 1918181833n\r\n\
        from   : \"J Rosenberg \\\"\" <sip:jdrosen@example.com>;tag=98asjd8\r\n\
        MaX-fOrWaRdS: 68\r\n\
        Call-ID: wsinv.ndaksdj@192.0.2.1\r\n\
        CSeq: 8 INVITE\r\n\
        Via: SIP/2.0/UDP 192.0.2.2;branch=390skdjuw\r\n\
        Content-Length: 0\r\n\r\n";

    let msg = parse(buf).expect("tortured but valid");
    let request = msg.request().unwrap();

    assert_eq!(request.method(), &SipMethod::Invite);
    assert_eq!(request.headers.to().unwrap().tag(), Some("1918181833n"));
    assert_eq!(
        request.headers.from().unwrap().addr.display.as_deref(),
        Some("J Rosenberg \"")
    );
    assert_eq!(request.headers.max_forwards().unwrap().hops(), 68);
    // The branch predates the magic cookie; legacy matching applies.
    assert_eq!(request.headers.via().unwrap().branch(), Some("390skdjuw"));
}

#[test]
fn test_torture_exotic_method_token() {
    let buf = b"!interesting-Method0!*+`.%indeed'~ sip:1_unusual.URI@example.com SIP/2.0\r\n\
        Via: SIP/2.0/TCP host1.example.com;branch=z9hG4bK-.!%66*_+`'~\r\n\
        From: <sip:mundane@example.com>;tag=kkaz-\r\n\
        To: <sip:1_unusual.URI@example.com>\r\n\
        Call-ID: intmeth.word%ZK-!.*_+'@word`~)(><:\\/\"][?}{\r\n\
        CSeq: 139122385 !interesting-Method0!*+`.%indeed'~\r\n\
        Max-Forwards: 255\r\n\
        Content-Length: 0\r\n\r\n";

    let msg = parse(buf).expect("extension method is valid");
    let request = msg.request().unwrap();

    assert!(matches!(request.method(), SipMethod::Other(_)));
    assert_eq!(request.headers.cseq().unwrap().method(), request.method());
}

#[test]
fn test_torture_escaped_nulls_in_userinfo() {
    let buf = b"REGISTER sip:example.com SIP/2.0\r\n\
        To: sip:null-%00-null@example.com\r\n\
        From: sip:null-%00-null@example.com;tag=839923423\r\n\
        Max-Forwards: 70\r\n\
        Call-ID: escnull.39203ndfvkjdasfkq3w4otrq0adsfdfnavd\r\n\
        Via: SIP/2.0/UDP 192.0.2.105;branch=z9hG4bKkdjuw\r\n\
        CSeq: 14398234 REGISTER\r\n\
        Content-Length: 0\r\n\r\n";

    let msg = parse(buf).expect("escaped userinfo is valid");
    let user = msg
        .request()
        .unwrap()
        .headers
        .to()
        .unwrap()
        .uri()
        .user
        .clone()
        .unwrap();
    assert_eq!(user.user, "null-%00-null");
}

#[test]
fn test_torture_semicolon_separated_uri_params() {
    let buf = b"OPTIONS sip:user;par=u%40example.net@example.com SIP/2.0\r\n\
        To: sip:j_user@example.com\r\n\
        From: sip:caller@example.org;tag=33242\r\n\
        Max-Forwards: 3\r\n\
        Call-ID: semiuri.0ha0isndaksdj\r\n\
        CSeq: 8 OPTIONS\r\n\
        Via: SIP/2.0/UDP 192.0.2.1;branch=z9hG4bKkdjuw\r\n\
        Content-Length: 0\r\n\r\n";

    // The semicolon belongs to the userinfo, not the URI parameters.
    let msg = parse(buf).expect("semicolon userinfo is valid");
    let uri = &msg.request().unwrap().req_line.uri;
    assert_eq!(uri.host_port.host.as_string(), "example.com");
}

#[test]
fn test_torture_unknown_scheme_parses() {
    // An unknown Request-URI scheme parses; the endpoint answers 416.
    let buf = b"OPTIONS soap.beep://192.0.2.103:3002 SIP/2.0\r\n\
        To: sip:t.watson@example.org\r\n\
        From: sip:t.watson@example.org;tag=using\r\n\
        Max-Forwards: 7\r\n\
        Call-ID: unksm.daksdj@whyask\r\n\
        CSeq: 8 OPTIONS\r\n\
        Via: SIP/2.0/TCP abc.example.org;branch=z9hG4bKkdjuw\r\n\
        Content-Length: 0\r\n\r\n";

    let msg = parse(buf).expect("unknown scheme still parses");
    assert!(!msg.request().unwrap().uri().scheme.is_supported());
}

#[test]
fn test_torture_ipv6_references() {
    let buf = b"OPTIONS sip:[2001:db8::10] SIP/2.0\r\n\
        To: sip:user@[2001:db8::10]\r\n\
        From: sip:user@example.com;tag=81x2\r\n\
        Via: SIP/2.0/UDP [2001:db8::9:1];branch=z9hG4bKas3-111\r\n\
        Call-ID: SSG9559905523997077@hlau_4100\r\n\
        Max-Forwards: 70\r\n\
        CSeq: 98176 OPTIONS\r\n\
        Content-Length: 0\r\n\r\n";

    let msg = parse(buf).expect("IPv6 references are valid");
    let request = msg.request().unwrap();
    assert!(matches!(
        request.uri().host_port.host,
        sipline::message::Host::IpAddr(_)
    ));
}

#[test]
fn test_torture_multiple_via_mixed_forms() {
    let buf = b"SIP/2.0 200 OK\r\n\
        Via: SIP/2.0/UDP first.example.com;branch=z9hG4bKa\r\n\
        v: SIP/2.0/TCP second.example.com:5070;branch=z9hG4bKb, SIP/2.0/TLS third.example.com;branch=z9hG4bKc\r\n\
        From: <sip:a@example.com>;tag=1\r\n\
        To: <sip:b@example.com>;tag=2\r\n\
        Call-ID: multivia.1\r\n\
        CSeq: 1 INVITE\r\n\
        Content-Length: 0\r\n\r\n";

    let msg = parse(buf).expect("via list forms are valid");
    let vias: Vec<_> = msg
        .headers()
        .iter()
        .filter_map(|h| match h {
            Header::Via(via) => Some(via),
            _ => None,
        })
        .collect();

    assert_eq!(vias.len(), 3);
    assert_eq!(vias[1].transport, TransportKind::Tcp);
    assert_eq!(vias[2].transport, TransportKind::Tls);
}

#[test]
fn test_torture_content_length_larger_than_body() {
    let buf = b"INVITE sip:user@example.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP 192.0.2.4;branch=z9hG4bKkdjuw\r\n\
        Call-ID: clerr.0ha0isndaksdjweiafasdk3\r\n\
        CSeq: 8 INVITE\r\n\
        Content-Length: 9999\r\n\r\nv=0\r\n";

    assert_eq!(
        parse_err_kind(buf),
        ParseErrorKind::ContentLengthMismatch
    );
}

#[test]
fn test_torture_negative_content_length() {
    let buf = b"INVITE sip:user@example.com SIP/2.0\r\n\
        Content-Length: -999\r\n\r\n";

    assert_eq!(parse_err_kind(buf), ParseErrorKind::BadHeaderSyntax);
}

#[test]
fn test_torture_bad_version() {
    let buf = b"OPTIONS sip:user@example.com SIP/7.0\r\n\r\n";
    assert_eq!(parse_err_kind(buf), ParseErrorKind::UnsupportedVersion);
}

#[test]
fn test_torture_garbage_start_line() {
    assert!(parse(b"INVITE\r\n\r\n").is_err());
    assert!(parse(b"SIP/2.0 OK OK\r\n\r\n").is_err());
    assert!(parse(b"\x00\x01\x02\x03").is_err());
}

#[test]
fn test_torture_no_panic_on_fuzz_like_input() {
    // Truncations of a valid message must fail cleanly, never panic.
    let buf: &[u8] = b"INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP client.atlanta.example.com:5060;branch=z9hG4bK74bf9\r\n\
        From: Alice <sip:alice@atlanta.example.com>;tag=9fxced76sl\r\n\
        To: Bob <sip:bob@biloxi.example.com>\r\n\
        Call-ID: 3848276298220188511@atlanta.example.com\r\n\
        CSeq: 1 INVITE\r\n\
        Content-Length: 4\r\n\r\nbody";

    for len in 0..buf.len() {
        let _ = parse(&buf[..len]);
    }
    assert!(parse(buf).is_ok());
}

#[test]
fn test_roundtrip_semantic_equality() {
    let buf = b"INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP client.atlanta.example.com:5060;branch=z9hG4bK74bf9\r\n\
        Max-Forwards: 70\r\n\
        From: Alice <sip:alice@atlanta.example.com>;tag=9fxced76sl\r\n\
        To: Bob <sip:bob@biloxi.example.com>\r\n\
        Call-ID: 3848276298220188511@atlanta.example.com\r\n\
        CSeq: 1 INVITE\r\n\
        Contact: <sip:alice@client.atlanta.example.com>\r\n\
        Content-Length: 0\r\n\r\n";

    let first = parse(buf).unwrap();
    let request = first.request().unwrap();

    // Serialize through the canonical encoder, then parse again.
    let encoded = {
        use sipline::transport::ToBytes;
        let transport: std::sync::Arc<dyn sipline::transport::Transport> =
            unreachable_transport();
        let outgoing = sipline::transport::OutgoingRequest::new(
            request.clone(),
            transport,
            "127.0.0.1:5060".parse().unwrap(),
        );
        outgoing.to_bytes().unwrap()
    };

    let second = parse(&encoded).unwrap();
    let reparsed = second.request().unwrap();

    assert_eq!(reparsed.method(), request.method());
    assert!(reparsed.uri().equivalent(request.uri()));
    assert_eq!(
        reparsed.headers.via().unwrap().branch(),
        request.headers.via().unwrap().branch()
    );
    assert_eq!(reparsed.headers.from(), request.headers.from());
    assert_eq!(reparsed.headers.to(), request.headers.to());
    assert_eq!(reparsed.headers.call_id(), request.headers.call_id());
    assert_eq!(reparsed.headers.cseq(), request.headers.cseq());
}

/// The round-trip test never sends anything; the transport is inert.
fn unreachable_transport() -> std::sync::Arc<dyn sipline::transport::Transport> {
    struct Inert;

    #[async_trait::async_trait]
    impl sipline::transport::Transport for Inert {
        async fn send(
            &self,
            buf: &[u8],
            _addr: &std::net::SocketAddr,
        ) -> sipline::Result<usize> {
            Ok(buf.len())
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Udp
        }

        fn addr(&self) -> std::net::SocketAddr {
            "127.0.0.1:5060".parse().unwrap()
        }

        fn local_name(&self) -> std::borrow::Cow<'_, str> {
            std::borrow::Cow::Borrowed("127.0.0.1:5060")
        }
    }

    std::sync::Arc::new(Inert)
}
