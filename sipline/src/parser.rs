//! SIP message parsing.
//!
//! [`Parser`] walks a byte buffer holding exactly one SIP message (stream
//! transports frame with Content-Length before handing buffers here) and
//! produces the owned message model. Parsing is lenient in the spirit of
//! RFC 4475: folded header lines, mixed compact and long forms, LWS
//! around separators, comma-combined list headers and escaped characters
//! in quoted strings are all accepted.

use std::str;

use bytes::Bytes;

use sipline_util::{util, Scanner};

use crate::error::{Error, ParseError, ParseErrorKind, Result};
use crate::headers::{
    Allow, Authorization, CSeq, CallId, Contact, ContentLength, ContentType, Event, Expires, From,
    Header, Headers, MaxForwards, MinExpires, OtherHeader, ProxyAuthenticate, ProxyAuthorization,
    ProxyRequire, RecordRoute, ReferTo, Require, Route, Server, SipHeaderParse, SubscriptionState,
    Supported, To, Unsupported, UserAgent, Via, WWWAuthenticate,
};
use crate::message::auth::{
    Algorithm, Challenge, Credential, DigestChallenge, DigestCredential,
};
use crate::message::{
    Host, HostPort, NameAddr, Param, Params, Request, Response, Scheme, SipMethod, SipMsg,
    StatusLine, Uri, UriUser,
};

pub(crate) const SIPV2: &str = "SIP/2.0";

const ALPHA_NUM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TOKEN_EXTRA: &[u8] = b"-.!%*_+`'~";
const HOST_EXTRA: &[u8] = b"-._";
const USER_EXTRA: &[u8] = b"-_.!~*'()%&=+$,;?/";
const PASS_EXTRA: &[u8] = b"-_.!~*'()%&=+$,";
const PARAM_VALUE_EXTRA: &[u8] = b"-.!%*_+`'~[]:/";
const URI_HEADER_EXTRA: &[u8] = b"-.!%*_+`'~[]/?:+$";

const fn byte_table(sets: &[&[u8]]) -> [bool; 256] {
    let mut table = [false; 256];
    let mut set = 0;
    while set < sets.len() {
        let bytes = sets[set];
        let mut i = 0;
        while i < bytes.len() {
            table[bytes[i] as usize] = true;
            i += 1;
        }
        set += 1;
    }
    table
}

const TOKEN_MAP: [bool; 256] = byte_table(&[ALPHA_NUM, TOKEN_EXTRA]);
const HOST_MAP: [bool; 256] = byte_table(&[ALPHA_NUM, HOST_EXTRA]);
const USER_MAP: [bool; 256] = byte_table(&[ALPHA_NUM, USER_EXTRA]);
const PASS_MAP: [bool; 256] = byte_table(&[ALPHA_NUM, PASS_EXTRA]);
const PARAM_VALUE_MAP: [bool; 256] = byte_table(&[ALPHA_NUM, PARAM_VALUE_EXTRA]);
const URI_HEADER_MAP: [bool; 256] = byte_table(&[ALPHA_NUM, URI_HEADER_EXTRA]);

#[inline(always)]
fn is_token(b: u8) -> bool {
    TOKEN_MAP[b as usize]
}

/// A parser positioned inside a SIP message or header value.
pub struct Parser<'buf> {
    scanner: Scanner<'buf>,
}

impl<'buf> Parser<'buf> {
    pub fn new(src: &'buf [u8]) -> Self {
        Parser {
            scanner: Scanner::new(src),
        }
    }

    // ----- low level helpers used by the header types -----

    pub(crate) fn take_ws(&mut self) {
        self.scanner.take_while(util::is_space);
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.scanner.peek()
    }

    pub(crate) fn advance(&mut self) -> Option<u8> {
        self.scanner.advance()
    }

    pub(crate) fn eat(&mut self, byte: u8) -> bool {
        self.scanner.eat(byte)
    }

    pub(crate) fn expect(&mut self, byte: u8) -> Result<()> {
        self.scanner.expect(byte).map_err(Error::from)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.scanner.is_eof()
    }

    pub(crate) fn bad_header<T>(&self, message: &str) -> Result<T> {
        let pos = self.scanner.position();
        Err(ParseError::at(ParseErrorKind::BadHeaderSyntax, message, pos.line, pos.col).into())
    }

    fn bad_uri<T>(&self, message: &str) -> Result<T> {
        let pos = self.scanner.position();
        Err(ParseError::at(ParseErrorKind::UriSyntax, message, pos.line, pos.col).into())
    }

    fn bad_start_line<T>(&self, message: &str) -> Result<T> {
        let pos = self.scanner.position();
        Err(ParseError::at(ParseErrorKind::MalformedStartLine, message, pos.line, pos.col).into())
    }

    /// Read a token per the RFC 3261 `token` rule.
    pub(crate) fn parse_token(&mut self) -> Result<&'buf str> {
        let token = self.scanner.take_while(is_token);
        if token.is_empty() {
            return self.bad_header("expected token");
        }
        // Token bytes are single-byte ASCII.
        Ok(unsafe { str::from_utf8_unchecked(token) })
    }

    pub(crate) fn parse_u8(&mut self) -> Result<u8> {
        self.take_ws();
        self.scanner.read_u8().map_err(Error::from)
    }

    pub(crate) fn parse_u16(&mut self) -> Result<u16> {
        self.take_ws();
        self.scanner.read_u16().map_err(Error::from)
    }

    pub(crate) fn parse_u32(&mut self) -> Result<u32> {
        self.take_ws();
        self.scanner.read_u32().map_err(Error::from)
    }

    /// Everything left in the buffer, trimmed.
    pub(crate) fn rest_trimmed(&mut self) -> Result<&'buf str> {
        let rest = self.scanner.take_while(|b| !util::is_newline(b));
        Ok(str::from_utf8(rest)?.trim())
    }

    /// The `SIP/2.0` token of Via headers and start lines.
    pub(crate) fn expect_sip_version(&mut self) -> Result<()> {
        if self.scanner.starts_with(b"SIP/") && !self.scanner.starts_with(SIPV2.as_bytes()) {
            let pos = self.scanner.position();
            return Err(ParseError::at(
                ParseErrorKind::UnsupportedVersion,
                "only SIP/2.0 is supported",
                pos.line,
                pos.col,
            )
            .into());
        }
        if self.scanner.expect_tag(SIPV2.as_bytes()).is_err() {
            return self.bad_header("expected SIP/2.0");
        }
        Ok(())
    }

    /// A quoted string, unescaping backslash pairs. The cursor must sit on
    /// the opening quote.
    pub(crate) fn parse_quoted(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(escaped) => out.push(escaped as char),
                    None => return self.bad_header("unterminated quoted string"),
                },
                Some(byte) => out.push(byte as char),
                None => return self.bad_header("unterminated quoted string"),
            }
        }
        Ok(out)
    }

    /// `host [ ":" port ]` with IPv6 references in brackets.
    pub(crate) fn parse_host_port(&mut self) -> Result<HostPort> {
        let host = if self.eat(b'[') {
            let inner = self.scanner.take_until(b']');
            let inner = str::from_utf8(inner)?;
            let ip: std::net::Ipv6Addr = match inner.parse() {
                Ok(ip) => ip,
                Err(_) => return self.bad_uri("invalid IPv6 reference"),
            };
            self.expect(b']')?;
            Host::IpAddr(ip.into())
        } else {
            let name = self.scanner.take_while(|b| HOST_MAP[b as usize]);
            if name.is_empty() {
                return self.bad_uri("empty host");
            }
            let name = str::from_utf8(name)?;
            match name.parse::<std::net::Ipv4Addr>() {
                Ok(ip) => Host::IpAddr(ip.into()),
                Err(_) => Host::DomainName(name.to_string()),
            }
        };

        let port = if self.eat(b':') {
            Some(self.scanner.read_u16().map_err(Error::from)?)
        } else {
            None
        };

        Ok(HostPort { host, port })
    }

    /// A SIP/SIPS/TEL URI. URI parameters and headers are only consumed
    /// when `with_params` is set; a bare URI inside a header keeps its
    /// trailing `;params` for the header itself.
    pub fn parse_uri(&mut self, with_params: bool) -> Result<Uri> {
        let scheme_token = self.scanner.take_while(|b| is_token(b) && b != b':');
        let scheme = if scheme_token.eq_ignore_ascii_case(b"sip") {
            Scheme::Sip
        } else if scheme_token.eq_ignore_ascii_case(b"sips") {
            Scheme::Sips
        } else if scheme_token.eq_ignore_ascii_case(b"tel") {
            Scheme::Tel
        } else {
            Scheme::Other(String::from_utf8_lossy(scheme_token).into_owned())
        };
        self.expect(b':')?;

        if matches!(scheme, Scheme::Tel) {
            // A telephone-subscriber plus optional parameters; there is no
            // host component.
            let number = self.scanner.take_while(|b| USER_MAP[b as usize] && b != b';');
            let number = str::from_utf8(number)?;
            let mut uri = Uri::new(Scheme::Tel, HostPort::default());
            uri.user = Some(UriUser {
                user: number.to_string(),
                password: None,
            });
            if with_params {
                uri.params = self.parse_param_list()?;
            }
            return Ok(uri);
        }

        if matches!(scheme, Scheme::Other(_)) {
            // Foreign schemes are carried opaquely so the endpoint can
            // still answer 416.
            let opaque = self
                .scanner
                .take_while(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'>' | b','));
            let opaque = str::from_utf8(opaque)?;
            let mut uri = Uri::new(scheme, HostPort::default());
            uri.host_port.host = Host::DomainName(opaque.to_string());
            return Ok(uri);
        }

        // user-info is present when '@' shows up before the host ends.
        // The userinfo grammar allows ';' and '?', so neither stops the
        // scan; both only appear after the host otherwise.
        let (span, _) = self
            .scanner
            .peek_while(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b',' | b'>'));
        let has_user = span.contains(&b'@');

        let user = if has_user {
            let user = self.scanner.take_while(|b| USER_MAP[b as usize] && b != b':' && b != b'@');
            let user = str::from_utf8(user)?.to_string();
            let password = if self.eat(b':') {
                let pass = self.scanner.take_while(|b| PASS_MAP[b as usize]);
                Some(str::from_utf8(pass)?.to_string())
            } else {
                None
            };
            self.expect(b'@')?;
            Some(UriUser { user, password })
        } else {
            None
        };

        let host_port = self.parse_host_port()?;

        let mut uri = Uri {
            scheme,
            user,
            host_port,
            ..Default::default()
        };

        if !with_params {
            return Ok(uri);
        }

        let mut params = self.parse_param_list()?;
        uri.transport_param = params
            .remove("transport")
            .and_then(|p| p.value)
            .map(|v| crate::message::TransportKind::from(v.as_bytes()));
        uri.user_param = params.remove("user").and_then(|p| p.value);
        uri.method_param = params.remove("method").and_then(|p| p.value);
        uri.ttl_param = params
            .remove("ttl")
            .and_then(|p| p.value)
            .and_then(|v| v.parse().ok());
        uri.maddr_param = params
            .remove("maddr")
            .and_then(|p| p.value)
            .map(|v| v.parse().unwrap_or(Host::DomainName(v)));
        uri.lr_param = params.remove("lr").is_some();
        uri.params = params;

        if self.eat(b'?') {
            loop {
                let name = self.scanner.take_while(|b| URI_HEADER_MAP[b as usize] && b != b'=');
                if name.is_empty() {
                    return self.bad_uri("empty URI header name");
                }
                let name = str::from_utf8(name)?.to_string();
                let value = if self.eat(b'=') {
                    let value = self.scanner.take_while(|b| URI_HEADER_MAP[b as usize]);
                    Some(str::from_utf8(value)?.to_string())
                } else {
                    None
                };
                uri.headers.push(Param { name, value });
                if !self.eat(b'&') {
                    break;
                }
            }
        }

        Ok(uri)
    }

    /// `display-name <uri>` or a bare URI.
    pub(crate) fn parse_name_addr(&mut self) -> Result<NameAddr> {
        self.take_ws();

        let display = match self.peek() {
            Some(b'"') => {
                let display = self.parse_quoted()?;
                self.take_ws();
                Some(display)
            }
            Some(b'<') => None,
            _ => {
                // Either unquoted display tokens before '<', or a bare URI
                // whose ':' comes before any '<'.
                let (span, next) = self
                    .scanner
                    .peek_while(|b| !matches!(b, b'<' | b'\r' | b'\n' | b','));
                if next == Some(b'<') && !span.contains(&b':') {
                    let raw = self.scanner.take_until(b'<');
                    let display = str::from_utf8(raw)?.trim().to_string();
                    (!display.is_empty()).then_some(display)
                } else {
                    None
                }
            }
        };

        if self.eat(b'<') {
            let uri = self.parse_uri(true)?;
            self.expect(b'>')?;
            Ok(NameAddr { display, uri })
        } else {
            let uri = self.parse_uri(false)?;
            Ok(NameAddr { display, uri })
        }
    }

    /// A `;name=value` list. Values may be tokens, quoted strings, or
    /// bracketed IPv6 literals; flag parameters carry no value.
    pub(crate) fn parse_param_list(&mut self) -> Result<Params> {
        let mut params = Params::new();
        loop {
            self.take_ws();
            if !self.eat(b';') {
                break;
            }
            self.take_ws();
            let name = self.parse_token()?.to_string();
            self.take_ws();
            let value = if self.eat(b'=') {
                self.take_ws();
                if self.peek() == Some(b'"') {
                    Some(self.parse_quoted()?)
                } else {
                    let value = self.scanner.take_while(|b| PARAM_VALUE_MAP[b as usize]);
                    Some(str::from_utf8(value)?.to_string())
                }
            } else {
                None
            };
            params.push(Param { name, value });
        }
        Ok(params)
    }

    /// Comma separated tokens, as in Allow and Supported.
    pub(crate) fn parse_token_list(&mut self) -> Result<Vec<String>> {
        let mut items = Vec::new();
        loop {
            self.take_ws();
            let token = self.scanner.take_while(is_token);
            if token.is_empty() {
                break;
            }
            items.push(unsafe { str::from_utf8_unchecked(token) }.to_string());
            self.take_ws();
            if !self.eat(b',') {
                break;
            }
        }
        Ok(items)
    }

    fn parse_auth_params(&mut self) -> Result<Vec<(String, String)>> {
        let mut params = Vec::new();
        loop {
            self.take_ws();
            let name = match self.scanner.take_while(is_token) {
                token if token.is_empty() => break,
                token => unsafe { str::from_utf8_unchecked(token) }.to_string(),
            };
            self.take_ws();
            self.expect(b'=')?;
            self.take_ws();
            let value = if self.peek() == Some(b'"') {
                self.parse_quoted()?
            } else {
                self.scanner
                    .take_while(|b| PARAM_VALUE_MAP[b as usize])
                    .iter()
                    .map(|&b| b as char)
                    .collect()
            };
            params.push((name, value));
            self.take_ws();
            if !self.eat(b',') {
                break;
            }
        }
        Ok(params)
    }

    /// A challenge as carried by WWW-Authenticate / Proxy-Authenticate.
    pub(crate) fn parse_challenge(&mut self) -> Result<Challenge> {
        self.take_ws();
        let scheme = self.parse_token()?.to_string();
        if !scheme.eq_ignore_ascii_case("Digest") {
            let data = self.rest_trimmed()?.to_string();
            return Ok(Challenge::Other { scheme, data });
        }

        let mut digest = DigestChallenge::default();
        for (name, value) in self.parse_auth_params()? {
            if name.eq_ignore_ascii_case("realm") {
                digest.realm = Some(value);
            } else if name.eq_ignore_ascii_case("domain") {
                digest.domain = Some(value);
            } else if name.eq_ignore_ascii_case("nonce") {
                digest.nonce = Some(value);
            } else if name.eq_ignore_ascii_case("opaque") {
                digest.opaque = Some(value);
            } else if name.eq_ignore_ascii_case("stale") {
                digest.stale = Some(value.eq_ignore_ascii_case("true"));
            } else if name.eq_ignore_ascii_case("algorithm") {
                digest.algorithm = Algorithm::parse(&value);
            } else if name.eq_ignore_ascii_case("qop") {
                digest.qop = Some(value);
            }
        }
        Ok(Challenge::Digest(digest))
    }

    /// A credential as carried by Authorization / Proxy-Authorization.
    pub(crate) fn parse_credential(&mut self) -> Result<Credential> {
        self.take_ws();
        let scheme = self.parse_token()?.to_string();
        if !scheme.eq_ignore_ascii_case("Digest") {
            let data = self.rest_trimmed()?.to_string();
            return Ok(Credential::Other { scheme, data });
        }

        let mut digest = DigestCredential::default();
        for (name, value) in self.parse_auth_params()? {
            if name.eq_ignore_ascii_case("username") {
                digest.username = Some(value);
            } else if name.eq_ignore_ascii_case("realm") {
                digest.realm = Some(value);
            } else if name.eq_ignore_ascii_case("nonce") {
                digest.nonce = Some(value);
            } else if name.eq_ignore_ascii_case("uri") {
                digest.uri = Some(value);
            } else if name.eq_ignore_ascii_case("response") {
                digest.response = Some(value);
            } else if name.eq_ignore_ascii_case("algorithm") {
                digest.algorithm = Algorithm::parse(&value);
            } else if name.eq_ignore_ascii_case("cnonce") {
                digest.cnonce = Some(value);
            } else if name.eq_ignore_ascii_case("opaque") {
                digest.opaque = Some(value);
            } else if name.eq_ignore_ascii_case("qop") {
                digest.qop = Some(value);
            } else if name.eq_ignore_ascii_case("nc") {
                digest.nc = Some(value);
            }
        }
        Ok(Credential::Digest(digest))
    }

    // ----- whole message parsing -----

    /// Parse one complete SIP message.
    ///
    /// # Examples
    ///
    /// ```
    /// use sipline::parser::Parser;
    ///
    /// let buf = b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    /// let msg = Parser::new(buf).parse_message().unwrap();
    /// let response = msg.response().unwrap();
    /// assert_eq!(response.code().code(), 200);
    /// assert_eq!(response.reason(), "OK");
    /// ```
    pub fn parse_message(mut self) -> Result<SipMsg> {
        let mut msg = self.parse_start_line()?;

        let headers = msg.headers_mut();
        loop {
            match self.peek() {
                // Empty line terminates the header section.
                Some(b'\r') | Some(b'\n') => {
                    self.eat(b'\r');
                    self.eat(b'\n');
                    break;
                }
                None => break,
                Some(_) => self.parse_header_line(headers)?,
            }
        }

        let body = self.scanner.rest();
        let declared = headers.content_length().map(|cl| cl.octets() as usize);
        match declared {
            Some(declared) if declared != body.len() => {
                let pos = self.scanner.position();
                return Err(ParseError::at(
                    ParseErrorKind::ContentLengthMismatch,
                    format!("declared {declared} octets, found {}", body.len()),
                    pos.line,
                    pos.col,
                )
                .into());
            }
            _ => {}
        }
        if !body.is_empty() {
            msg.set_body(Some(Bytes::copy_from_slice(body)));
        }

        Ok(msg)
    }

    fn parse_start_line(&mut self) -> Result<SipMsg> {
        if self.scanner.starts_with(b"SIP/") {
            // Status-Line.
            self.expect_sip_version()?;
            if self.expect(b' ').is_err() {
                return self.bad_start_line("expected space after SIP-Version");
            }
            let code = match self.scanner.read_u32() {
                Ok(code) if (100..=699).contains(&code) => code as u16,
                _ => return self.bad_start_line("status code out of range"),
            };
            self.take_ws();
            let reason = self.rest_trimmed()?.to_string();
            self.eat(b'\r');
            self.eat(b'\n');

            return Ok(Response::new(StatusLine::new(code.into(), &reason)).into());
        }

        // Request-Line.
        let method_token = self.scanner.take_while(is_token);
        if method_token.is_empty() {
            return self.bad_start_line("expected request method");
        }
        let method = SipMethod::from(method_token);
        if self.expect(b' ').is_err() {
            return self.bad_start_line("expected space after method");
        }
        let uri = self.parse_uri(true)?;
        if self.expect(b' ').is_err() {
            return self.bad_start_line("expected space after Request-URI");
        }
        self.expect_sip_version()?;
        self.take_ws();
        self.eat(b'\r');
        if self.eat(b'\n') || self.at_end() {
            Ok(Request::new(method, uri).into())
        } else {
            self.bad_start_line("trailing bytes after Request-Line")
        }
    }

    /// One header line, folds included. List headers may carry several
    /// comma separated values on a single line.
    fn parse_header_line(&mut self, headers: &mut Headers) -> Result<()> {
        let name = self.parse_token()?;
        self.take_ws();
        if self.expect(b':').is_err() {
            return self.bad_header("missing ':' after header name");
        }

        let value = self.read_header_value()?;
        let mut vp = Parser::new(value.as_bytes());
        vp.take_ws();

        if Via::matches_name(name) {
            Self::parse_list_items(&mut vp, |via| headers.push(Header::Via(via)))?;
        } else if Route::matches_name(name) {
            Self::parse_list_items(&mut vp, |route| headers.push(Header::Route(route)))?;
        } else if RecordRoute::matches_name(name) {
            Self::parse_list_items(&mut vp, |rr| headers.push(Header::RecordRoute(rr)))?;
        } else if Contact::matches_name(name) {
            Self::parse_list_items(&mut vp, |contact| headers.push(Header::Contact(contact)))?;
        } else if From::matches_name(name) {
            headers.push(Header::From(From::parse(&mut vp)?));
        } else if To::matches_name(name) {
            headers.push(Header::To(To::parse(&mut vp)?));
        } else if CallId::matches_name(name) {
            headers.push(Header::CallId(CallId::parse(&mut vp)?));
        } else if CSeq::matches_name(name) {
            headers.push(Header::CSeq(CSeq::parse(&mut vp)?));
        } else if MaxForwards::matches_name(name) {
            headers.push(Header::MaxForwards(MaxForwards::parse(&mut vp)?));
        } else if Expires::matches_name(name) {
            headers.push(Header::Expires(Expires::parse(&mut vp)?));
        } else if MinExpires::matches_name(name) {
            headers.push(Header::MinExpires(MinExpires::parse(&mut vp)?));
        } else if ContentLength::matches_name(name) {
            headers.push(Header::ContentLength(ContentLength::parse(&mut vp)?));
        } else if ContentType::matches_name(name) {
            headers.push(Header::ContentType(ContentType::parse(&mut vp)?));
        } else if Allow::matches_name(name) {
            headers.push(Header::Allow(Allow::parse(&mut vp)?));
        } else if Supported::matches_name(name) {
            headers.push(Header::Supported(Supported::parse(&mut vp)?));
        } else if Unsupported::matches_name(name) {
            headers.push(Header::Unsupported(Unsupported::parse(&mut vp)?));
        } else if Require::matches_name(name) {
            headers.push(Header::Require(Require::parse(&mut vp)?));
        } else if ProxyRequire::matches_name(name) {
            headers.push(Header::ProxyRequire(ProxyRequire::parse(&mut vp)?));
        } else if UserAgent::matches_name(name) {
            headers.push(Header::UserAgent(UserAgent::parse(&mut vp)?));
        } else if Server::matches_name(name) {
            headers.push(Header::Server(Server::parse(&mut vp)?));
        } else if Authorization::matches_name(name) {
            headers.push(Header::Authorization(Authorization::parse(&mut vp)?));
        } else if WWWAuthenticate::matches_name(name) {
            headers.push(Header::WWWAuthenticate(WWWAuthenticate::parse(&mut vp)?));
        } else if ProxyAuthenticate::matches_name(name) {
            headers.push(Header::ProxyAuthenticate(ProxyAuthenticate::parse(&mut vp)?));
        } else if ProxyAuthorization::matches_name(name) {
            headers.push(Header::ProxyAuthorization(ProxyAuthorization::parse(&mut vp)?));
        } else if ReferTo::matches_name(name) {
            headers.push(Header::ReferTo(ReferTo::parse(&mut vp)?));
        } else if Event::matches_name(name) {
            headers.push(Header::Event(Event::parse(&mut vp)?));
        } else if SubscriptionState::matches_name(name) {
            headers.push(Header::SubscriptionState(SubscriptionState::parse(&mut vp)?));
        } else {
            headers.push(Header::Other(OtherHeader {
                name: name.to_string(),
                value: value.clone(),
            }));
        }

        Ok(())
    }

    fn parse_list_items<T, F>(vp: &mut Parser<'_>, mut push: F) -> Result<()>
    where
        T: SipHeaderParse,
        F: FnMut(T),
    {
        loop {
            vp.take_ws();
            if vp.at_end() {
                break;
            }
            push(T::parse(vp)?);
            vp.take_ws();
            if !vp.eat(b',') {
                break;
            }
        }
        Ok(())
    }

    /// The raw header value with folded continuation lines collapsed to a
    /// single space, terminal CRLF consumed.
    fn read_header_value(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            let line = self.scanner.take_while(|b| !util::is_newline(b));
            out.push_str(str::from_utf8(line)?);
            self.scanner.eat(b'\r');
            self.scanner.eat(b'\n');
            match self.scanner.peek() {
                // Continuation line per the LWS rule.
                Some(b' ') | Some(b'\t') => {
                    self.scanner.take_while(util::is_space);
                    out.push(' ');
                }
                _ => break,
            }
        }
        Ok(out.trim().to_string())
    }
}
