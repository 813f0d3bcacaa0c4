//! SIP message types.
//!
//! [`SipMsg`] is either a [`Request`] or a [`Response`]. Messages own
//! their data; once parsed they are treated as immutable by the stack.

use bytes::Bytes;

use crate::headers::Headers;
use crate::parser::SIPV2;

pub mod auth;

mod code;
mod method;
mod params;
mod protocol;
mod uri;

pub use code::*;
pub use method::*;
pub use params::*;
pub use protocol::*;
pub use uri::*;

/// A SIP message, request or response.
#[derive(Debug, Clone)]
pub enum SipMsg {
    Request(Request),
    Response(Response),
}

impl SipMsg {
    pub const fn is_request(&self) -> bool {
        matches!(self, SipMsg::Request(_))
    }

    pub const fn is_response(&self) -> bool {
        matches!(self, SipMsg::Response(_))
    }

    pub fn request(&self) -> Option<&Request> {
        match self {
            SipMsg::Request(request) => Some(request),
            SipMsg::Response(_) => None,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            SipMsg::Request(_) => None,
            SipMsg::Response(response) => Some(response),
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            SipMsg::Request(req) => &req.headers,
            SipMsg::Response(res) => &res.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMsg::Request(req) => &mut req.headers,
            SipMsg::Response(res) => &mut res.headers,
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        match self {
            SipMsg::Request(req) => req.body.as_ref(),
            SipMsg::Response(res) => res.body.as_ref(),
        }
    }

    pub fn set_body(&mut self, body: Option<Bytes>) {
        match self {
            SipMsg::Request(req) => req.body = body,
            SipMsg::Response(res) => res.body = body,
        }
    }
}

impl From<Request> for SipMsg {
    fn from(value: Request) -> Self {
        SipMsg::Request(value)
    }
}

impl From<Response> for SipMsg {
    fn from(value: Response) -> Self {
        SipMsg::Response(value)
    }
}

/// A SIP request.
///
/// # Examples
///
/// ```
/// use sipline::message::{Request, SipMethod, Uri};
///
/// let uri = Uri::from_static("sip:bob@biloxi.com").unwrap();
/// let request = Request::new(SipMethod::Options, uri);
/// assert_eq!(request.method(), &SipMethod::Options);
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    pub req_line: RequestLine,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: SipMethod, uri: Uri) -> Self {
        Request {
            req_line: RequestLine { method, uri },
            headers: Headers::default(),
            body: None,
        }
    }

    pub const fn new_with_headers(method: SipMethod, uri: Uri, headers: Headers) -> Self {
        Request {
            req_line: RequestLine { method, uri },
            headers,
            body: None,
        }
    }

    pub fn method(&self) -> &SipMethod {
        &self.req_line.method
    }

    pub fn uri(&self) -> &Uri {
        &self.req_line.uri
    }
}

/// The Request-Line: method, Request-URI and SIP-Version.
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: SipMethod,
    pub uri: Uri,
}

impl std::fmt::Display for RequestLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {SIPV2}\r\n", self.method, self.uri)
    }
}

/// A SIP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_line: StatusLine,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl Response {
    pub fn new(status_line: StatusLine) -> Self {
        Response {
            status_line,
            headers: Headers::default(),
            body: None,
        }
    }

    pub fn code(&self) -> StatusCode {
        self.status_line.code
    }

    pub fn reason(&self) -> &str {
        &self.status_line.reason
    }

    pub fn append_headers(&mut self, other: &mut Headers) {
        self.headers.append(other);
    }
}

/// The Status-Line: SIP-Version, status code and reason phrase.
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub code: StatusCode,
    pub reason: String,
}

impl StatusLine {
    pub fn new(code: StatusCode, reason: &str) -> Self {
        StatusLine {
            code,
            reason: reason.to_string(),
        }
    }

    /// A status line with the default reason phrase for `code`.
    pub fn from_code(code: StatusCode) -> Self {
        StatusLine {
            code,
            reason: code.reason().to_string(),
        }
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SIPV2} {} {}\r\n", self.code.code(), self.reason)
    }
}
