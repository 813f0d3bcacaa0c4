use std::fmt;
use std::str::Utf8Error;

use thiserror::Error;

use sipline_util::ScanError;

pub type Result<T> = std::result::Result<T, Error>;

/// Classifies a message parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Request/status line is not valid SIP.
    MalformedStartLine,
    /// A header value does not follow its grammar.
    BadHeaderSyntax,
    /// A URI does not follow the RFC 3261 grammar.
    UriSyntax,
    /// Declared Content-Length disagrees with the actual body.
    ContentLengthMismatch,
    /// The SIP-Version is not SIP/2.0.
    UnsupportedVersion,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseErrorKind::MalformedStartLine => "malformed start line",
            ParseErrorKind::BadHeaderSyntax => "bad header syntax",
            ParseErrorKind::UriSyntax => "invalid URI",
            ParseErrorKind::ContentLengthMismatch => "content length mismatch",
            ParseErrorKind::UnsupportedVersion => "unsupported SIP version",
        };
        f.write_str(name)
    }
}

/// A parse failure with the offending position when known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (line {} column {})",
            self.kind, self.message, self.line, self.col
        )
    }
}

impl ParseError {
    pub fn new<S: AsRef<str>>(kind: ParseErrorKind, message: S) -> Self {
        ParseError {
            kind,
            message: message.as_ref().to_string(),
            line: 0,
            col: 0,
        }
    }

    pub fn at<S: AsRef<str>>(kind: ParseErrorKind, message: S, line: usize, col: usize) -> Self {
        ParseError {
            kind,
            message: message.as_ref().to_string(),
            line,
            col,
        }
    }
}

impl From<ScanError> for ParseError {
    fn from(err: ScanError) -> Self {
        ParseError {
            kind: ParseErrorKind::BadHeaderSyntax,
            message: err.to_string(),
            line: err.pos.line,
            col: err.pos.col,
        }
    }
}

impl From<Utf8Error> for ParseError {
    fn from(err: Utf8Error) -> Self {
        ParseError::new(ParseErrorKind::BadHeaderSyntax, err.to_string())
    }
}

/// Errors surfaced by the stack.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Missing required '{0}' header")]
    MissingRequiredHeader(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("No transport available for {0}")]
    TransportUnavailable(String),

    #[error("Could not resolve any address for {0}")]
    Unresolvable(String),

    #[error("Message of {size} bytes exceeds the datagram threshold, retry over a reliable transport")]
    CongestionRequiresReliable { size: usize },

    #[error("Transaction timed out")]
    TsxTimeout,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Dialog no longer exists")]
    DialogGone,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Fmt error")]
    Fmt(#[from] std::fmt::Error),
}

impl From<ScanError> for Error {
    fn from(err: ScanError) -> Self {
        Error::Parse(err.into())
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::Parse(err.into())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}
