use crate::{query, Version};
use std::{error, fmt};

/// Reasons a request cycle ended without a normal response.
///
/// None of these are retried, the socket is released on every one of them.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// No byte arrived within the wait budget.
    Timeout,
    /// The client closed the link before the request was complete.
    Disconnected,

    InvalidMethod,
    InvalidUrl,
    Query(query::Error),
    InvalidVersion,

    InvalidHeader,
    /// The request line did not fit in the lookahead window.
    UriTooLong,
    /// A header line or part header line did not fit in the lookahead window.
    LineTooLong,
    /// Request line or headers were not valid UTF-8.
    InvalidEncoding,
    InvalidContentLength,

    BodyTooLarge,
    /// Missing boundary, boundary longer than the lookahead window, or broken
    /// part framing.
    InvalidMultipart,

    /// The driver rejected a write.
    WriteFailed,
}

macro_rules! http_errors {
    ($($name:ident: $status_code:literal; )*) => {
        /// Minimal response sent before closing when
        /// [`ConnLimits::error_responses`](crate::limits::ConnLimits::error_responses)
        /// is enabled. `None` for conditions where the client can no longer
        /// be reached.
        pub(crate) const fn as_http(&self, version: Version) -> Option<&'static [u8]> {
            let bytes = match (self, version) { $(
                (Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "Connection: close\r\n",
                    "Content-Length: 0\r\n\r\n",
                ),
                (Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "Connection: close\r\n",
                    "Content-Length: 0\r\n\r\n",
                ),
            )*
                (Self::Disconnected | Self::WriteFailed, _) => return None,
            };

            Some(bytes.as_bytes())
        }
    };
}

impl ErrorKind {
    http_errors! {
        Timeout: "408 Request Time-out";

        InvalidMethod: "400 Bad Request";
        InvalidUrl: "400 Bad Request";
        Query: "400 Bad Request";
        InvalidVersion: "505 HTTP Version not supported";

        InvalidHeader: "400 Bad Request";
        UriTooLong: "414 Request-URI Too Large";
        LineTooLong: "431 Request Header Fields Too Large";
        InvalidEncoding: "400 Bad Request";
        InvalidContentLength: "400 Bad Request";

        BodyTooLarge: "413 Request Entity Too Large";
        InvalidMultipart: "400 Bad Request";
    }
}

impl error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timed out waiting for the client"),
            ErrorKind::Disconnected => write!(f, "client disconnected"),
            ErrorKind::InvalidMethod => write!(f, "invalid HTTP method"),
            ErrorKind::InvalidUrl => write!(f, "invalid URL"),
            ErrorKind::Query(err) => write!(f, "invalid arguments: {err}"),
            ErrorKind::InvalidVersion => write!(f, "unsupported HTTP version"),
            ErrorKind::InvalidHeader => write!(f, "invalid header line"),
            ErrorKind::UriTooLong => write!(f, "request line exceeds lookahead window"),
            ErrorKind::LineTooLong => write!(f, "header line exceeds lookahead window"),
            ErrorKind::InvalidEncoding => write!(f, "request head is not valid UTF-8"),
            ErrorKind::InvalidContentLength => write!(f, "invalid Content-Length"),
            ErrorKind::BodyTooLarge => write!(f, "request body too large"),
            ErrorKind::InvalidMultipart => write!(f, "malformed multipart body"),
            ErrorKind::WriteFailed => write!(f, "socket write failed"),
        }
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}

impl From<simdutf8::basic::Utf8Error> for ErrorKind {
    fn from(_: simdutf8::basic::Utf8Error) -> Self {
        ErrorKind::InvalidEncoding
    }
}
