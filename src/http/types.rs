//! Core HTTP protocol types and utilities

use crate::errors::ErrorKind;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// HTTP request methods
///
/// [`Method::Any`] never appears in a parsed request, it is only used when
/// registering a handler that accepts every method.
///
/// # Disabled methods
///
/// * `HEAD`, `TRACE`, `CONNECT` - rejected as a bad request
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Wildcard for handler registration
    Any,
    /// GET method - transfer a current representation of the target resource
    /// [[RFC7231, Section 4.3.1](https://tools.ietf.org/html/rfc7231#section-4.3.1)]
    Get,
    /// POST method - perform resource-specific processing on the request payload
    /// [[RFC7231, Section 4.3.3](https://tools.ietf.org/html/rfc7231#section-4.3.3)]
    Post,
    /// PUT method - replace all current representations of the target resource with the request payload
    /// [[RFC7231, Section 4.3.4](https://tools.ietf.org/html/rfc7231#section-4.3.4)]
    Put,
    /// PATCH method - apply partial modifications to a resource
    /// [[RFC5789, Section 2](https://tools.ietf.org/html/rfc5789#section-2)]
    Patch,
    /// DELETE method - remove all current representations of the target resource
    /// [[RFC7231, Section 4.3.5](https://tools.ietf.org/html/rfc7231#section-4.3.5)]
    Delete,
    /// OPTIONS method - describe the communication options for the target resource
    /// [[RFC7231, Section 4.3.7](https://tools.ietf.org/html/rfc7231#section-4.3.7)]
    Options,
}

impl Method {
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"GET" => Ok(Method::Get),
            b"POST" => Ok(Method::Post),
            b"PUT" => Ok(Method::Put),
            b"PATCH" => Ok(Method::Patch),
            b"DELETE" => Ok(Method::Delete),
            b"OPTIONS" => Ok(Method::Options),
            _ => Err(ErrorKind::InvalidMethod),
        }
    }

    /// Returns `true` if a handler registered for `self` accepts `other`.
    #[inline(always)]
    pub const fn accepts(self, other: Method) -> bool {
        matches!(self, Method::Any) || self as u8 == other as u8
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 - [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// HTTP/1.1 - [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
}

impl Version {
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok(Self::Http11),
            b"HTTP/1.0" => Ok(Self::Http10),
            _ => Err(ErrorKind::InvalidVersion),
        }
    }

    #[inline(always)]
    pub(crate) const fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Http11 => b"HTTP/1.1",
            Self::Http10 => b"HTTP/1.0",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:literal, $str:literal);
    )+) => {
        /// HTTP status codes with a known reason phrase
        ///
        /// Any `u16` can still be sent through
        /// [`Response::send`](crate::Response::send), codes missing from this
        /// table are written with the phrase `Unknown`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            /// Returns the reason phrase (e.g., `"Not Found"`).
            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            /// Maps a numeric code back to the table.
            #[inline]
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $($num => Some(StatusCode::$name),)+
                    _ => None,
                }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non-Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    UseProxy = (305, "Use Proxy");
    TemporaryRedirect = (307, "Temporary Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    PaymentRequired = (402, "Payment Required");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    ProxyAuthenticationRequired = (407, "Proxy Authentication Required");
    RequestTimeout = (408, "Request Time-out");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    /// Also sent when a request body exceeds [`ReqLimits::body_size`](crate::limits::ReqLimits::body_size)
    PayloadTooLarge = (413, "Request Entity Too Large");
    UriTooLong = (414, "Request-URI Too Large");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RangeNotSatisfiable = (416, "Requested range not satisfiable");
    ExpectationFailed = (417, "Expectation Failed");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Time-out");
    HttpVersionNotSupported = (505, "HTTP Version not supported");
}

impl From<StatusCode> for u16 {
    #[inline(always)]
    fn from(code: StatusCode) -> u16 {
        code as u16
    }
}

/// Returns the reason phrase for any numeric status code.
///
/// ```
/// assert_eq!(at_web::reason_phrase(404), "Not Found");
/// assert_eq!(at_web::reason_phrase(299), "Unknown");
/// ```
#[inline]
pub fn reason_phrase(code: u16) -> &'static str {
    match StatusCode::from_u16(code) {
        Some(status) => status.reason(),
        None => "Unknown",
    }
}

// CONTENT TYPE

/// Content type for a served file, chosen by extension.
pub fn content_type_for(path: &str) -> &'static str {
    #[rustfmt::skip]
    const TABLE: [(&str, &str); 21] = [
        (".html",     "text/html"),
        (".htm",      "text/html"),
        (".css",      "text/css"),
        (".txt",      "text/plain"),
        (".js",       "application/javascript"),
        (".png",      "image/png"),
        (".gif",      "image/gif"),
        (".jpg",      "image/jpeg"),
        (".ico",      "image/x-icon"),
        (".svg",      "image/svg+xml"),
        (".ttf",      "application/x-font-ttf"),
        (".otf",      "application/x-font-opentype"),
        (".woff",     "application/font-woff"),
        (".woff2",    "application/font-woff2"),
        (".eot",      "application/vnd.ms-fontobject"),
        (".sfnt",     "application/font-sfnt"),
        (".xml",      "text/xml"),
        (".pdf",      "application/pdf"),
        (".zip",      "application/zip"),
        (".gz",       "application/x-gzip"),
        (".appcache", "text/cache-manifest"),
    ];

    TABLE
        .iter()
        .find(|(ext, _)| path.ends_with(ext))
        .map(|(_, content_type)| *content_type)
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<Method>); 10] = [
            (b"GET",     Some(Method::Get)),
            (b"POST",    Some(Method::Post)),
            (b"PUT",     Some(Method::Put)),
            (b"PATCH",   Some(Method::Patch)),
            (b"DELETE",  Some(Method::Delete)),
            (b"OPTIONS", Some(Method::Options)),

            (b"HEAD",    None),
            (b"get",     None),
            (b"GETT",    None),
            (b"",        None),
        ];

        for (src, expected) in cases {
            match expected {
                Some(method) => assert_eq!(Method::from_bytes(src), Ok(method)),
                None => assert_eq!(Method::from_bytes(src), Err(ErrorKind::InvalidMethod)),
            }
        }
    }

    #[test]
    fn method_accepts() {
        assert!(Method::Any.accepts(Method::Post));
        assert!(Method::Get.accepts(Method::Get));
        assert!(!Method::Get.accepts(Method::Post));
    }

    #[test]
    fn version() {
        assert_eq!(Version::from_bytes(b"HTTP/1.1"), Ok(Version::Http11));
        assert_eq!(Version::from_bytes(b"HTTP/1.0"), Ok(Version::Http10));
        assert_eq!(
            Version::from_bytes(b"HTTP/2.0"),
            Err(ErrorKind::InvalidVersion)
        );
    }

    #[test]
    fn reason() {
        #[rustfmt::skip]
        let cases = [
            (200, "OK"),
            (401, "Unauthorized"),
            (404, "Not Found"),
            (500, "Internal Server Error"),
            (299, "Unknown"),
            (0,   "Unknown"),
        ];

        for (code, phrase) in cases {
            assert_eq!(reason_phrase(code), phrase);
        }
        assert_eq!(u16::from(StatusCode::NotFound), 404);
    }

    #[test]
    fn content_type() {
        #[rustfmt::skip]
        let cases = [
            ("/index.htm",      "text/html"),
            ("/font.woff2",     "application/font-woff2"),
            ("/app.js.gz",      "application/x-gzip"),
            ("/blob",           "application/octet-stream"),
        ];

        for (path, expected) in cases {
            assert_eq!(content_type_for(path), expected);
        }
    }

    #[test]
    fn numbers() {
        assert_eq!(slice_to_usize(b"1460"), Some(1460));
        assert_eq!(slice_to_usize(b"0"), Some(0));
        assert_eq!(slice_to_usize(b""), None);
        assert_eq!(slice_to_usize(b"12a"), None);
        assert_eq!(slice_to_usize(b"99999999999999999999999"), None);
    }
}
