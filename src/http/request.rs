use crate::{
    errors::ErrorKind,
    http::types::slice_to_usize,
    query::Query,
    server::connection::HttpConnection,
    Method, Version,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use memchr::memchr;

/// Parsed HTTP request, rebuilt for every cycle.
///
/// # Input data requirements
///
/// #### Character encoding
///
/// The request line and all headers must be `UTF-8`, otherwise the request is
/// rejected. The body may be arbitrary bytes.
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: Carriage return + line feed (`"\r\n"`), exactly this sequence
/// ---
/// - `[METHOD]`: `GET`, `POST`, `PUT`, `PATCH`, `DELETE` or `OPTIONS`
/// - `[PATH]`: must start with `/`, may be followed by `?` and a query string
///
/// ## First line
/// ```text
/// [METHOD] SP [PATH] SP "HTTP/1." ("0" / "1") CRLF
/// ```
///
/// ## Header
/// ```text
/// [NAME] ":" [VALUE] CRLF
/// ```
/// Surrounding whitespace of the name and the value is trimmed. Only names on
/// the allow-list set with [`collect_headers`](crate::Server::collect_headers)
/// are kept (matched case-insensitively, `Authorization` is always on the
/// list). `Host`, `Content-Length` and `Content-Type` are always inspected.
///
/// Each line, CRLF included, must fit in
/// [`ReqLimits::lookahead_size`](crate::limits::ReqLimits::lookahead_size).
///
/// ## Arguments
///
/// Query string arguments come first, followed by arguments from a
/// urlencoded body or multipart fields. Duplicates are kept, name lookup
/// returns the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) version: Version,

    pub(crate) args: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, Option<String>)>,

    pub(crate) host: Option<String>,
    pub(crate) content_length: usize,
    pub(crate) content_type: Option<String>,
}

impl Request {
    #[inline]
    pub(crate) fn new(header_keys: &[String]) -> Self {
        Self {
            method: Method::Get,
            uri: String::new(),
            version: Version::Http11,

            args: Vec::new(),
            headers: header_keys.iter().map(|key| (key.clone(), None)).collect(),

            host: None,
            content_length: 0,
            content_type: None,
        }
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Path without the query string, not decoded.
    #[inline(always)]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Value of the last argument called `name`.
    ///
    /// For `/?a=1&a=2`, `arg("a")` is `Some("2")`.
    #[inline]
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[inline]
    pub fn arg_at(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(|(_, value)| value.as_str())
    }

    #[inline]
    pub fn arg_name(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(|(key, _)| key.as_str())
    }

    /// All arguments in arrival order.
    #[inline(always)]
    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    #[inline]
    pub fn has_arg(&self, name: &str) -> bool {
        self.args.iter().any(|(key, _)| key == name)
    }

    /// Value of a collected header, `None` if absent or not on the allow-list.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_deref())
    }

    #[inline]
    pub fn header_at(&self, index: usize) -> Option<&str> {
        self.headers.get(index).and_then(|(_, value)| value.as_deref())
    }

    #[inline]
    pub fn header_name(&self, index: usize) -> Option<&str> {
        self.headers.get(index).map(|(key, _)| key.as_str())
    }

    /// Number of allow-listed header names, present or not.
    #[inline(always)]
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    #[inline]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// The `Host` header, collected regardless of the allow-list.
    #[inline]
    pub fn host_header(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// `Content-Length` of the request, `0` when absent.
    #[inline(always)]
    pub const fn content_length(&self) -> usize {
        self.content_length
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Checks `Authorization: Basic` credentials against `username` and `password`.
    ///
    /// Pair with [`Response::request_authentication`](crate::Response::request_authentication)
    /// to challenge the client when this returns `false`.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let Some(value) = self.header("Authorization") else {
            return false;
        };
        let Some(encoded) = value
            .get(..6)
            .filter(|scheme| scheme.eq_ignore_ascii_case("Basic "))
            .map(|_| value[6..].trim())
        else {
            return false;
        };

        let Ok(decoded) = STANDARD.decode(encoded) else {
            return false;
        };

        let expected_len = username.len() + 1 + password.len();
        decoded.len() == expected_len
            && decoded.starts_with(username.as_bytes())
            && decoded[username.len()] == b':'
            && decoded.ends_with(password.as_bytes())
    }
}

impl HttpConnection<'_, '_> {
    /// Reads the request line and the header block.
    pub(crate) async fn parse_head(&mut self, request: &mut Request) -> Result<(), ErrorKind> {
        let budget = self.conn_limits.request_wait;

        let line = match self.read_line(budget).await {
            Err(ErrorKind::LineTooLong) => return Err(ErrorKind::UriTooLong),
            line => line?,
        };
        request.parse_first_line(&line, self.req_limits.arg_count)?;

        loop {
            let line = self.read_line(budget).await?;
            if line.is_empty() {
                break;
            }

            let (name, value) = split_header(&line)?;
            request.collect_header(name, value)?;
        }

        Ok(())
    }
}

// Parse first line
impl Request {
    fn parse_first_line(&mut self, line: &str, arg_limit: usize) -> Result<(), ErrorKind> {
        let bytes = line.as_bytes();

        let method_end = memchr(b' ', bytes).ok_or(ErrorKind::InvalidMethod)?;
        self.method = Method::from_bytes(&bytes[..method_end])?;

        let target_start = method_end + 1;
        let target_end = memchr(b' ', &bytes[target_start..])
            .map(|pos| target_start + pos)
            .ok_or(ErrorKind::InvalidVersion)?;

        let target = &line[target_start..target_end];
        if !target.starts_with('/') {
            return Err(ErrorKind::InvalidUrl);
        }
        self.version = Version::from_bytes(&bytes[target_end + 1..])?;

        match target.split_once('?') {
            Some((path, query)) => {
                self.uri = path.to_owned();
                if !query.is_empty() {
                    Query::parse_into(&mut self.args, query.as_bytes(), arg_limit)?;
                }
            }
            None => self.uri = target.to_owned(),
        }

        Ok(())
    }
}

// Parse headers
impl Request {
    pub(crate) fn collect_header(&mut self, name: &str, value: &str) -> Result<(), ErrorKind> {
        if name.eq_ignore_ascii_case("Host") {
            self.host = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length =
                slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?;
        } else if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = Some(value.to_owned());
        }

        if let Some((_, slot)) = self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            *slot = Some(value.to_owned());
        }

        Ok(())
    }
}

/// Splits `Name: value` at the first colon, both sides trimmed.
#[inline]
pub(crate) fn split_header(line: &str) -> Result<(&str, &str), ErrorKind> {
    let colon = memchr(b':', line.as_bytes()).ok_or(ErrorKind::InvalidHeader)?;

    let name = line[..colon].trim();
    if name.is_empty() {
        return Err(ErrorKind::InvalidHeader);
    }

    Ok((name, line[colon + 1..].trim()))
}
