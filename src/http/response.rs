//! HTTP response writer, streaming straight to the client socket.

use crate::{
    http::types::{reason_phrase, Version},
    limits::RespLimits,
    server::connection::Socket,
    WriteBuffer,
};
use std::io::Read;
use tracing::warn;

/// Body framing announced in the response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLength {
    /// `Content-Length` is taken from the body passed to [`Response::send`].
    NotSet,
    /// The body is sent later with [`Response::send_content`].
    ///
    /// `HTTP/1.1` responses use chunked transfer encoding, `HTTP/1.0`
    /// responses are delimited by closing the connection.
    Unknown,
    Known(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Streaming,
    Complete,
}

/// HTTP response writer for one request cycle.
///
/// Headers queued with [`send_header`](Response::send_header) are kept until
/// [`send`](Response::send) writes the head. Everything after that goes
/// directly to the socket, nothing is buffered.
///
/// Build responses in order:
/// [`send_header()`](Response::send_header) and
/// [`set_content_length()`](Response::set_content_length) ->
/// [`send()`](Response::send) -> [`send_content()`](Response::send_content)
///
/// # Examples
/// ```no_run
/// # at_web::impl_demo_driver!{DemoDriver}
/// use at_web::{ContentLength, Method, Server};
///
/// let mut server = Server::builder().driver(DemoDriver).build();
///
/// server.on("/", Method::Get, |_, resp| {
///     resp.send(200, Some("text/plain"), "Hello World");
/// });
///
/// server.on("/log", Method::Get, |_, resp| {
///     resp.set_content_length(ContentLength::Unknown)
///         .send(200, Some("text/plain"), "");
///
///     for line in ["first\n", "second\n"] {
///         resp.send_content(line);
///     }
/// });
/// ```
///
/// # Panics
/// Methods check the call order in `debug` mode and panic on violations.
///
/// # Write failures
/// The first rejected write is logged and every later write is dropped. The
/// server then waits
/// [`write_error_cooldown`](crate::limits::ConnLimits::write_error_cooldown)
/// and closes the connection.
pub struct Response<'d> {
    socket: Socket<'d>,
    pub(crate) version: Version,
    headers: Vec<u8>,
    content_length: ContentLength,
    chunked: bool,
    state: ResponseState,
    download_unit: usize,
}

impl<'d> Response<'d> {
    #[inline]
    pub(crate) fn new(socket: Socket<'d>, version: Version, limits: &RespLimits) -> Self {
        Self {
            socket,
            version,
            headers: Vec::with_capacity(limits.header_capacity),
            content_length: ContentLength::NotSet,
            chunked: false,
            state: ResponseState::Clean,
            download_unit: limits.download_unit.max(1),
        }
    }

    /// Terminates an open chunked body.
    pub(crate) fn finish(&mut self) {
        if self.chunked && self.state == ResponseState::Streaming {
            let _ = self.socket.write(b"0\r\n\r\n");
            self.state = ResponseState::Complete;
        }
    }

    #[inline(always)]
    pub(crate) fn into_socket(self) -> Socket<'d> {
        self.socket
    }
}

// Public API
impl Response<'_> {
    /// Protocol version of the response, the same as the request's.
    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns `true` once [`send`](Response::send) wrote the head.
    #[inline(always)]
    pub fn is_sent(&self) -> bool {
        self.state != ResponseState::Clean
    }

    /// Queues a header for the response head.
    ///
    /// With `first`, the header goes before the ones already queued.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADERS:
    /// - `Content-Length`, `Transfer-Encoding` - use
    ///   [`set_content_length()`](Response::set_content_length)
    /// - `Content-Type` - passed to [`send()`](Response::send)
    /// - `Connection` - always `close`
    ///
    /// # Examples
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// # let mut server = at_web::Server::builder().driver(DemoDriver).build();
    /// server.on_any("/", |_, resp| {
    ///     resp.send_header("Cache-Control", "no-cache", false)
    ///         .send_header("X-Uptime", 3600, false)
    ///         .send_header("X-Request-Id", "0xA1", true)
    ///         .send(204, None, "");
    /// });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called before send()`
    #[inline]
    #[track_caller]
    pub fn send_header<V: WriteBuffer>(&mut self, name: &str, value: V, first: bool) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be called before send()"
        );

        let mut line = Vec::with_capacity(name.len() + 16);
        line.extend_from_slice(name.as_bytes());
        line.extend_from_slice(b": ");
        value.write_to(&mut line);
        line.extend_from_slice(b"\r\n");

        match first {
            true => {
                line.extend_from_slice(&self.headers);
                self.headers = line;
            }
            false => self.headers.extend_from_slice(&line),
        }
        self
    }

    /// Sets the body framing, see [`ContentLength`].
    ///
    /// # Panics
    /// Error message: `Must be called before send()`
    #[inline]
    #[track_caller]
    pub fn set_content_length(&mut self, len: ContentLength) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be called before send()"
        );

        self.content_length = len;
        self
    }

    /// Writes the response head and `body`.
    ///
    /// `content_type` defaults to `text/html`. Any numeric code is accepted,
    /// codes without a known reason phrase are sent as `Unknown`. A
    /// [`StatusCode`](crate::StatusCode) converts with `.into()`.
    ///
    /// Head layout:
    /// ```text
    /// HTTP/1.1 200 OK
    /// Content-Type: text/html
    /// Content-Length: 5                            (framing)
    /// Connection: close
    /// X-Queued: value                              (send_header)
    ///
    /// hello
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called only once`
    #[track_caller]
    pub fn send<B: AsRef<[u8]>>(&mut self, code: u16, content_type: Option<&str>, body: B) {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be called only once"
        );
        let body = body.as_ref();

        let mut head = Vec::with_capacity(self.headers.len() + 128);
        head.extend_from_slice(self.version.as_bytes());
        head.push(b' ');
        code.write_to(&mut head);
        head.push(b' ');
        head.extend_from_slice(reason_phrase(code).as_bytes());
        head.extend_from_slice(b"\r\n");

        head.extend_from_slice(b"Content-Type: ");
        head.extend_from_slice(content_type.unwrap_or("text/html").as_bytes());
        head.extend_from_slice(b"\r\n");

        if self.content_length == ContentLength::NotSet {
            self.content_length = ContentLength::Known(body.len());
        }
        match (self.content_length, self.version) {
            (ContentLength::Known(len), _) => {
                head.extend_from_slice(b"Content-Length: ");
                len.write_to(&mut head);
                head.extend_from_slice(b"\r\n");
            }
            (ContentLength::Unknown, Version::Http11) => {
                head.extend_from_slice(b"Accept-Ranges: none\r\n");
                head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
                self.chunked = true;
            }
            _ => {}
        }

        head.extend_from_slice(b"Connection: close\r\n");
        head.extend_from_slice(&self.headers);
        head.extend_from_slice(b"\r\n");

        let _ = self.socket.write(&head);
        self.state = ResponseState::Streaming;

        if !body.is_empty() {
            self.send_content(body);
        }
    }

    /// Writes more body data after [`send()`](Response::send).
    ///
    /// For chunked responses every call is one chunk and an empty `data`
    /// terminates the body. The server terminates an open chunked body after
    /// the handler returns.
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be called after send()`
    /// - `The chunked body is already terminated`
    #[track_caller]
    pub fn send_content<B: AsRef<[u8]>>(&mut self, data: B) {
        debug_assert!(
            self.state != ResponseState::Clean,
            "Must be called after send()"
        );
        debug_assert!(
            self.state != ResponseState::Complete,
            "The chunked body is already terminated"
        );
        let data = data.as_ref();

        if !self.chunked {
            for part in data.chunks(self.download_unit) {
                if self.socket.write(part).is_err() {
                    break;
                }
            }
            return;
        }

        if data.is_empty() {
            let _ = self.socket.write(b"0\r\n\r\n");
            self.state = ResponseState::Complete;
            return;
        }

        let mut chunk = Vec::with_capacity(data.len() + 12);
        chunk.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
        chunk.extend_from_slice(data);
        chunk.extend_from_slice(b"\r\n");
        let _ = self.socket.write(&chunk);
    }

    /// Asks the client for Basic credentials with a `401` response.
    ///
    /// # Examples
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// # let mut server = at_web::Server::builder().driver(DemoDriver).build();
    /// server.on_any("/admin", |req, resp| {
    ///     if !req.authenticate("admin", "1234") {
    ///         return resp.request_authentication();
    ///     }
    ///     resp.send(200, None, "<h1>Welcome</h1>");
    /// });
    /// ```
    #[track_caller]
    pub fn request_authentication(&mut self) {
        self.send_header("WWW-Authenticate", "Basic realm=\"Login Required\"", false)
            .send(401u16, None, "");
    }

    /// Sends `len` bytes from `reader` as a `200` response.
    ///
    /// A `.gz` name gets `Content-Encoding: gzip` unless `content_type`
    /// already is a gzip or binary type. Returns the number of bytes sent,
    /// less than `len` when reading failed.
    #[track_caller]
    pub fn stream_file<R: Read>(&mut self, name: &str, mut reader: R, len: usize, content_type: &str) -> usize {
        if name.ends_with(".gz")
            && content_type != "application/x-gzip"
            && content_type != "application/octet-stream"
        {
            self.send_header("Content-Encoding", "gzip", false);
        }
        self.set_content_length(ContentLength::Known(len))
            .send(200u16, Some(content_type), "");

        let mut buffer = vec![0u8; self.download_unit];
        let mut sent = 0;

        while sent < len && !self.socket.write_failed() {
            let want = (len - sent).min(buffer.len());

            match reader.read(&mut buffer[..want]) {
                Ok(0) => break,
                Ok(count) => {
                    self.send_content(&buffer[..count]);
                    sent += count;
                }
                Err(err) => {
                    warn!(file = name, error = %err, "file read failed");
                    break;
                }
            }
        }

        sent
    }
}

pub mod write {
    /// Trait for writing values into a response head.
    ///
    /// Implemented for strings, bytes, booleans, chars and integers
    /// (excluding floating-point numbers).
    ///
    /// # Example
    /// ```
    /// use at_web::WriteBuffer;
    ///
    /// struct Firmware(u8, u8);
    ///
    /// impl WriteBuffer for Firmware {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.push(b'.');
    ///         self.1.write_to(buffer);
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Appends the value's text representation to `buffer`.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => str, String, Box<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => [u8], Vec<u8>, Box<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u64), write_unsigned => u8, u16, u32, u64, usize
    }
    impl_write_buffer! {
        number(i64), write_signed => i8, i16, i32, i64, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u64) -> ([u8; 20], usize) {
        let mut buffer = [b'0'; 20];
        let mut i = 20;

        if n == 0 {
            return (buffer, 19);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }

    #[inline(always)]
    fn write_unsigned(value: u64, buffer: &mut Vec<u8>) {
        let (arr, start) = number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn write_signed(value: i64, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }

        let (arr, start) = number_to_bytes(value.unsigned_abs());
        buffer.extend_from_slice(&arr[start..]);
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::tools::*;

        #[test]
        fn values() {
            fn written<T: WriteBuffer>(value: T) -> String {
                let mut buffer = Vec::new();
                value.write_to(&mut buffer);
                str_op(&buffer).to_owned()
            }

            assert_eq!(written("text"), "text");
            assert_eq!(written(String::from("owned")), "owned");
            assert_eq!(written(b"bytes"), "bytes");
            assert_eq!(written(0u8), "0");
            assert_eq!(written(1460usize), "1460");
            assert_eq!(written(u64::MAX), "18446744073709551615");
            assert_eq!(written(-42i32), "-42");
            assert_eq!(written(i64::MIN), "-9223372036854775808");
            assert_eq!(written(true), "true");
            assert_eq!(written('é'), "é");
        }
    }
}
