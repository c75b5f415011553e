//! Request body parsing: `multipart/form-data` uploads and form bodies.

use crate::{
    errors::ErrorKind,
    http::request::split_header,
    query::{self, Query},
    server::connection::HttpConnection,
    Request,
};
use tracing::{debug, warn};

/// Stage of a file upload, as reported to the upload handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// A file part begins, the buffer is empty.
    Start,
    /// The buffer holds the next chunk of the file.
    Write,
    /// The part is complete, [`Upload::total_size`] is final.
    End,
    /// The client went away or the body was malformed mid-file.
    Aborted,
}

/// State of the file part currently being received.
///
/// One instance lives in the server and is reused for every file part. Its
/// buffer is allocated once with
/// [`ReqLimits::upload_buffer_size`](crate::limits::ReqLimits::upload_buffer_size)
/// bytes and never grows.
///
/// For a 5000 byte file with a 2048 byte buffer the handler sees:
///
/// | status | `current_size` | `total_size` |
/// |--------|----------------|--------------|
/// | `Start` | 0 | 0 |
/// | `Write` | 2048 | 0 |
/// | `Write` | 2048 | 2048 |
/// | `Write` | 904 | 4096 |
/// | `End` | 0 | 5000 |
#[derive(Debug)]
pub struct Upload {
    pub(crate) status: UploadStatus,
    pub(crate) name: String,
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) total_size: usize,

    buffer: Vec<u8>,
    capacity: usize,
}

impl Upload {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Upload buffer capacity must be non-zero");

        Self {
            status: UploadStatus::End,
            name: String::new(),
            filename: String::new(),
            content_type: String::new(),
            total_size: 0,

            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn begin(&mut self, name: String, filename: String, content_type: String) {
        self.status = UploadStatus::Start;
        self.name = name;
        self.filename = filename;
        self.content_type = content_type;
        self.total_size = 0;
        self.buffer.clear();
    }

    /// Returns `true` once the buffer is full and must be flushed.
    #[inline]
    pub(crate) fn write_byte(&mut self, byte: u8) -> bool {
        debug_assert!(self.buffer.len() < self.capacity);

        self.buffer.push(byte);
        self.buffer.len() == self.capacity
    }

    #[inline]
    pub(crate) fn consume(&mut self) {
        self.total_size += self.buffer.len();
        self.buffer.clear();
    }
}

// Public API
impl Upload {
    #[inline(always)]
    pub const fn status(&self) -> UploadStatus {
        self.status
    }

    /// Form field name of the part.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Declared content type of the part, `text/plain` when not sent.
    #[inline(always)]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Bytes handed to the handler before the current chunk.
    #[inline(always)]
    pub const fn total_size(&self) -> usize {
        self.total_size
    }

    #[inline(always)]
    pub fn current_size(&self) -> usize {
        self.buffer.len()
    }

    /// The current chunk, valid for [`UploadStatus::Write`].
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }
}

struct PartHead {
    name: String,
    filename: Option<String>,
    content_type: String,
}

impl HttpConnection<'_, '_> {
    /// Reads the request body, if any.
    ///
    /// File parts of a multipart body are reported to `sink`, everything else
    /// ends up in the request arguments.
    pub(crate) async fn parse_body(
        &mut self,
        request: &mut Request,
        upload: &mut Upload,
        sink: &mut (dyn FnMut(&Request, &Upload) + Send),
    ) -> Result<(), ErrorKind> {
        match request.content_type.as_deref() {
            Some(value) if has_prefix(value, "multipart/form-data") => {
                let boundary = boundary_of(value)?.to_owned();
                let result = self.parse_multipart(request, upload, sink, &boundary).await;

                self.body_left = None;
                result
            }
            _ if request.content_length > 0 => self.parse_form(request).await,
            _ => Ok(()),
        }
    }

    async fn parse_form(&mut self, request: &mut Request) -> Result<(), ErrorKind> {
        let len = request.content_length;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }

        let mut body = Vec::with_capacity(len);
        self.socket
            .read_exact(&mut body, len, self.conn_limits.body_wait)
            .await?;

        let limit = self.req_limits.arg_count;
        let urlencoded = match request.content_type.as_deref() {
            Some(value) => has_prefix(value, "application/x-www-form-urlencoded"),
            None => true,
        };

        match urlencoded {
            true => match Query::parse_into(&mut request.args, &body, limit) {
                Ok(()) | Err(query::Error::Empty) => Ok(()),
                Err(err) => Err(err.into()),
            },
            false => push_arg(request, "plain".to_owned(), &body, limit),
        }
    }

    async fn parse_multipart(
        &mut self,
        request: &mut Request,
        upload: &mut Upload,
        sink: &mut (dyn FnMut(&Request, &Upload) + Send),
        boundary: &str,
    ) -> Result<(), ErrorKind> {
        let delimiter = format!("\r\n--{boundary}");
        if delimiter.len() > self.ring.capacity() {
            return Err(ErrorKind::InvalidMultipart);
        }

        if request.content_length > 0 {
            self.body_left = Some(request.content_length);
        }
        let budget = self.conn_limits.body_wait;

        // Preamble
        self.ring.reset();
        while !self.ring.ends_with(&delimiter.as_bytes()[2..]) {
            let byte = self.next_byte(budget).await?;
            self.ring.push(byte);
        }

        loop {
            let tail = [self.next_byte(budget).await?, self.next_byte(budget).await?];
            match &tail {
                b"--" => break,
                b"\r\n" => {}
                _ => return Err(ErrorKind::InvalidMultipart),
            }

            let head = self.parse_part_head().await?;
            match head.filename {
                Some(filename) => {
                    let filename = match filename == "blob" {
                        true => request.arg("filename").map(str::to_owned).unwrap_or(filename),
                        false => filename,
                    };
                    upload.begin(head.name, filename, head.content_type);

                    self.read_file_part(request, upload, sink, delimiter.as_bytes())
                        .await?
                }
                None => {
                    let value = self.read_field_part(delimiter.as_bytes()).await?;
                    push_arg(request, head.name, &value, self.req_limits.arg_count)?;
                }
            }
        }

        Ok(())
    }

    async fn parse_part_head(&mut self) -> Result<PartHead, ErrorKind> {
        let budget = self.conn_limits.body_wait;
        let mut disposition = None;
        let mut content_type = None;

        loop {
            let line = self.read_line(budget).await?;
            if line.is_empty() {
                break;
            }

            let (name, value) = split_header(&line)?;
            if name.eq_ignore_ascii_case("Content-Disposition") {
                disposition = Some(disposition_params(value)?);
            } else if name.eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value.to_owned());
            }
        }

        let (name, filename) = disposition.ok_or(ErrorKind::InvalidMultipart)?;
        Ok(PartHead {
            name,
            filename,
            content_type: content_type.unwrap_or_else(|| "text/plain".to_owned()),
        })
    }

    async fn read_file_part(
        &mut self,
        request: &Request,
        upload: &mut Upload,
        sink: &mut (dyn FnMut(&Request, &Upload) + Send),
        delimiter: &[u8],
    ) -> Result<(), ErrorKind> {
        debug!(name = upload.name(), filename = upload.filename(), "upload started");
        sink(request, upload);

        let mut commit = |byte: u8| -> Result<(), ErrorKind> {
            if upload.write_byte(byte) {
                upload.status = UploadStatus::Write;
                sink(request, upload);
                upload.consume();
            }
            Ok(())
        };

        let result = self.stream_part(delimiter, &mut commit).await;
        if let Err(err) = result {
            warn!(filename = upload.filename(), error = %err, "upload aborted");
            upload.status = UploadStatus::Aborted;
            sink(request, upload);
            return Err(err);
        }

        if upload.current_size() > 0 {
            upload.status = UploadStatus::Write;
            sink(request, upload);
            upload.consume();
        }

        upload.status = UploadStatus::End;
        sink(request, upload);
        debug!(filename = upload.filename(), size = upload.total_size(), "upload finished");

        Ok(())
    }

    async fn read_field_part(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, ErrorKind> {
        let limit = self.req_limits.field_size;
        let mut value = Vec::new();

        let mut commit = |byte: u8| -> Result<(), ErrorKind> {
            if value.len() >= limit {
                return Err(ErrorKind::BodyTooLarge);
            }
            value.push(byte);
            Ok(())
        };
        self.stream_part(delimiter, &mut commit).await?;

        Ok(value)
    }

    /// Streams part data through the lookahead window up to `delimiter`.
    ///
    /// A byte is committed only once it can no longer be the start of the
    /// delimiter: when it falls out of the full window, or when the
    /// delimiter matched and the rest of the window is flushed.
    async fn stream_part(
        &mut self,
        delimiter: &[u8],
        commit: &mut (dyn FnMut(u8) -> Result<(), ErrorKind> + Send),
    ) -> Result<(), ErrorKind> {
        let budget = self.conn_limits.body_wait;
        self.ring.reset();

        loop {
            let byte = self.next_byte(budget).await?;

            if let Some(evicted) = self.ring.push(byte) {
                commit(evicted)?;
            }
            if self.ring.ends_with(delimiter) {
                break;
            }
        }

        self.line.clear();
        self.ring.extract_prefix(delimiter.len(), &mut self.line);
        self.line.iter().try_for_each(|&byte| commit(byte))
    }
}

fn push_arg(request: &mut Request, name: String, value: &[u8], limit: usize) -> Result<(), ErrorKind> {
    if request.args.len() >= limit {
        return Err(query::Error::OverLimit(limit).into());
    }

    request
        .args
        .push((name, String::from_utf8_lossy(value).into_owned()));
    Ok(())
}

#[inline]
fn has_prefix(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

/// `multipart/form-data; boundary="abc"` gives `abc`.
fn boundary_of(content_type: &str) -> Result<&str, ErrorKind> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .filter(|boundary| !boundary.is_empty())
        .ok_or(ErrorKind::InvalidMultipart)
}

/// `form-data; name="file"; filename="a.txt"` gives the name and filename.
fn disposition_params(value: &str) -> Result<(String, Option<String>), ErrorKind> {
    let mut params = value.split(';');
    if !params.next().is_some_and(|kind| kind.trim().eq_ignore_ascii_case("form-data")) {
        return Err(ErrorKind::InvalidMultipart);
    }

    let (mut name, mut filename) = (String::new(), None);
    for (key, value) in params.filter_map(|param| param.trim().split_once('=')) {
        let value = unquote(value.trim());

        match key.trim() {
            key if key.eq_ignore_ascii_case("name") => name = value.to_owned(),
            key if key.eq_ignore_ascii_case("filename") => filename = Some(value.to_owned()),
            _ => {}
        }
    }

    Ok((name, filename))
}
