//! Handler registry: URI matching, dispatch and static content.

use crate::{content_type_for, Method, Request, Response, Upload};
use std::{
    fmt,
    fs::File,
    io::Read,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// Request handler callback.
pub type HandlerFn = Box<dyn FnMut(&Request, &mut Response<'_>) + Send>;

/// Upload callback, called for every [`UploadStatus`](crate::UploadStatus) event.
pub type UploadFn = Box<dyn FnMut(&Request, &Upload) + Send>;

/// One entry of the handler registry.
///
/// Entries are checked in registration order and the first one whose
/// [`can_handle`](RequestHandler::can_handle) is `true` serves the request.
pub enum RequestHandler {
    /// Callbacks bound to a URI pattern.
    ///
    /// A pattern ending in `/*` matches every URI starting with the part
    /// before `/*`, any other pattern must be equal to the URI.
    Function {
        uri: String,
        method: Method,
        handler: HandlerFn,
        upload: Option<UploadFn>,
    },
    /// Files from a [`ContentSource`], `GET` only.
    Static(StaticFiles),
}

impl RequestHandler {
    /// Entry for a callback, see [`Server::on`](crate::Server::on).
    pub fn function<F>(uri: &str, method: Method, handler: F) -> Self
    where
        F: FnMut(&Request, &mut Response<'_>) + Send + 'static,
    {
        RequestHandler::Function {
            uri: uri.to_owned(),
            method,
            handler: Box::new(handler),
            upload: None,
        }
    }

    /// Binds an upload callback to a [`Function`](RequestHandler::Function) entry.
    ///
    /// Has no effect on [`Static`](RequestHandler::Static) entries.
    pub fn with_upload<U>(mut self, upload_fn: U) -> Self
    where
        U: FnMut(&Request, &Upload) + Send + 'static,
    {
        if let RequestHandler::Function { upload, .. } = &mut self {
            *upload = Some(Box::new(upload_fn));
        }
        self
    }

    /// Entry serving `source` under `uri`, see [`Server::serve_static`](crate::Server::serve_static).
    pub fn static_files<S>(uri: &str, source: S, cache_header: Option<&str>) -> Self
    where
        S: ContentSource + 'static,
    {
        RequestHandler::Static(StaticFiles {
            uri: uri.to_owned(),
            source: Box::new(source),
            cache_header: cache_header.map(str::to_owned),
        })
    }

    pub fn can_handle(&self, method: Method, uri: &str) -> bool {
        match self {
            RequestHandler::Function { uri: pattern, method: accepted, .. } => {
                accepted.accepts(method) && uri_matches(pattern, uri)
            }
            RequestHandler::Static(files) => method == Method::Get && files.matches(uri),
        }
    }

    /// `true` if an upload callback is bound and the entry accepts `POST` for `uri`.
    pub fn can_upload(&self, uri: &str) -> bool {
        match self {
            RequestHandler::Function { upload: Some(_), .. } => self.can_handle(Method::Post, uri),
            _ => false,
        }
    }

    /// Serves the request, `false` if this entry could not.
    pub fn handle(&mut self, request: &Request, response: &mut Response<'_>) -> bool {
        if !self.can_handle(request.method(), request.uri()) {
            return false;
        }

        match self {
            RequestHandler::Function { handler, .. } => {
                handler(request, response);
                true
            }
            RequestHandler::Static(files) => files.handle(request, response),
        }
    }

    pub fn upload(&mut self, request: &Request, upload: &Upload) {
        if !self.can_upload(request.uri()) {
            return;
        }

        if let RequestHandler::Function { upload: Some(upload_fn), .. } = self {
            upload_fn(request, upload);
        }
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestHandler::Function { uri, method, upload, .. } => f
                .debug_struct("Function")
                .field("uri", uri)
                .field("method", method)
                .field("upload", &upload.is_some())
                .finish_non_exhaustive(),
            RequestHandler::Static(files) => f.debug_tuple("Static").field(files).finish(),
        }
    }
}

#[inline]
fn uri_matches(pattern: &str, uri: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => uri.starts_with(prefix),
        None => pattern == uri,
    }
}

/// An opened file of a [`ContentSource`].
pub struct Content {
    /// File name, used to pick the content type.
    pub name: String,
    pub len: usize,
    pub reader: Box<dyn Read + Send>,
}

/// Storage the static handler reads from.
///
/// # Examples
/// ```
/// use at_web::{Content, ContentSource};
///
/// struct Embedded;
///
/// impl ContentSource for Embedded {
///     fn is_file(&self) -> bool {
///         false
///     }
///
///     fn open(&self, path: &str) -> Option<Content> {
///         let data: &'static [u8] = match path {
///             "index.htm" => b"<h1>Modem</h1>",
///             "style.css" => b"h1 { color: red }",
///             _ => return None,
///         };
///
///         Some(Content { name: path.to_owned(), len: data.len(), reader: Box::new(data) })
///     }
/// }
/// ```
pub trait ContentSource: Send {
    /// `true` when the source is a single file rather than a directory.
    fn is_file(&self) -> bool;

    /// Opens `path`, relative to the source root. Single-file sources
    /// receive an empty path.
    fn open(&self, path: &str) -> Option<Content>;
}

/// [`ContentSource`] over a file or a directory of the local filesystem.
#[derive(Debug, Clone)]
pub struct FsContent {
    root: PathBuf,
}

impl FsContent {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ContentSource for FsContent {
    fn is_file(&self) -> bool {
        self.root.is_file()
    }

    fn open(&self, path: &str) -> Option<Content> {
        let mut full = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(name) => full.push(name),
                Component::CurDir => {}
                _ => return None,
            }
        }

        let file = File::open(&full).ok()?;
        let metadata = file.metadata().ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(Content {
            name: full.to_string_lossy().into_owned(),
            len: usize::try_from(metadata.len()).ok()?,
            reader: Box::new(file),
        })
    }
}

/// Static content bound to a URI, see [`RequestHandler::Static`].
pub struct StaticFiles {
    uri: String,
    source: Box<dyn ContentSource>,
    cache_header: Option<String>,
}

impl StaticFiles {
    fn matches(&self, uri: &str) -> bool {
        match self.source.is_file() {
            true => uri == self.uri,
            false => uri.starts_with(&self.uri),
        }
    }

    fn handle(&mut self, request: &Request, response: &mut Response<'_>) -> bool {
        let is_file = self.source.is_file();

        let mut path = match is_file {
            true => String::new(),
            false => request.uri()[self.uri.len()..]
                .trim_start_matches('/')
                .to_owned(),
        };
        if !stays_below_root(&path) {
            debug!(uri = request.uri(), "path traversal rejected");
            return false;
        }
        if !is_file && (path.is_empty() || path.ends_with('/')) {
            path.push_str("index.htm");
        }

        // A missing file may exist compressed
        let (content, compressed_fallback) = match self.source.open(&path) {
            Some(content) => (content, false),
            None if !is_file && !path.ends_with(".gz") => {
                match self.source.open(&format!("{path}.gz")) {
                    Some(content) => (content, true),
                    None => return false,
                }
            }
            None => return false,
        };

        let type_name = match compressed_fallback {
            true => content.name.strip_suffix(".gz").unwrap_or(&content.name),
            false => &content.name,
        };
        let content_type = content_type_for(type_name);

        if let Some(value) = &self.cache_header {
            response.send_header("Cache-Control", value.as_str(), false);
        }
        response.stream_file(&content.name, content.reader, content.len, content_type);
        true
    }
}

/// `true` when every `/` segment of `path` names an entry below the root.
///
/// `\` and `:` are rejected on every platform: on Windows they start a new
/// component or a drive prefix.
fn stays_below_root(path: &str) -> bool {
    path.split('/').all(|segment| {
        !segment.contains(['\\', ':'])
            && Path::new(segment)
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
    })
}

impl fmt::Debug for StaticFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticFiles")
            .field("uri", &self.uri)
            .field("is_file", &self.source.is_file())
            .field("cache_header", &self.cache_header)
            .finish()
    }
}

/// Ordered handler registry with the not-found and upload fallbacks.
#[derive(Default)]
pub(crate) struct Router {
    handlers: Vec<RequestHandler>,
    pub(crate) not_found: Option<HandlerFn>,
    pub(crate) file_upload: Option<UploadFn>,
}

impl Router {
    #[inline]
    pub(crate) fn add(&mut self, handler: RequestHandler) {
        self.handlers.push(handler);
    }

    /// Index of the first entry that can serve the request.
    #[inline]
    pub(crate) fn select(&self, method: Method, uri: &str) -> Option<usize> {
        self.handlers
            .iter()
            .position(|handler| handler.can_handle(method, uri))
    }

    /// Routes an upload event to the selected entry, or to the global
    /// upload callback when that entry takes no uploads.
    pub(crate) fn upload(&mut self, selected: Option<usize>, request: &Request, upload: &Upload) {
        let handler = selected
            .and_then(|index| self.handlers.get_mut(index))
            .filter(|handler| handler.can_upload(request.uri()));

        match (handler, self.file_upload.as_mut()) {
            (Some(handler), _) => handler.upload(request, upload),
            (None, Some(upload_fn)) => upload_fn(request, upload),
            (None, None) => {}
        }
    }

    pub(crate) fn dispatch(&mut self, selected: Option<usize>, request: &Request, response: &mut Response<'_>) {
        let handled = selected
            .and_then(|index| self.handlers.get_mut(index))
            .is_some_and(|handler| handler.handle(request, response));
        if handled {
            return;
        }

        debug!(uri = request.uri(), "no handler");
        match self.not_found.as_mut() {
            Some(not_found) => not_found(request, response),
            None => response.send(404u16, Some("text/html"), format!("Not found: {}", request.uri())),
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("handlers", &self.handlers)
            .field("not_found", &self.not_found.is_some())
            .field("file_upload", &self.file_upload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limits::RespLimits,
        server::{connection::test_socket, driver::mock::MockDriver},
        UploadStatus, Version,
    };
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    fn request(method: Method, uri: &str) -> Request {
        let mut request = Request::new(&[]);
        request.method = method;
        request.uri = uri.to_owned();
        request
    }

    fn dispatched(router: &mut Router, method: Method, uri: &str) -> String {
        let request = request(method, uri);
        let selected = router.select(method, uri);

        let mut driver = MockDriver::with_request("");
        {
            let socket = test_socket(&mut driver);
            let mut resp = Response::new(socket, Version::Http11, &RespLimits::default());
            router.dispatch(selected, &request, &mut resp);
            resp.finish();
        }
        driver.output_str()
    }

    fn reply(body: &'static str) -> impl FnMut(&Request, &mut Response<'_>) + Send {
        move |_, resp| resp.send(200u16, Some("text/plain"), body)
    }

    #[test]
    fn uri_patterns() {
        #[rustfmt::skip]
        let cases = [
            ("/",         "/",            true),
            ("/led",      "/led",         true),
            ("/led",      "/led/",        false),
            ("/led",      "/LED",         false),
            ("/api/*",    "/api/state",   true),
            ("/api/*",    "/api",         true),
            ("/api/*",    "/apix",        true),
            ("/api/*",    "/ap",          false),
            ("/*",        "/anything",    true),
        ];

        for (pattern, uri, expected) in cases {
            assert_eq!(uri_matches(pattern, uri), expected, "{pattern} {uri}");
        }
    }

    #[test]
    fn method_matching() {
        let handler = RequestHandler::function("/led", Method::Post, |_, _| {});
        assert!(handler.can_handle(Method::Post, "/led"));
        assert!(!handler.can_handle(Method::Get, "/led"));

        let handler = RequestHandler::function("/led", Method::Any, |_, _| {});
        for method in [Method::Get, Method::Post, Method::Delete, Method::Options] {
            assert!(handler.can_handle(method, "/led"));
        }
    }

    #[test]
    fn first_registered_wins() {
        let mut router = Router::default();
        router.add(RequestHandler::function("/api/*", Method::Any, reply("wildcard")));
        router.add(RequestHandler::function("/api/state", Method::Get, reply("exact")));

        assert_eq!(router.select(Method::Get, "/api/state"), Some(0));
        assert!(dispatched(&mut router, Method::Get, "/api/state").ends_with("\r\n\r\nwildcard"));
    }

    #[test]
    fn not_found() {
        let mut router = Router::default();
        router.add(RequestHandler::function("/", Method::Get, reply("root")));

        let output = dispatched(&mut router, Method::Post, "/");
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\n"));
        assert!(output.ends_with("\r\n\r\nNot found: /"));

        router.not_found = Some(Box::new(|req: &Request, resp: &mut Response<'_>| {
            resp.send(404u16, Some("text/plain"), format!("missing {}", req.uri()))
        }));
        assert!(dispatched(&mut router, Method::Get, "/nope").ends_with("missing /nope"));
    }

    #[test]
    fn upload_routing() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let record = |tag: &'static str| {
            let events = events.clone();
            move |_: &Request, upload: &Upload| events.lock().unwrap().push((tag, upload.status()))
        };

        let mut router = Router::default();
        router.add(RequestHandler::function("/fw", Method::Post, |_, _| {}).with_upload(record("fw")));
        router.add(RequestHandler::function("/form", Method::Post, |_, _| {}));
        router.file_upload = Some(Box::new(record("global")));

        let upload = Upload::new(4);
        for uri in ["/fw", "/form", "/missing"] {
            let selected = router.select(Method::Post, uri);
            router.upload(selected, &request(Method::Post, uri), &upload);
        }

        assert_eq!(
            *events.lock().unwrap(),
            [("fw", UploadStatus::End), ("global", UploadStatus::End), ("global", UploadStatus::End)]
        );
    }

    #[derive(Default)]
    struct MemContent {
        single: bool,
        files: HashMap<&'static str, &'static [u8]>,
    }

    impl ContentSource for MemContent {
        fn is_file(&self) -> bool {
            self.single
        }

        fn open(&self, path: &str) -> Option<Content> {
            let data = *self.files.get(path)?;
            Some(Content {
                name: path.to_owned(),
                len: data.len(),
                reader: Box::new(data),
            })
        }
    }

    #[test]
    fn static_directory() {
        let source = MemContent {
            single: false,
            files: HashMap::from([
                ("index.htm", &b"<h1>home</h1>"[..]),
                ("app.js.gz", &b"\x1f\x8b"[..]),
                ("css/site.css", &b"body{}"[..]),
            ]),
        };

        let mut router = Router::default();
        router.add(RequestHandler::static_files("/", source, Some("max-age=600")));

        #[rustfmt::skip]
        let cases = [
            (Method::Get,  "/",             Some(("text/html", false, "<h1>home</h1>"))),
            (Method::Get,  "/css/site.css", Some(("text/css", false, "body{}"))),
            (Method::Get,  "/app.js",       Some(("application/javascript", true, "\u{1f}\u{fffd}"))),
            (Method::Get,  "/missing.txt",  None),
            (Method::Get,  "/../secret",    None),
            (Method::Get,  "/..\\secret",   None),
            (Method::Get,  "/C:/secret",    None),
            (Method::Post, "/",             None),
        ];

        for (method, uri, expected) in cases {
            let output = dispatched(&mut router, method, uri);

            match expected {
                Some((content_type, gzip, body)) => {
                    assert!(output.starts_with("HTTP/1.1 200 OK\r\n"), "{uri}: {output}");
                    assert!(output.contains(&format!("Content-Type: {content_type}\r\n")), "{uri}");
                    assert!(output.contains("Cache-Control: max-age=600\r\n"), "{uri}");
                    assert_eq!(output.contains("Content-Encoding: gzip\r\n"), gzip, "{uri}");
                    assert!(output.ends_with(body), "{uri}");
                }
                None => assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"), "{uri}"),
            }
        }
    }

    #[test]
    fn path_below_root() {
        #[rustfmt::skip]
        let cases = [
            ("index.htm",         true),
            ("css/site.css",      true),
            ("./a/./b.txt",       true),
            ("",                  true),
            ("../secret",         false),
            ("a/../../secret",    false),
            ("..\\secret",        false),
            ("a\\..\\..\\secret", false),
            ("C:\\secret",        false),
            ("C:/secret",         false),
            ("c:secret",          false),
        ];

        for (path, expected) in cases {
            assert_eq!(stays_below_root(path), expected, "{path}");
        }
    }

    #[test]
    fn static_single_file() {
        let source = MemContent {
            single: true,
            files: HashMap::from([("", &b"pong"[..])]),
        };

        let mut router = Router::default();
        router.add(RequestHandler::static_files("/ping", source, None));

        let output = dispatched(&mut router, Method::Get, "/ping");
        assert!(output.ends_with("\r\n\r\npong"));
        assert!(!output.contains("Cache-Control"));

        let output = dispatched(&mut router, Method::Get, "/ping/more");
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn fs_content() {
        let root = std::env::temp_dir().join(format!("at_web_fs_{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("status.txt"), b"online").unwrap();

        let dir = FsContent::new(&root);
        assert!(!dir.is_file());
        assert!(dir.open("nothing.txt").is_none());
        assert!(dir.open("../status.txt").is_none());
        assert!(dir.open("/status.txt").is_none());

        let mut content = dir.open("status.txt").unwrap();
        let mut data = String::new();
        content.reader.read_to_string(&mut data).unwrap();
        assert_eq!((content.len, data.as_str()), (6, "online"));
        assert!(content.name.ends_with("status.txt"));

        let file = FsContent::new(root.join("status.txt"));
        assert!(file.is_file());
        assert_eq!(file.open("").map(|content| content.len), Some(6));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
