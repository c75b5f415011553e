use crate::{
    errors::ErrorKind,
    http::{multipart::Upload, request::Request, response::Response, ring::LookaheadBuffer},
    limits::{ConnLimits, ReqLimits, RespLimits},
    server::{
        connection::{pause, HttpConnection, Socket},
        driver::SocketDriver,
        router::{ContentSource, RequestHandler, Router},
    },
    Method,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// HTTP server running on top of a modem [`SocketDriver`].
///
/// Serves one client at a time: every [`handle_client`](Server::handle_client)
/// call runs a complete request cycle (parse, dispatch, respond, close) on
/// one socket. The socket handle is released exactly once per cycle,
/// whatever way the cycle ends.
///
/// # Examples
///
/// ```no_run
/// # at_web::impl_demo_driver!{DemoDriver}
/// use at_web::{Method, Server};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let mut server = Server::builder().driver(DemoDriver).port(80).build();
///
///     server.on("/", Method::Get, |_, resp| {
///         resp.send(200, Some("text/plain"), "Hello from the modem");
///     });
///     server.on("/led", Method::Post, |req, resp| {
///         let state = req.arg("state").unwrap_or("off");
///         resp.send(200, Some("text/plain"), format!("led {state}"));
///     });
///
///     server.launch().await
/// }
/// ```
pub struct Server<D: SocketDriver> {
    driver: D,
    port: u16,
    started: bool,

    router: Router,
    header_keys: Vec<String>,
    ring: LookaheadBuffer,
    upload: Upload,

    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl<D: SocketDriver> Server<D> {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// use at_web::Server;
    ///
    /// let server = Server::builder()
    ///     .driver(DemoDriver) // structure with SocketDriver implementation
    ///     .build();
    /// ```
    #[inline]
    pub fn builder() -> ServerBuilder<D> {
        ServerBuilder {
            driver: None,
            port: 80,

            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }

    /// Asks the modem to listen on the configured port.
    ///
    /// Called by the first [`handle_client`](Server::handle_client) if not
    /// called before. Returns `false` if the modem refused.
    pub fn begin(&mut self) -> bool {
        self.ring.init();
        self.started = self.driver.start_server(self.port);

        match self.started {
            true => info!(port = self.port, "server listening"),
            false => error!(port = self.port, "modem refused to start the server"),
        }
        self.started
    }

    /// Serves clients forever.
    ///
    /// Waits according to
    /// [`ConnLimits::wait_strategy`](crate::limits::ConnLimits::wait_strategy)
    /// while no client is pending. Failed cycles are logged and skipped.
    pub async fn launch(mut self) {
        loop {
            if let Ok(false) = self.handle_client().await {
                pause(&self.conn_limits.wait_strategy).await;
            }
        }
    }

    /// Runs one request cycle if a client is pending.
    ///
    /// Returns `Ok(false)` when no client was waiting and `Ok(true)` when a
    /// request was served. An error means the cycle was abandoned, the
    /// socket is already released by then.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// # let mut server = at_web::Server::builder().driver(DemoDriver).build();
    /// loop {
    ///     // Other work of the main loop
    ///
    ///     if let Err(err) = server.handle_client().await {
    ///         eprintln!("request failed: {err}");
    ///     }
    /// }
    /// # }
    /// ```
    pub async fn handle_client(&mut self) -> Result<bool, ErrorKind> {
        if !self.started && !self.begin() {
            return Ok(false);
        }
        let Some(handle) = self.driver.acquire_handle() else {
            return Ok(false);
        };
        debug!(socket = handle.index(), "client connected");

        let Server {
            driver,
            router,
            header_keys,
            ring,
            upload,
            conn_limits,
            req_limits,
            resp_limits,
            ..
        } = self;

        let socket = Socket::new(driver, handle, conn_limits.wait_strategy.clone());
        let mut conn = HttpConnection::new(socket, ring, conn_limits, req_limits);
        let mut request = Request::new(header_keys);

        let selected = match Self::parse(&mut conn, &mut request, router, upload).await {
            Ok(selected) => selected,
            Err(err) => {
                warn!(socket = handle.index(), error = %err, "request rejected");

                if conn_limits.error_responses {
                    if let Some(bytes) = err.as_http(request.version()) {
                        let _ = conn.socket.write(bytes);
                    }
                }
                return Err(err);
            }
        };
        debug!(method = ?request.method(), uri = request.uri(), "request parsed");

        let mut response = Response::new(conn.into_socket(), request.version(), resp_limits);
        router.dispatch(selected, &request, &mut response);
        response.finish();

        let mut socket = response.into_socket();
        if socket.write_failed() {
            error!(
                socket = handle.index(),
                cooldown = ?conn_limits.write_error_cooldown,
                "response not delivered, closing after cooldown"
            );
            sleep(conn_limits.write_error_cooldown).await;
            socket.close();
            return Err(ErrorKind::WriteFailed);
        }

        socket.wait_close(conn_limits.close_wait).await;
        Ok(true)
    }

    async fn parse(
        conn: &mut HttpConnection<'_, '_>,
        request: &mut Request,
        router: &mut Router,
        upload: &mut Upload,
    ) -> Result<Option<usize>, ErrorKind> {
        conn.parse_head(request).await?;

        // Upload events need the handler before the body arrives
        let selected = router.select(request.method(), request.uri());
        conn.parse_body(request, upload, &mut |req, up| router.upload(selected, req, up))
            .await?;

        Ok(selected)
    }
}

// Registration
impl<D: SocketDriver> Server<D> {
    /// Sets the header names kept in every [`Request`].
    ///
    /// Names are matched case-insensitively. `Authorization` is always kept.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// # let mut server = at_web::Server::builder().driver(DemoDriver).build();
    /// server.collect_headers(&["User-Agent", "Cookie"]);
    ///
    /// server.on_any("/", |req, resp| {
    ///     let agent = req.header("user-agent").unwrap_or("unknown");
    ///     resp.send(200, Some("text/plain"), agent);
    /// });
    /// ```
    pub fn collect_headers(&mut self, names: &[&str]) -> &mut Self {
        self.header_keys = names.iter().map(|name| name.to_string()).collect();

        if !names.iter().any(|name| name.eq_ignore_ascii_case("Authorization")) {
            self.header_keys.push("Authorization".to_owned());
        }
        self
    }

    /// Registers `handler` for `uri` and `method`.
    ///
    /// A `uri` ending in `/*` matches every URI with that prefix. Handlers
    /// are tried in registration order.
    pub fn on<F>(&mut self, uri: &str, method: Method, handler: F) -> &mut Self
    where
        F: FnMut(&Request, &mut Response<'_>) + Send + 'static,
    {
        self.add_handler(RequestHandler::function(uri, method, handler))
    }

    /// Registers `handler` for every method on `uri`.
    pub fn on_any<F>(&mut self, uri: &str, handler: F) -> &mut Self
    where
        F: FnMut(&Request, &mut Response<'_>) + Send + 'static,
    {
        self.on(uri, Method::Any, handler)
    }

    /// Registers `handler` together with a callback receiving file uploads
    /// posted to `uri`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// # let mut server = at_web::Server::builder().driver(DemoDriver).build();
    /// use at_web::{Method, UploadStatus};
    ///
    /// server.on_upload(
    ///     "/firmware",
    ///     Method::Post,
    ///     |_, resp| resp.send(200, Some("text/plain"), "OK"),
    ///     |_, upload| match upload.status() {
    ///         UploadStatus::Start => println!("receiving {}", upload.filename()),
    ///         UploadStatus::Write => println!("{} bytes", upload.current_size()),
    ///         UploadStatus::End => println!("done, {} bytes", upload.total_size()),
    ///         UploadStatus::Aborted => println!("aborted"),
    ///     },
    /// );
    /// ```
    pub fn on_upload<F, U>(&mut self, uri: &str, method: Method, handler: F, upload: U) -> &mut Self
    where
        F: FnMut(&Request, &mut Response<'_>) + Send + 'static,
        U: FnMut(&Request, &crate::Upload) + Send + 'static,
    {
        self.add_handler(RequestHandler::function(uri, method, handler).with_upload(upload))
    }

    /// Appends a prepared [`RequestHandler`].
    pub fn add_handler(&mut self, handler: RequestHandler) -> &mut Self {
        self.router.add(handler);
        self
    }

    /// Serves files from `source` under `uri` for `GET` requests.
    ///
    /// Directory requests get `index.htm`, a missing file is looked up again
    /// with a `.gz` suffix. `cache_header` becomes the `Cache-Control` value.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// # let mut server = at_web::Server::builder().driver(DemoDriver).build();
    /// use at_web::FsContent;
    ///
    /// server
    ///     .serve_static("/favicon.ico", FsContent::new("www/favicon.ico"), Some("max-age=86400"))
    ///     .serve_static("/", FsContent::new("www"), None);
    /// ```
    pub fn serve_static<S>(&mut self, uri: &str, source: S, cache_header: Option<&str>) -> &mut Self
    where
        S: ContentSource + 'static,
    {
        self.add_handler(RequestHandler::static_files(uri, source, cache_header))
    }

    /// Replaces the built-in `404` response.
    pub fn on_not_found<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&Request, &mut Response<'_>) + Send + 'static,
    {
        self.router.not_found = Some(Box::new(handler));
        self
    }

    /// Receives uploads that no registered upload callback takes.
    pub fn on_file_upload<U>(&mut self, upload: U) -> &mut Self
    where
        U: FnMut(&Request, &crate::Upload) + Send + 'static,
    {
        self.router.file_upload = Some(Box::new(upload));
        self
    }

    #[inline(always)]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[inline(always)]
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    #[inline(always)]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<D: SocketDriver> {
    driver: Option<D>,
    port: u16,

    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<D: SocketDriver> ServerBuilder<D> {
    /// Sets the modem driver the server talks through.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn driver(mut self, driver: D) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Port to listen on (default: `80`).
    #[inline(always)]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Configures connection wait budgets.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// use at_web::{Server, limits::ConnLimits};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .driver(DemoDriver)
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         close_wait: Duration::from_millis(500),
    ///         error_responses: true,
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits and buffer sizes.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # at_web::impl_demo_driver!{DemoDriver}
    /// use at_web::{Server, limits::ReqLimits};
    ///
    /// let server = Server::builder()
    ///     .driver(DemoDriver)
    ///     .request_limits(ReqLimits {
    ///         // Your changes
    ///         lookahead_size: 256,
    ///         arg_count: 8,
    ///         ..ReqLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response writing limits.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and allocates every buffer the server needs.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `driver` method must be called to create``
    /// - `Lookahead capacity must be non-zero`
    /// - `Upload buffer capacity must be non-zero`
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<D> {
        let driver = self
            .driver
            .expect("The `driver` method must be called to create");
        let req_limits = self.request_limits.unwrap_or_default();

        Server {
            driver,
            port: self.port,
            started: false,

            router: Router::default(),
            header_keys: vec!["Authorization".to_owned()],
            ring: LookaheadBuffer::new(req_limits.lookahead_size),
            upload: Upload::new(req_limits.upload_buffer_size),

            conn_limits: self.connection_limits.unwrap_or_default(),
            req_limits,
            resp_limits: self.response_limits.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{server::driver::mock::MockDriver, UploadStatus};
    use std::sync::{Arc, Mutex};
    use tokio::time::{Duration, Instant};

    fn server(raw: &str) -> Server<MockDriver> {
        Server::builder()
            .driver(MockDriver::with_request(raw))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn hello() {
        let mut server = server("GET /?name=modem HTTP/1.1\r\nHost: x\r\n\r\n");
        server.on("/", Method::Get, |req, resp| {
            resp.send(200u16, Some("text/plain"), format!("hi {}", req.arg("name").unwrap_or("")))
        });

        assert_eq!(server.handle_client().await, Ok(true));
        assert_eq!(server.handle_client().await, Ok(false));

        let driver = server.driver();
        assert_eq!(driver.listening, Some(80));
        assert_eq!(driver.released.len(), 1);
        assert_eq!(
            driver.output_str(),
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 8\r\n\
             Connection: close\r\n\
             \r\n\
             hi modem"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn not_found() {
        let mut server = server("GET /missing HTTP/1.1\r\n\r\n");
        server.on("/", Method::Get, |_, resp| resp.send(200u16, None, "root"));

        assert_eq!(server.handle_client().await, Ok(true));

        let output = server.driver().output_str();
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(output.ends_with("\r\n\r\nNot found: /missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn routing() {
        #[rustfmt::skip]
        let cases = [
            ("GET /api/led HTTP/1.1\r\n\r\n",       "api"),
            ("POST /api HTTP/1.1\r\n\r\n",          "api"),
            ("GET /status HTTP/1.0\r\n\r\n",        "status-get"),
            ("DELETE /status HTTP/1.1\r\n\r\n",     "status-any"),
        ];

        for (raw, expected) in cases {
            let mut server = server(raw);
            server
                .on("/api/*", Method::Any, |_, resp| resp.send(200u16, None, "api"))
                .on("/status", Method::Get, |_, resp| resp.send(200u16, None, "status-get"))
                .on_any("/status", |_, resp| resp.send(200u16, None, "status-any"))
                .on_any("/api/led", |_, resp| resp.send(200u16, None, "unreachable"));

            assert_eq!(server.handle_client().await, Ok(true));
            assert!(server.driver().output_str().ends_with(expected), "{raw}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn chunked_handler() {
        let mut server = server("GET /log HTTP/1.1\r\n\r\n");
        server.on("/log", Method::Get, |_, resp| {
            resp.set_content_length(crate::ContentLength::Unknown)
                .send(200u16, Some("text/plain"), "");
            resp.send_content("line 1\n");
        });

        assert_eq!(server.handle_client().await, Ok(true));
        assert!(server
            .driver()
            .output_str()
            .ends_with("\r\n\r\n7\r\nline 1\n\r\n0\r\n\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_once() {
        let mut server = server("GET / HTTP/1.1\r\nHost: x\r\n");
        server.on_any("/", |_, resp| resp.send(200u16, None, ""));

        let started = Instant::now();
        assert_eq!(server.handle_client().await, Err(ErrorKind::Timeout));
        assert!(started.elapsed() >= Duration::from_secs(1));

        let driver = server.driver();
        assert_eq!(driver.released.len(), 1);
        assert!(driver.output.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn error_responses() {
        #[rustfmt::skip]
        let cases = [
            (false, "BREW / HTTP/1.1\r\n\r\n",   ErrorKind::InvalidMethod,  ""),
            (true,  "BREW / HTTP/1.1\r\n\r\n",   ErrorKind::InvalidMethod,  "HTTP/1.1 400 Bad Request\r\n"),
            (true,  "GET / HTTP/3\r\n\r\n",      ErrorKind::InvalidVersion, "HTTP/1.1 505 HTTP Version not supported\r\n"),
            (true,  "GET / HTTP/1.0\r\n",        ErrorKind::Timeout,        "HTTP/1.0 408 Request Time-out\r\n"),
        ];

        for (enabled, raw, expected, first_line) in cases {
            let mut server = Server::builder()
                .driver(MockDriver::with_request(raw))
                .connection_limits(ConnLimits {
                    error_responses: enabled,
                    ..ConnLimits::default()
                })
                .build();

            assert_eq!(server.handle_client().await, Err(expected), "{raw}");

            let driver = server.driver();
            assert!(driver.output_str().starts_with(first_line), "{raw}");
            assert_eq!(driver.output.is_empty(), first_line.is_empty(), "{raw}");
            assert_eq!(driver.released.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_cooldown() {
        let mut server = server("GET / HTTP/1.1\r\n\r\n");
        server.driver_mut().fail_writes = true;
        server.on_any("/", |_, resp| {
            resp.send(200u16, None, "first");
            resp.send_content("second");
        });

        let started = Instant::now();
        assert_eq!(server.handle_client().await, Err(ErrorKind::WriteFailed));
        assert!(started.elapsed() >= ConnLimits::default().write_error_cooldown);

        let driver = server.driver();
        assert_eq!(driver.writes, 1);
        assert_eq!(driver.released.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_wait_ends_on_remote_close() {
        let mut server = server("GET / HTTP/1.1\r\n\r\n");
        server.driver_mut().close_after_input = true;
        server.on_any("/", |_, resp| resp.send(204u16, None, ""));

        let started = Instant::now();
        assert_eq!(server.handle_client().await, Ok(true));
        assert!(started.elapsed() < ConnLimits::default().close_wait);
        assert_eq!(server.driver().released.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn headers_and_auth() {
        let raw = "GET /admin HTTP/1.1\r\n\
                   User-Agent: curl/8\r\n\
                   Cookie: id=1\r\n\
                   Authorization: Basic YWRtaW46c2VjcmV0\r\n\
                   \r\n";

        let mut server = server(raw);
        server
            .collect_headers(&["user-agent"])
            .on("/admin", Method::Get, |req, resp| {
                assert_eq!(req.header("User-Agent"), Some("curl/8"));
                assert_eq!(req.header("Cookie"), None);

                match req.authenticate("admin", "secret") {
                    true => resp.send(200u16, None, "welcome"),
                    false => resp.request_authentication(),
                }
            });

        assert_eq!(server.handle_client().await, Ok(true));
        assert!(server.driver().output_str().ends_with("welcome"));
    }

    #[tokio::test(start_paused = true)]
    async fn upload() {
        let body = "--b0\r\n\
                    Content-Disposition: form-data; name=\"fw\"; filename=\"fw.bin\"\r\n\
                    \r\n\
                    firmware-image\r\n\
                    --b0\r\n\
                    Content-Disposition: form-data; name=\"version\"\r\n\
                    \r\n\
                    1.2\r\n\
                    --b0--\r\n";
        let raw = format!(
            "POST /update HTTP/1.1\r\n\
             Content-Type: multipart/form-data; boundary=b0\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {body}",
            body.len()
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();

        let mut server = server(&raw);
        server.on_upload(
            "/update",
            Method::Post,
            |req, resp| resp.send(200u16, None, format!("v{}", req.arg("version").unwrap_or("?"))),
            move |_, upload| {
                let mut seen = seen.lock().unwrap();
                seen.push((upload.status(), upload.filename().to_owned(), upload.data().to_vec()));
            },
        );

        assert_eq!(server.handle_client().await, Ok(true));
        assert!(server.driver().output_str().ends_with("v1.2"));

        let events = events.lock().unwrap();
        let statuses: Vec<_> = events.iter().map(|(status, ..)| *status).collect();
        assert_eq!(statuses, [UploadStatus::Start, UploadStatus::Write, UploadStatus::End]);
        assert_eq!(events[1].1, "fw.bin");
        assert_eq!(events[1].2, b"firmware-image");
    }

    #[tokio::test(start_paused = true)]
    async fn upload_without_handler() {
        let body = "--b0\r\n\
                    Content-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\
                    \r\n\
                    abc\r\n\
                    --b0--";
        let raw = format!(
            "POST /other HTTP/1.1\r\n\
             Content-Type: multipart/form-data; boundary=b0\r\n\
             \r\n\
             {body}"
        );

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = sizes.clone();

        let mut server = server(&raw);
        server.on_file_upload(move |_, upload| {
            seen.lock().unwrap().push(upload.total_size());
        });

        assert_eq!(server.handle_client().await, Ok(true));
        assert_eq!(*sizes.lock().unwrap(), [0, 0, 3]);
        assert!(server.driver().output_str().starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_client() {
        let mut server = server("");
        server.driver_mut().pending = 0;

        assert_eq!(server.handle_client().await, Ok(false));
        assert_eq!(server.driver().listening, Some(80));
        assert!(server.driver().released.is_empty());
    }
}
