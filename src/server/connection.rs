use crate::{
    errors::ErrorKind,
    http::ring::LookaheadBuffer,
    limits::{ConnLimits, ReqLimits, WaitStrategy},
    server::driver::{ConnectionState, SocketDriver, SocketHandle},
};
use tokio::{
    task::yield_now,
    time::{sleep, Duration, Instant},
};
use tracing::{debug, error};

/// One pause between availability polls.
#[inline]
pub(crate) async fn pause(wait: &WaitStrategy) {
    match wait {
        WaitStrategy::Yield => yield_now().await,
        WaitStrategy::Sleep(time) => sleep(*time).await,
    }
}

/// Owner of the socket handle for one request cycle.
///
/// The handle is released through the driver exactly once: on
/// [`close`](Self::close), when the remote side is seen closing, or on drop,
/// whichever comes first.
pub(crate) struct Socket<'d> {
    driver: &'d mut dyn SocketDriver,
    handle: Option<SocketHandle>,
    wait: WaitStrategy,
    write_failed: bool,
}

impl<'d> Socket<'d> {
    #[inline]
    pub(crate) fn new(driver: &'d mut dyn SocketDriver, handle: SocketHandle, wait: WaitStrategy) -> Self {
        Self {
            driver,
            handle: Some(handle),
            wait,
            write_failed: false,
        }
    }

    #[inline(always)]
    pub(crate) fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    #[inline(always)]
    pub(crate) fn write_failed(&self) -> bool {
        self.write_failed
    }

    pub(crate) fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.driver.release_handle(handle);
            debug!(socket = handle.index(), "socket released");
        }
    }

    /// Polls until one byte is available, `budget` is measured from the call.
    pub(crate) async fn read_byte(&mut self, budget: Duration) -> Result<u8, ErrorKind> {
        let started = Instant::now();

        loop {
            let handle = self.handle.ok_or(ErrorKind::Disconnected)?;

            if self.driver.is_data_available(handle) > 0 {
                let (byte, closed) = self.driver.read_byte(handle);
                if closed {
                    self.close();
                }

                match (byte, closed) {
                    (Some(byte), _) => return Ok(byte),
                    (None, true) => return Err(ErrorKind::Disconnected),
                    (None, false) => {}
                }
            } else if self.driver.connection_state(handle) == ConnectionState::Closed {
                self.close();
                return Err(ErrorKind::Disconnected);
            }

            if started.elapsed() >= budget {
                return Err(ErrorKind::Timeout);
            }
            pause(&self.wait).await;
        }
    }

    /// Reads until `buf` holds `len` bytes. The budget restarts after every
    /// successful read.
    pub(crate) async fn read_exact(
        &mut self,
        buf: &mut Vec<u8>,
        len: usize,
        budget: Duration,
    ) -> Result<(), ErrorKind> {
        let mut chunk = [0u8; 128];
        let mut progress = Instant::now();

        while buf.len() < len {
            let handle = self.handle.ok_or(ErrorKind::Disconnected)?;

            if self.driver.is_data_available(handle) > 0 {
                let want = (len - buf.len()).min(chunk.len());
                let count = self.driver.read_bytes(handle, &mut chunk[..want]);

                if count > 0 {
                    buf.extend_from_slice(&chunk[..count]);
                    progress = Instant::now();
                    continue;
                }
            } else if self.driver.connection_state(handle) == ConnectionState::Closed {
                self.close();
                return Err(ErrorKind::Disconnected);
            }

            if progress.elapsed() >= budget {
                return Err(ErrorKind::Timeout);
            }
            pause(&self.wait).await;
        }

        Ok(())
    }

    /// Sends `bytes` in one driver call.
    ///
    /// After the first rejected write every later write is suppressed.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        if self.write_failed {
            return Err(ErrorKind::WriteFailed);
        }
        let handle = self.handle.ok_or(ErrorKind::Disconnected)?;

        match self.driver.write_bytes(handle, bytes) {
            true => Ok(()),
            false => {
                error!(socket = handle.index(), len = bytes.len(), "socket write failed");
                self.write_failed = true;
                Err(ErrorKind::WriteFailed)
            }
        }
    }

    /// Waits up to `budget` for the client to close, then releases the handle.
    pub(crate) async fn wait_close(&mut self, budget: Duration) {
        let started = Instant::now();

        while let Some(handle) = self.handle {
            if self.driver.connection_state(handle) == ConnectionState::Closed
                || started.elapsed() >= budget
            {
                break;
            }
            pause(&self.wait).await;
        }

        self.close();
    }
}

impl Drop for Socket<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parsing state for one request cycle.
///
/// Request line and header parsing lives in `http::request`, body and
/// multipart parsing in `http::multipart`.
pub(crate) struct HttpConnection<'c, 'd> {
    pub(crate) socket: Socket<'d>,
    pub(crate) ring: &'c mut LookaheadBuffer,
    pub(crate) line: Vec<u8>,
    /// Bytes of a multipart body still expected, `None` when unbounded.
    pub(crate) body_left: Option<usize>,

    pub(crate) conn_limits: &'c ConnLimits,
    pub(crate) req_limits: &'c ReqLimits,
}

impl<'c, 'd> HttpConnection<'c, 'd> {
    #[inline]
    pub(crate) fn new(
        socket: Socket<'d>,
        ring: &'c mut LookaheadBuffer,
        conn_limits: &'c ConnLimits,
        req_limits: &'c ReqLimits,
    ) -> Self {
        ring.reset();

        Self {
            socket,
            ring,
            line: Vec::new(),
            body_left: None,
            conn_limits,
            req_limits,
        }
    }

    #[inline(always)]
    pub(crate) fn into_socket(self) -> Socket<'d> {
        self.socket
    }

    pub(crate) async fn next_byte(&mut self, budget: Duration) -> Result<u8, ErrorKind> {
        if let Some(left) = self.body_left.as_mut() {
            if *left == 0 {
                return Err(ErrorKind::InvalidMultipart);
            }
            *left -= 1;
        }

        self.socket.read_byte(budget).await
    }

    /// Reads one CRLF-terminated line through the lookahead window.
    ///
    /// The CRLF is not part of the result.
    pub(crate) async fn read_line(&mut self, budget: Duration) -> Result<String, ErrorKind> {
        self.ring.reset();

        loop {
            let byte = self.next_byte(budget).await?;

            if self.ring.push(byte).is_some() {
                return Err(ErrorKind::LineTooLong);
            }
            if self.ring.ends_with(b"\r\n") {
                break;
            }
        }

        self.line.clear();
        self.ring.extract_prefix(2, &mut self.line);

        Ok(simdutf8::basic::from_utf8(&self.line)?.to_owned())
    }
}

#[cfg(test)]
pub(crate) fn test_socket(driver: &mut crate::server::driver::mock::MockDriver) -> Socket<'_> {
    let handle = driver.acquire_handle().unwrap();
    Socket::new(driver, handle, WaitStrategy::Sleep(Duration::from_millis(1)))
}
