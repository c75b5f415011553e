//! Server configuration limits and timeouts
//!
//! # Memory Consumption
//!
//! Everything the server needs is allocated once by
//! [`ServerBuilder::build`](crate::ServerBuilder::build):
//!
//! `Total` = [`lookahead_size`](ReqLimits::lookahead_size) +
//!           [`upload_buffer_size`](ReqLimits::upload_buffer_size) +
//!           [`header_capacity`](RespLimits::header_capacity) +
//!           `Registered handlers`
//!
//! Request arguments, collected header values and a urlencoded body are
//! bounded by [`ReqLimits`] and released at the end of every cycle.
//!
//! # Examples
//!
//! ```no_run
//! # at_web::impl_demo_driver!{DemoDriver}
//! use at_web::{Server, limits::{ConnLimits, ReqLimits}};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     Server::builder()
//!         .driver(DemoDriver)
//!         .connection_limits(ConnLimits {
//!             request_wait: Duration::from_secs(3), // Slow serial link
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             upload_buffer_size: 512, // Small target
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Strategy for waiting while the socket has no data
///
/// The server never blocks on a read: it polls
/// [`is_data_available`](crate::SocketDriver::is_data_available) and waits
/// between polls according to this strategy.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Hands control back to the runtime between polls
    ///
    /// Lowest latency, but keeps the CPU busy for the whole wait budget.
    /// Suits a modem whose driver buffers input on its own task.
    Yield,

    /// Sleeps between polls (default: `1ms`)
    ///
    /// Each poll of a serial modem costs an AT round trip, a few
    /// milliseconds between polls keep the link free for the data itself:
    /// ```
    /// use at_web::limits::{ConnLimits, WaitStrategy};
    /// use std::time::Duration;
    ///
    /// let limits = ConnLimits {
    ///     wait_strategy: WaitStrategy::Sleep(Duration::from_millis(5)),
    ///     ..ConnLimits::default()
    /// };
    /// # assert!(matches!(limits.wait_strategy, WaitStrategy::Sleep(_)));
    /// ```
    Sleep(Duration),
}

/// Connection-level wait budgets
///
/// Every budget is measured from the last observed progress (the last byte
/// read), not from the start of the request.
///
/// ```text
///  acquire ──> request line + headers ──> body ──> handler ──> close wait ──> release
///              |<-- request_wait -->|  |<-body_wait->|         |<-close_wait->|
/// ```
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum silence while reading the request line and headers (default: `1 second`)
    ///
    /// Exceeding it ends the cycle with [`Timeout`](crate::ErrorKind::Timeout).
    pub request_wait: Duration,

    /// Maximum silence while reading a request body (default: `1 second`)
    pub body_wait: Duration,

    /// How long to wait for the client to close after the response (default: `2 seconds`)
    ///
    /// The socket is released when the client closes or this budget runs out.
    pub close_wait: Duration,

    /// Pause before force-closing after a failed write (default: `4 seconds`)
    ///
    /// Gives the modem time to flush or drop the pending send.
    pub write_error_cooldown: Duration,

    /// Strategy for waiting between availability polls (default: `Sleep(1ms)`)
    pub wait_strategy: WaitStrategy,

    /// Send a minimal error response before closing on a parse failure (default: `false`)
    ///
    /// # Examples
    /// If `true`, an invalid method gets:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// Connection: close\r
    /// Content-Length: 0\r
    /// \r
    /// ```
    /// If `false`, the socket is closed without a response.
    pub error_responses: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            request_wait: Duration::from_millis(1000),
            body_wait: Duration::from_millis(1000),
            close_wait: Duration::from_millis(2000),
            write_error_cooldown: Duration::from_millis(4000),
            wait_strategy: WaitStrategy::Sleep(Duration::from_millis(1)),
            error_responses: false,

            _priv: (),
        }
    }
}

/// Request parsing limits and buffer sizes
///
/// # Memory Allocation Strategy
///
/// | Buffer | Size | Purpose |
/// |--------|------|---------|
/// | Lookahead window | `lookahead_size` | One header line or one multipart delimiter |
/// | Upload buffer | `upload_buffer_size` | One file chunk pending flush |
///
/// Both are allocated when the server is built and never grow.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Capacity of the lookahead window in bytes (default: `512 B`)
    ///
    /// Bounds the length of the request line, of every header line (CRLF
    /// included) and of the multipart delimiter `\r\n--boundary`.
    pub lookahead_size: usize,

    /// Maximum number of arguments from the query string and the body (default: `32`)
    pub arg_count: usize,

    /// Maximum size of a non-multipart request body (default: `4 KB`)
    pub body_size: usize,

    /// Maximum size of a non-file multipart field value (default: `1 KB`)
    pub field_size: usize,

    /// Capacity of the upload chunk buffer (default: `2048 B`)
    ///
    /// A `Write` event is emitted every time it fills up.
    pub upload_buffer_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            lookahead_size: 512,
            arg_count: 32,
            body_size: 4 * 1024,
            field_size: 1024,
            upload_buffer_size: 2048,

            _priv: (),
        }
    }
}

/// Response writing limits
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Largest slice handed to the driver in one write (default: `1460 B`, one TCP segment)
    ///
    /// Static files and large bodies are split into writes of this size.
    pub download_unit: usize,

    /// Initial capacity of the header block buffer (default: `256 B`)
    pub header_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            download_unit: 1460,
            header_capacity: 256,

            _priv: (),
        }
    }
}
