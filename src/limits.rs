//! Server startup options, limits and timeouts
//!
//! Everything the engine needs at startup travels in three plain structs,
//! built once and shared read-only by every worker:
//!
//! - [`ServerLimits`]: where to listen and how many workers to run
//! - [`ConnLimits`]: how long a single connection may take
//! - [`ReqLimits`]: how large a single request may be
//!
//! Logging goes through the [`log`] facade, so the "logger handle" is whatever
//! logger the binary installs (`env_logger` in the demos and tests).
//!
//! # Examples
//!
//! ```no_run
//! use trellis_web::{limits::{ConnLimits, ReqLimits, ServerLimits}, Response, Server};
//!
//! Server::builder()
//!     .route("/", |_, _, _| Ok(Response::ok("home")))
//!     .server_limits(ServerLimits {
//!         port: 8080,
//!         threads: 32,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         timeout_sec: 2,
//!         ..ConnLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         body_size: 16 * 1024 * 1024, // 16 MiB uploads
//!         ..ReqLimits::default()
//!     })
//!     .build()
//!     .unwrap()
//!     .launch()
//!     .unwrap();
//! ```

use std::time::Duration;

/// Listening address and worker pool configuration.
///
/// # Connection management
/// ```text
/// [ accept() ] ==> [ Job queue ] ==> [ worker 1 .. worker N ]
///   main thread      crossbeam          read, dispatch, write, close
/// ```
///
/// The accept loop only enqueues work. Each worker handles exactly one
/// request per connection and closes it afterwards.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// IP literal to bind, or `localhost` (default: `"127.0.0.1"`).
    pub host: String,

    /// TCP port (default: `8000`). Port `0` lets the OS pick one, see
    /// [`Server::local_addr`](crate::Server::local_addr).
    pub port: u16,

    /// Bind an IPv6 socket instead of IPv4 (default: `false`).
    ///
    /// The family is fixed at socket creation; dual-stack is never attempted.
    pub use_ipv6: bool,

    /// Number of worker threads (default: `16`).
    pub threads: usize,

    /// Pending connection backlog passed to `listen(2)` (default: `128`).
    pub backlog: i32,

    /// Log every request with its status and the time spent on it (default: `false`).
    pub verbose: bool,

    /// Format for canned protocol error responses (default: `true`)
    ///
    /// # Examples
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 55\r
    /// content-type: application/json\r
    /// \r
    /// {"error":"Invalid HTTP method","code":"INVALID_METHOD"}
    /// ```
    /// If `false`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 0\r
    /// \r
    /// ```
    pub json_errors: bool,

    /// Stop the server on Ctrl-C (default: `true`).
    ///
    /// Without it, the server runs until its
    /// [`ShutdownHandle`](crate::ShutdownHandle) is used.
    pub handle_signals: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8000,
            use_ipv6: false,
            threads: 16,
            backlog: 128,
            verbose: false,
            json_errors: true,
            handle_signals: true,

            _priv: (),
        }
    }
}

/// Connection-level timeouts
///
/// Default values balance responsiveness and resource usage.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Seconds part of the initial wait for the client's first byte (default: `5`).
    ///
    /// Together with [`timeout_usec`](Self::timeout_usec) this bounds how long
    /// a worker waits for an accepted connection to become readable. When it
    /// expires the connection is dropped without a response.
    pub timeout_sec: u64,

    /// Microseconds part of the initial wait (default: `0`).
    pub timeout_usec: u64,

    /// Timeout of a single `read` once the client has started sending (default: `2 seconds`)
    ///
    /// An expired read is retried, it does not fail the request on its own.
    /// Retries stop at [`request_deadline`](Self::request_deadline).
    pub socket_read_timeout: Duration,

    /// Timeout of a single `write` (default: `3 seconds`)
    pub socket_write_timeout: Duration,

    /// Upper bound on the time spent receiving one request (default: `30 seconds`)
    ///
    /// Keeps a slow client from pinning a worker forever. Exceeding it answers
    /// `408 Request Timeout`.
    pub request_deadline: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl ConnLimits {
    /// The initial client wait assembled from seconds and microseconds.
    #[inline]
    pub fn client_wait(&self) -> Duration {
        Duration::from_secs(self.timeout_sec) + Duration::from_micros(self.timeout_usec)
    }
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            timeout_sec: 5,
            timeout_usec: 0,
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            request_deadline: Duration::from_secs(30),

            _priv: (),
        }
    }
}

/// Request size limits
///
/// # Memory allocation strategy
///
/// Nothing is preallocated. The header section grows in
/// [`read_chunk`](Self::read_chunk) steps up to [`header_size`](Self::header_size);
/// the body buffer is reserved once the declared length is known and
/// accepted, so an oversized `Content-Length` is rejected before any body
/// byte is read.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum size of the header section in bytes, request line included (default: `65535`).
    ///
    /// Exceeding it answers `431 Request Header Fields Too Large`.
    pub header_size: usize,

    /// Maximum number of header lines (default: `100`).
    ///
    /// Exceeding it answers `431 Request Header Fields Too Large`.
    pub header_count: usize,

    /// Maximum body size in bytes, after chunked decoding (default: `2.5 MiB`).
    ///
    /// Exceeding it answers `413 Payload Too Large`.
    pub body_size: usize,

    /// Size of a single socket read (default: `8192`).
    pub read_chunk: usize,

    /// Maximum number of parameters parsed from a query string or form body (default: `1000`).
    pub query_params: usize,

    /// Directory prefix used for the path hint of uploaded files (default: `""`).
    ///
    /// See [`UploadedFile::path`](crate::UploadedFile::path).
    pub media_root: String,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            header_size: 65535,
            header_count: 100,
            body_size: 2_621_440,
            read_chunk: 8192,
            query_params: 1000,
            media_root: String::new(),

            _priv: (),
        }
    }
}
