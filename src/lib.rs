//! trellis_web - the HTTP engine of a small MVC web framework
//!
//! A blocking, thread-pool HTTP/1.x server with URL patterns, middleware and
//! form handling. Every connection carries exactly one request: the worker
//! reads it, runs it through the middleware chain and the matching handler,
//! writes the response and closes the socket.
//!
//! # Pipeline
//!
//! ```text
//! accept ==> queue ==> worker: read head ==> read body ==> middleware ==> handler
//!                                                            ^               |
//!                                                            +---- response -+
//! ```
//!
//! - **Parsing**: an incremental request-line/header state machine, bodies
//!   framed by `Content-Length` or `Transfer-Encoding: chunked`
//! - **Forms**: query strings, `application/x-www-form-urlencoded`,
//!   `multipart/form-data` uploads and JSON, parsed lazily on first access
//! - **Routing**: regex URL patterns with named arguments, `include` for
//!   prefixes and namespaces, `reverse` to build URLs back
//! - **Middleware**: request and response hooks in onion order, with
//!   [`ConditionalGetMiddleware`] for `ETag`/`304` handling
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use trellis_web::{Response, Server};
//!
//! Server::builder()
//!     .route("/", |_, _, _| Ok(Response::ok("Hello World!")))
//!     .build()
//!     .unwrap()
//!     .launch()
//!     .unwrap();
//! ```
//! Patterns, methods and middleware:
//! ```no_run
//! use trellis_web::{
//!     include, path, ConditionalGetMiddleware, Context, MethodRouter, Response, Server,
//! };
//!
//! let api = vec![
//!     path(r"/user/<id>(\d+)", "user", |_, args, _| {
//!         Ok(Response::ok(format!("user {}", args.parse::<u64>("id")?)))
//!     }),
//!     path("/echo", "echo", |req, _, _| Ok(Response::ok(req.body()))),
//! ];
//!
//! Server::builder()
//!     .patterns(include("/api", api, "api").unwrap())
//!     .handler("/login", "login", MethodRouter::new()
//!         .get(|_, _, _| Ok(Response::ok("<form method=post>...</form>")))
//!         .post(|_, _, _| Ok(Response::redirect("/"))))
//!     .middleware(ConditionalGetMiddleware)
//!     .context(Context::new().debug(true))
//!     .build()
//!     .unwrap()
//!     .launch()
//!     .unwrap();
//! ```
//! Startup options and limits are described in [`limits`].

pub(crate) mod http {
    pub(crate) mod chunked;
    pub(crate) mod cookie;
    pub(crate) mod multipart;
    pub(crate) mod parser;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod net {
    pub(crate) mod buffer;
    pub(crate) mod reader;
    pub(crate) mod socket;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod pool;
    pub(crate) mod server_impl;
}
pub(crate) mod app;
pub(crate) mod context;
pub(crate) mod errors;
pub(crate) mod handler;
pub mod limits;
pub(crate) mod middleware;
pub(crate) mod urls;

pub use crate::{
    app::Application,
    context::Context,
    errors::HttpError,
    handler::{Handler, MethodRouter},
    http::{
        cookie::{parse_cookies, Cookie, SameSite},
        multipart::{parse_multipart, MultipartError, MultipartForm, UploadedFile},
        query::{self, QueryDict},
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Body, ChunkStream, InvalidStatus, Response,
        },
        types::{HeaderMap, Method, StatusCode, Version},
    },
    middleware::{ConditionalGetMiddleware, Middleware},
    net::socket::{Socket, SocketError},
    server::server_impl::{Server, ServerBuilder, ServerError, ShutdownHandle},
    urls::{
        include, is_valid_path, path, resolve, reverse, PathArgs, PatternError,
        ResolvedHandler, UrlPattern,
    },
};

/// Parses a complete raw request with default limits.
///
/// Handy for exercising handlers and middleware without a socket.
#[doc(hidden)]
pub fn request_from_bytes(raw: &[u8]) -> Option<Request> {
    Request::from_bytes(raw, &limits::ReqLimits::default()).ok()
}
