//! Request/response interceptors.

use crate::{Context, Method, Request, Response};
use chrono::DateTime;
use sha2::{Digest, Sha256};

/// A request/response interceptor.
///
/// Middleware is applied as an onion: [`process_request`] runs in
/// registration order before the handler, [`process_response`] in reverse
/// order after it, for every middleware whose request phase ran.
///
/// - The first `Some` from [`process_request`] becomes the response: later
///   middleware and the handler are skipped.
/// - The first `Some` from [`process_response`] replaces the response and
///   ends the response phase.
///
/// Both methods default to doing nothing.
///
/// [`process_request`]: Middleware::process_request
/// [`process_response`]: Middleware::process_response
///
/// # Examples
/// ```
/// use trellis_web::{Context, Middleware, Request, Response};
///
/// struct PoweredBy;
///
/// impl Middleware for PoweredBy {
///     fn process_response(&self, _: &Request, resp: &mut Response, _: &Context) -> Option<Response> {
///         resp.set_header("X-Powered-By", "trellis");
///         None
///     }
/// }
///
/// struct Maintenance;
///
/// impl Middleware for Maintenance {
///     fn process_request(&self, _: &Request, _: &Context) -> Option<Response> {
///         Some(Response::with_status(503))
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    #[allow(unused_variables)]
    fn process_request(&self, request: &Request, context: &Context) -> Option<Response> {
        None
    }

    #[allow(unused_variables)]
    fn process_response(
        &self,
        request: &Request,
        response: &mut Response,
        context: &Context,
    ) -> Option<Response> {
        None
    }
}

/// Runs `handler` wrapped in `middleware`.
pub(crate) fn run_chain<F>(
    middleware: &[Box<dyn Middleware>],
    request: &Request,
    context: &Context,
    handler: F,
) -> Response
where
    F: FnOnce() -> Response,
{
    let mut ran = 0;
    let mut early = None;
    for mw in middleware {
        ran += 1;
        if let Some(resp) = mw.process_request(request, context) {
            early = Some(resp);
            break;
        }
    }

    let mut response = match early {
        Some(resp) => resp,
        None => handler(),
    };

    for mw in middleware[..ran].iter().rev() {
        if let Some(replacement) = mw.process_response(request, &mut response, context) {
            response = replacement;
            break;
        }
    }

    response
}

/// Headers kept on a `304 Not Modified` answer.
const NOT_MODIFIED_HEADERS: [&str; 7] = [
    "Cache-Control",
    "Content-Location",
    "Date",
    "ETag",
    "Expires",
    "Last-Modified",
    "Vary",
];

/// Conditional GET support.
///
/// For `GET` and `HEAD` requests answered with `200` and a buffered body,
/// adds a strong `ETag` (SHA-256 of the body) unless one is set or
/// `Cache-Control` contains `no-store`. When the request's `If-None-Match`
/// matches the ETag, or, without `If-None-Match`, its `If-Modified-Since` is
/// not older than `Last-Modified`, the response is replaced by
/// `304 Not Modified` keeping only the cache-related headers and cookies.
///
/// # Examples
/// ```
/// use trellis_web::{ConditionalGetMiddleware, Server, Response};
///
/// let builder = Server::builder()
///     .route("/", |_, _, _| Ok(Response::ok("cached page")))
///     .middleware(ConditionalGetMiddleware);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalGetMiddleware;

impl ConditionalGetMiddleware {
    /// Strong ETag of `body`.
    pub fn etag(body: &[u8]) -> String {
        format!("\"{}\"", hex::encode(Sha256::digest(body)))
    }

    fn needs_etag(response: &Response) -> bool {
        !response.has_header("ETag")
            && !response.is_streaming()
            && !response
                .header("Cache-Control")
                .is_some_and(|value| value.to_ascii_lowercase().contains("no-store"))
    }

    fn not_modified(response: &Response) -> Response {
        let mut resp = Response::with_status(304);
        resp.remove_header("Content-Type");

        for name in NOT_MODIFIED_HEADERS {
            if let Some(value) = response.header(name) {
                resp.set_header(name, value);
            }
        }
        for cookie in response.cookies() {
            resp.set_cookie(cookie.clone());
        }
        resp
    }
}

impl Middleware for ConditionalGetMiddleware {
    fn process_response(
        &self,
        request: &Request,
        response: &mut Response,
        _: &Context,
    ) -> Option<Response> {
        if !matches!(request.method(), Method::Get | Method::Head) || response.status() != 200 {
            return None;
        }

        if Self::needs_etag(response) {
            let etag = Self::etag(response.body());
            response.set_header("ETag", etag);
        }

        let fresh = match request.header("if-none-match") {
            Some(condition) => response
                .header("ETag")
                .is_some_and(|etag| etag_matches(condition, etag)),
            None => match (
                request.header("if-modified-since").and_then(http_date),
                response.header("Last-Modified").and_then(http_date),
            ) {
                (Some(since), Some(modified)) => modified <= since,
                _ => false,
            },
        };

        match fresh {
            true => Some(Self::not_modified(response)),
            false => None,
        }
    }
}

/// Weak comparison of an `If-None-Match` list against `etag`.
fn etag_matches(condition: &str, etag: &str) -> bool {
    let strip = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let etag = strip(etag);

    condition
        .split(',')
        .any(|tag| tag.trim() == "*" || strip(tag) == etag)
}

/// Seconds since the epoch of an RFC 7231 date.
fn http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.timestamp())
}
