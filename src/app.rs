use crate::{
    middleware::{self, Middleware},
    urls::{resolve, UrlPattern},
    Context, HttpError, Request, Response,
};
use std::fmt;

/// Everything a worker needs to answer a request: the URL patterns, the
/// middleware chain and the [`Context`].
///
/// Built once by [`ServerBuilder::build`](crate::ServerBuilder::build) and
/// shared read-only between workers.
///
/// # Examples
/// ```
/// use trellis_web::{path, Application, Context, ConditionalGetMiddleware, Middleware};
/// use trellis_web::{request_from_bytes, Response};
///
/// let app = Application::new(
///     vec![path("/", "home", |_, _, _| Ok(Response::ok("home")))],
///     vec![Box::new(ConditionalGetMiddleware) as Box<dyn Middleware>],
///     Context::new(),
/// );
///
/// let resp = app.handle(&request_from_bytes(b"GET / HTTP/1.1\r\n\r\n").unwrap());
/// assert_eq!(resp.status(), 200);
/// assert!(resp.has_header("etag"));
///
/// let resp = app.handle(&request_from_bytes(b"GET /missing HTTP/1.1\r\n\r\n").unwrap());
/// assert_eq!(resp.status(), 404);
/// ```
pub struct Application {
    patterns: Vec<UrlPattern>,
    middleware: Vec<Box<dyn Middleware>>,
    context: Context,
}

impl Application {
    pub fn new(
        patterns: Vec<UrlPattern>,
        middleware: Vec<Box<dyn Middleware>>,
        context: Context,
    ) -> Self {
        Self {
            patterns,
            middleware,
            context,
        }
    }

    #[inline(always)]
    pub fn patterns(&self) -> &[UrlPattern] {
        &self.patterns
    }

    #[inline(always)]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Runs `request` through the middleware chain and the matching handler.
    ///
    /// A handler error becomes its error page, a path without a pattern a
    /// `404`; both still pass through the response phase of the middleware.
    pub fn handle(&self, request: &Request) -> Response {
        middleware::run_chain(&self.middleware, request, &self.context, || {
            self.dispatch(request)
        })
    }

    fn dispatch(&self, request: &Request) -> Response {
        let Some(resolved) = resolve(request.path(), &self.patterns) else {
            let message = match self.context.is_debug() {
                true => format!("No URL pattern matches {:?}", request.path()),
                false => String::new(),
            };
            return HttpError::not_found(message).to_response();
        };

        match resolved.apply(request, &self.context) {
            Ok(response) => response,
            Err(err) => {
                log::debug!("{} {}: {err}", request.method(), request.path());
                err.to_response()
            }
        }
    }

    /// The page sent when a handler or middleware panicked.
    pub(crate) fn panic_response(&self, message: &str) -> Response {
        let message = match self.context.is_debug() {
            true => message,
            false => "",
        };
        HttpError::internal(message).to_response()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("patterns", &self.patterns)
            .field("middleware", &self.middleware.len())
            .field("context", &self.context)
            .finish()
    }
}
