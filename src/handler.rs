use crate::{Context, HttpError, Method, PathArgs, Request, Response};

/// Turns a request into a response.
///
/// The single extension point between the engine and application code.
/// Any `Fn(&Request, &PathArgs, &Context) -> Result<Response, HttpError>`
/// closure is a handler; per-verb dispatch is done by [`MethodRouter`].
///
/// An `Err` is rendered as an error page by the server and still goes
/// through the response phase of the middleware chain.
///
/// # Examples
/// ```
/// use trellis_web::{Context, Handler, HttpError, PathArgs, Request, Response};
///
/// struct Profile;
///
/// impl Handler for Profile {
///     fn handle(&self, _: &Request, args: &PathArgs, _: &Context) -> Result<Response, HttpError> {
///         let id: u32 = args.parse("id")?;
///         Ok(Response::ok(format!("<h1>User {id}</h1>")))
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        request: &Request,
        args: &PathArgs,
        context: &Context,
    ) -> Result<Response, HttpError>;
}

impl<F> Handler for F
where
    F: Fn(&Request, &PathArgs, &Context) -> Result<Response, HttpError> + Send + Sync + 'static,
{
    #[inline]
    fn handle(
        &self,
        request: &Request,
        args: &PathArgs,
        context: &Context,
    ) -> Result<Response, HttpError> {
        self(request, args, context)
    }
}

/// Per-verb routing table, itself a [`Handler`].
///
/// A request whose method has no entry gets `405 Method Not Allowed` with an
/// `Allow` header. `HEAD` falls back to the `GET` handler and `OPTIONS` is
/// answered automatically unless registered.
///
/// # Examples
/// ```
/// use trellis_web::{HttpError, MethodRouter, Response};
///
/// let articles = MethodRouter::new()
///     .get(|_, _, _| Ok(Response::ok("list")))
///     .post(|req, _, _| {
///         let title = req.form()?.get("title").ok_or(HttpError::bad_request("no title"))?;
///         Ok(Response::ok(format!("created {title}")))
///     });
///
/// assert_eq!(articles.allowed(), "GET, HEAD, POST, OPTIONS");
/// ```
#[derive(Default)]
pub struct MethodRouter {
    routes: Vec<(Method, Box<dyn Handler>)>,
}

macro_rules! verb_methods {
    ($($name:ident => $method:ident),* $(,)?) => { $(
        #[doc = concat!("Registers the handler for `", stringify!($method), "` requests.")]
        #[inline]
        pub fn $name<F>(self, f: F) -> Self
        where
            F: Fn(&Request, &PathArgs, &Context) -> Result<Response, HttpError>
                + Send
                + Sync
                + 'static,
        {
            self.on(Method::$method, f)
        }
    )* };
}

impl MethodRouter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`, replacing a previous one.
    pub fn on<H: Handler>(mut self, method: Method, handler: H) -> Self {
        self.routes.retain(|(m, _)| *m != method);
        self.routes.push((method, Box::new(handler)));
        self
    }

    verb_methods! {
        get => Get,
        post => Post,
        put => Put,
        patch => Patch,
        delete => Delete,
        head => Head,
        options => Options,
    }

    #[inline]
    fn find(&self, method: Method) -> Option<&dyn Handler> {
        self.routes
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, handler)| handler.as_ref())
    }

    fn allowed_methods(&self) -> Vec<Method> {
        Method::ALL
            .into_iter()
            .filter(|method| match method {
                Method::Head => self.find(Method::Head).is_some() || self.find(Method::Get).is_some(),
                Method::Options => true,
                _ => self.find(*method).is_some(),
            })
            .collect()
    }

    /// Value of the `Allow` header for this table.
    pub fn allowed(&self) -> String {
        let allowed: Vec<&str> = self.allowed_methods().iter().map(Method::as_str).collect();
        allowed.join(", ")
    }
}

impl Handler for MethodRouter {
    fn handle(
        &self,
        request: &Request,
        args: &PathArgs,
        context: &Context,
    ) -> Result<Response, HttpError> {
        let method = request.method();
        if let Some(handler) = self.find(method) {
            return handler.handle(request, args, context);
        }

        match method {
            // The server drops the body when writing a HEAD response
            Method::Head => match self.find(Method::Get) {
                Some(handler) => handler.handle(request, args, context),
                None => Ok(Response::not_allowed(&self.allowed_methods())),
            },
            Method::Options => {
                let mut resp = Response::with_status(200);
                resp.set_header("Allow", self.allowed());
                Ok(resp)
            }
            _ => Ok(Response::not_allowed(&self.allowed_methods())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::request;

    fn router() -> MethodRouter {
        MethodRouter::new()
            .get(|_, _, _| Ok(Response::ok("get")))
            .post(|req, _, _| Ok(Response::ok(req.body())))
            .delete(|_, _, _| Err(HttpError::forbidden("read only")))
    }

    #[test]
    fn dispatch_by_method() {
        let router = router();
        let args = PathArgs::default();
        let context = Context::new();

        #[rustfmt::skip]
        let cases = [
            ("GET", 200, "get"),
            ("POST", 200, "data"),
            ("PUT", 405, ""),
            ("PATCH", 405, ""),
            ("OPTIONS", 200, ""),
        ];

        for (method, status, body) in cases {
            let raw = format!("{method} / HTTP/1.1\r\nContent-Length: 4\r\n\r\ndata");
            let resp = router.handle(&request(raw.as_bytes()), &args, &context).unwrap();
            assert_eq!(resp.status(), status, "{method}");
            assert_eq!(resp.body(), body.as_bytes(), "{method}");
        }

        let err = router
            .handle(&request(b"DELETE / HTTP/1.1\r\n\r\n"), &args, &context)
            .unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn allow_header() {
        let router = router();
        assert_eq!(router.allowed(), "GET, HEAD, POST, DELETE, OPTIONS");

        let resp = router
            .handle(&request(b"PUT / HTTP/1.1\r\n\r\n"), &PathArgs::default(), &Context::new())
            .unwrap();
        assert_eq!(resp.header("allow"), Some("GET, HEAD, POST, DELETE, OPTIONS"));

        let empty = MethodRouter::new();
        assert_eq!(empty.allowed(), "OPTIONS");
    }

    #[test]
    fn head_falls_back_to_get() {
        let resp = router()
            .handle(&request(b"HEAD / HTTP/1.1\r\n\r\n"), &PathArgs::default(), &Context::new())
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body(), b"get");
    }

    #[test]
    fn later_registration_wins() {
        let router = MethodRouter::new()
            .get(|_, _, _| Ok(Response::ok("first")))
            .get(|_, _, _| Ok(Response::ok("second")));

        let resp = router
            .handle(&request(b"GET / HTTP/1.1\r\n\r\n"), &PathArgs::default(), &Context::new())
            .unwrap();
        assert_eq!(resp.body(), b"second");
    }
}
