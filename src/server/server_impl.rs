use crate::{
    app::Application,
    limits::{ConnLimits, ReqLimits, ServerLimits},
    net::socket::{Socket, SocketError},
    server::{
        connection::{AllLimits, Job},
        pool::ThreadPool,
    },
    urls::{PathArgs, PatternError, UrlPattern},
    Context, Handler, HttpError, Middleware, Request, Response,
};
use chrono::{DateTime, Local};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    thread,
    time::Duration,
};
use thiserror::Error;

/// Why the server could not be built or could not run.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("failed to start a thread: {0}")]
    Spawn(#[from] io::Error),
}

/// A configured server, ready to [`launch`](Server::launch).
///
/// The main thread accepts connections and queues them; a fixed pool of
/// workers reads one request per connection, dispatches it through the
/// [`Application`] and closes the connection.
///
/// # Examples
///
/// ```no_run
/// use trellis_web::{HttpError, MethodRouter, Response, Server};
///
/// Server::builder()
///     .route("/", |_, _, _| Ok(Response::ok("Hello world!")))
///     .route(r"/item/<id>(\d+)", |_, args, _| {
///         let id: u32 = args.parse("id")?;
///         Ok(Response::ok(format!("item #{id}")))
///     })
///     .handler("/form", "form", MethodRouter::new()
///         .get(|_, _, _| Ok(Response::ok("<form method=post>...</form>")))
///         .post(|req, _, _| {
///             let form = req.form().map_err(HttpError::from)?;
///             Ok(Response::ok(form.get("name").unwrap_or("anonymous").to_string()))
///         }))
///     .build()
///     .unwrap()
///     .launch()
///     .unwrap();
/// ```
pub struct Server {
    socket: Option<Socket>,
    app: Arc<Application>,
    limits: Arc<AllLimits>,
    shutdown: Arc<Shutdown>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            patterns: Vec::new(),
            middleware: Vec::new(),
            context: Context::default(),
            pattern_error: None,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
        }
    }

    /// Creates, binds and starts listening on the configured address.
    ///
    /// Calling it again returns the address already bound. [`Server::launch`]
    /// binds on its own; call this first to learn the port when
    /// [`ServerLimits::port`] is `0`.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::{limits::ServerLimits, Server};
    ///
    /// let mut server = Server::builder()
    ///     .server_limits(ServerLimits { port: 0, ..ServerLimits::default() })
    ///     .build()
    ///     .unwrap();
    ///
    /// let addr = server.bind().unwrap();
    /// assert_ne!(addr.port(), 0);
    /// assert_eq!(server.local_addr(), Some(addr));
    /// ```
    pub fn bind(&mut self) -> Result<SocketAddr, SocketError> {
        if let Some(socket) = &self.socket {
            return socket.local_addr();
        }

        let limits = &self.limits.0;
        let socket = Socket::create(&limits.host, limits.port, limits.use_ipv6)?;
        socket.set_reuse_addr()?;
        socket.bind()?;
        socket.listen(limits.backlog)?;

        let addr = socket.local_addr()?;
        let _ = self.shutdown.wake.set(addr);
        self.socket = Some(socket);

        Ok(addr)
    }

    /// The bound address, once [`Server::bind`] succeeded.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }

    /// A handle that stops [`Server::launch`] from another thread.
    #[inline]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    #[inline(always)]
    pub fn application(&self) -> &Application {
        &self.app
    }

    /// Runs the accept loop until shut down by Ctrl-C or a [`ShutdownHandle`].
    ///
    /// Queued connections are still served before it returns.
    pub fn launch(mut self) -> Result<(), ServerError> {
        let addr = self.bind()?;
        let server_limits = &self.limits.0;

        print!("{}", banner(Local::now(), addr));
        log::info!(
            "listening on {addr} with {} worker threads",
            server_limits.threads.max(1)
        );

        if server_limits.handle_signals {
            spawn_signal_watcher(self.shutdown_handle())?;
        }

        let pool = ThreadPool::new(server_limits.threads, Job::run)?;
        let Some(mut socket) = self.socket.take() else {
            return Ok(());
        };

        while !self.shutdown.is_stopped() {
            let accepted = socket.accept();
            if self.shutdown.is_stopped() {
                break;
            }

            match accepted {
                Ok((stream, peer)) => {
                    let job = Job {
                        stream,
                        peer,
                        app: self.app.clone(),
                        limits: self.limits.clone(),
                    };
                    if pool.submit(job).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("{err}");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }

        socket.close();
        pool.join();
        log::info!("server on {addr} stopped");

        Ok(())
    }
}

/// Builder for configuring and creating [`Server`] instances.
///
/// Patterns are tried in registration order; the first match wins.
pub struct ServerBuilder {
    patterns: Vec<UrlPattern>,
    middleware: Vec<Box<dyn Middleware>>,
    context: Context,
    pattern_error: Option<PatternError>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl ServerBuilder {
    /// Adds an unnamed pattern served by a closure.
    ///
    /// An invalid pattern is reported by [`ServerBuilder::build`].
    #[inline]
    pub fn route<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&Request, &PathArgs, &Context) -> Result<Response, HttpError> + Send + Sync + 'static,
    {
        self.handler(pattern, "", handler)
    }

    /// Adds a named pattern served by any [`Handler`], e.g. a
    /// [`MethodRouter`](crate::MethodRouter).
    pub fn handler<H: Handler>(mut self, pattern: &str, name: &str, handler: H) -> Self {
        match UrlPattern::new(pattern, handler, name) {
            Ok(pattern) => self.patterns.push(pattern),
            Err(err) => {
                self.pattern_error.get_or_insert(err);
            }
        }
        self
    }

    #[inline]
    pub fn pattern(mut self, pattern: UrlPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Appends already built patterns, e.g. the result of
    /// [`include`](crate::include).
    #[inline]
    pub fn patterns<I: IntoIterator<Item = UrlPattern>>(mut self, patterns: I) -> Self {
        self.patterns.extend(patterns);
        self
    }

    /// Appends a middleware; the first one added is the outermost.
    #[inline]
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    #[inline(always)]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Builds the server without binding it.
    ///
    /// # Errors
    /// The first invalid pattern passed to [`ServerBuilder::route`] or
    /// [`ServerBuilder::handler`].
    pub fn build(self) -> Result<Server, ServerError> {
        if let Some(err) = self.pattern_error {
            return Err(err.into());
        }

        let limits = (
            self.server_limits.unwrap_or_default(),
            self.connection_limits.unwrap_or_default(),
            self.request_limits.unwrap_or_default(),
        );

        Ok(Server {
            socket: None,
            app: Arc::new(Application::new(
                self.patterns,
                self.middleware,
                self.context,
            )),
            limits: Arc::new(limits),
            shutdown: Arc::new(Shutdown::default()),
        })
    }
}

#[derive(Debug, Default)]
struct Shutdown {
    stop: AtomicBool,
    wake: OnceLock<SocketAddr>,
}

impl Shutdown {
    #[inline]
    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Stops a running [`Server`] from any thread.
///
/// # Examples
/// ```
/// use std::thread;
/// use trellis_web::{limits::ServerLimits, Server};
///
/// let server = Server::builder()
///     .server_limits(ServerLimits {
///         port: 0,
///         handle_signals: false,
///         ..ServerLimits::default()
///     })
///     .build()
///     .unwrap();
///
/// let handle = server.shutdown_handle();
/// let running = thread::spawn(move || server.launch());
///
/// handle.shutdown();
/// running.join().unwrap().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<Shutdown>);

impl ShutdownHandle {
    /// Asks the accept loop to stop and wakes it up.
    ///
    /// Works before the server is bound too: `launch` then returns right
    /// after binding.
    pub fn shutdown(&self) {
        self.0.stop.store(true, Ordering::SeqCst);

        if let Some(addr) = self.0.wake.get() {
            // A throwaway connection unblocks `accept`.
            let target = SocketAddr::new(loopback_for(addr.ip()), addr.port());
            if let Err(err) = TcpStream::connect_timeout(&target, Duration::from_secs(1)) {
                log::debug!("shutdown wake-up to {target} failed: {err}");
            }
        }
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.0.is_stopped()
    }
}

fn loopback_for(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    }
}

/// Waits for Ctrl-C on a small current-thread runtime of its own.
fn spawn_signal_watcher(handle: ShutdownHandle) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("trellis-signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("interrupted, shutting down");
                        handle.shutdown();
                    }
                    Err(err) => log::error!("cannot listen for Ctrl-C: {err}"),
                }
            })
        })?;

    Ok(())
}

fn banner(now: DateTime<Local>, addr: SocketAddr) -> String {
    format!(
        "{}\ntrellis_web version {}\nStarting development server at http://{addr}/\nQuit the server with CONTROL-C.\n",
        now.format("%B %d, %Y - %H:%M:%S"),
        env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn banner_text() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let text = banner(now, "127.0.0.1:8000".parse().unwrap());
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "March 05, 2024 - 14:07:09");
        assert_eq!(lines[1], format!("trellis_web version {}", env!("CARGO_PKG_VERSION")));
        assert_eq!(lines[2], "Starting development server at http://127.0.0.1:8000/");
        assert_eq!(lines[3], "Quit the server with CONTROL-C.");

        let text = banner(now, "[::1]:80".parse().unwrap());
        assert!(text.contains("http://[::1]:80/"));
    }

    #[test]
    fn first_pattern_error_wins() {
        let err = Server::builder()
            .route("/ok", |_, _, _| Ok(Response::ok("")))
            .route("/<broken", |_, _, _| Ok(Response::ok("")))
            .route(r"/<x>(\d+", |_, _, _| Ok(Response::ok("")))
            .build()
            .err()
            .unwrap();

        assert!(matches!(err, ServerError::Pattern(PatternError::UnclosedName(_))));
    }

    #[test]
    fn builder_keeps_order_and_defaults() {
        let server = Server::builder()
            .route("/a", |_, _, _| Ok(Response::ok("a")))
            .pattern(crate::path("/b", "b", |_, _, _| Ok(Response::ok("b"))))
            .patterns(vec![crate::path("/c", "c", |_, _, _| Ok(Response::ok("c")))])
            .build()
            .unwrap();

        let sources: Vec<_> = server.application().patterns().iter().map(|p| p.source()).collect();
        assert_eq!(sources, ["/a", "/b", "/c"]);
        assert_eq!(server.limits.0.port, 8000);
        assert_eq!(server.local_addr(), None);
    }

    #[test]
    fn bind_is_idempotent() {
        let mut server = Server::builder()
            .server_limits(ServerLimits {
                port: 0,
                ..ServerLimits::default()
            })
            .build()
            .unwrap();

        let first = server.bind().unwrap();
        assert_eq!(server.bind().unwrap(), first);
    }

    #[test]
    fn unspecified_wakes_loopback() {
        assert_eq!(loopback_for("0.0.0.0".parse().unwrap()), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(loopback_for("::".parse().unwrap()), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(loopback_for("10.1.2.3".parse().unwrap()), "10.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn shutdown_before_launch() {
        let server = Server::builder()
            .server_limits(ServerLimits {
                port: 0,
                handle_signals: false,
                threads: 2,
                ..ServerLimits::default()
            })
            .build()
            .unwrap();

        let handle = server.shutdown_handle();
        handle.shutdown();
        assert!(handle.is_shutdown());
        server.launch().unwrap();
    }
}
