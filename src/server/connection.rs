use crate::{
    app::Application,
    errors::ErrorKind,
    limits::{ConnLimits, ReqLimits, ServerLimits},
    net::reader::Reader,
    server::pool::panic_message,
    Method, Request, Response,
};
use std::{
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits);

/// One accepted connection, as queued for a worker.
pub(crate) struct Job {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) app: Arc<Application>,
    pub(crate) limits: Arc<AllLimits>,
}

impl Job {
    /// Serves the single request of this connection, then closes it.
    pub(crate) fn run(mut self) {
        let started = Instant::now();

        match self.impl_run(started) {
            Ok(()) => {}
            Err(ErrorKind::Io(err)) => log::warn!("{}: connection dropped: {err}", self.peer),
            Err(err) => {
                log::debug!("{}: {err}", self.peer);
                if self.limits.0.verbose {
                    log::info!(
                        "{} {} took {} ms",
                        self.peer,
                        err.status(),
                        started.elapsed().as_millis()
                    );
                }

                let canned = err.as_http(self.limits.0.json_errors);
                if let Err(err) = self.stream.write_all(canned) {
                    log::debug!("{}: failed to send error response: {err}", self.peer);
                }
            }
        }

        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn impl_run(&mut self, started: Instant) -> Result<(), ErrorKind> {
        let (server, conn, req) = &*self.limits;

        if !wait_readable(&self.stream, conn.client_wait())? {
            log::debug!("{}: nothing received in time", self.peer);
            return Ok(());
        }
        self.stream.set_read_timeout(non_zero(conn.socket_read_timeout))?;
        self.stream.set_write_timeout(non_zero(conn.socket_write_timeout))?;

        let deadline = started + conn.request_deadline;
        let (head, body) = Reader::new(&mut self.stream, req, deadline).read_request()?;
        let request = Request::new(head, body, Some(self.peer), self.stream.local_addr().ok(), req);

        let response = self.respond(&request);
        let status = response.status();

        match request.method() {
            Method::Head => response.write_head_to(&mut self.stream)?,
            _ => response.write_to(&mut self.stream)?,
        }

        if server.verbose {
            log::info!(
                "{} {} {} took {} ms",
                request.method(),
                request.path(),
                status,
                started.elapsed().as_millis()
            );
        }
        Ok(())
    }

    /// Runs the application, turning a panic into a `500` page.
    fn respond(&self, request: &Request) -> Response {
        match panic::catch_unwind(AssertUnwindSafe(|| self.app.handle(request))) {
            Ok(response) => response,
            Err(payload) => {
                let message = panic_message(&*payload);
                log::error!(
                    "{} {} {}: handler panicked: {message}",
                    self.peer,
                    request.method(),
                    request.path()
                );
                self.app.panic_response(message)
            }
        }
    }
}

/// Waits until the client sends something.
///
/// `Ok(false)` when the wait timed out or the client closed without sending.
fn wait_readable(stream: &TcpStream, wait: Duration) -> io::Result<bool> {
    stream.set_read_timeout(non_zero(wait))?;

    let mut probe = [0u8; 1];
    loop {
        match stream.peek(&mut probe) {
            Ok(read) => return Ok(read > 0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(false)
            }
            Err(err) => return Err(err),
        }
    }
}

/// Socket timeouts reject a zero duration; zero means no timeout.
#[inline]
fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}
