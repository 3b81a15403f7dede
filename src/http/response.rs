//! The response object built by handlers and middleware.

use crate::{
    http::{
        cookie::Cookie,
        types::{is_token, is_value_char, reason_phrase},
    },
    BodyWriter, Method, WriteBuffer,
};
use chrono::Utc;
use std::{
    borrow::Cow,
    fmt,
    io::{self, Write},
    rc::Rc,
    sync::Arc,
};
use thiserror::Error;

/// Status code outside `100..=599`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("HTTP status code must be an integer from 100 to 599, got {0}")]
pub struct InvalidStatus(pub u16);

/// Producer of body chunks for a streaming response.
pub type ChunkStream = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// Response body: fully buffered, or produced chunk by chunk while writing.
pub enum Body {
    Buffered(Vec<u8>),
    Streaming(ChunkStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(data) => f.debug_tuple("Buffered").field(&data.len()).finish(),
            Body::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// An HTTP response.
///
/// Created by a [`Handler`](crate::Handler), possibly replaced or adjusted by
/// [`Middleware`](crate::Middleware), then serialized once by the server.
///
/// Defaults: status `200`, `Content-Type: text/html; charset=utf-8`, empty
/// body. Header names are matched case-insensitively and keep the order in
/// which they were first set.
///
/// # Examples
/// ```
/// use trellis_web::{Cookie, Response};
///
/// let mut resp = Response::ok("<h1>Hello</h1>");
/// resp.set_header("Cache-Control", "no-cache");
/// resp.set_cookie(Cookie::new("visited", "1"));
///
/// assert_eq!(resp.status(), 200);
/// assert_eq!(resp.header("cache-control"), Some("no-cache"));
/// assert_eq!(resp.body(), b"<h1>Hello</h1>");
/// ```
#[derive(Debug)]
pub struct Response {
    status: u16,
    reason: Option<String>,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    body: Body,
    closed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            reason: None,
            headers: vec![(
                String::from("Content-Type"),
                String::from("text/html; charset=utf-8"),
            )],
            cookies: Vec::new(),
            body: Body::Buffered(Vec::new()),
            closed: false,
        }
    }
}

/// Constructors
impl Response {
    /// Creates an empty response, rejecting status codes outside `100..=599`.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::Response;
    ///
    /// assert_eq!(Response::new(204).unwrap().status(), 204);
    /// assert!(Response::new(600).is_err());
    /// ```
    pub fn new(status: u16) -> Result<Self, InvalidStatus> {
        match status {
            100..=599 => Ok(Self {
                status,
                ..Self::default()
            }),
            _ => Err(InvalidStatus(status)),
        }
    }

    /// Like [`Response::new`] for statuses known to be valid.
    ///
    /// # Panics
    /// Panics in `debug` mode when `status` is outside `100..=599`; release
    /// builds fall back to `500`.
    #[inline]
    #[track_caller]
    pub fn with_status(status: u16) -> Self {
        debug_assert!(
            (100..=599).contains(&status),
            "HTTP status code must be an integer from 100 to 599"
        );

        Self::new(status).unwrap_or_else(|_| Self {
            status: 500,
            ..Self::default()
        })
    }

    /// `200 OK` with an HTML body.
    #[inline]
    pub fn ok<T: WriteBuffer>(body: T) -> Self {
        let mut resp = Self::default();
        resp.set_body(body);
        resp
    }

    /// `200 OK` with a `text/plain` body.
    #[inline]
    pub fn text<T: WriteBuffer>(body: T) -> Self {
        let mut resp = Self::ok(body);
        resp.set_header("Content-Type", "text/plain; charset=utf-8");
        resp
    }

    /// `200 OK` with a JSON body.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::Response;
    /// use serde_json::json;
    ///
    /// let resp = Response::json(&json!({"id": 7}));
    /// assert_eq!(resp.header("Content-Type"), Some("application/json"));
    /// assert_eq!(resp.body(), br#"{"id":7}"#);
    /// ```
    pub fn json(value: &serde_json::Value) -> Self {
        let mut resp = Self::default();
        resp.set_body(value.to_string());
        resp.set_header("Content-Type", "application/json");
        resp
    }

    /// `302 Found` pointing at `location`.
    #[inline]
    pub fn redirect<T: Into<String>>(location: T) -> Self {
        let mut resp = Self::with_status(302);
        resp.set_header("Location", location);
        resp
    }

    /// `301 Moved Permanently` pointing at `location`.
    #[inline]
    pub fn permanent_redirect<T: Into<String>>(location: T) -> Self {
        let mut resp = Self::with_status(301);
        resp.set_header("Location", location);
        resp
    }

    /// `405 Method Not Allowed` listing the accepted methods in `Allow`.
    pub fn not_allowed(allowed: &[Method]) -> Self {
        let mut resp = Self::with_status(405);
        let allow: Vec<&str> = allowed.iter().map(Method::as_str).collect();
        resp.set_header("Allow", allow.join(", "));
        resp
    }

    /// A response whose body is produced lazily and sent with chunked encoding.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::Response;
    ///
    /// let resp = Response::streaming((1..=3).map(|i| format!("line {i}\n").into_bytes()));
    /// assert!(resp.is_streaming());
    /// ```
    pub fn streaming<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            body: Body::Streaming(Box::new(chunks.into_iter())),
            ..Self::default()
        }
    }
}

/// Status line
impl Response {
    #[inline(always)]
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) -> Result<(), InvalidStatus> {
        match status {
            100..=599 => {
                self.status = status;
                Ok(())
            }
            _ => Err(InvalidStatus(status)),
        }
    }

    /// The explicit reason phrase, or the standard one for the status code.
    #[inline]
    pub fn reason(&self) -> &str {
        match &self.reason {
            Some(reason) => reason,
            None => reason_phrase(self.status),
        }
    }

    /// Overrides the reason phrase. An empty value reads as `Unknown Status Code`.
    ///
    /// Control characters are replaced with spaces, like in header values.
    pub fn set_reason<T: Into<String>>(&mut self, reason: T) {
        let reason = clean_text("reason phrase", reason.into());
        self.reason = Some(match reason.is_empty() {
            true => String::from("Unknown Status Code"),
            false => reason,
        });
    }
}

/// Headers and cookies
impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[inline]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Sets a header, replacing the value of an existing one in place.
    ///
    /// A name that is not an HTTP token is refused and logged. Control
    /// characters in the value (`CR`, `LF`, `NUL`, ...) are replaced with
    /// spaces, so a value can never start a new header line.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::Response;
    ///
    /// let mut resp = Response::redirect("/next\r\nSet-Cookie: id=1");
    /// assert_eq!(resp.header("Location"), Some("/next  Set-Cookie: id=1"));
    ///
    /// resp.set_header("X-Bad\r\nName", "1");
    /// assert_eq!(resp.headers().count(), 2);
    /// ```
    pub fn set_header<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        if !is_header_name(&name) {
            log::warn!("refusing header with invalid name {name:?}");
            return;
        }
        let value = clean_text(&name, value.into());

        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let index = self
            .headers
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.headers.remove(index).1)
    }

    /// Headers in the order they were first set.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keeps only the headers for which `keep` returns `true`.
    pub fn retain_headers<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.headers.retain(|(name, _)| keep(name.as_str()));
    }

    /// Adds a cookie; a cookie with the same name is replaced.
    ///
    /// Cookies whose name is not an HTTP token are refused and logged.
    /// Control characters in the value and attributes become spaces.
    pub fn set_cookie(&mut self, mut cookie: Cookie) {
        if !is_header_name(&cookie.name) {
            log::warn!("refusing cookie with invalid name {:?}", cookie.name);
            return;
        }
        cookie.value = clean_text(&cookie.name, std::mem::take(&mut cookie.value));
        for attr in [&mut cookie.expires, &mut cookie.domain, &mut cookie.path]
            .into_iter()
            .flatten()
        {
            *attr = clean_text(&cookie.name, std::mem::take(attr));
        }

        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(slot) => *slot = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Tells the client to drop a cookie by expiring it.
    ///
    /// Names with a `__Secure-` or `__Host-` prefix get the `Secure` flag,
    /// otherwise browsers would ignore the deletion.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::Response;
    ///
    /// let mut resp = Response::default();
    /// resp.delete_cookie("__Host-id", "/", None);
    ///
    /// let cookie = resp.cookie("__Host-id").unwrap();
    /// assert_eq!(cookie.expires.as_deref(), Some("Thu, 01 Jan 1970 00:00:00 GMT"));
    /// assert!(cookie.secure);
    /// ```
    pub fn delete_cookie(&mut self, name: &str, path: &str, domain: Option<&str>) {
        let mut cookie = Cookie::new(name, "")
            .path(path)
            .expires("Thu, 01 Jan 1970 00:00:00 GMT")
            .max_age(0)
            .secure(Cookie::requires_secure(name));
        cookie.domain = domain.map(String::from);

        self.set_cookie(cookie);
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub fn cookies(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }
}

/// Body
impl Response {
    /// The buffered body; empty for a streaming response.
    #[inline]
    pub fn body(&self) -> &[u8] {
        match &self.body {
            Body::Buffered(data) => data,
            Body::Streaming(_) => &[],
        }
    }

    #[inline(always)]
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Streaming(_))
    }

    /// Replaces the body.
    pub fn set_body<T: WriteBuffer>(&mut self, data: T) {
        let mut buffer = Vec::new();
        data.write_to(&mut buffer);
        self.body = Body::Buffered(buffer);
    }

    /// Appends to a buffered body.
    ///
    /// # Panics
    /// Panics in `debug` mode when the response is streaming.
    #[inline]
    #[track_caller]
    pub fn write<T: WriteBuffer>(&mut self, data: T) {
        self.body_with(|w| w.write(data));
    }

    /// Appends to a buffered body through a [`BodyWriter`].
    ///
    /// # Examples
    /// ```
    /// use trellis_web::Response;
    /// use std::io::Write;
    ///
    /// let mut resp = Response::default();
    /// resp.body_with(|w| {
    ///     w.write("total: ");
    ///     w.write(42);
    ///     write!(w, ", ratio {:.1}", 0.5).unwrap();
    /// });
    /// assert_eq!(resp.body(), b"total: 42, ratio 0.5");
    /// ```
    ///
    /// # Panics
    /// Panics in `debug` mode when the response is streaming.
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) {
        debug_assert!(
            !self.is_streaming(),
            "Cannot write to a streaming response"
        );

        if let Body::Buffered(data) = &mut self.body {
            f(&mut BodyWriter(data));
        }
    }

    /// Marks the response as finished; nothing should modify it afterwards.
    #[inline]
    pub fn close(&mut self) {
        self.closed = true;
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Serialization
impl Response {
    /// Writes the full response to `out`.
    ///
    /// Sets `Date`, `Connection: close` and either `Content-Length` or, for a
    /// streaming body, `Transfer-Encoding: chunked`. Streaming chunks are
    /// flushed as they are produced.
    #[inline]
    pub fn write_to<W: Write>(self, out: &mut W) -> io::Result<()> {
        self.write_parts(out, true)
    }

    /// Like [`Response::write_to`] without the body, as sent for `HEAD`.
    #[inline]
    pub(crate) fn write_head_to<W: Write>(self, out: &mut W) -> io::Result<()> {
        self.write_parts(out, false)
    }

    fn write_parts<W: Write>(mut self, out: &mut W, with_body: bool) -> io::Result<()> {
        self.set_header(
            "Date",
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );

        let body = std::mem::replace(&mut self.body, Body::Buffered(Vec::new()));
        match &body {
            Body::Buffered(data) => {
                self.remove_header("Transfer-Encoding");
                self.set_header("Content-Length", data.len().to_string());
            }
            Body::Streaming(_) => {
                self.remove_header("Content-Length");
                self.set_header("Transfer-Encoding", "chunked");
            }
        }
        self.set_header("Connection", "close");
        self.close();

        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(b"HTTP/1.1 ");
        self.status.write_to(&mut head);
        head.push(b' ');
        head.extend_from_slice(self.reason().as_bytes());
        head.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        for cookie in &self.cookies {
            head.extend_from_slice(b"Set-Cookie: ");
            head.extend_from_slice(cookie.to_string().as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        match body {
            _ if !with_body => out.write_all(&head)?,
            Body::Buffered(data) => {
                head.extend_from_slice(&data);
                out.write_all(&head)?;
            }
            Body::Streaming(chunks) => {
                out.write_all(&head)?;
                for chunk in chunks.filter(|chunk| !chunk.is_empty()) {
                    write!(out, "{:X}\r\n", chunk.len())?;
                    out.write_all(&chunk)?;
                    out.write_all(b"\r\n")?;
                    out.flush()?;
                }
                out.write_all(b"0\r\n\r\n")?;
            }
        }
        out.flush()
    }

    /// The full response as bytes.
    pub fn serialize(self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }
}

#[inline]
fn is_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token)
}

/// Replaces control characters other than `HT` with spaces.
fn clean_text(what: &str, text: String) -> String {
    if text.bytes().all(is_value_char) {
        return text;
    }

    log::warn!("{what}: control characters replaced in {text:?}");
    text.chars()
        .map(|ch| match ch.is_ascii_control() && ch != '\t' {
            true => ' ',
            false => ch,
        })
        .collect()
}

pub mod write {
    use super::*;

    /// Writer appending to a buffered response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// Accepts any [`WriteBuffer`] value, and implements [`std::io::Write`]
    /// for `write!`.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into a response body.
    ///
    /// Implemented for strings, bytes, booleans, chars and integers.
    /// Floats are left out on purpose: use `write!` with an explicit precision.
    ///
    /// # Example
    /// ```
    /// use trellis_web::{Response, WriteBuffer};
    ///
    /// struct Celsius(i32);
    ///
    /// impl WriteBuffer for Celsius {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.extend_from_slice("°C".as_bytes());
    ///     }
    /// }
    ///
    /// assert_eq!(Response::text(Celsius(-4)).body(), "-4°C".as_bytes());
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), write_unsigned => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        number(i128), write_signed => i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }

    #[inline(always)]
    fn write_unsigned(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn write_signed(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        write_unsigned(value.unsigned_abs(), buffer);
    }
}
