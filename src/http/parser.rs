//! Incremental request line and header parser.
//!
//! The parser walks the accumulated bytes one at a time and remembers where it
//! stopped, so it can be fed the same growing buffer after every socket read
//! without rescanning. Only offsets are recorded while scanning; strings are
//! built once the blank line has been seen and the whole head has passed the
//! UTF-8 check.

use crate::{
    errors::ErrorKind,
    http::types::{self, is_target_char, is_token, is_value_char, HeaderMap},
    limits::ReqLimits,
    Method, Version,
};
use std::ops::Range;

/// Outcome of feeding bytes to a [`Parser`]. Malformed input is reported as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseStatus {
    /// The head is complete; the value is the number of bytes it occupies,
    /// delimiter included. Anything after it is the body beginning.
    Complete(usize),
    /// More bytes are needed.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    MethodStart,
    Method,
    TargetStart,
    Asterisk,
    Path,
    Query,
    Fragment,
    VersionH,
    VersionT1,
    VersionT2,
    VersionP,
    VersionSlash,
    VersionMajor,
    VersionDot,
    VersionMinor,
    RequestLineCr,
    RequestLineLf,
    HeaderLineStart,
    HeaderName,
    HeaderColon,
    HeaderValueStart,
    HeaderValue,
    HeaderLf,
    HeadersEndLf,
    Done,
}

#[derive(Debug, Clone)]
pub(crate) struct Parser {
    state: State,
    pos: usize,

    method: Option<Method>,
    method_start: usize,
    path: Range<usize>,
    query: Option<Range<usize>>,
    major: u8,
    minor: u8,

    name: Range<usize>,
    value: Range<usize>,
    headers: Vec<(Range<usize>, Range<usize>)>,

    max_size: usize,
    max_count: usize,
}

/// The parsed and validated request head.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RequestHead {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) content_length: Option<usize>,
    pub(crate) chunked: bool,
    pub(crate) keep_alive: bool,
}

impl Parser {
    #[inline]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            state: State::MethodStart,
            pos: 0,

            method: None,
            method_start: 0,
            path: 0..0,
            query: None,
            major: 0,
            minor: 0,

            name: 0..0,
            value: 0..0,
            headers: Vec::with_capacity(limits.header_count.min(32)),

            max_size: limits.header_size,
            max_count: limits.header_count,
        }
    }

    /// Continues scanning `buf` from where the previous call stopped.
    ///
    /// `buf` must be the same buffer as before, possibly extended.
    pub(crate) fn parse(&mut self, buf: &[u8]) -> Result<ParseStatus, ErrorKind> {
        while self.pos < buf.len() {
            if self.state == State::Done {
                break;
            }
            if self.pos >= self.max_size {
                return Err(ErrorKind::HeadersTooLarge);
            }

            let byte = buf[self.pos];
            self.step(buf, byte)?;
            self.pos += 1;
        }

        Ok(match self.state {
            State::Done => ParseStatus::Complete(self.pos),
            _ => ParseStatus::Partial,
        })
    }

    #[inline]
    fn step(&mut self, buf: &[u8], byte: u8) -> Result<(), ErrorKind> {
        let pos = self.pos;

        self.state = match (self.state, byte) {
            // Request line
            (State::MethodStart, b'\r' | b'\n') => State::MethodStart,
            (State::MethodStart, b) if is_token(b) => {
                self.method_start = pos;
                State::Method
            }
            (State::MethodStart, _) => return Err(ErrorKind::InvalidMethod),

            (State::Method, b' ') => {
                self.method = Some(Method::from_token(&buf[self.method_start..pos])?);
                State::TargetStart
            }
            (State::Method, b) if is_token(b) => State::Method,
            (State::Method, _) => return Err(ErrorKind::InvalidMethod),

            (State::TargetStart, b'/') => {
                self.path = pos..pos;
                State::Path
            }
            (State::TargetStart, b'*') => {
                self.path = pos..pos + 1;
                State::Asterisk
            }
            (State::TargetStart, _) => return Err(ErrorKind::InvalidUrl),

            // Asterisk form: a lone `*`
            (State::Asterisk, b' ') => State::VersionH,
            (State::Asterisk, _) => return Err(ErrorKind::InvalidUrl),

            (State::Path, b' ') => {
                self.path.end = pos;
                State::VersionH
            }
            (State::Path, b'?') => {
                self.path.end = pos;
                self.query = Some(pos + 1..pos + 1);
                State::Query
            }
            (State::Path, b'#') => {
                self.path.end = pos;
                State::Fragment
            }
            (State::Path, b) if is_target_char(b) => State::Path,
            (State::Path, _) => return Err(ErrorKind::InvalidUrl),

            (State::Query, b' ' | b'#') => {
                if let Some(query) = self.query.as_mut() {
                    query.end = pos;
                }
                match byte {
                    b' ' => State::VersionH,
                    _ => State::Fragment,
                }
            }
            (State::Query, b) if is_target_char(b) => State::Query,
            (State::Query, _) => return Err(ErrorKind::InvalidUrl),

            // Never sent by conforming clients, skipped when present
            (State::Fragment, b' ') => State::VersionH,
            (State::Fragment, b) if is_target_char(b) => State::Fragment,
            (State::Fragment, _) => return Err(ErrorKind::InvalidUrl),

            (State::VersionH, b'H') => State::VersionT1,
            (State::VersionT1, b'T') => State::VersionT2,
            (State::VersionT2, b'T') => State::VersionP,
            (State::VersionP, b'P') => State::VersionSlash,
            (State::VersionSlash, b'/') => State::VersionMajor,
            (State::VersionMajor, b) if b.is_ascii_digit() => {
                self.major = b - b'0';
                State::VersionDot
            }
            (State::VersionDot, b'.') => State::VersionMinor,
            (State::VersionMinor, b) if b.is_ascii_digit() => {
                self.minor = b - b'0';
                State::RequestLineCr
            }
            (State::RequestLineCr, b'\r') => State::RequestLineLf,
            (State::RequestLineLf, b'\n') => {
                Version::from_digits(self.major, self.minor)?;
                State::HeaderLineStart
            }
            (
                State::VersionH
                | State::VersionT1
                | State::VersionT2
                | State::VersionP
                | State::VersionSlash
                | State::VersionMajor
                | State::VersionDot
                | State::VersionMinor
                | State::RequestLineCr
                | State::RequestLineLf,
                _,
            ) => return Err(ErrorKind::InvalidVersion),

            // Header lines
            (State::HeaderLineStart, b'\r') => State::HeadersEndLf,
            (State::HeaderLineStart, b) if is_token(b) => {
                if self.headers.len() >= self.max_count {
                    return Err(ErrorKind::TooManyHeaders);
                }
                self.name = pos..pos;
                State::HeaderName
            }
            (State::HeaderLineStart, _) => return Err(ErrorKind::InvalidHeader),

            (State::HeaderName, b':') => {
                self.name.end = pos;
                State::HeaderColon
            }
            (State::HeaderName, b) if is_token(b) => State::HeaderName,
            (State::HeaderName, _) => return Err(ErrorKind::InvalidHeader),

            (State::HeaderColon, b' ' | b'\t') => State::HeaderValueStart,
            (State::HeaderColon, _) => return Err(ErrorKind::InvalidHeader),

            (State::HeaderValueStart, b' ' | b'\t') => State::HeaderValueStart,
            (State::HeaderValueStart, b'\r') => {
                self.value = pos..pos;
                self.push_header();
                State::HeaderLf
            }
            (State::HeaderValueStart, b) if is_value_char(b) => {
                self.value = pos..pos + 1;
                State::HeaderValue
            }
            (State::HeaderValueStart, _) => return Err(ErrorKind::InvalidHeader),

            (State::HeaderValue, b'\r') => {
                self.push_header();
                State::HeaderLf
            }
            // Trailing whitespace is not part of the value
            (State::HeaderValue, b' ' | b'\t') => State::HeaderValue,
            (State::HeaderValue, b) if is_value_char(b) => {
                self.value.end = pos + 1;
                State::HeaderValue
            }
            (State::HeaderValue, _) => return Err(ErrorKind::InvalidHeader),

            (State::HeaderLf, b'\n') => State::HeaderLineStart,
            (State::HeaderLf, _) => return Err(ErrorKind::InvalidHeader),

            (State::HeadersEndLf, b'\n') => State::Done,
            (State::HeadersEndLf, _) => return Err(ErrorKind::InvalidHeader),

            (State::Done, _) => State::Done,
        };

        Ok(())
    }

    #[inline(always)]
    fn push_header(&mut self) {
        self.headers.push((self.name.clone(), self.value.clone()));
    }

    /// Builds the request head once [`Parser::parse`] returned `Complete`.
    pub(crate) fn finish(&self, buf: &[u8]) -> Result<RequestHead, ErrorKind> {
        let (State::Done, Some(method)) = (self.state, self.method) else {
            return Err(ErrorKind::Incomplete);
        };

        let head = simdutf8::basic::from_utf8(&buf[..self.pos])
            .map_err(|_| ErrorKind::InvalidEncoding)?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            headers.insert(&head[name.clone()], &head[value.clone()]);
        }

        let version = Version::from_digits(self.major, self.minor)?;
        let content_length = match headers.get("content-length") {
            Some(value) => Some(
                types::slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?,
            ),
            None => None,
        };
        let chunked = match headers.get("transfer-encoding") {
            Some(value) if value.eq_ignore_ascii_case("chunked") => true,
            Some(_) => return Err(ErrorKind::UnsupportedTransferEncoding),
            None => false,
        };
        if chunked && content_length.is_some() {
            return Err(ErrorKind::ConflictingLength);
        }

        let mut keep_alive = version == Version::Http11;
        if let Some(value) = headers.get("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    keep_alive = true;
                }
            }
        }

        Ok(RequestHead {
            method,
            path: head[self.path.clone()].to_string(),
            query: match &self.query {
                Some(range) => head[range.clone()].to_string(),
                None => String::new(),
            },
            version,
            headers,
            content_length,
            chunked,
            keep_alive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<RequestHead, ErrorKind> {
        parse_with(input, &ReqLimits::default())
    }

    fn parse_with(input: &str, limits: &ReqLimits) -> Result<RequestHead, ErrorKind> {
        let mut parser = Parser::new(limits);
        match parser.parse(input.as_bytes())? {
            ParseStatus::Complete(_) => parser.finish(input.as_bytes()),
            ParseStatus::Partial => Err(ErrorKind::Incomplete),
        }
    }

    macro_rules! parse_request {
        ($cases:expr) => {
            for (req, result) in $cases {
                match result {
                    Ok((method, path, query, version, headers, keep_alive)) => {
                        let head = parse(req).unwrap();

                        assert_eq!(head.method, method, "{req:?}");
                        assert_eq!(head.path, path, "{req:?}");
                        assert_eq!(head.query, query, "{req:?}");
                        assert_eq!(head.version, version, "{req:?}");
                        assert_eq!(head.keep_alive, keep_alive, "{req:?}");

                        let headers: Vec<(&str, &str)> = headers;
                        assert_eq!(head.headers.len(), headers.len(), "{req:?}");
                        for (name, value) in headers {
                            assert_eq!(head.headers.get(name), Some(value), "{req:?}");
                        }
                    }
                    Err(e) => assert_eq!(parse(req), Err(e), "{req:?}"),
                }
            }
        };
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/", "", Version::Http11, vec![], true)),
            ),
            (
                "GET /hello?x=1 HTTP/1.1\r\nHost: test\r\n\r\n",
                Ok((Method::Get, "/hello", "x=1", Version::Http11, vec![("host", "test")], true)),
            ),
            (
                "GET /a/b?x=1&y=&z HTTP/1.0\r\n\r\n",
                Ok((Method::Get, "/a/b", "x=1&y=&z", Version::Http10, vec![], false)),
            ),
            (
                "GET /page#section HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/page", "", Version::Http11, vec![], true)),
            ),
            (
                "GET /? HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/", "", Version::Http11, vec![], true)),
            ),
            (
                "OPTIONS * HTTP/1.1\r\n\r\n",
                Ok((Method::Options, "*", "", Version::Http11, vec![], true)),
            ),
            (
                "PUT /qwe HTTP/1.1\r\nHoSt: 127.0.0.1\r\nUser-Agent: curl/8.0\r\n\r\n",
                Ok((
                    Method::Put, "/qwe", "", Version::Http11,
                    vec![("host", "127.0.0.1"), ("user-agent", "curl/8.0")], true,
                )),
            ),
            (
                "DELETE /x HTTP/1.1\r\nConnection: close\r\n\r\n",
                Ok((Method::Delete, "/x", "", Version::Http11, vec![("connection", "close")], false)),
            ),
            (
                "PATCH / HTTP/1.0\r\nconnection: Keep-Alive\r\n\r\n",
                Ok((Method::Patch, "/", "", Version::Http10, vec![("connection", "Keep-Alive")], true)),
            ),
            (
                "GET / HTTP/1.1\r\nX-Empty: \r\nX-Pad:   padded value \t\r\n\r\n",
                Ok((
                    Method::Get, "/", "", Version::Http11,
                    vec![("x-empty", ""), ("x-pad", "padded value")], true,
                )),
            ),
            (
                "GET / HTTP/1.1\r\nX-Dup: first\r\nx-dup: second\r\n\r\n",
                Ok((Method::Get, "/", "", Version::Http11, vec![("x-dup", "second")], true)),
            ),
            (
                "\r\nHEAD /skip-leading-crlf HTTP/1.1\r\n\r\n",
                Ok((Method::Head, "/skip-leading-crlf", "", Version::Http11, vec![], true)),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases: Vec<(&str, Result<(Method, &str, &str, Version, Vec<(&str, &str)>, bool), ErrorKind>)> = vec![
            (" GET / HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidMethod)),
            ("GE(T / HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidMethod)),
            ("get / HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidMethod)),
            ("BREW / HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidMethod)),
            ("GET  HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET path HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET *abc HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("OPTIONS */ HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("OPTIONS *?x HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET /a\x01b HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET / HTTP/1.1\n\n", Err(ErrorKind::InvalidVersion)),
            ("GET / HTTP/1.1 \r\n\r\n", Err(ErrorKind::InvalidVersion)),
            ("GET / HTTX/1.1\r\n\r\n", Err(ErrorKind::InvalidVersion)),
            ("GET / HTTP/1.x\r\n\r\n", Err(ErrorKind::InvalidVersion)),
            ("GET / HTTP/2.0\r\n\r\n", Err(ErrorKind::UnsupportedVersion)),
            ("GET / HTTP/1.1\r\nHost 127.0.0.1\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nHost:127.0.0.1\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nHo(st: a\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\n: a\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nHost: a\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nHost: a\r\n folded\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nHost: a\x7fb\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nHost: a\r\n\rX", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nHost: a\r\n", Err(ErrorKind::Incomplete)),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_framing_headers() {
        #[rustfmt::skip]
        let cases = [
            ("Content-Length: 12\r\n", Ok((Some(12), false))),
            ("content-length: 0\r\n", Ok((Some(0), false))),
            ("Transfer-Encoding: chunked\r\n", Ok((None, true))),
            ("Transfer-Encoding: CHUNKED\r\n", Ok((None, true))),
            ("", Ok((None, false))),
            ("Content-Length: 1a\r\n", Err(ErrorKind::InvalidContentLength)),
            ("Content-Length: -1\r\n", Err(ErrorKind::InvalidContentLength)),
            ("Content-Length: \r\n", Err(ErrorKind::InvalidContentLength)),
            ("Transfer-Encoding: gzip\r\n", Err(ErrorKind::UnsupportedTransferEncoding)),
            (
                "Content-Length: 3\r\nTransfer-Encoding: chunked\r\n",
                Err(ErrorKind::ConflictingLength),
            ),
        ];

        for (headers, result) in cases {
            let head = parse(&format!("POST / HTTP/1.1\r\n{headers}\r\n"));
            match result {
                Ok((content_length, chunked)) => {
                    let head = head.unwrap();
                    assert_eq!(head.content_length, content_length, "{headers:?}");
                    assert_eq!(head.chunked, chunked, "{headers:?}");
                }
                Err(e) => assert_eq!(head, Err(e), "{headers:?}"),
            }
        }
    }

    #[test]
    fn incremental_feed() {
        let input = b"POST /upload?id=7 HTTP/1.1\r\nHost: test\r\nContent-Length: 4\r\n\r\nbody";
        let head_len = input.len() - 4;

        let mut parser = Parser::new(&ReqLimits::default());
        for end in 1..head_len {
            assert_eq!(parser.parse(&input[..end]), Ok(ParseStatus::Partial), "{end}");
        }
        assert_eq!(parser.parse(input), Ok(ParseStatus::Complete(head_len)));

        let head = parser.finish(input).unwrap();
        assert_eq!(head.method, Method::Post);
        assert_eq!(head.path, "/upload");
        assert_eq!(head.query, "id=7");
        assert_eq!(head.content_length, Some(4));
        assert_eq!(&input[head_len..], b"body");
    }

    #[test]
    fn check_limits() {
        let limits = ReqLimits {
            header_size: 64,
            header_count: 2,
            ..ReqLimits::default()
        };

        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n", Ok(())),
            ("GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n", Err(ErrorKind::TooManyHeaders)),
            (
                "GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n",
                Err(ErrorKind::HeadersTooLarge),
            ),
        ];

        for (req, result) in cases {
            assert_eq!(parse_with(req, &limits).map(|_| ()), result, "{req:?}");
        }
    }

    #[test]
    fn rejects_invalid_utf8() {
        let input = b"GET / HTTP/1.1\r\nX-Name: \xff\xfe\r\n\r\n";
        let mut parser = Parser::new(&ReqLimits::default());

        assert_eq!(parser.parse(input), Ok(ParseStatus::Complete(input.len())));
        assert_eq!(parser.finish(input), Err(ErrorKind::InvalidEncoding));
    }
}
