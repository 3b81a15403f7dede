//! Socket reads for the request head and body.
//!
//! Every read failure is first classified with [`classify`]:
//!
//! | Action  | `io::ErrorKind`                                                 |
//! |---------|-----------------------------------------------------------------|
//! | `Retry` | `Interrupted`, `WouldBlock`, `TimedOut`                         |
//! | `Stop`  | `ConnectionReset`, `NotConnected`, `ConnectionAborted`, `BrokenPipe` |
//! | `Fatal` | everything else                                                 |
//!
//! `Stop` is treated like end of stream: whatever arrived so far is kept and
//! judged by the caller. Retries are bounded by a deadline.

use crate::{
    errors::ErrorKind,
    http::{
        chunked::ChunkedDecoder,
        parser::{ParseStatus, Parser, RequestHead},
    },
    limits::ReqLimits,
    net::buffer::ByteBuffer,
};
use std::{
    io::{self, Read},
    time::Instant,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadAction {
    /// Transient, read again at the same point.
    Retry,
    /// The peer went away; continue with what was received.
    Stop,
    /// Abort the connection.
    Fatal,
}

pub(crate) fn classify(err: &io::Error) -> ReadAction {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            ReadAction::Retry
        }
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ReadAction::Stop,
        _ => ReadAction::Fatal,
    }
}

/// Reads one request from `source`.
pub(crate) struct Reader<'a, R> {
    source: &'a mut R,
    limits: &'a ReqLimits,
    deadline: Instant,
}

impl<'a, R: Read> Reader<'a, R> {
    #[inline]
    pub(crate) fn new(source: &'a mut R, limits: &'a ReqLimits, deadline: Instant) -> Self {
        Self {
            source,
            limits,
            deadline,
        }
    }

    /// One successful read of at most `max` bytes. `0` means end of input.
    fn read_some(&mut self, buf: &mut ByteBuffer, max: usize) -> Result<usize, ErrorKind> {
        loop {
            match buf.read_from(self.source, max) {
                Ok(read) => return Ok(read),
                Err(err) => match classify(&err) {
                    ReadAction::Retry if Instant::now() >= self.deadline => {
                        return Err(ErrorKind::Timeout)
                    }
                    ReadAction::Retry => continue,
                    ReadAction::Stop => return Ok(0),
                    ReadAction::Fatal => return Err(err.into()),
                },
            }
        }
    }

    /// Reads and parses a whole request: the head, then its body.
    pub(crate) fn read_request(&mut self) -> Result<(RequestHead, Vec<u8>), ErrorKind> {
        let mut parser = Parser::new(self.limits);
        let mut buf = ByteBuffer::with_capacity(self.limits.read_chunk);

        let head_len = self.read_head(&mut buf, &mut parser)?;
        let beginning = buf.split_off(head_len);
        let head = parser.finish(buf.as_slice())?;
        let body = self.read_body(&head, beginning)?;

        Ok((head, body))
    }

    /// Reads until `parser` has seen the blank line ending the header section.
    ///
    /// Returns the length of the head within `buf`; bytes after it are the
    /// body beginning.
    pub(crate) fn read_head(
        &mut self,
        buf: &mut ByteBuffer,
        parser: &mut Parser,
    ) -> Result<usize, ErrorKind> {
        loop {
            if let ParseStatus::Complete(len) = parser.parse(buf.as_slice())? {
                return Ok(len);
            }
            if self.read_some(buf, self.limits.read_chunk)? == 0 {
                return Err(ErrorKind::Incomplete);
            }
        }
    }

    /// Reads the body announced by `head`, starting from the bytes that came
    /// in together with the header section.
    pub(crate) fn read_body(
        &mut self,
        head: &RequestHead,
        beginning: Vec<u8>,
    ) -> Result<Vec<u8>, ErrorKind> {
        if head.chunked {
            return self.read_chunked(beginning);
        }

        let Some(expected) = head.content_length else {
            return match beginning.len() {
                0 => Ok(beginning),
                extra => Err(ErrorKind::UnexpectedBody(extra)),
            };
        };

        if expected > self.limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        if beginning.len() > expected {
            return Err(ErrorKind::BodyMismatch {
                expected,
                available: beginning.len(),
            });
        }

        let mut body = ByteBuffer::from(beginning);
        body.reserve(expected - body.len());

        while body.len() < expected {
            let want = (expected - body.len()).min(self.limits.read_chunk);
            if self.read_some(&mut body, want)? == 0 {
                break;
            }
        }

        match body.len() == expected {
            true => Ok(body.into_vec()),
            false => Err(ErrorKind::BodyMismatch {
                expected,
                available: body.len(),
            }),
        }
    }

    fn read_chunked(&mut self, beginning: Vec<u8>) -> Result<Vec<u8>, ErrorKind> {
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        let mut pending = ByteBuffer::from(beginning);

        loop {
            let status = decoder.feed(pending.as_slice(), &mut body, self.limits.body_size)?;
            if let ParseStatus::Complete(_) = status {
                return Ok(body);
            }

            pending.clear();
            if self.read_some(&mut pending, self.limits.read_chunk)? == 0 {
                return Err(ErrorKind::InvalidChunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, time::Duration};

    /// Replays a fixed sequence of read results.
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl Script {
        fn new(steps: Vec<io::Result<&[u8]>>) -> Self {
            Self(steps.into_iter().map(|s| s.map(<[u8]>::to_vec)).collect())
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.0.push_front(Ok(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    fn ok(data: &[u8]) -> io::Result<&[u8]> {
        Ok(data)
    }

    fn err(kind: io::ErrorKind) -> io::Result<&'static [u8]> {
        Err(kind.into())
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn read_request(
        steps: Vec<io::Result<&[u8]>>,
        limits: &ReqLimits,
    ) -> Result<(RequestHead, Vec<u8>), ErrorKind> {
        let mut script = Script::new(steps);
        Reader::new(&mut script, limits, far()).read_request()
    }

    #[test]
    fn classification() {
        #[rustfmt::skip]
        let cases = [
            (io::ErrorKind::Interrupted, ReadAction::Retry),
            (io::ErrorKind::WouldBlock, ReadAction::Retry),
            (io::ErrorKind::TimedOut, ReadAction::Retry),
            (io::ErrorKind::ConnectionReset, ReadAction::Stop),
            (io::ErrorKind::NotConnected, ReadAction::Stop),
            (io::ErrorKind::ConnectionAborted, ReadAction::Stop),
            (io::ErrorKind::BrokenPipe, ReadAction::Stop),
            (io::ErrorKind::InvalidInput, ReadAction::Fatal),
            (io::ErrorKind::OutOfMemory, ReadAction::Fatal),
            (io::ErrorKind::Other, ReadAction::Fatal),
        ];

        for (kind, action) in cases {
            assert_eq!(classify(&io::Error::from(kind)), action, "{kind:?}");
        }
    }

    #[test]
    fn head_across_reads() {
        let steps: Vec<io::Result<&[u8]>> = vec![
            ok(b"GET /a?b=1 HT"),
            err(io::ErrorKind::WouldBlock),
            ok(b"TP/1.1\r\nHost: x\r"),
            err(io::ErrorKind::Interrupted),
            ok(b"\n\r\n"),
        ];

        let (head, body) = read_request(steps, &ReqLimits::default()).unwrap();
        assert_eq!(head.path, "/a");
        assert_eq!(head.query, "b=1");
        assert_eq!(head.headers.get("host"), Some("x"));
        assert!(body.is_empty());
    }

    #[test]
    fn body_with_content_length() {
        #[rustfmt::skip]
        let cases: Vec<(Vec<io::Result<&[u8]>>, Result<&str, ErrorKind>)> = vec![
            (
                vec![ok(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")],
                Ok("hello"),
            ),
            (
                vec![ok(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe"), ok(b"llo")],
                Ok("hello"),
            ),
            (
                vec![
                    ok(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n"),
                    err(io::ErrorKind::TimedOut),
                    ok(b"hello"),
                ],
                Ok("hello"),
            ),
            (
                vec![ok(b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n")],
                Ok(""),
            ),
            (
                vec![ok(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel")],
                Err(ErrorKind::BodyMismatch { expected: 5, available: 3 }),
            ),
            (
                vec![
                    ok(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel"),
                    err(io::ErrorKind::ConnectionReset),
                ],
                Err(ErrorKind::BodyMismatch { expected: 5, available: 3 }),
            ),
            (
                vec![ok(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nhello")],
                Err(ErrorKind::BodyMismatch { expected: 2, available: 5 }),
            ),
            (
                vec![ok(b"POST / HTTP/1.1\r\n\r\nhello")],
                Err(ErrorKind::UnexpectedBody(5)),
            ),
            (
                vec![
                    ok(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n"),
                    err(io::ErrorKind::InvalidData),
                ],
                Err(ErrorKind::from(io::Error::from(io::ErrorKind::InvalidData))),
            ),
        ];

        for (steps, expected) in cases {
            let result = read_request(steps, &ReqLimits::default()).map(|(_, body)| body);
            assert_eq!(result, expected.map(|body| body.as_bytes().to_vec()));
        }
    }

    #[test]
    fn chunked_body() {
        let steps: Vec<io::Result<&[u8]>> = vec![
            ok(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel"),
            ok(b"lo\r\n6\r\n world\r\n"),
            ok(b"0\r\n\r\n"),
        ];
        let (head, body) = read_request(steps, &ReqLimits::default()).unwrap();
        assert!(head.chunked);
        assert_eq!(body, b"hello world");

        let steps: Vec<io::Result<&[u8]>> = vec![ok(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n",
        )];
        assert_eq!(
            read_request(steps, &ReqLimits::default()),
            Err(ErrorKind::InvalidChunk)
        );
    }

    #[test]
    fn body_too_large_before_reading() {
        let limits = ReqLimits {
            body_size: 4,
            ..ReqLimits::default()
        };

        // The body itself is never delivered: the declared length alone fails.
        let steps: Vec<io::Result<&[u8]>> = vec![
            ok(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n"),
            err(io::ErrorKind::Other),
        ];
        assert_eq!(read_request(steps, &limits), Err(ErrorKind::BodyTooLarge));

        let steps: Vec<io::Result<&[u8]>> = vec![ok(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n",
        )];
        assert_eq!(read_request(steps, &limits), Err(ErrorKind::BodyTooLarge));
    }

    #[test]
    fn head_errors() {
        let limits = ReqLimits {
            header_size: 32,
            ..ReqLimits::default()
        };

        let steps: Vec<io::Result<&[u8]>> = vec![ok(b"GET / HTTP/1.1\r\nHost: x\r\n")];
        assert_eq!(read_request(steps, &limits), Err(ErrorKind::Incomplete));

        let steps: Vec<io::Result<&[u8]>> = vec![ok(b"GET / HTTP/1.1\r\n"), ok(&[b'a'; 64])];
        assert_eq!(read_request(steps, &limits), Err(ErrorKind::HeadersTooLarge));

        let steps: Vec<io::Result<&[u8]>> = vec![ok(b"GET / HT"), err(io::ErrorKind::NotConnected)];
        assert_eq!(read_request(steps, &limits), Err(ErrorKind::Incomplete));
    }

    #[test]
    fn retries_stop_at_deadline() {
        let limits = ReqLimits::default();
        let mut script = Script::new(vec![
            ok(b"GET / HT"),
            err(io::ErrorKind::WouldBlock),
            ok(b"TP/1.1\r\n\r\n"),
        ]);
        let mut reader = Reader::new(&mut script, &limits, Instant::now());
        let mut parser = Parser::new(&limits);
        let mut buf = ByteBuffer::default();

        assert_eq!(
            reader.read_head(&mut buf, &mut parser),
            Err(ErrorKind::Timeout)
        );
    }
}
