use crate::{
    http::{multipart::MultipartError, types::reason_phrase},
    query, Response,
};
use std::{fmt, io};
use thiserror::Error;

/// Protocol-level failures raised while reading and parsing a request.
///
/// Each kind maps to a canned `connection: close` response, see [`ErrorKind::as_http`].
#[derive(Debug, PartialEq, Error)]
pub(crate) enum ErrorKind {
    #[error("invalid request method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,

    #[error("invalid protocol version")]
    InvalidVersion,
    #[error("unsupported protocol version")]
    UnsupportedVersion,

    #[error("malformed header line")]
    InvalidHeader,
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("header section exceeds the size limit")]
    HeadersTooLarge,
    #[error("header count exceeds the limit")]
    TooManyHeaders,
    #[error("invalid Content-Length value")]
    InvalidContentLength,
    #[error("both Content-Length and Transfer-Encoding are present")]
    ConflictingLength,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    #[error("malformed chunked body")]
    InvalidChunk,
    #[error("connection closed before the header section ended")]
    Incomplete,

    #[error("request body exceeds the size limit")]
    BodyTooLarge,
    #[error("actual body size {available} is not equal to declared {expected}")]
    BodyMismatch { expected: usize, available: usize },
    #[error("{0} body bytes sent without Content-Length")]
    UnexpectedBody(usize),

    #[error("request was not received in time")]
    Timeout,
    #[error("i/o failure: {0}")]
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $code:literal, $reason:literal, $len:literal => $json:literal; )*) => {
        /// Returns the full canned response for this error.
        pub(crate) const fn as_http(&self, json: bool) -> &'static [u8] {
            match (json, self) { $(
                (true, Self::$name { .. }) => concat!(
                    "HTTP/1.1 ", $code, " ", $reason, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }) => concat!(
                    "HTTP/1.1 ", $code, " ", $reason, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }

        pub(crate) const fn status(&self) -> u16 {
            match self { $(
                Self::$name { .. } => $code,
            )* }
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: 400, "Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;
        InvalidUrl: 400, "Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;

        InvalidVersion: 400, "Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: 505, "HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: 400, "Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        InvalidEncoding: 400, "Bad Request", "69"
            => r#"{"error":"Request head is not valid UTF-8","code":"INVALID_ENCODING"}"#;
        HeadersTooLarge: 431, "Request Header Fields Too Large", "64"
            => r#"{"error":"Request headers too large","code":"HEADERS_TOO_LARGE"}"#;
        TooManyHeaders: 431, "Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: 400, "Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        ConflictingLength: 400, "Bad Request", "81"
            => r#"{"error":"Both Content-Length and Transfer-Encoding","code":"CONFLICTING_LENGTH"}"#;
        UnsupportedTransferEncoding: 501, "Not Implemented", "82"
            => r#"{"error":"Transfer-Encoding not supported","code":"UNSUPPORTED_TRANSFER_ENCODING"}"#;
        InvalidChunk: 400, "Bad Request", "55"
            => r#"{"error":"Invalid chunked body","code":"INVALID_CHUNK"}"#;
        Incomplete: 400, "Bad Request", "58"
            => r#"{"error":"Incomplete request","code":"INCOMPLETE_REQUEST"}"#;

        BodyTooLarge: 413, "Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: 400, "Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: 400, "Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        Timeout: 408, "Request Timeout", "54"
            => r#"{"error":"Request timed out","code":"REQUEST_TIMEOUT"}"#;
        Io: 503, "Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// An error returned by a [`Handler`](crate::Handler), classified as an HTTP status.
///
/// Rendered by the dispatcher into a small HTML error page. Statuses below
/// `400` make no sense for an error and are rendered as `500`.
///
/// # Examples
/// ```
/// use trellis_web::HttpError;
///
/// let err = HttpError::not_found("no such user");
/// assert_eq!(err.status(), 404);
///
/// let err = HttpError::new(302, "redirects are not errors");
/// assert_eq!(err.status(), 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status}: {message}")]
pub struct HttpError {
    status: u16,
    message: String,
}

impl HttpError {
    /// Creates an error with an arbitrary status code.
    #[inline]
    pub fn new<M: Into<String>>(status: u16, message: M) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[inline]
    pub fn bad_request<M: Into<String>>(message: M) -> Self {
        Self::new(400, message)
    }

    #[inline]
    pub fn forbidden<M: Into<String>>(message: M) -> Self {
        Self::new(403, message)
    }

    #[inline]
    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::new(404, message)
    }

    #[inline]
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::new(500, message)
    }

    /// The effective status: the declared one, or `500` when it is not an error code.
    #[inline]
    pub fn status(&self) -> u16 {
        match self.status {
            400..=599 => self.status,
            _ => 500,
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Renders the error as `<h2>code - reason</h2>` followed by the message, if any.
    pub fn to_response(&self) -> Response {
        let status = self.status();
        let mut body = format!("<h2>{} - {}</h2>", status, reason_phrase(status));
        if !self.message.is_empty() {
            body.push_str("<p>");
            body.push_str(&self.message);
            body.push_str("</p>");
        }

        let mut resp = Response::with_status(status);
        resp.set_body(body);
        resp
    }
}

impl From<&MultipartError> for HttpError {
    fn from(err: &MultipartError) -> Self {
        HttpError::bad_request(err.to_string())
    }
}

impl From<&serde_json::Error> for HttpError {
    fn from(err: &serde_json::Error) -> Self {
        HttpError::bad_request(format!("invalid JSON body: {err}"))
    }
}

impl From<query::Error> for HttpError {
    fn from(err: query::Error) -> Self {
        HttpError::bad_request(err.to_string())
    }
}

impl From<io::Error> for HttpError {
    fn from(err: io::Error) -> Self {
        HttpError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_lengths_match_bodies() {
        #[rustfmt::skip]
        let cases = [
            ErrorKind::InvalidMethod, ErrorKind::InvalidUrl, ErrorKind::InvalidVersion,
            ErrorKind::UnsupportedVersion, ErrorKind::InvalidHeader, ErrorKind::InvalidEncoding,
            ErrorKind::HeadersTooLarge, ErrorKind::TooManyHeaders, ErrorKind::InvalidContentLength,
            ErrorKind::ConflictingLength, ErrorKind::UnsupportedTransferEncoding,
            ErrorKind::InvalidChunk, ErrorKind::Incomplete, ErrorKind::BodyTooLarge,
            ErrorKind::BodyMismatch { expected: 1, available: 0 }, ErrorKind::UnexpectedBody(1),
            ErrorKind::Timeout, ErrorKind::from(io::Error::from(io::ErrorKind::Other)),
        ];

        for kind in cases {
            let text = std::str::from_utf8(kind.as_http(true)).unwrap();
            let (head, body) = text.split_once("\r\n\r\n").unwrap();

            let declared = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length: "))
                .unwrap();
            assert_eq!(declared.parse::<usize>().unwrap(), body.len(), "{kind:?}");
            assert!(head.starts_with(&format!("HTTP/1.1 {} ", kind.status())));
        }
    }

    #[test]
    fn canned_without_json() {
        assert_eq!(
            ErrorKind::BodyTooLarge.as_http(false),
            b"HTTP/1.1 413 Payload Too Large\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"
        );
    }

    #[test]
    fn http_error_status() {
        #[rustfmt::skip]
        let cases = [
            (HttpError::new(404, ""), 404),
            (HttpError::new(503, "down"), 503),
            (HttpError::new(200, "ok?"), 500),
            (HttpError::new(99, ""), 500),
            (HttpError::new(600, ""), 500),
        ];

        for (err, status) in cases {
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn http_error_page() {
        let resp = HttpError::not_found("").to_response();
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.body(), b"<h2>404 - Not Found</h2>");

        let resp = HttpError::forbidden("nope").to_response();
        assert_eq!(resp.body(), b"<h2>403 - Forbidden</h2><p>nope</p>");
    }
}
