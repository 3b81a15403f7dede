#![allow(rustdoc::bare_urls)]

//! Core HTTP protocol types and utilities

use crate::errors::ErrorKind;
use std::{collections::HashMap, fmt};

// CHARACTER CLASSES

/// Control characters (`0x00..=0x1F`, `0x7F`).
pub(crate) const CTL: u8 = 0;
/// Separators from RFC 7230, Section 3.2.6 (`SP` and `HT` included).
pub(crate) const SEP: u8 = 1;
/// `tchar`: everything allowed inside a token.
pub(crate) const TOK: u8 = 2;
/// `obs-text`: bytes above `0x7F`.
pub(crate) const OBS: u8 = 3;

#[rustfmt::skip]
const CHAR_CLASS: [u8; 256] = [
    // x0  x1   x2   x3   x4   x5   x6   x7   x8   x9   xA   xB   xC   xD   xE   xF
    CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, SEP, CTL, CTL, CTL, CTL, CTL, CTL, // 0x
    CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, CTL, // 1x
    SEP, TOK, SEP, TOK, TOK, TOK, TOK, TOK, SEP, SEP, TOK, TOK, SEP, TOK, TOK, SEP, // 2x
    TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, SEP, SEP, SEP, SEP, SEP, SEP, // 3x
    SEP, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, // 4x
    TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, SEP, SEP, SEP, TOK, TOK, // 5x
    TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, // 6x
    TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, TOK, SEP, TOK, SEP, TOK, CTL, // 7x
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // 8x
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // 9x
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // Ax
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // Bx
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // Cx
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // Dx
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // Ex
    OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, OBS, // Fx
];

#[inline(always)]
pub(crate) const fn char_class(byte: u8) -> u8 {
    CHAR_CLASS[byte as usize]
}

#[inline(always)]
pub(crate) const fn is_token(byte: u8) -> bool {
    char_class(byte) == TOK
}

/// Bytes allowed in the request target: visible ASCII only.
#[inline(always)]
pub(crate) const fn is_target_char(byte: u8) -> bool {
    byte > b' ' && byte < 0x7F
}

/// Bytes allowed in a header value: anything but controls, with `HT` let through.
#[inline(always)]
pub(crate) const fn is_value_char(byte: u8) -> bool {
    byte == b'\t' || char_class(byte) != CTL
}

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

#[inline(always)]
pub(crate) fn hex_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: usize = 0;

    for &byte in bytes {
        let digit = (byte as char).to_digit(16)?;
        result = result.checked_mul(16)?.checked_add(digit as usize)?;
    }

    Some(result)
}

// METHOD

/// HTTP request methods
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// [[RFC7231, Section 4.3.1](https://tools.ietf.org/html/rfc7231#section-4.3.1)]
    Get,
    /// [[RFC7231, Section 4.3.2](https://tools.ietf.org/html/rfc7231#section-4.3.2)]
    Head,
    /// [[RFC7231, Section 4.3.3](https://tools.ietf.org/html/rfc7231#section-4.3.3)]
    Post,
    /// [[RFC7231, Section 4.3.4](https://tools.ietf.org/html/rfc7231#section-4.3.4)]
    Put,
    /// [[RFC5789, Section 2](https://tools.ietf.org/html/rfc5789#section-2)]
    Patch,
    /// [[RFC7231, Section 4.3.5](https://tools.ietf.org/html/rfc7231#section-4.3.5)]
    Delete,
    /// [[RFC7231, Section 4.3.6](https://tools.ietf.org/html/rfc7231#section-4.3.6)]
    Connect,
    /// [[RFC7231, Section 4.3.7](https://tools.ietf.org/html/rfc7231#section-4.3.7)]
    Options,
    /// [[RFC7231, Section 4.3.8](https://tools.ietf.org/html/rfc7231#section-4.3.8)]
    Trace,
}

impl Method {
    pub(crate) const ALL: [Method; 9] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Connect,
        Method::Options,
        Method::Trace,
    ];

    /// Maps an already validated method token. Methods are case-sensitive.
    #[inline]
    pub(crate) fn from_token(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"GET" => Ok(Method::Get),
            b"HEAD" => Ok(Method::Head),
            b"POST" => Ok(Method::Post),
            b"PUT" => Ok(Method::Put),
            b"PATCH" => Ok(Method::Patch),
            b"DELETE" => Ok(Method::Delete),
            b"CONNECT" => Ok(Method::Connect),
            b"OPTIONS" => Ok(Method::Options),
            b"TRACE" => Ok(Method::Trace),
            _ => Err(ErrorKind::InvalidMethod),
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 - [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// HTTP/1.1 - [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
}

impl Version {
    #[inline(always)]
    pub(crate) fn from_digits(major: u8, minor: u8) -> Result<Self, ErrorKind> {
        match (major, minor) {
            (1, 1) => Ok(Self::Http11),
            (1, 0) => Ok(Self::Http10),
            _ => Err(ErrorKind::UnsupportedVersion),
        }
    }

    #[inline]
    pub const fn major(&self) -> u8 {
        1
    }

    #[inline]
    pub const fn minor(&self) -> u8 {
        match self {
            Self::Http10 => 0,
            Self::Http11 => 1,
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($( $name:ident = ($num:literal, $str:literal); )+) => {
        /// HTTP status codes with their reason phrases
        ///
        /// Covers the codes registered in
        /// [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-15) and friends.
        /// [`Response`](crate::Response) itself accepts any code in `100..=599`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            #[inline]
            pub const fn as_u16(&self) -> u16 {
                *self as u16
            }

            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            #[inline]
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $num => Some(StatusCode::$name), )+
                    _ => None,
                }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");
    Processing = (102, "Processing");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non-Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");
    MultiStatus = (207, "Multi-Status");
    AlreadyReported = (208, "Already Reported");
    ImUsed = (226, "IM Used");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    UseProxy = (305, "Use Proxy");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    PaymentRequired = (402, "Payment Required");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    ProxyAuthenticationRequired = (407, "Proxy Authentication Required");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    ExpectationFailed = (417, "Expectation Failed");
    ImaTeapot = (418, "I'm a teapot");
    MisdirectedRequest = (421, "Misdirected Request");
    UnprocessableEntity = (422, "Unprocessable Entity");
    Locked = (423, "Locked");
    FailedDependency = (424, "Failed Dependency");
    TooEarly = (425, "Too Early");
    UpgradeRequired = (426, "Upgrade Required");
    PreconditionRequired = (428, "Precondition Required");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");
    UnavailableForLegalReasons = (451, "Unavailable For Legal Reasons");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
    VariantAlsoNegotiates = (506, "Variant Also Negotiates");
    InsufficientStorage = (507, "Insufficient Storage");
    LoopDetected = (508, "Loop Detected");
    NotExtended = (510, "Not Extended");
    NetworkAuthenticationRequired = (511, "Network Authentication Required");
}

impl From<StatusCode> for u16 {
    #[inline]
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// Reason phrase for any numeric code, `"Unknown Status Code"` when unregistered.
#[inline]
pub fn reason_phrase(code: u16) -> &'static str {
    match StatusCode::from_u16(code) {
        Some(status) => status.reason(),
        None => "Unknown Status Code",
    }
}

// HEADER MAP

/// Request headers: names lower-cased, one value per name, last write wins.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderMap {
    inner: HashMap<String, String>,
}

impl HeaderMap {
    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: HashMap::with_capacity(capacity),
        }
    }

    #[inline]
    pub(crate) fn insert(&mut self, name: &str, value: &str) {
        self.inner.insert(name.to_ascii_lowercase(), value.to_string());
    }

    /// Case-insensitive lookup.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        match name.bytes().any(|b| b.is_ascii_uppercase()) {
            true => self.inner.get(&name.to_ascii_lowercase()),
            false => self.inner.get(name),
        }
        .map(String::as_str)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates `(lower-cased name, value)` pairs in no particular order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_classes() {
        #[rustfmt::skip]
        let cases = [
            (b'a', TOK), (b'Z', TOK), (b'0', TOK), (b'!', TOK), (b'~', TOK), (b'|', TOK),
            (b' ', SEP), (b'\t', SEP), (b':', SEP), (b'"', SEP), (b'/', SEP), (b'{', SEP),
            (b'\r', CTL), (b'\n', CTL), (0x00, CTL), (0x7F, CTL),
            (0x80, OBS), (0xFF, OBS),
        ];

        for (byte, class) in cases {
            assert_eq!(char_class(byte), class, "byte {byte:#04x}");
        }
    }

    #[test]
    fn numbers() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<usize>, Option<usize>); 6] = [
            (b"0", Some(0), Some(0)),
            (b"12", Some(12), Some(18)),
            (b"ff", None, Some(255)),
            (b"1A", None, Some(26)),
            (b"", None, None),
            (b"99999999999999999999999", None, None),
        ];

        for (input, dec, hex) in cases {
            assert_eq!(slice_to_usize(input), dec);
            assert_eq!(hex_to_usize(input), hex);
        }
    }

    #[test]
    fn methods() {
        for method in Method::ALL {
            assert_eq!(Method::from_token(method.as_str().as_bytes()), Ok(method));
        }
        assert_eq!(Method::from_token(b"get"), Err(ErrorKind::InvalidMethod));
        assert_eq!(Method::from_token(b"BREW"), Err(ErrorKind::InvalidMethod));
    }

    #[test]
    fn status_codes() {
        assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
        assert_eq!(StatusCode::NotFound.as_u16(), 404);
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(299), "Unknown Status Code");
    }

    #[test]
    fn header_map() {
        let mut map = HeaderMap::default();
        map.insert("Content-Type", "text/plain");
        map.insert("content-type", "text/html");
        map.insert("X-Id", "1");

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(map.get("x-id"), Some("1"));
        assert!(!map.contains("host"));
    }
}
