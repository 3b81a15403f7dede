use crate::{
    errors::ErrorKind,
    http::{
        cookie,
        multipart::{self, MultipartError, MultipartForm},
        parser::RequestHead,
        types::HeaderMap,
    },
    limits::ReqLimits,
    net::reader::Reader,
    query::{self, Query, QueryDict},
    Method, Version,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::OnceLock,
    time::{Duration, Instant},
};

/// A parsed HTTP request.
///
/// Created once per connection by the server and shared read-only with
/// middleware and the handler. Header names are case-insensitive and keep a
/// single value each (the last one received).
///
/// The body is kept as raw bytes. The query string, urlencoded form,
/// multipart form and JSON views are parsed on first access and cached, so
/// repeated calls are cheap and always return the same result.
///
/// # Examples
/// ```
/// let req = trellis_web::request_from_bytes(
///     b"POST /search?q=rust HTTP/1.1\r\n\
///       Host: example.com\r\n\
///       Content-Type: application/x-www-form-urlencoded\r\n\
///       Content-Length: 13\r\n\
///       \r\n\
///       page=2&size=5",
/// )
/// .unwrap();
///
/// assert_eq!(req.path(), "/search");
/// assert_eq!(req.query().unwrap().get("q"), Some("rust"));
/// assert_eq!(req.form().unwrap().get("page"), Some("2"));
/// assert_eq!(req.host(), "example.com");
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query_string: String,
    version: Version,
    headers: HeaderMap,
    body: Vec<u8>,
    keep_alive: bool,
    environment: HashMap<String, String>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,

    media_root: String,
    param_limit: usize,

    query: OnceLock<Result<QueryDict, query::Error>>,
    form: OnceLock<Result<QueryDict, query::Error>>,
    multipart: OnceLock<Result<MultipartForm, MultipartError>>,
    json: OnceLock<Result<serde_json::Value, serde_json::Error>>,
}

impl Request {
    pub(crate) fn new(
        head: RequestHead,
        body: Vec<u8>,
        peer_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
        limits: &ReqLimits,
    ) -> Self {
        let mut environment = HashMap::with_capacity(9);
        let mut env = |key: &str, value: String| {
            environment.insert(key.to_string(), value);
        };

        if let Some(addr) = local_addr {
            env("SERVER_NAME", addr.ip().to_string());
            env("SERVER_PORT", addr.port().to_string());
        }
        if let Some(addr) = peer_addr {
            env("REMOTE_ADDR", addr.ip().to_string());
        }
        env("REQUEST_METHOD", head.method.to_string());
        env("PATH_INFO", head.path.clone());
        env("QUERY_STRING", head.query.clone());
        env("SERVER_PROTOCOL", head.version.as_str().to_string());
        if let Some(value) = head.headers.get("content-type") {
            env("CONTENT_TYPE", value.to_string());
        }
        if let Some(value) = head.content_length {
            env("CONTENT_LENGTH", value.to_string());
        }

        Self {
            method: head.method,
            path: head.path,
            query_string: head.query,
            version: head.version,
            headers: head.headers,
            body,
            keep_alive: head.keep_alive,
            environment,
            peer_addr,
            local_addr,

            media_root: limits.media_root.clone(),
            param_limit: limits.query_params,

            query: OnceLock::new(),
            form: OnceLock::new(),
            multipart: OnceLock::new(),
            json: OnceLock::new(),
        }
    }

    /// Parses a complete request held in memory, going through the same
    /// reader and parser as a socket.
    pub(crate) fn from_bytes(mut raw: &[u8], limits: &ReqLimits) -> Result<Self, ErrorKind> {
        let deadline = Instant::now() + Duration::from_secs(1);
        let (head, body) = Reader::new(&mut raw, limits, deadline).read_request()?;

        Ok(Self::new(head, body, None, None, limits))
    }
}

/// Request line and raw data
impl Request {
    #[inline(always)]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Target path without query string and fragment, not decoded.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the `?`.
    #[inline(always)]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    #[inline(always)]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// Informational only: the server answers one request per connection.
    #[inline(always)]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Derived metadata: `SERVER_NAME`, `SERVER_PORT`, `REMOTE_ADDR`,
    /// `REQUEST_METHOD`, `PATH_INFO`, `QUERY_STRING`, `SERVER_PROTOCOL` and,
    /// when present, `CONTENT_TYPE` and `CONTENT_LENGTH`.
    #[inline(always)]
    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    #[inline]
    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }

    #[inline(always)]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    #[inline(always)]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// Headers
impl Request {
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    #[inline]
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.parse().ok()
    }

    #[inline]
    pub fn transfer_encoding(&self) -> Option<&str> {
        self.header("transfer-encoding")
    }

    #[inline]
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    #[inline]
    pub fn referer(&self) -> Option<&str> {
        self.header("referer")
    }

    /// The `Host` header, or `SERVER_NAME[:SERVER_PORT]` when absent.
    ///
    /// An empty port (`example.com:`) is dropped.
    pub fn host(&self) -> String {
        let host = match self.header("host") {
            Some(host) => host.to_string(),
            None => match (self.env("SERVER_NAME"), self.env("SERVER_PORT")) {
                (Some(name), Some("80") | None) => name.to_string(),
                (Some(name), Some(port)) => format!("{name}:{port}"),
                (None, _) => String::new(),
            },
        };

        match host.strip_suffix(':') {
            Some(stripped) => stripped.to_string(),
            None => host,
        }
    }

    #[inline]
    pub fn is_json(&self) -> bool {
        self.content_type()
            .is_some_and(|value| value.contains("application/json"))
    }

    /// Cookies from the `Cookie` header.
    #[inline]
    pub fn cookies(&self) -> HashMap<String, String> {
        cookie::parse_cookies(self.header("cookie").unwrap_or_default())
    }

    #[inline]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies().remove(name)
    }
}

/// Lazily parsed views of the query string and body
impl Request {
    /// Query string parameters.
    pub fn query(&self) -> Result<&QueryDict, query::Error> {
        self.query
            .get_or_init(|| Query::parse(self.query_string.as_bytes(), self.param_limit))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Urlencoded form body. Empty for any other content type.
    pub fn form(&self) -> Result<&QueryDict, query::Error> {
        self.form
            .get_or_init(|| {
                let urlencoded = self.content_type().is_some_and(|value| {
                    value
                        .to_ascii_lowercase()
                        .starts_with("application/x-www-form-urlencoded")
                });

                match urlencoded {
                    true => Query::parse(&self.body, self.param_limit),
                    false => Ok(QueryDict::new()),
                }
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// `multipart/form-data` body.
    pub fn multipart(&self) -> Result<&MultipartForm, &MultipartError> {
        self.multipart
            .get_or_init(|| {
                multipart::parse_multipart(
                    self.content_type().unwrap_or_default(),
                    &self.body,
                    &self.media_root,
                )
            })
            .as_ref()
    }

    /// Body parsed as JSON, whatever the declared content type.
    pub fn json(&self) -> Result<&serde_json::Value, &serde_json::Error> {
        self.json
            .get_or_init(|| serde_json::from_slice(&self.body))
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{http::parser::Parser, tools::*};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn request_line_and_headers() {
        let req = request(
            b"PUT /items/7?expand=true HTTP/1.0\r\n\
              Host: shop.local:8080\r\n\
              User-Agent: curl/8.0\r\n\
              Referer: http://shop.local/\r\n\
              Content-Length: 2\r\n\
              \r\n\
              {}",
        );

        assert_eq!(req.method(), Method::Put);
        assert_eq!(req.path(), "/items/7");
        assert_eq!(req.query_string(), "expand=true");
        assert_eq!(req.version(), Version::Http10);
        assert!(!req.keep_alive());
        assert_eq!(req.host(), "shop.local:8080");
        assert_eq!(req.user_agent(), Some("curl/8.0"));
        assert_eq!(req.referer(), Some("http://shop.local/"));
        assert_eq!(req.content_length(), Some(2));
        assert_eq!(req.transfer_encoding(), None);
        assert!(req.has_header("USER-AGENT"));
        assert_eq!(req.body(), b"{}");
    }

    #[test]
    fn environment() {
        let limits = ReqLimits::default();
        let mut parser = Parser::new(&limits);
        let raw = b"GET /env?a=1 HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n";
        parser.parse(raw).unwrap();
        let head = parser.finish(raw).unwrap();

        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 51000);
        let req = Request::new(head, Vec::new(), Some(peer), Some(local), &limits);

        #[rustfmt::skip]
        let cases = [
            ("SERVER_NAME", Some("127.0.0.1")),
            ("SERVER_PORT", Some("8000")),
            ("REMOTE_ADDR", Some("10.0.0.2")),
            ("REQUEST_METHOD", Some("GET")),
            ("PATH_INFO", Some("/env")),
            ("QUERY_STRING", Some("a=1")),
            ("SERVER_PROTOCOL", Some("HTTP/1.1")),
            ("CONTENT_TYPE", Some("text/plain")),
            ("CONTENT_LENGTH", None),
        ];

        for (key, value) in cases {
            assert_eq!(req.env(key), value, "{key}");
        }
        assert_eq!(req.environment().len(), 8);
        assert_eq!(req.host(), "127.0.0.1:8000");
        assert_eq!(req.peer_addr(), Some(peer));
        assert_eq!(req.local_addr(), Some(local));
    }

    #[test]
    fn host_fallbacks() {
        #[rustfmt::skip]
        let cases = [
            ("Host: example.com\r\n", "example.com"),
            ("Host: example.com:\r\n", "example.com"),
            ("Host: [::1]:8000\r\n", "[::1]:8000"),
            ("", ""),
        ];

        for (header, host) in cases {
            let req = request(format!("GET / HTTP/1.1\r\n{header}\r\n").as_bytes());
            assert_eq!(req.host(), host, "{header:?}");
        }
    }

    #[test]
    fn cookies() {
        let req = request(b"GET / HTTP/1.1\r\nCookie: sessionid=abc; theme=dark\r\n\r\n");

        assert_eq!(req.cookies().len(), 2);
        assert_eq!(req.cookie("theme").as_deref(), Some("dark"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn query_is_cached() {
        let req = request(b"GET /?tag=a&tag=b&q=x+y HTTP/1.1\r\n\r\n");

        let first = req.query().unwrap();
        assert_eq!(first.get_all("tag"), ["a", "b"]);
        assert_eq!(first.get("q"), Some("x y"));
        assert!(std::ptr::eq(first, req.query().unwrap()));
    }

    #[test]
    fn query_limit() {
        let limits = ReqLimits {
            query_params: 2,
            ..ReqLimits::default()
        };
        let req = Request::from_bytes(b"GET /?a=1&b=2&c=3 HTTP/1.1\r\n\r\n", &limits).unwrap();

        assert_eq!(req.query(), Err(query::Error::OverLimit(2)));
    }

    #[test]
    fn form_only_for_urlencoded() {
        #[rustfmt::skip]
        let cases = [
            ("application/x-www-form-urlencoded", Some("1")),
            ("application/x-www-form-urlencoded; charset=utf-8", Some("1")),
            ("text/plain", None),
        ];

        for (content_type, value) in cases {
            let raw = format!(
                "POST / HTTP/1.1\r\nContent-Type: {content_type}\r\nContent-Length: 3\r\n\r\na=1"
            );
            let req = request(raw.as_bytes());
            assert_eq!(req.form().unwrap().get("a"), value, "{content_type}");
        }
    }

    #[test]
    fn json_body() {
        let req = request(
            b"POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 15\r\n\r\n{\"id\": [1, 2]}\n",
        );
        assert!(req.is_json());
        assert_eq!(req.json().unwrap()["id"][1], 2);

        let req = request(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\n{x}");
        assert!(!req.is_json());
        assert!(req.json().is_err());
    }

    #[test]
    fn multipart_body() {
        let body = "--b\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nv\r\n--b--\r\n";
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let req = request(raw.as_bytes());

        assert_eq!(req.multipart().unwrap().fields.get("f"), Some("v"));
        assert!(req.form().unwrap().is_empty());

        let req = request(b"POST / HTTP/1.1\r\nContent-Length: 1\r\n\r\nx");
        assert!(matches!(
            req.multipart(),
            Err(MultipartError::InvalidContentType(_))
        ));
    }

    #[test]
    fn chunked_request() {
        let req = request(
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
        );
        assert_eq!(req.body(), b"Wikipedia");
        assert_eq!(req.transfer_encoding(), Some("chunked"));
    }
}
