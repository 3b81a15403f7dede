//! Cookies: parsing the `Cookie` request header and formatting `Set-Cookie`.

use std::{collections::HashMap, fmt};

/// The `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A cookie to be sent with [`Response::set_cookie`](crate::Response::set_cookie).
///
/// Its [`Display`](fmt::Display) output is the value of a `Set-Cookie` header.
///
/// # Examples
/// ```
/// use trellis_web::{Cookie, SameSite};
///
/// let cookie = Cookie::new("sessionid", "abc123")
///     .max_age(3600)
///     .http_only(true)
///     .same_site(SameSite::Lax);
///
/// assert_eq!(
///     cookie.to_string(),
///     "sessionid=abc123; Max-Age=3600; Path=/; HttpOnly; SameSite=Lax"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Already formatted HTTP date, e.g. `Thu, 01 Jan 1970 00:00:00 GMT`.
    pub expires: Option<String>,
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    /// Defaults to `/`; `None` omits the attribute.
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
            max_age: None,
            domain: None,
            path: Some(String::from("/")),
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    #[inline]
    pub fn expires<T: Into<String>>(mut self, date: T) -> Self {
        self.expires = Some(date.into());
        self
    }

    #[inline]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[inline]
    pub fn domain<T: Into<String>>(mut self, domain: T) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[inline]
    pub fn path<T: Into<String>>(mut self, path: T) -> Self {
        self.path = Some(path.into());
        self
    }

    #[inline]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[inline]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[inline]
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Whether the name carries a prefix that browsers only accept on secure cookies.
    #[inline]
    pub(crate) fn requires_secure(name: &str) -> bool {
        name.starts_with("__Secure-") || name.starts_with("__Host-")
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;

        if let Some(expires) = &self.expires {
            write!(f, "; Expires={expires}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site.as_str())?;
        }
        Ok(())
    }
}

/// Parses a `Cookie` request header into a name to value map.
///
/// Pairs are separated by `;`; surrounding whitespace and double quotes
/// around a value are dropped. A pair without `=` is a value with an empty
/// name, as browsers send it. When a name repeats, the last value wins.
///
/// # Examples
/// ```
/// use trellis_web::parse_cookies;
///
/// let cookies = parse_cookies(r#"theme=dark; sessionid="abc"; theme=light"#);
/// assert_eq!(cookies["sessionid"], "abc");
/// assert_eq!(cookies["theme"], "light");
/// ```
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for chunk in header.split(';') {
        let (name, value) = match chunk.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => ("", chunk.trim()),
        };
        if name.is_empty() && value.is_empty() {
            continue;
        }

        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        cookies.insert(name.to_string(), value.to_string());
    }

    cookies
}
