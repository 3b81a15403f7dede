//! Query string and `application/x-www-form-urlencoded` parser.

use memchr::memchr;
use std::{borrow::Cow, collections::HashMap};
use thiserror::Error;

/// Query string splitter.
///
/// A single pass over the bytes with two states: accumulating a key until `=`
/// or `&`, then accumulating a value until `&`. Only the first `=` of a
/// segment separates; later ones belong to the value.
///
/// What happens to each pair is up to the [`QueryCollector`]: a
/// `Vec<(&[u8], &[u8])>` keeps the raw bytes, [`QueryDict`] decodes them.
///
/// # Examples
/// ```rust
/// use trellis_web::query::Query;
///
/// let params: Vec<(&[u8], &[u8])> = Query::parse(b"name=john&age=25&flag", 10).unwrap();
/// assert_eq!(params.len(), 3);
/// assert!(params[2] == (b"flag", b""));
///
/// // Handle limits
/// let result = Query::parse::<Vec<(&[u8], &[u8])>>(b"a=1&b=2", 1);
/// assert!(result.is_err());
/// ```
/// All possible formats:
/// ```rust
/// use trellis_web::query::Query;
///
/// let query = b"debug&name=&=Qwe&key=a=b&&";
/// let params: Vec<(&[u8], &[u8])> = Query::parse(query, 10).unwrap();
///
/// assert_eq!(params.len(), 4);
/// assert!(params[0] == (b"debug", b""));
/// assert!(params[1] == (b"name", b""));
/// assert!(params[2] == (b"", b"Qwe"));
/// assert!(params[3] == (b"key", b"a=b"));
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new collection.
    ///
    /// A leading `?` is ignored, so `?a=1` and `a=1` are equivalent.
    /// Empty input gives an empty collection.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::query::{Query, QueryDict};
    ///
    /// let params: QueryDict = Query::parse(b"tag=a&tag=b&q=hello+world", 10).unwrap();
    /// assert_eq!(params.get("tag"), Some("a"));
    /// assert_eq!(params.get_all("tag"), ["a", "b"]);
    /// assert_eq!(params.get("q"), Some("hello world"));
    ///
    /// let params: QueryDict = Query::parse(b"", 10).unwrap();
    /// assert!(params.is_empty());
    /// ```
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(query: &'a [u8], limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses a query string into an existing collection, appending to it.
    ///
    /// Segments with neither key nor value (`&&`, a lone `=`) are skipped.
    ///
    /// # Examples
    /// ```
    /// use trellis_web::query::Query;
    ///
    /// let mut collector = Vec::new();
    ///
    /// Query::parse_into(&mut collector, b"a=1&b=2", 10).unwrap();
    /// Query::parse_into(&mut collector, b"c=3&d=4", 10).unwrap();
    /// assert_eq!(collector.len(), 4);
    ///
    /// let mut collector = Vec::new();
    /// let result = Query::parse_into(&mut collector, b"a=1&b=2&c=3", 2);
    /// assert!(result.is_err());
    /// ```
    #[inline]
    pub fn parse_into<'a, C: QueryCollector<'a>>(
        result: &mut C,
        query: &'a [u8],
        limit: usize,
    ) -> Result<(), Error> {
        let data = match query.first() {
            None => return Ok(()),
            Some(b'?') => &query[1..],
            Some(_) => query,
        };

        let mut start = 0;
        while start < data.len() {
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let split = memchr(b'=', &data[start..end])
                .map(|pos| start + pos)
                .unwrap_or(end);

            let key = &data[start..split];
            let value = match split < end {
                true => &data[split + 1..end],
                false => b"",
            };
            start = end + 1;

            if key.is_empty() && value.is_empty() {
                continue;
            }
            if result.length() >= limit {
                return Err(Error::OverLimit(limit));
            }
            result.add_param(key, value);
        }

        Ok(())
    }
}

/// A trait for types that can collect parsed query parameters.
///
/// # Examples
/// ```rust
/// use trellis_web::query::QueryCollector;
///
/// struct Keys(Vec<String>);
///
/// impl<'a> QueryCollector<'a> for Keys {
///     fn add_param(&mut self, key: &'a [u8], _: &'a [u8]) {
///         self.0.push(String::from_utf8_lossy(key).into_owned());
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Keys(Vec::with_capacity(capacity))
///     }
/// }
/// ```
pub trait QueryCollector<'a>
where
    Self: Sized,
{
    /// Adds one raw, still encoded, parameter.
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]);

    /// Number of parameters collected so far, checked against the limit.
    fn length(&self) -> usize;

    fn with_capacity(capacity: usize) -> Self;
}

// Raw pairs in order, nothing decoded
impl<'a> QueryCollector<'a> for Vec<(&'a [u8], &'a [u8])> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// More parameters than the given limit.
    #[error("query parameter limit exceeded: limit={0}")]
    OverLimit(usize),
}

/// Decoded parameters of a query string or urlencoded form.
///
/// Every occurrence of a key is kept in arrival order: [`QueryDict::get`] is
/// the first-value view, [`QueryDict::get_all`] the multi-value one.
/// `+` becomes a space and `%XX` escapes are decoded; malformed escapes are
/// kept as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDict {
    pairs: Vec<(String, String)>,
}

impl QueryDict {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `key`, in order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Number of pairs, duplicates included.
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First value per key.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(self.pairs.len());
        for (key, value) in &self.pairs {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map
    }

    /// All values per key.
    pub fn to_multi_map(&self) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::with_capacity(self.pairs.len());
        for (key, value) in &self.pairs {
            map.entry(key.clone()).or_default().push(value.clone());
        }
        map
    }

    #[inline]
    pub(crate) fn push(&mut self, key: String, value: String) {
        self.pairs.push((key, value));
    }
}

impl<'a> QueryCollector<'a> for QueryDict {
    #[inline]
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]) {
        self.push(decode(key), decode(value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.pairs.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(capacity),
        }
    }
}

fn decode(raw: &[u8]) -> String {
    let raw: Cow<[u8]> = match memchr(b'+', raw) {
        Some(_) => Cow::Owned(
            raw.iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect(),
        ),
        None => Cow::Borrowed(raw),
    };

    match urlencoding::decode_binary(&raw) {
        Cow::Borrowed(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Cow::Owned(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}
