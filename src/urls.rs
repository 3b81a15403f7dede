//! URL patterns and the resolver.
//!
//! A pattern is a regular expression in which `<name>(regex)` marks a named
//! argument, e.g. `/profile/<id>(\d+)/?`. Patterns are tried in registration
//! order against the whole path; the first match wins.
//!
//! # Examples
//! ```
//! use trellis_web::{include, path, resolve, reverse, Response};
//!
//! let articles = vec![
//!     path(r"/<id>(\d+)/", "detail", |_, args, _| Ok(Response::ok(args.get("id").unwrap_or("")))),
//! ];
//! let patterns = include("/articles/", articles, "blog").unwrap();
//!
//! let resolved = resolve("/articles/42/", &patterns).unwrap();
//! assert_eq!(resolved.args().get("id"), Some("42"));
//! assert_eq!(reverse("blog:detail", &["7"], &patterns).unwrap(), "/articles/7/");
//! ```

use crate::{Context, Handler, HttpError, Request, Response};
use regex::Regex;
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

/// Failure to compile a pattern or to rebuild a URL from it.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unclosed `<` in pattern {0:?}")]
    UnclosedName(String),
    #[error("argument `{0}` must be followed by a parenthesized regex")]
    MissingGroup(String),
    #[error("unbalanced parentheses after argument `{0}`")]
    UnbalancedGroup(String),
    #[error("invalid pattern regex: {0}")]
    Regex(#[from] regex::Error),
    #[error("pattern takes {expected} arguments, {given} given")]
    ArgCount { expected: usize, given: usize },
    #[error("no pattern named {0:?}")]
    NotFound(String),
}

/// Named arguments captured from the path, in pattern order.
///
/// # Examples
/// ```
/// use trellis_web::{resolve, path, Response};
///
/// let patterns = vec![path(r"/user/<id>(\d+)/<tab>(\w+)", "user", |_, _, _| Ok(Response::ok("")))];
/// let resolved = resolve("/user/12/posts", &patterns).unwrap();
/// let args = resolved.args();
///
/// assert_eq!(args.get("tab"), Some("posts"));
/// assert_eq!(args.parse::<u64>("id").unwrap(), 12);
/// assert_eq!(args.parse::<u64>("tab").unwrap_err().status(), 404);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathArgs {
    args: Vec<(String, String)>,
}

impl PathArgs {
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parses an argument, answering `404` when it is absent or malformed.
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<T, HttpError> {
        self.get(name)
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| HttpError::not_found(format!("invalid path argument `{name}`")))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Arg(String),
}

/// A compiled URL pattern bound to its handler.
#[derive(Clone)]
pub struct UrlPattern {
    source: String,
    regex: Regex,
    parts: Vec<Part>,
    handler: Arc<dyn Handler>,
    name: String,
    namespace: String,
}

impl UrlPattern {
    /// Compiles `pattern` for `handler`. `name` may be empty.
    pub fn new<H: Handler>(pattern: &str, handler: H, name: &str) -> Result<Self, PatternError> {
        Self::compile(pattern.to_string(), Arc::new(handler), name.to_string(), String::new())
    }

    fn compile(
        source: String,
        handler: Arc<dyn Handler>,
        name: String,
        namespace: String,
    ) -> Result<Self, PatternError> {
        let parts = split_pattern(&source)?;

        let mut regex = String::with_capacity(source.len() + 16);
        regex.push_str("^(?:");
        push_regex(&source, &mut regex)?;
        regex.push_str(")$");

        Ok(Self {
            regex: Regex::new(&regex)?,
            source,
            parts,
            handler,
            name,
            namespace,
        })
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The name as used by [`reverse`], `namespace:name` once included.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    /// Matches the whole `path`, returning the captured arguments.
    pub fn matches(&self, path: &str) -> Option<PathArgs> {
        let captures = self.regex.captures(path)?;
        let args = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Arg(name) => Some(name),
                Part::Literal(_) => None,
            })
            .map(|name| {
                let value = captures.name(name).map_or("", |m| m.as_str());
                (name.clone(), value.to_string())
            })
            .collect();

        Some(PathArgs { args })
    }

    /// Rebuilds a URL by substituting `args` positionally.
    ///
    /// Regex syntax in the literal parts is dropped: `/profile/<id>(\d+)/?`
    /// with `["7"]` gives `/profile/7/`.
    pub fn build(&self, args: &[&str]) -> Result<String, PatternError> {
        let expected = self.parts.iter().filter(|p| matches!(p, Part::Arg(_))).count();
        if expected != args.len() {
            return Err(PatternError::ArgCount {
                expected,
                given: args.len(),
            });
        }

        let mut args = args.iter();
        let mut url = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => url.push_str(&strip_regex(text)),
                Part::Arg(_) => url.push_str(args.next().copied().unwrap_or_default()),
            }
        }
        Ok(url)
    }

    /// Calls the handler.
    #[inline]
    pub fn apply(
        &self,
        request: &Request,
        args: &PathArgs,
        context: &Context,
    ) -> Result<Response, HttpError> {
        self.handler.handle(request, args, context)
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlPattern")
            .field("source", &self.source)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Shorthand for [`UrlPattern::new`] with a closure handler.
///
/// # Panics
/// Panics when `pattern` does not compile. Patterns are fixed at startup,
/// use [`UrlPattern::new`] to handle the error instead.
#[track_caller]
pub fn path<F>(pattern: &str, name: &str, handler: F) -> UrlPattern
where
    F: Fn(&Request, &PathArgs, &Context) -> Result<Response, HttpError> + Send + Sync + 'static,
{
    match UrlPattern::new(pattern, handler, name) {
        Ok(pattern) => pattern,
        Err(err) => panic!("invalid URL pattern {pattern:?}: {err}"),
    }
}

/// Mounts `patterns` under `prefix` and names them `namespace:name`.
///
/// Paths are joined as strings with duplicate slashes collapsed. An empty
/// namespace keeps the names unchanged.
pub fn include(
    prefix: &str,
    patterns: Vec<UrlPattern>,
    namespace: &str,
) -> Result<Vec<UrlPattern>, PatternError> {
    patterns
        .into_iter()
        .map(|pattern| {
            let name = match (namespace.is_empty(), pattern.name.is_empty()) {
                (false, false) => format!("{namespace}:{}", pattern.name),
                _ => pattern.name,
            };
            let namespace = match (namespace.is_empty(), pattern.namespace.is_empty()) {
                (false, false) => format!("{namespace}:{}", pattern.namespace),
                (false, true) => namespace.to_string(),
                (true, _) => pattern.namespace,
            };

            UrlPattern::compile(
                join_paths(prefix, &pattern.source),
                pattern.handler,
                name,
                namespace,
            )
        })
        .collect()
}

/// A matched pattern together with its arguments.
#[derive(Debug)]
pub struct ResolvedHandler<'a> {
    pattern: &'a UrlPattern,
    args: PathArgs,
}

impl ResolvedHandler<'_> {
    #[inline]
    pub fn pattern(&self) -> &UrlPattern {
        self.pattern
    }

    #[inline]
    pub fn args(&self) -> &PathArgs {
        &self.args
    }

    /// Calls the handler with the captured arguments.
    #[inline]
    pub fn apply(&self, request: &Request, context: &Context) -> Result<Response, HttpError> {
        self.pattern.apply(request, &self.args, context)
    }
}

/// Finds the first pattern matching `path`.
pub fn resolve<'a>(path: &str, patterns: &'a [UrlPattern]) -> Option<ResolvedHandler<'a>> {
    patterns.iter().find_map(|pattern| {
        pattern
            .matches(path)
            .map(|args| ResolvedHandler { pattern, args })
    })
}

#[inline]
pub fn is_valid_path(path: &str, patterns: &[UrlPattern]) -> bool {
    resolve(path, patterns).is_some()
}

/// Builds the URL of the first pattern called `name`.
pub fn reverse(name: &str, args: &[&str], patterns: &[UrlPattern]) -> Result<String, PatternError> {
    patterns
        .iter()
        .find(|pattern| pattern.name == name)
        .ok_or_else(|| PatternError::NotFound(name.to_string()))?
        .build(args)
}

// PATTERN SYNTAX

/// Splits `source` into literal text and argument names.
fn split_pattern(source: &str) -> Result<Vec<Part>, PatternError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = source;

    while let Some(pos) = rest.find('<') {
        literal.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find('>')
            .ok_or_else(|| PatternError::UnclosedName(source.to_string()))?;
        let name = after[..end].to_string();

        let group = &after[end + 1..];
        let len = group_len(group).map_err(|missing| match missing {
            true => PatternError::MissingGroup(name.clone()),
            false => PatternError::UnbalancedGroup(name.clone()),
        })?;

        if !literal.is_empty() {
            parts.push(Part::Literal(std::mem::take(&mut literal)));
        }
        parts.push(Part::Arg(name));
        rest = &group[len..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    Ok(parts)
}

/// Length of the parenthesized group at the start of `src`.
///
/// Escapes and character classes are skipped, so `([)a]+)` is one group.
/// `Err(true)` when there is no group, `Err(false)` when it never closes.
fn group_len(src: &str) -> Result<usize, bool> {
    if !src.starts_with('(') {
        return Err(true);
    }

    let mut depth = 0usize;
    let mut class = false;
    let mut chars = src.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '[' if !class => {
                class = true;
                // `]` right after `[` or `[^` is a literal
                chars.next_if(|&(_, c)| c == '^');
                chars.next_if(|&(_, c)| c == ']');
            }
            ']' if class => class = false,
            '(' if !class => depth += 1,
            ')' if !class => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
    }
    Err(false)
}

/// Translates `<name>(regex)` into `(?P<name>regex)`.
fn push_regex(source: &str, out: &mut String) -> Result<(), PatternError> {
    let mut rest = source;
    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find('>')
            .ok_or_else(|| PatternError::UnclosedName(source.to_string()))?;
        let name = &after[..end];

        let group = &after[end + 1..];
        let len = group_len(group).map_err(|_| PatternError::UnbalancedGroup(name.to_string()))?;
        out.push_str("(?P<");
        out.push_str(name);
        out.push('>');
        out.push_str(&group[1..len]);
        rest = &group[len..];
    }
    out.push_str(rest);
    Ok(())
}

/// Literal text of a pattern piece: anchors, `?` and escapes removed.
fn strip_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            '^' | '$' | '?' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Joins a prefix and a pattern source; a leading `^` on the source is dropped.
fn join_paths(prefix: &str, path: &str) -> String {
    let path = path.strip_prefix('^').unwrap_or(path);
    let joined = format!("{prefix}{path}");
    let mut out = String::with_capacity(joined.len());
    for ch in joined.chars() {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::request;

    fn named(pattern: &str, name: &str) -> UrlPattern {
        let body = name.to_string();
        path(pattern, name, move |_, _, _| Ok(Response::ok(body.clone())))
    }

    #[test]
    fn pattern_syntax() {
        #[rustfmt::skip]
        let cases = [
            (r"/", "/", Some(vec![])),
            (r"/", "/x", None),
            (r"/profile/<id>(\d+)/?", "/profile/15", Some(vec![("id", "15")])),
            (r"/profile/<id>(\d+)/?", "/profile/15/", Some(vec![("id", "15")])),
            (r"/profile/<id>(\d+)/?", "/profile/abc/", None),
            (r"/profile/<id>(\d+)/?", "/profile/15/edit", None),
            (r"/<a>(\w+)-<b>((x|y)+)", "/ab-xyx", Some(vec![("a", "ab"), ("b", "xyx")])),
            (r"/file/<name>([^/]+\.txt)", "/file/a.txt", Some(vec![("name", "a.txt")])),
            (r"/esc/<g>(\(\d\))", "/esc/(4)", Some(vec![("g", "(4)")])),
            (r"/<x>([)a]+)", "/)a)", Some(vec![("x", ")a)")])),
            (r"/<x>([\](]+)/<y>(\d)", "/](]/5", Some(vec![("x", "](]"), ("y", "5")])),
            (r"/<x>([^)]+)", "/a(b", Some(vec![("x", "a(b")])),
        ];

        for (pattern, path, expected) in cases {
            let compiled = named(pattern, "");
            let args = compiled.matches(path);
            let args: Option<Vec<(&str, &str)>> = args.as_ref().map(|a| a.iter().collect());
            assert_eq!(args, expected, "{pattern} ~ {path}");
        }
    }

    #[test]
    fn invalid_patterns() {
        let handler = |_: &Request, _: &PathArgs, _: &Context| -> Result<Response, HttpError> {
            Ok(Response::ok(""))
        };

        #[rustfmt::skip]
        let cases = [
            (r"/<id", "unclosed"),
            (r"/<id>\d+", "missing"),
            (r"/<id>(\d+", "unbalanced"),
            (r"/[a-", "regex"),
        ];

        for (pattern, kind) in cases {
            let err = UrlPattern::new(pattern, handler, "").unwrap_err();
            let matched = match kind {
                "unclosed" => matches!(err, PatternError::UnclosedName(_)),
                "missing" => matches!(err, PatternError::MissingGroup(_)),
                "unbalanced" => matches!(err, PatternError::UnbalancedGroup(_)),
                _ => matches!(err, PatternError::Regex(_)),
            };
            assert!(matched, "{pattern}: {err:?}");
        }
    }

    #[test]
    fn first_match_wins() {
        let patterns = vec![
            named(r"/items/<id>(\d+)", "first"),
            named(r"/items/<slug>(\w+)", "second"),
            named(r"/items/7", "third"),
        ];
        let req = request(b"GET /items/7 HTTP/1.1\r\n\r\n");

        for _ in 0..3 {
            let resolved = resolve("/items/7", &patterns).unwrap();
            assert_eq!(resolved.pattern().name(), "first");
            let resp = resolved.apply(&req, &Context::new()).unwrap();
            assert_eq!(resp.body(), b"first");
        }
        assert_eq!(resolve("/items/x", &patterns).unwrap().pattern().name(), "second");
        assert!(resolve("/hello", &patterns).is_none());
        assert!(is_valid_path("/items/abc", &patterns));
        assert!(!is_valid_path("/items/", &patterns));
    }

    #[test]
    fn include_joins_and_namespaces() {
        let inner = vec![named(r"/<id>(\d+)/", "detail"), named("/", ""), named("/all", "list")];
        let patterns = include("/blog/", inner, "blog").unwrap();

        #[rustfmt::skip]
        let cases = [
            (0, "/blog/<id>(\\d+)/", "blog:detail", "blog"),
            (1, "/blog/", "", "blog"),
            (2, "/blog/all", "blog:list", "blog"),
        ];
        for (i, source, name, namespace) in cases {
            assert_eq!(patterns[i].source(), source);
            assert_eq!(patterns[i].name(), name);
            assert_eq!(patterns[i].namespace(), namespace);
        }

        let nested = include("/api", patterns, "v1").unwrap();
        assert_eq!(nested[0].source(), "/api/blog/<id>(\\d+)/");
        assert_eq!(nested[0].name(), "v1:blog:detail");
        assert_eq!(nested[0].namespace(), "v1:blog");
        assert!(nested[0].matches("/api/blog/3/").is_some());

        let anchored = include("/blog", vec![named(r"^/<id>(\d+)$", "entry")], "").unwrap();
        assert!(anchored[0].matches("/blog/3").is_some());
        assert_eq!(anchored[0].build(&["3"]).unwrap(), "/blog/3");

        let plain = include("", vec![named("/x", "x")], "").unwrap();
        assert_eq!(plain[0].name(), "x");
    }

    #[test]
    fn build_and_reverse() {
        let patterns = vec![
            named(r"^/profile/<id>(\d+)/?$", "profile"),
            named(r"/a/<x>(\w+)/b/<y>(\w+)", "pair"),
            named(r"/static\.txt", "static"),
        ];

        #[rustfmt::skip]
        let cases: [(&str, &[&str], &str); 3] = [
            ("profile", &["7"], "/profile/7/"),
            ("pair", &["1", "2"], "/a/1/b/2"),
            ("static", &[], "/static.txt"),
        ];
        for (name, args, url) in cases {
            assert_eq!(reverse(name, args, &patterns).unwrap(), url);
        }

        assert!(matches!(
            reverse("pair", &["1"], &patterns),
            Err(PatternError::ArgCount { expected: 2, given: 1 })
        ));
        assert!(matches!(
            reverse("missing", &[], &patterns),
            Err(PatternError::NotFound(_))
        ));
    }

    #[test]
    fn join_collapses_slashes() {
        #[rustfmt::skip]
        let cases = [
            ("/a/", "/b", "/a/b"),
            ("/a", "b", "/ab"),
            ("", "/b", "/b"),
            ("//", "//b//", "/b/"),
            ("/blog", "^/<id>(\\d+)$", "/blog/<id>(\\d+)$"),
        ];

        for (prefix, path, joined) in cases {
            assert_eq!(join_paths(prefix, path), joined);
        }
    }
}
