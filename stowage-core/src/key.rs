//! Cache-key normalization.
//!
//! Semantically equivalent request targets map to the same key: query
//! parameters are sorted, tracking parameters are dropped, trailing
//! slashes and empty query strings are removed, and dot segments are
//! resolved. Traversal material (`..`, `%2e`) is escaped before resolution
//! so that `/a/b/../` never collides with `/a/`.
//!
//! ```
//! use http::Method;
//! use stowage_core::key::normalize;
//!
//! assert_eq!(normalize(&Method::GET, "/text?b=2&a=1"), "GET:/text?a=1&b=2");
//! assert_eq!(normalize(&Method::GET, "/text/?utm_source=x"), "GET:/text");
//! assert_ne!(normalize(&Method::GET, "/test/test/../"), normalize(&Method::GET, "/test/"));
//! ```

use http::Method;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

const ESCAPE: char = '*';

static BASE: LazyLock<Option<Url>> = LazyLock::new(|| Url::parse("http://localhost/").ok());

static DEFAULT_TRACKING: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new("(?i)^utm_").ok());

static DEFAULT: LazyLock<KeyNormalizer> = LazyLock::new(KeyNormalizer::default);

/// Normalize a request target with the default rules.
pub fn normalize(method: &Method, target: &str) -> String {
    DEFAULT.normalize(method, target)
}

/// Turns `(method, request target)` into a canonical cache key.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    tracking: Option<Regex>,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self {
            tracking: DEFAULT_TRACKING.clone(),
        }
    }
}

impl KeyNormalizer {
    /// Create a normalizer that strips `utm_*` parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pattern matching query parameter names to drop.
    pub fn with_tracking_params(mut self, pattern: Regex) -> Self {
        self.tracking = Some(pattern);
        self
    }

    /// Keep every query parameter.
    pub fn without_tracking_params(mut self) -> Self {
        self.tracking = None;
        self
    }

    /// Build the key `<METHOD>:<normalized path and query>`.
    pub fn normalize(&self, method: &Method, target: &str) -> String {
        format!("{}:{}", method, self.normalize_target(target))
    }

    /// Normalize the path and query of a request target.
    pub fn normalize_target(&self, target: &str) -> String {
        let target = target.split_once('#').map_or(target, |(before, _)| before);
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let escaped = if path.starts_with(['/', '\\']) {
            collapse_slashes(&escape(&path.replace('\\', "/")))
        } else {
            escape(path)
        };
        let reference = match query {
            Some(query) => format!("{}?{}", escaped, query),
            None => escaped,
        };

        let Some(url) = BASE.as_ref().and_then(|base| base.join(&reference).ok()) else {
            return unescape(&reference);
        };

        let mut path = collapse_slashes(url.path());
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }

        let mut normalized = unescape(&path);
        if let Some(query) = self.normalize_query(&url) {
            normalized.push('?');
            normalized.push_str(&query);
        }
        normalized
    }

    /// Filter and sort the query pairs as they appear on the wire.
    ///
    /// Pairs are never decoded and re-encoded, so targets whose raw query
    /// bytes differ never share a key.
    fn normalize_query(&self, url: &Url) -> Option<String> {
        let mut pairs: Vec<(&str, &str)> = url
            .query()?
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| (pair.split_once('=').map_or(pair, |(name, _)| name), pair))
            .filter(|(name, _)| !self.is_tracking(name))
            .collect();

        if pairs.is_empty() {
            return None;
        }

        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let query: Vec<&str> = pairs.into_iter().map(|(_, pair)| pair).collect();
        Some(query.join("&"))
    }

    /// Match the decoded form of a raw parameter name.
    fn is_tracking(&self, raw_name: &str) -> bool {
        let Some(pattern) = &self.tracking else {
            return false;
        };
        url::form_urlencoded::parse(raw_name.as_bytes()).any(|(name, _)| pattern.is_match(&name))
    }
}

/// `*` -> `**`, `..` -> `*d`, `%2e` -> `*e`, `%2E` -> `*E`
fn escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(c) = rest.chars().next() {
        if c == ESCAPE {
            out.push_str("**");
            rest = &rest[1..];
        } else if rest.starts_with("..") {
            out.push_str("*d");
            rest = &rest[2..];
        } else if rest.starts_with("%2e") {
            out.push_str("*e");
            rest = &rest[3..];
        } else if rest.starts_with("%2E") {
            out.push_str("*E");
            rest = &rest[3..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

fn unescape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('*') => out.push('*'),
            Some('d') => out.push_str(".."),
            Some('e') => out.push_str("%2e"),
            Some('E') => out.push_str("%2E"),
            Some(other) => {
                out.push(ESCAPE);
                out.push(other);
            }
            None => out.push(ESCAPE),
        }
    }
    out
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}
