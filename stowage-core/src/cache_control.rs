//! `Cache-Control` parsing and the store/skip policy.
//!
//! # Examples
//!
//! ```
//! use stowage_core::cache_control::CacheControl;
//! use std::time::Duration;
//!
//! let cc = CacheControl::parse("public, s-maxage=600, max-age=60").unwrap();
//! assert!(cc.should_cache());
//! assert_eq!(cc.effective_max_age(None), Some(Duration::from_secs(600)));
//!
//! assert!(CacheControl::parse("max-age=NaN").is_err());
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A `Cache-Control` header that could not be parsed.
///
/// Never fatal: a response carrying one is simply not cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheControlError {
    /// The header does not follow the directive grammar
    #[error("malformed Cache-Control header at {position}: {header:?}")]
    Malformed { header: String, position: usize },

    /// `max-age` or `s-maxage` without a non-negative integer value
    #[error("invalid seconds for {directive}: {value:?}")]
    InvalidSeconds {
        directive: &'static str,
        value: Option<String>,
    },
}

/// Individual cache directive from a Cache-Control header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDirective {
    /// Response may be cached by any cache
    Public,
    /// Response is for a single user and must not be stored by shared caches
    Private,
    /// Response must not be stored in any cache
    NoStore,
    /// Response can be stored but must be validated before use
    NoCache,
    /// Maximum time the response is fresh (in seconds)
    MaxAge(u64),
    /// Maximum time a shared cache may store the response (in seconds)
    SMaxAge(u64),
    /// Response must be revalidated after becoming stale
    MustRevalidate,
    /// Shared caches must revalidate after becoming stale
    ProxyRevalidate,
    /// Response must not be transformed (e.g., compressed)
    NoTransform,
    /// Response is immutable and won't change
    Immutable,
    /// Custom/unknown directive
    Extension(String, Option<String>),
}

impl CacheDirective {
    fn from_parts(name: String, value: Option<String>) -> Result<Self, CacheControlError> {
        let directive = match name.as_str() {
            "max-age" => CacheDirective::MaxAge(parse_seconds("max-age", value)?),
            "s-maxage" => CacheDirective::SMaxAge(parse_seconds("s-maxage", value)?),
            "public" => CacheDirective::Public,
            "private" => CacheDirective::Private,
            "no-store" => CacheDirective::NoStore,
            "no-cache" => CacheDirective::NoCache,
            "must-revalidate" => CacheDirective::MustRevalidate,
            "proxy-revalidate" => CacheDirective::ProxyRevalidate,
            "no-transform" => CacheDirective::NoTransform,
            "immutable" => CacheDirective::Immutable,
            _ => CacheDirective::Extension(name, value),
        };
        Ok(directive)
    }

    /// Convert directive to header value string.
    pub fn to_header_value(&self) -> String {
        match self {
            CacheDirective::Public => "public".to_string(),
            CacheDirective::Private => "private".to_string(),
            CacheDirective::NoStore => "no-store".to_string(),
            CacheDirective::NoCache => "no-cache".to_string(),
            CacheDirective::MaxAge(secs) => format!("max-age={}", secs),
            CacheDirective::SMaxAge(secs) => format!("s-maxage={}", secs),
            CacheDirective::MustRevalidate => "must-revalidate".to_string(),
            CacheDirective::ProxyRevalidate => "proxy-revalidate".to_string(),
            CacheDirective::NoTransform => "no-transform".to_string(),
            CacheDirective::Immutable => "immutable".to_string(),
            CacheDirective::Extension(key, Some(value)) if needs_quotes(value) => {
                format!("{}=\"{}\"", key, value.replace('\\', "\\\\").replace('"', "\\\""))
            }
            CacheDirective::Extension(key, Some(value)) => format!("{}={}", key, value),
            CacheDirective::Extension(key, None) => key.clone(),
        }
    }
}

/// Largest delta-seconds value kept as is; bigger values are clamped to it.
pub const MAX_DELTA_SECONDS: u64 = 1 << 31;

fn parse_seconds(
    directive: &'static str,
    value: Option<String>,
) -> Result<u64, CacheControlError> {
    let secs = value
        .as_deref()
        .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        .map(|v| {
            v.parse::<u64>()
                .map_or(MAX_DELTA_SECONDS, |secs| secs.min(MAX_DELTA_SECONDS))
        });
    secs.ok_or(CacheControlError::InvalidSeconds { directive, value })
}

/// A parsed `Cache-Control` header.
///
/// Directive names and values are lower-cased. When a directive repeats,
/// the last occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// All directives in header order
    pub directives: Vec<CacheDirective>,
}

impl CacheControl {
    /// Create a new empty Cache-Control.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a Cache-Control header value.
    ///
    /// An empty or blank header is a valid, empty directive set.
    pub fn parse(header: &str) -> Result<Self, CacheControlError> {
        let mut parser = Parser::new(header.trim());
        let mut directives = Vec::new();

        while !parser.at_end() {
            if !directives.is_empty() {
                parser.separator()?;
            }
            let name = parser.token()?.to_ascii_lowercase();
            let value = if parser.eat('=') {
                let value = if parser.peek() == Some('"') {
                    parser.quoted()?
                } else {
                    parser.token()?.to_string()
                };
                Some(value.to_lowercase())
            } else {
                None
            };
            directives.push(CacheDirective::from_parts(name, value)?);
        }

        Ok(Self { directives })
    }

    /// Check whether a directive is present.
    pub fn has(&self, directive: &CacheDirective) -> bool {
        self.directives.contains(directive)
    }

    /// `max-age` in seconds.
    pub fn max_age(&self) -> Option<u64> {
        self.directives.iter().rev().find_map(|d| match d {
            CacheDirective::MaxAge(secs) => Some(*secs),
            _ => None,
        })
    }

    /// `s-maxage` in seconds.
    pub fn s_maxage(&self) -> Option<u64> {
        self.directives.iter().rev().find_map(|d| match d {
            CacheDirective::SMaxAge(secs) => Some(*secs),
            _ => None,
        })
    }

    /// Whether a response with these directives may be stored.
    ///
    /// False for `no-store`, `private`, or an effective max-age of zero.
    /// `no-cache` alone does not block storage.
    pub fn should_cache(&self) -> bool {
        if self.has(&CacheDirective::NoStore) || self.has(&CacheDirective::Private) {
            return false;
        }
        self.s_maxage().or(self.max_age()) != Some(0)
    }

    /// Lifetime of a stored response: `s-maxage`, else `max-age`, else
    /// `default`. `None` means unbounded.
    pub fn effective_max_age(&self, default: Option<Duration>) -> Option<Duration> {
        self.s_maxage()
            .or(self.max_age())
            .map(Duration::from_secs)
            .or(default)
    }

    /// Convert to header value string.
    pub fn to_header_value(&self) -> String {
        self.directives
            .iter()
            .map(CacheDirective::to_header_value)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header_value())
    }
}

/// Store/skip decision for a raw parse result. A parse error never caches.
pub fn should_cache(parsed: &Result<CacheControl, CacheControlError>) -> bool {
    parsed.as_ref().is_ok_and(CacheControl::should_cache)
}

fn is_token_char(c: char) -> bool {
    !(c <= '\u{20}' || c == '\u{7f}' || "()<>@,;:\\\"/[]?={}".contains(c))
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty() || !value.chars().all(is_token_char)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn error(&self) -> CacheControlError {
        CacheControlError::Malformed {
            header: self.input.to_string(),
            position: self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn separator(&mut self) -> Result<(), CacheControlError> {
        self.skip_whitespace();
        if !self.eat(',') {
            return Err(self.error());
        }
        self.skip_whitespace();
        Ok(())
    }

    fn token(&mut self) -> Result<&'a str, CacheControlError> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !is_token_char(c))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error());
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn quoted(&mut self) -> Result<String, CacheControlError> {
        let start = self.pos;
        self.eat('"');

        let mut value = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                c => value.push(c),
            }
        }

        self.pos = start;
        Err(self.error())
    }
}
