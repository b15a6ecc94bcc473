//! Response cache options.

use std::time::Duration;

/// Options of a [`ResponseCache`](crate::ResponseCache).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Lifetime for responses without `max-age`/`s-maxage`; `None` keeps
    /// them until evicted
    pub default_max_age: Option<Duration>,

    /// Emit lifecycle events (hit, miss, sealed, purged) at debug level
    pub debug: bool,
}

impl CacheOptions {
    /// Default options: unbounded lifetime, lifecycle events off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default lifetime.
    pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age = Some(max_age);
        self
    }

    /// Toggle lifecycle events.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Load options from environment variables.
    ///
    /// Reads `STOWAGE_DEFAULT_MAX_AGE` (seconds) and `STOWAGE_DEBUG`
    /// (`1`/`true`); unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut options = Self::new();

        if let Ok(max_age) = std::env::var("STOWAGE_DEFAULT_MAX_AGE")
            && let Ok(secs) = max_age.trim().parse::<u64>()
        {
            options = options.with_default_max_age(Duration::from_secs(secs));
        }

        if let Ok(debug) = std::env::var("STOWAGE_DEBUG") {
            options = options.with_debug(parse_flag(&debug));
        }

        options
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
