//! Application configuration for sitegist.
//!
//! Configuration is a single frozen [`Config`] record built once at
//! composition time, either from the process environment or from explicit
//! key/value pairs. Unknown keys are rejected loudly; there is no bag of
//! pass-through options.

use std::path::PathBuf;

use crate::error::{Result, SitegistError};

/// Environment variable names recognized by [`Config`], in documentation order.
pub const RECOGNIZED_KEYS: [&str; 10] = [
    "STORAGE_BASE_PATH",
    "BROWSER_TIMEOUT",
    "BROWSER_WAIT_FOR",
    "MAX_CONCURRENT_BROWSERS",
    "MAX_CONCURRENT_EXTRACTIONS",
    "MAX_PAGES_PER_SITE",
    "CHUNK_CHAR_LIMIT",
    "CHUNK_OVERLAP",
    "DEFAULT_TOP_K",
    "DEFAULT_TIMEOUT",
];

// ---------------------------------------------------------------------------
// WaitFor
// ---------------------------------------------------------------------------

/// Browser wait strategy applied before reading the rendered DOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitFor {
    /// Wait until the network has been idle.
    #[default]
    NetworkIdle,
    /// Wait for the `load` event.
    Load,
    /// Wait for `DOMContentLoaded` only.
    DomContentLoaded,
}

impl WaitFor {
    /// Canonical string form, as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkIdle => "networkidle",
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
        }
    }
}

impl std::str::FromStr for WaitFor {
    type Err = SitegistError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "networkidle" => Ok(Self::NetworkIdle),
            "load" => Ok(Self::Load),
            "domcontentloaded" => Ok(Self::DomContentLoaded),
            other => Err(SitegistError::config(format!(
                "BROWSER_WAIT_FOR must be one of networkidle, load, domcontentloaded (got {other:?})"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Frozen runtime configuration, defaults per the environment surface.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for session storage (`STORAGE_BASE_PATH`).
    pub storage_base_path: PathBuf,
    /// Per-fetch timeout in seconds (`BROWSER_TIMEOUT`).
    pub browser_timeout: u64,
    /// Wait strategy before reading the DOM (`BROWSER_WAIT_FOR`).
    pub browser_wait_for: WaitFor,
    /// Browser pool size (`MAX_CONCURRENT_BROWSERS`).
    pub max_concurrent_browsers: usize,
    /// Outstanding embed/insert cap (`MAX_CONCURRENT_EXTRACTIONS`).
    pub max_concurrent_extractions: usize,
    /// Discovery truncation limit (`MAX_PAGES_PER_SITE`).
    pub max_pages_per_site: usize,
    /// Maximum characters per chunk (`CHUNK_CHAR_LIMIT`).
    pub chunk_char_limit: usize,
    /// Overlap carried between adjacent chunks (`CHUNK_OVERLAP`).
    pub chunk_overlap: usize,
    /// Default search result count (`DEFAULT_TOP_K`).
    pub default_top_k: usize,
    /// Default timeout in seconds for LLM and discovery HTTP calls
    /// (`DEFAULT_TIMEOUT`).
    pub default_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_base_path: PathBuf::from("./data"),
            browser_timeout: 60,
            browser_wait_for: WaitFor::NetworkIdle,
            max_concurrent_browsers: 3,
            max_concurrent_extractions: 5,
            max_pages_per_site: 1000,
            chunk_char_limit: 4000,
            chunk_overlap: 200,
            default_top_k: 10,
            default_timeout: 30,
        }
    }
}

impl Config {
    /// Build a config from the process environment.
    ///
    /// Only the recognized variables are consulted; anything else in the
    /// environment is ignored (the environment is shared with the rest of
    /// the process). Unset variables take their defaults.
    pub fn from_env() -> Result<Self> {
        let pairs = RECOGNIZED_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)));
        Self::from_pairs(pairs)
    }

    /// Build a config from explicit `(key, value)` pairs.
    ///
    /// Unlike [`Config::from_env`], an unrecognized key here is a hard error:
    /// explicit options that do nothing are bugs waiting to be discovered.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in pairs {
            let key = key.as_ref();
            let value = value.as_ref();
            match key {
                "STORAGE_BASE_PATH" => config.storage_base_path = PathBuf::from(value),
                "BROWSER_TIMEOUT" => config.browser_timeout = parse_num(key, value)?,
                "BROWSER_WAIT_FOR" => config.browser_wait_for = value.parse()?,
                "MAX_CONCURRENT_BROWSERS" => {
                    config.max_concurrent_browsers = parse_num(key, value)?
                }
                "MAX_CONCURRENT_EXTRACTIONS" => {
                    config.max_concurrent_extractions = parse_num(key, value)?
                }
                "MAX_PAGES_PER_SITE" => config.max_pages_per_site = parse_num(key, value)?,
                "CHUNK_CHAR_LIMIT" => config.chunk_char_limit = parse_num(key, value)?,
                "CHUNK_OVERLAP" => config.chunk_overlap = parse_num(key, value)?,
                "DEFAULT_TOP_K" => config.default_top_k = parse_num(key, value)?,
                "DEFAULT_TIMEOUT" => config.default_timeout = parse_num(key, value)?,
                other => {
                    return Err(SitegistError::config(format!(
                        "unrecognized option {other:?}; recognized options are: {}",
                        RECOGNIZED_KEYS.join(", ")
                    )))
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    fn validate(&self) -> Result<()> {
        if self.max_concurrent_browsers == 0 {
            return Err(SitegistError::config("MAX_CONCURRENT_BROWSERS must be >= 1"));
        }
        if self.max_concurrent_extractions == 0 {
            return Err(SitegistError::config(
                "MAX_CONCURRENT_EXTRACTIONS must be >= 1",
            ));
        }
        if self.max_pages_per_site == 0 {
            return Err(SitegistError::config("MAX_PAGES_PER_SITE must be >= 1"));
        }
        if self.chunk_char_limit == 0 {
            return Err(SitegistError::config("CHUNK_CHAR_LIMIT must be >= 1"));
        }
        if self.chunk_overlap >= self.chunk_char_limit {
            return Err(SitegistError::config(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_CHAR_LIMIT ({})",
                self.chunk_overlap, self.chunk_char_limit
            )));
        }
        if self.browser_timeout == 0 {
            return Err(SitegistError::config("BROWSER_TIMEOUT must be >= 1"));
        }
        Ok(())
    }
}

/// Parse a numeric option, reporting the offending key on failure.
fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SitegistError::config(format!("{key} must be a number (got {value:?})")))
}
