//! Ring buffer configuration.

use crate::error::{Result, RingBufError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default capacity: 1 Mi words (4 MiB of data).
pub const DEFAULT_NUM_WORDS: u32 = 1024 * 1024;

/// Smallest usable capacity: a one-word record plus its length, the spare
/// word and the EOF mark.
pub const MIN_NUM_WORDS: u32 = 4;

/// Largest capacity: 1 Gi words (4 GiB of data).
///
/// Keeps `cursor + record length` computations well inside `u32`.
pub const MAX_NUM_WORDS: u32 = 1 << 30;

/// Default bound on how long a commit waits for its predecessors.
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for creating and operating a ring buffer.
///
/// `wrap` and `num_words` only matter when the file is created; an existing
/// file keeps the values in its header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufConfig {
    /// Reuse space once consumed (true) or rotate into archives when full (false).
    pub wrap: bool,
    /// Capacity of the data area, in 32-bit words.
    pub num_words: u32,
    /// Let `enqueue_alloc` rotate a full non-wrapping buffer by itself.
    ///
    /// When false, a full buffer reports `NoRoom` and rotation is left to
    /// an explicit `rotate` call.
    pub auto_rotate: bool,
    /// How long a commit may wait for earlier transactions to commit.
    pub commit_timeout: Duration,
    /// Take the shared lock while mapping, so a load never observes a
    /// rotation half way.
    pub shared_lock_on_load: bool,
    /// Flush the mapping to disk after every enqueue commit.
    pub sync_on_commit: bool,
}

impl Default for RingBufConfig {
    fn default() -> Self {
        Self {
            wrap: true,
            num_words: DEFAULT_NUM_WORDS,
            auto_rotate: true,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            shared_lock_on_load: true,
            sync_on_commit: false,
        }
    }
}

impl RingBufConfig {
    /// Configuration for a rotating (non-wrapping) archive buffer.
    pub fn archival(num_words: u32) -> Self {
        Self {
            wrap: false,
            num_words,
            ..Self::default()
        }
    }

    /// Overlay `RINGLOG_NUM_WORDS`, `RINGLOG_WRAP` and `RINGLOG_AUTO_ROTATE`
    /// from the environment on top of the defaults.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_var("RINGLOG_NUM_WORDS").and_then(|s| s.parse().ok()) {
            config.num_words = n;
        }
        if let Some(wrap) = env_var("RINGLOG_WRAP").and_then(|s| parse_bool(&s)) {
            config.wrap = wrap;
        }
        if let Some(auto) = env_var("RINGLOG_AUTO_ROTATE").and_then(|s| parse_bool(&s)) {
            config.auto_rotate = auto;
        }
        config
    }

    /// Set the wrap mode.
    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    /// Set the capacity in words.
    pub fn with_num_words(mut self, num_words: u32) -> Self {
        self.num_words = num_words;
        self
    }

    /// Enable or disable rotation from within `enqueue_alloc`.
    pub fn with_auto_rotate(mut self, auto_rotate: bool) -> Self {
        self.auto_rotate = auto_rotate;
        self
    }

    /// Set the commit wait bound.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Enable or disable the shared lock taken by `load`.
    pub fn with_shared_lock_on_load(mut self, enabled: bool) -> Self {
        self.shared_lock_on_load = enabled;
        self
    }

    /// Enable or disable flushing after every commit.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Check the creation parameters.
    pub fn validate(&self) -> Result<()> {
        validate_num_words(self.num_words)
    }
}

pub(crate) fn validate_num_words(num_words: u32) -> Result<()> {
    if !(MIN_NUM_WORDS..=MAX_NUM_WORDS).contains(&num_words) {
        return Err(RingBufError::InvalidConfig {
            cause: format!(
                "num_words must be within {}..={}, got {}",
                MIN_NUM_WORDS, MAX_NUM_WORDS, num_words
            ),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RingBufConfig::default();
        assert!(config.wrap);
        assert!(config.auto_rotate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn capacity_bounds() {
        assert!(RingBufConfig::archival(MIN_NUM_WORDS).validate().is_ok());
        assert!(RingBufConfig::archival(MAX_NUM_WORDS).validate().is_ok());
        assert!(RingBufConfig::archival(MIN_NUM_WORDS - 1).validate().is_err());
        assert!(RingBufConfig::archival(MAX_NUM_WORDS + 1).validate().is_err());
    }

    #[test]
    fn builder_chain() {
        let config = RingBufConfig::default()
            .with_wrap(false)
            .with_num_words(100)
            .with_auto_rotate(false)
            .with_commit_timeout(Duration::from_millis(50))
            .with_sync(true);
        assert!(!config.wrap);
        assert_eq!(config.num_words, 100);
        assert!(!config.auto_rotate);
        assert_eq!(config.commit_timeout, Duration::from_millis(50));
        assert!(config.sync_on_commit);
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: RingBufConfig =
            serde_json::from_str(r#"{"wrap": false, "num_words": 256}"#).unwrap();
        assert!(!config.wrap);
        assert_eq!(config.num_words, 256);
        assert_eq!(config.commit_timeout, DEFAULT_COMMIT_TIMEOUT);
    }
}
