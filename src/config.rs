//! Source configuration and tunables.

use std::time::Duration;

/// Connection parameters for a broadcast, as edited by the user.
///
/// Values arrive keystroke-by-keystroke from a live settings UI; they are
/// staged by the debouncer and only applied once editing settles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceConfig {
    /// Relay URL, e.g. `https://relay.example:4443`.
    pub url: String,
    /// Broadcast path under the relay, e.g. `venue/cam-1`.
    pub broadcast: String,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>, broadcast: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            broadcast: broadcast.into(),
        }
    }

    /// A config is connectable only when both fields are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty() && !self.broadcast.is_empty()
    }
}

/// Tunables for the source. `Default` matches production behavior.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Quiet period after the last settings edit before a reconnect is issued.
    pub debounce_window: Duration,
    /// Upper bound on waiting for in-flight callbacks to drain at shutdown.
    pub drain_timeout: Duration,
    /// Which video track of the catalog to subscribe to.
    pub video_track: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(1),
            video_track: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validity() {
        assert!(SourceConfig::new("https://relay:4443", "venue/cam").is_valid());
        assert!(!SourceConfig::new("", "venue/cam").is_valid());
        assert!(!SourceConfig::new("https://relay:4443", "").is_valid());
        assert!(!SourceConfig::default().is_valid());
    }

    #[test]
    fn test_config_equality_by_value() {
        let a = SourceConfig::new("u", "b");
        let b = SourceConfig::new("u", "b");
        assert_eq!(a, b);
        assert_ne!(a, SourceConfig::new("u", "other"));
    }
}
