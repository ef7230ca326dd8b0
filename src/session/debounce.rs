//! Debounced application of connection settings.
//!
//! Settings arrive keystroke-by-keystroke from a live-editing UI; connecting
//! on every edit would churn the relay. Edits are staged here and only acted
//! on once no further edit has arrived for a full quiet window.

use std::time::{Duration, Instant};

use log::debug;

use crate::config::SourceConfig;

/// What the periodic tick should do with the staged settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceVerdict {
    /// Nothing to apply: no pending edit, still inside the quiet window, or
    /// the settled value equals the active config.
    Hold,
    /// The quiet window elapsed and the value actually changed; adopt it.
    Apply(SourceConfig),
}

/// Staging area for pending connection settings.
#[derive(Debug)]
pub struct ConfigDebouncer {
    window: Duration,
    pending: Option<SourceConfig>,
    pending_since: Option<Instant>,
    reconnect_pending: bool,
}

impl ConfigDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            pending_since: None,
            reconnect_pending: false,
        }
    }

    /// Stage an edit. Only an actual value change restarts the quiet window;
    /// re-delivering identical settings does not delay an armed reconnect.
    pub fn stage(&mut self, config: SourceConfig, now: Instant) {
        if self.pending.as_ref() == Some(&config) {
            return;
        }
        debug!(
            "settings changed, scheduling reconnect after debounce (url={}, broadcast={})",
            config.url, config.broadcast
        );
        self.pending = Some(config);
        self.pending_since = Some(now);
        self.reconnect_pending = true;
    }

    /// Called from the periodic tick: decide whether the staged settings are
    /// ready to apply. `active` is the currently connected config, if any.
    pub fn poll(&mut self, now: Instant, active: Option<&SourceConfig>) -> DebounceVerdict {
        if !self.reconnect_pending {
            return DebounceVerdict::Hold;
        }

        let Some(since) = self.pending_since else {
            self.reconnect_pending = false;
            return DebounceVerdict::Hold;
        };
        if now.duration_since(since) < self.window {
            // Still absorbing edits.
            return DebounceVerdict::Hold;
        }

        self.reconnect_pending = false;
        match self.pending.clone() {
            Some(pending) if active != Some(&pending) => DebounceVerdict::Apply(pending),
            _ => DebounceVerdict::Hold,
        }
    }
}
