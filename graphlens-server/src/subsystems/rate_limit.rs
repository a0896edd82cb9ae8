//! Per-tab sliding-window rate limiter for capture events.
//!
//! Events over the limit are rejected, never queued.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use graphlens_core::config::RateLimitConfig;
use graphlens_core::TabId;
use tokio::time::Instant;

pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    windows: HashMap<TabId, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            windows: HashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.window(), config.max_requests))
    }

    /// Record an event for `tab_id` if it fits in the window.
    pub fn check(&mut self, tab_id: TabId, now: Instant) -> bool {
        let window = self.window;
        let timestamps = self.windows.entry(tab_id).or_default();
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Drop windows with no event inside the current window.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.windows.retain(|_, timestamps| {
            timestamps
                .back()
                .map(|latest| now.duration_since(*latest) < window)
                .unwrap_or(false)
        });
    }
}
