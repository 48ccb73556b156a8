use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Result of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Whole seconds until the oldest call leaves the window (0 when allowed)
    pub retry_after_secs: u64,
}

/// Sliding-window limiter keyed by caller identifier (session id)
pub struct RateLimiter {
    config: RateLimitConfig,
    period: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            period: Duration::from_secs(config.period_seconds),
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit and record a call, or report how long to wait
    pub async fn check_and_record(&self, identifier: &str) -> RateDecision {
        if !self.config.enabled {
            return RateDecision {
                allowed: true,
                retry_after_secs: 0,
            };
        }

        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        // drop identifiers whose every call has left the window
        windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|newest| now.duration_since(*newest) < self.period)
        });
        let window = windows.entry(identifier.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.period {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.config.max_calls {
            window.push_back(now);
            return RateDecision {
                allowed: true,
                retry_after_secs: 0,
            };
        }

        let remaining = window
            .front()
            .map(|oldest| self.period.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.period);
        let retry_after_secs = remaining.as_millis().div_ceil(1000).max(1) as u64;

        tracing::debug!(
            "Rate limit hit for {}: {} calls in {}s window",
            identifier,
            window.len(),
            self.config.period_seconds
        );

        RateDecision {
            allowed: false,
            retry_after_secs,
        }
    }

    /// Identifiers with at least one call still inside the window
    pub async fn tracked_identifiers(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Forget every recorded call for `identifier`
    pub async fn reset(&self, identifier: &str) {
        self.windows.lock().await.remove(identifier);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
