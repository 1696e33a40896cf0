//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::rate_limit::RateLimiter;
use crate::clock::Clock;
use crate::history::HistoryStore;

/// History server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Requests allowed per caller within one window (default: 5).
    pub rate_limit_requests: u32,
    /// Length of the rolling rate limit window in seconds (default: 60).
    pub rate_limit_window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: 5,
            rate_limit_window_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

/// State handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<HistoryStore>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(store: Arc<HistoryStore>, config: &ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window(),
                clock,
            )),
        }
    }
}
