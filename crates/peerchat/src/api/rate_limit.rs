//! Per-caller sliding-window rate limiting for the history endpoint.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::{Clock, elapsed_between};

/// How many checks happen between sweeps of idle callers.
const PRUNE_EVERY: usize = 128;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request admitted; `remaining` more fit in the current window.
    Allowed { remaining: u32 },
    /// Request rejected; the oldest hit leaves the window after `retry_after`.
    Limited { retry_after: Duration },
}

/// Admits at most `limit` requests per caller in any rolling `window`.
///
/// Rejected requests are not counted against the caller.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    hits: DashMap<IpAddr, VecDeque<DateTime<Utc>>>,
    checks: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
            checks: AtomicUsize::new(0),
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `caller` if it fits in the window.
    pub fn check(&self, caller: IpAddr) -> RateDecision {
        let now = self.clock.now();
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune_at(now);
        }

        let mut hits = self.hits.entry(caller).or_default();
        while let Some(oldest) = hits.front() {
            if elapsed_between(*oldest, now) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() < self.limit as usize {
            hits.push_back(now);
            RateDecision::Allowed {
                remaining: self.limit - hits.len() as u32,
            }
        } else {
            let retry_after = hits
                .front()
                .map(|oldest| self.window.saturating_sub(elapsed_between(*oldest, now)))
                .unwrap_or(self.window);
            RateDecision::Limited { retry_after }
        }
    }

    /// Number of callers currently tracked.
    pub fn tracked_callers(&self) -> usize {
        self.hits.len()
    }

    /// Forget callers whose every hit has left the window.
    pub fn prune(&self) {
        self.prune_at(self.clock.now());
    }

    fn prune_at(&self, now: DateTime<Utc>) {
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|newest| elapsed_between(*newest, now) < self.window)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const WINDOW: Duration = Duration::from_secs(60);

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::default();
        (RateLimiter::new(5, WINDOW, Arc::new(clock.clone())), clock)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_sixth_request_in_window_is_limited() {
        let (limiter, clock) = limiter();
        let caller = ip("10.0.0.9");

        for expected_remaining in (0..5).rev() {
            assert_eq!(
                limiter.check(caller),
                RateDecision::Allowed {
                    remaining: expected_remaining
                }
            );
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(
            limiter.check(caller),
            RateDecision::Limited {
                retry_after: Duration::from_secs(55)
            }
        );
    }

    #[test]
    fn test_window_rolls_over() {
        let (limiter, clock) = limiter();
        let caller = ip("10.0.0.9");

        for _ in 0..5 {
            assert!(matches!(limiter.check(caller), RateDecision::Allowed { .. }));
        }
        assert!(matches!(limiter.check(caller), RateDecision::Limited { .. }));

        clock.advance(Duration::from_secs(61));
        assert!(matches!(limiter.check(caller), RateDecision::Allowed { .. }));
    }

    #[test]
    fn test_rejections_do_not_extend_the_window() {
        let (limiter, clock) = limiter();
        let caller = ip("10.0.0.9");

        for _ in 0..5 {
            limiter.check(caller);
        }
        for _ in 0..10 {
            clock.advance(Duration::from_secs(5));
            assert!(matches!(limiter.check(caller), RateDecision::Limited { .. }));
        }
        clock.advance(Duration::from_secs(10));
        assert!(matches!(limiter.check(caller), RateDecision::Allowed { .. }));
    }

    #[test]
    fn test_callers_are_independent() {
        let (limiter, _) = limiter();
        for _ in 0..5 {
            limiter.check(ip("10.0.0.1"));
        }
        assert!(matches!(
            limiter.check(ip("10.0.0.1")),
            RateDecision::Limited { .. }
        ));
        assert!(matches!(
            limiter.check(ip("10.0.0.2")),
            RateDecision::Allowed { remaining: 4 }
        ));
    }

    #[test]
    fn test_prune_drops_idle_callers() {
        let (limiter, clock) = limiter();
        limiter.check(ip("10.0.0.1"));
        limiter.check(ip("10.0.0.2"));
        assert_eq!(limiter.tracked_callers(), 2);

        clock.advance(Duration::from_secs(30));
        limiter.check(ip("10.0.0.2"));
        clock.advance(Duration::from_secs(31));
        limiter.prune();

        assert_eq!(limiter.tracked_callers(), 1);
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(0, WINDOW, Arc::new(clock));
        assert_eq!(
            limiter.check(ip("10.0.0.1")),
            RateDecision::Limited { retry_after: WINDOW }
        );
    }
}
