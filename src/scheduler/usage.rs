//! # Usage window
//! Sliding record of quota consumption against the provider.
//!
//! Samples are `(timestamp, cost)` pairs kept in arrival order and dropped
//! once they fall out of the horizon (60s by default). Owned exclusively by
//! the scheduler actor, so no locking here.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub at: Instant,
    pub cost: u64,
}

/// Ordered samples pruned to a rolling horizon.
#[derive(Debug)]
pub struct UsageWindow {
    horizon: Duration,
    samples: VecDeque<Sample>,
    tokens: u64,
}

impl UsageWindow {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            samples: VecDeque::new(),
            tokens: 0,
        }
    }

    /// Drop every sample whose age is at least the horizon.
    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if front.at + self.horizon <= now {
                self.tokens = self.tokens.saturating_sub(front.cost);
                self.samples.pop_front();
            } else {
                break; // newer samples are behind
            }
        }
    }

    pub fn record(&mut self, at: Instant, cost: u64) {
        self.samples.push_back(Sample { at, cost });
        self.tokens = self.tokens.saturating_add(cost);
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn requests(&self) -> usize {
        self.samples.len()
    }

    /// When the oldest sample leaves the window.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.samples.front().map(|s| s.at + self.horizon)
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

/// Window plus the usable limits derived from quota and safety margin.
#[derive(Debug)]
pub struct UsageTracker {
    window: UsageWindow,
    token_limit: u64,
    request_limit: Option<u64>,
}

impl UsageTracker {
    pub fn new(window: Duration, token_limit: u64, request_limit: Option<u64>) -> Self {
        Self {
            window: UsageWindow::new(window),
            token_limit,
            request_limit,
        }
    }

    /// Whether a call of `cost` may start at `now`. Prunes first.
    pub fn admits(&mut self, now: Instant, cost: u64) -> bool {
        self.window.prune(now);
        let tokens_ok = self.window.tokens().saturating_add(cost) <= self.token_limit;
        let requests_ok = self
            .request_limit
            .map_or(true, |cap| (self.window.requests() as u64) < cap);
        tokens_ok && requests_ok
    }

    pub fn commit(&mut self, at: Instant, cost: u64) {
        self.window.record(at, cost);
    }

    pub fn headroom(&self) -> u64 {
        self.token_limit.saturating_sub(self.window.tokens())
    }

    pub fn token_limit(&self) -> u64 {
        self.token_limit
    }

    pub fn window(&self) -> &UsageWindow {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn samples_expire_after_horizon() {
        let mut w = UsageWindow::new(Duration::from_secs(60));
        let t0 = Instant::now();
        w.record(t0, 40);
        w.record(t0 + Duration::from_secs(10), 25);
        assert_eq!(w.tokens(), 65);
        assert_eq!(w.next_expiry(), Some(t0 + Duration::from_secs(60)));

        w.prune(t0 + Duration::from_secs(59));
        assert_eq!(w.tokens(), 65);

        w.prune(t0 + Duration::from_secs(60));
        assert_eq!(w.tokens(), 25);
        assert_eq!(w.requests(), 1);
        assert_eq!(w.next_expiry(), Some(t0 + Duration::from_secs(70)));
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_admits_up_to_limit_inclusive() {
        let mut t = UsageTracker::new(Duration::from_secs(60), 90, None);
        let now = Instant::now();
        assert!(t.admits(now, 40));
        t.commit(now, 40);
        assert!(t.admits(now, 40));
        t.commit(now, 40);
        assert!(!t.admits(now, 40));
        assert!(t.admits(now, 10));
        assert_eq!(t.headroom(), 10);
        assert!(t.admits(now + Duration::from_secs(60), 40));
    }

    #[tokio::test(start_paused = true)]
    async fn request_cap_blocks_independently_of_tokens() {
        let mut t = UsageTracker::new(Duration::from_secs(60), 1_000, Some(2));
        let now = Instant::now();
        t.commit(now, 1);
        t.commit(now, 1);
        assert!(!t.admits(now, 1));
    }
}
