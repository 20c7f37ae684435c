use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by source address.
///
/// Increment-and-compare happens under the DashMap shard lock for that key,
/// so concurrent bursts from one source cannot undercount and unrelated
/// sources never contend on the same lock.
///
/// Supported window formats for [`parse_window`]: "1s", "1m", "1h", "1d".
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// A `limit` of zero disables limiting.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        if self.limit == 0 {
            return RateDecision::Allowed;
        }

        let mut w = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window { started: now, count: 0 });

        let elapsed = now.saturating_duration_since(w.started);
        if elapsed >= self.window {
            w.started = now;
            w.count = 0;
        }

        if w.count >= self.limit {
            let remaining = self
                .window
                .saturating_sub(now.saturating_duration_since(w.started));
            let retry_after_secs = (remaining.as_secs_f64().ceil() as u64).max(1);
            tracing::warn!(
                rate_limit = true,
                source = key,
                limit = self.limit,
                retry_after_secs,
                "rate limit exceeded"
            );
            return RateDecision::Limited { retry_after_secs };
        }

        w.count += 1;
        RateDecision::Allowed
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}

pub fn parse_window(s: &str) -> u64 {
    let s = s.trim();
    let (digits, unit) = if let Some(val) = s.strip_suffix('s') {
        (val, 1)
    } else if let Some(val) = s.strip_suffix('m') {
        (val, 60)
    } else if let Some(val) = s.strip_suffix('h') {
        (val, 3600)
    } else if let Some(val) = s.strip_suffix('d') {
        (val, 86400)
    } else {
        return 60; // default 1m
    };
    // A zero-length window would reset on every request.
    match digits.parse::<u64>().ok().and_then(|v| v.checked_mul(unit)) {
        Some(secs) if secs > 0 => secs,
        _ => 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("1s"), 1);
        assert_eq!(parse_window("60s"), 60);
        assert_eq!(parse_window("5m"), 300);
        assert_eq!(parse_window("24h"), 86400);
        assert_eq!(parse_window("1d"), 86400);
        assert_eq!(parse_window("garbage"), 60);
        assert_eq!(parse_window("  5m  "), 300);
    }

    #[test]
    fn test_parse_window_rejects_zero_and_overflow() {
        assert_eq!(parse_window("0s"), 60);
        assert_eq!(parse_window("0d"), 60);
        assert_eq!(parse_window(&format!("{}d", u64::MAX)), 60);
    }

    #[test]
    fn test_sixty_first_request_limited() {
        let limiter = RateLimiter::new(60, Duration::from_secs(60));
        let t0 = Instant::now();
        for i in 0..60 {
            let now = t0 + Duration::from_millis(i * 100);
            assert_eq!(limiter.check_at("10.0.0.1", now), RateDecision::Allowed);
        }

        let now = t0 + Duration::from_secs(10);
        match limiter.check_at("10.0.0.1", now) {
            RateDecision::Limited { retry_after_secs } => {
                assert!(retry_after_secs > 0);
                assert!(retry_after_secs <= 50);
            }
            other => panic!("expected Limited, got {:?}", other),
        }
        assert_eq!(limiter.check_at("10.0.0.2", now), RateDecision::Allowed);
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        let t0 = Instant::now();
        assert_eq!(limiter.check_at("a", t0), RateDecision::Allowed);
        assert!(matches!(
            limiter.check_at("a", t0 + Duration::from_millis(999)),
            RateDecision::Limited { retry_after_secs: 1 }
        ));
        assert_eq!(
            limiter.check_at("a", t0 + Duration::from_secs(1)),
            RateDecision::Allowed
        );
    }

    #[test]
    fn test_zero_limit_disables() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..1000 {
            assert_eq!(limiter.check("a"), RateDecision::Allowed);
        }
        assert_eq!(limiter.tracked_sources(), 0);
    }

    #[test]
    fn test_concurrent_burst_never_overcounts() {
        let limiter = Arc::new(RateLimiter::new(60, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| limiter.check("burst") == RateDecision::Allowed)
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 60);
    }

    #[test]
    fn test_evict_expired() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.check_at("old", t0);
        limiter.check_at("fresh", t0 + Duration::from_secs(59));
        assert_eq!(limiter.evict_expired_at(t0 + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_sources(), 1);
    }
}
