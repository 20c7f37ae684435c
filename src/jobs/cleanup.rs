//! Background job: reclaim expired rate-limit windows and cached tokens.
//!
//! Both structures already drop stale entries lazily on access; this sweep
//! only bounds memory for sources and tokens that never come back.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::AppState;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the background sweep. Call this once at startup.
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweep(&state);
        }
    })
}

/// One pass. Returns (limiter windows dropped, cache entries dropped).
pub fn sweep(state: &AppState) -> (usize, usize) {
    let windows = state.limiter.evict_expired();
    let cached = state.store.cache().evict_expired();
    if windows > 0 || cached > 0 {
        tracing::debug!(
            windows = windows,
            cached_tokens = cached,
            "swept expired entries"
        );
    }
    (windows, cached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_sweep_drops_elapsed_windows() {
        let config = Config {
            rate_limit_window: Duration::from_millis(20),
            ..Config::default()
        };
        let state = AppState::in_memory(config).unwrap();
        state.limiter.check("10.0.0.1");
        state.limiter.check("10.0.0.2");
        assert_eq!(state.limiter.tracked_sources(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let (windows, _) = sweep(&state);
        assert_eq!(windows, 2);
        assert_eq!(state.limiter.tracked_sources(), 0);
    }
}
