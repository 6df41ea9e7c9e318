//! Per-provider sliding-window rate limiter.
//!
//! One process-wide instance is shared by every client. Each provider tag
//! owns an independent window, so a throttled OpenAI call never delays an
//! Ollama call. The window lock is never held across an await.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use pl_domain::provider::ProviderTag;

/// Default window capacity per provider.
pub const DEFAULT_MAX_CALLS: usize = 60;
/// Default window period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Sliding-window limiter: at most `max_calls` admitted calls in any window
/// of `period`, per provider.
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    windows: Mutex<HashMap<ProviderTag, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            period,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Block until a slot is free for `tag`, then record the call.
    pub async fn acquire(&self, tag: ProviderTag) {
        loop {
            let wait = self.try_admit(tag);
            match wait {
                None => return,
                Some(delay) => {
                    tracing::debug!(provider = %tag, wait_ms = delay.as_millis() as u64,
                        "rate limit window full, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Admit the call now, or return how long until the oldest in-window
    /// timestamp ages out.
    fn try_admit(&self, tag: ProviderTag) -> Option<Duration> {
        let mut windows = self.windows.lock();
        let window = windows.entry(tag).or_default();
        let now = Instant::now();

        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.period)
        {
            window.pop_front();
        }

        if window.len() < self.max_calls {
            window.push_back(now);
            return None;
        }

        let oldest = *window.front().expect("window is non-empty here");
        Some(self.period.saturating_sub(now.duration_since(oldest)))
    }

    /// Calls currently inside the window for `tag` (test/diagnostic hook).
    pub fn in_window(&self, tag: ProviderTag) -> usize {
        let mut windows = self.windows.lock();
        let window = windows.entry(tag).or_default();
        let now = Instant::now();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.period)
        {
            window.pop_front();
        }
        window.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALLS, DEFAULT_PERIOD)
    }
}
