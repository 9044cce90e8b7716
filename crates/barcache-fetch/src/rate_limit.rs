//! Rolling-window request rate limiter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Per-vendor request limiter.
///
/// Keeps a rolling window of request timestamps. Once the window holds
/// `capacity` requests, callers wait until the oldest one leaves the window
/// and the window is then cleared completely (a hard reset rather than a
/// gradual drain), so a busy vendor does not sit permanently at the edge of
/// its limit. A server-reported rate limit is handled with [`penalize`],
/// which imposes a cooldown and clears the window.
///
/// Clones share the same window.
///
/// [`penalize`]: RateLimiter::penalize
#[derive(Debug, Clone)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    state: Arc<Mutex<WindowState>>,
}

#[derive(Debug, Default)]
struct WindowState {
    stamps: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl WindowState {
    /// Returns how long the caller must wait, or records the request and
    /// returns `None`.
    fn try_admit(&mut self, now: Instant, capacity: usize, window: Duration) -> Option<Duration> {
        if let Some(until) = self.blocked_until {
            if now < until {
                return Some(until - now);
            }
            self.blocked_until = None;
        }

        while self
            .stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            self.stamps.pop_front();
        }

        if self.stamps.len() < capacity {
            self.stamps.push_back(now);
            return None;
        }

        // Full: block everyone until the oldest entry expires, then start over.
        let reset_at = self.stamps.front().map_or(now, |oldest| *oldest + window);
        self.stamps.clear();
        self.blocked_until = Some(reset_at);
        Some(reset_at.saturating_duration_since(now))
    }
}

impl RateLimiter {
    /// Length of the rolling window.
    pub const WINDOW: Duration = Duration::from_secs(60);

    /// Creates a limiter allowing `requests_per_minute` requests per rolling minute.
    #[must_use]
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute as usize, Self::WINDOW)
    }

    /// Creates a limiter with a custom capacity and window length.
    #[must_use]
    pub fn with_window(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            state: Arc::new(Mutex::new(WindowState::default())),
        }
    }

    /// Waits until a request may be sent and records it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                match state.try_admit(Instant::now(), self.capacity, self.window) {
                    None => return,
                    Some(wait) => wait,
                }
            };
            debug!(
                wait_ms = wait.as_millis() as u64,
                capacity = self.capacity,
                "rate limit window full, waiting for reset"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Imposes a cooldown after a server-reported rate limit and clears the window.
    pub async fn penalize(&self, cooldown: Duration) {
        let mut state = self.state.lock().await;
        state.stamps.clear();
        state.blocked_until = Some(Instant::now() + cooldown);
    }

    /// Returns the number of requests currently counted in the window.
    pub async fn in_window(&self) -> usize {
        self.state.lock().await.stamps.len()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
