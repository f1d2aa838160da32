// Per-subject fixed-window rate limiting.
//
// Windows are discrete buckets: a window opens on the first request after the
// previous one expired and admits `max_requests` calls until `window` has
// elapsed from its start. Bursts straddling a boundary can reach twice the
// budget; sliding windows are not used.

use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Request counter for one subject's current window.
struct RateWindow {
    window_start: Instant,
    request_count: u64,
}

/// Per-subject fixed-window rate limiter.
///
/// Windows are created lazily on the first request; a subject with no window
/// is under budget. The check-and-increment runs while holding the subject's
/// map entry, so concurrent callers for the same subject never both take the
/// last slot.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    max_requests: u64,
    window: Duration,
    poll_interval: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window: Duration, poll_interval: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
            poll_interval,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window(), config.poll_interval())
    }

    /// Take one slot for `subject` if the current window has room.
    pub fn try_acquire(&self, subject: &str) -> bool {
        self.acquire_at(subject, Instant::now()).is_ok()
    }

    /// Take one slot, suspending until one frees up.
    ///
    /// The task sleeps until the window resets (capped at the poll interval)
    /// instead of spinning. `deadline` bounds the total wait: when it passes
    /// without a slot the call fails with `RateLimitTimeout`, and
    /// `Some(Duration::ZERO)` makes this a single non-blocking attempt. With
    /// `None` the wait is unbounded; dropping the future cancels it.
    pub async fn wait_and_acquire(
        &self,
        subject: &str,
        deadline: Option<Duration>,
    ) -> Result<(), GatewayError> {
        let started = Instant::now();
        let give_up_at = deadline.map(|d| started + d);

        loop {
            let now = Instant::now();
            let until_reset = match self.acquire_at(subject, now) {
                Ok(()) => return Ok(()),
                Err(until_reset) => until_reset,
            };

            let mut pause = until_reset.min(self.poll_interval);
            if let Some(give_up_at) = give_up_at {
                if now >= give_up_at {
                    debug!(subject = %subject, "Rate limit wait deadline reached");
                    return Err(GatewayError::RateLimitTimeout {
                        subject: subject.to_string(),
                        waited: now - started,
                    });
                }
                pause = pause.min(give_up_at - now);
            }

            debug!(
                subject = %subject,
                pause_ms = pause.as_millis() as u64,
                "Rate limit window exhausted, waiting"
            );
            tokio::time::sleep(pause).await;
        }
    }

    /// Slots left in `subject`'s current window.
    pub fn remaining(&self, subject: &str) -> u64 {
        match self.windows.get(subject) {
            Some(w) if !self.is_expired(&w, Instant::now()) => {
                self.max_requests.saturating_sub(w.request_count)
            }
            _ => self.max_requests,
        }
    }

    /// Drop windows that have already expired. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| !self.is_expired(w, now));
        before.saturating_sub(self.windows.len())
    }

    /// On success the counter was incremented; otherwise returns the time
    /// left until the window resets.
    fn acquire_at(&self, subject: &str, now: Instant) -> Result<(), Duration> {
        let mut window = self
            .windows
            .entry(subject.to_string())
            .or_insert_with(|| RateWindow {
                window_start: now,
                request_count: 0,
            });

        if self.is_expired(&window, now) {
            window.window_start = now;
            window.request_count = 0;
        }

        if window.request_count < self.max_requests {
            window.request_count += 1;
            Ok(())
        } else {
            let elapsed = now.saturating_duration_since(window.window_start);
            Err(self.window.saturating_sub(elapsed))
        }
    }

    fn is_expired(&self, window: &RateWindow, now: Instant) -> bool {
        now.saturating_duration_since(window.window_start) >= self.window
    }
}

/// Background task that garbage-collects idle windows.
pub async fn run_window_sweeper(limiter: Arc<RateLimiter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        let removed = limiter.sweep_expired();
        if removed > 0 {
            debug!(removed, "Swept expired rate limit windows");
        }
    }
}
