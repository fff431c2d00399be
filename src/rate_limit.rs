//! # Rate Limiter
//! Fixed 60-second window over outbound OpenDota requests.
//!
//! Counts calls since the window opened; once the per-minute ceiling is hit the
//! caller sleeps until the window closes. This is a fixed window, not a sliding
//! one: a burst straddling the boundary can briefly exceed the ceiling.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::info;

/// Length of one accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    /// Create a limiter allowing `per_minute` calls per window (minimum 1).
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            per_minute: per_minute.max(1),
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Wait until one more request fits into the current window, then claim it.
    ///
    /// Never fails; the worst case is a sleep of up to one window.
    pub async fn acquire(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) > WINDOW {
            self.count = 0;
            self.window_start = now;
        }

        if self.count >= self.per_minute {
            let wait = WINDOW.saturating_sub(now.duration_since(self.window_start));
            if !wait.is_zero() {
                info!(
                    target: "rate_limit",
                    wait_secs = wait.as_secs_f64(),
                    "rate limit reached, sleeping"
                );
                sleep(wait).await;
            }
            self.count = 0;
            self.window_start = Instant::now();
        }

        self.count += 1;
    }
}
