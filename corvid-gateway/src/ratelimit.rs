//! Outbound command rate limiting and reconnect backoff.
//!
//! The service allows 120 gateway commands per 60 seconds. The limiter
//! budgets 110 so that heartbeats, which bypass it entirely, always have
//! headroom even when callers saturate the window.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Commands allowed per window.
const COMMANDS_PER_WINDOW: u32 = 110;

/// Length of the rate window.
const WINDOW: Duration = Duration::from_secs(60);

/// Token window state. Refills wholesale when the window elapses.
#[derive(Debug)]
struct CooldownWindow {
    capacity: u32,
    window: Duration,
    remaining: u32,
    window_start: Instant,
}

impl CooldownWindow {
    fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            remaining: capacity,
            window_start: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        if self.window_start.elapsed() >= self.window {
            self.window_start = Instant::now();
            self.remaining = self.capacity;
        }

        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }

    fn time_to_reset(&self) -> Duration {
        self.window.saturating_sub(self.window_start.elapsed())
    }
}

/// Limiter for outbound non-heartbeat gateway commands.
///
/// The mutex is held across the cooldown sleep, so contending senders are
/// admitted one at a time in arrival order.
#[derive(Debug)]
pub struct GatewayRateLimiter {
    window: Mutex<CooldownWindow>,
}

impl GatewayRateLimiter {
    /// Create a limiter with the gateway command budget.
    pub fn new() -> Self {
        Self::with_limit(COMMANDS_PER_WINDOW, WINDOW)
    }

    /// Create a limiter with a custom budget.
    pub fn with_limit(capacity: u32, window: Duration) -> Self {
        Self {
            window: Mutex::new(CooldownWindow::new(capacity, window)),
        }
    }

    /// Consume one command grant, suspending until one is available.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;
        while !window.try_acquire() {
            let wait = window.time_to_reset();
            debug!(wait_s = wait.as_secs_f64(), "gateway command budget exhausted");
            sleep(wait).await;
        }
    }
}

impl Default for GatewayRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff for reconnect attempts.
///
/// Doubles `base_ms` per attempt and pins the result to `max_ms`.
pub fn exponential_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    // a shift past 63 would overflow; anything that far out has hit the
    // ceiling long ago
    let delay_ms = match 1u64.checked_shl(attempt) {
        Some(factor) => base_ms.saturating_mul(factor).min(max_ms),
        None => max_ms,
    };
    Duration::from_millis(delay_ms)
}

/// Stretch a duration by a random factor in `[1, 1 + jitter_factor)`.
///
/// A `jitter_factor` of 0.25 lengthens the wait by up to 25%, spreading
/// simultaneous reconnects apart.
pub fn with_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    use rand::Rng;

    let stretch = 1.0 + rand::rng().random::<f64>() * jitter_factor;
    duration.mul_f64(stretch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_within_budget_never_waits() {
        let limiter = GatewayRateLimiter::with_limit(110, Duration::from_secs(60));

        let started = Instant::now();
        for _ in 0..110 {
            limiter.acquire().await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_past_budget_waits_for_the_window() {
        let limiter = GatewayRateLimiter::with_limit(110, Duration::from_secs(60));

        for _ in 0..110 {
            limiter.acquire().await;
        }

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn no_rolling_window_ever_exceeds_the_budget() {
        let limiter = GatewayRateLimiter::with_limit(110, Duration::from_secs(60));

        let mut grants: Vec<Instant> = Vec::new();
        for _ in 0..250 {
            limiter.acquire().await;
            grants.push(Instant::now());
        }

        for (i, start) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < Duration::from_secs(60))
                .count();
            assert!(in_window <= 110, "{} grants within one window", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn contending_waiters_are_admitted_in_order() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let limiter = Arc::new(GatewayRateLimiter::with_limit(1, Duration::from_secs(1)));
        limiter.acquire().await;

        let next = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for i in 0..4u32 {
            let limiter = limiter.clone();
            let next = next.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                // each waiter must resume in the order it queued
                assert_eq!(next.fetch_add(1, Ordering::SeqCst), i);
            }));
            // let the task reach the mutex queue before spawning the next
            tokio::task::yield_now().await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(exponential_backoff(0, 1000, 60000), Duration::from_millis(1000));
        assert_eq!(exponential_backoff(1, 1000, 60000), Duration::from_millis(2000));
        assert_eq!(exponential_backoff(3, 1000, 60000), Duration::from_millis(8000));
        assert_eq!(exponential_backoff(10, 1000, 60000), Duration::from_millis(60000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let jittered = with_jitter(base, 0.25);
            assert!(jittered >= base);
            assert!(jittered <= base + Duration::from_millis(250));
        }
    }
}
