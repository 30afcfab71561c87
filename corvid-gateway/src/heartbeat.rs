//! Heartbeat loop.
//!
//! Keeps the gateway connection alive and detects zombie connections: a
//! heartbeat that goes unacknowledged for a full interval means the server
//! stopped listening even though the TCP stream looks healthy.

use crate::session::Session;
use corvid_model::Flag;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Number of latency samples retained.
const LATENCY_WINDOW: usize = 10;

/// Threshold above which an acknowledgement is logged as high latency.
const HIGH_LATENCY: Duration = Duration::from_secs(15);

/// Periodic liveness probe with an acknowledgement watchdog.
///
/// Owned by a [`Session`]; the session routes HEARTBEAT_ACK frames back in
/// through [`ack`](Heartbeater::ack). The heartbeater never parses frames
/// itself.
#[derive(Debug)]
pub struct Heartbeater {
    shard_id: u16,
    interval: Duration,
    /// Most recent round-trip samples, oldest first.
    latency: Mutex<VecDeque<Duration>>,
    last_send: RwLock<Option<Instant>>,
    last_ack: RwLock<Option<Instant>>,
    ack_ev: Flag,
    stop_ev: Flag,
}

impl Heartbeater {
    /// Create a heartbeater for the given server-dictated interval.
    pub fn new(interval: Duration, shard_id: u16) -> Self {
        Self {
            shard_id,
            interval,
            latency: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            last_send: RwLock::new(None),
            last_ack: RwLock::new(None),
            ack_ev: Flag::new(),
            stop_ev: Flag::new(),
        }
    }

    /// The heartbeat interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the heartbeat task.
    ///
    /// The first beat is delayed by a random offset in `[0, interval/2)`;
    /// the server asks clients not to all heartbeat immediately on connect.
    pub fn start(self: Arc<Self>, session: Arc<Session>) {
        use rand::Rng;

        let delay = self.interval.mul_f64(rand::rng().random_range(0.0..0.5));
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => self.run(session).await,
                _ = self.stop_ev.wait() => {}
            }
        });
    }

    async fn run(&self, session: Arc<Session>) {
        debug!(
            shard_id = self.shard_id,
            interval_s = self.interval.as_secs_f64(),
            "heartbeat loop started"
        );

        loop {
            self.ack_ev.clear();
            if let Err(error) = session.send_heartbeat().await {
                debug!(shard_id = self.shard_id, %error, "heartbeat send failed, stopping");
                return;
            }
            *self.last_send.write() = Some(Instant::now());

            if timeout(self.interval, self.ack_ev.wait()).await.is_err() {
                warn!(
                    shard_id = self.shard_id,
                    interval_s = self.interval.as_secs_f64(),
                    "heartbeat not acknowledged for a full interval, likely zombied connection"
                );
                self.stop();
                session.close(None, false, true).await;
                return;
            }

            // wait for the next beat, accounting for the measured latency
            let pause = self.interval.saturating_sub(self.last_sample().unwrap_or_default());
            if timeout(pause, self.stop_ev.wait()).await.is_ok() {
                return;
            }
        }
    }

    /// Stop the heartbeat loop. Idempotent.
    pub fn stop(&self) {
        self.stop_ev.set();
    }

    /// Whether the loop has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.stop_ev.is_set()
    }

    /// Record a HEARTBEAT_ACK observed by the session.
    ///
    /// The sample is appended before the ack signal fires so the loop's
    /// next pause always sees the fresh measurement.
    pub fn ack(&self) {
        let now = Instant::now();
        *self.last_ack.write() = Some(now);

        if let Some(sent) = *self.last_send.read() {
            let sample = now.duration_since(sent);

            {
                let mut window = self.latency.lock();
                window.push_back(sample);
                if window.len() > LATENCY_WINDOW {
                    window.pop_front();
                }
            }

            if sample > HIGH_LATENCY {
                warn!(
                    shard_id = self.shard_id,
                    latency_s = sample.as_secs_f64(),
                    "high heartbeat latency"
                );
            } else {
                debug!(
                    shard_id = self.shard_id,
                    latency_s = sample.as_secs_f64(),
                    "heartbeat acknowledged"
                );
            }
        }

        self.ack_ev.set();
    }

    fn last_sample(&self) -> Option<Duration> {
        self.latency.lock().back().copied()
    }

    /// Latest round-trip latency in seconds, infinite before the first ack.
    pub fn latency(&self) -> f64 {
        self.last_sample()
            .map_or(f64::INFINITY, |sample| sample.as_secs_f64())
    }

    /// Mean round-trip latency in seconds, infinite before the first ack.
    pub fn average_latency(&self) -> f64 {
        let window = self.latency.lock();
        if window.is_empty() {
            return f64::INFINITY;
        }
        window.iter().map(Duration::as_secs_f64).sum::<f64>() / window.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_is_infinite_without_samples() {
        let heartbeater = Heartbeater::new(Duration::from_secs(41), 0);
        assert!(heartbeater.latency().is_infinite());
        assert!(heartbeater.average_latency().is_infinite());
    }

    #[test]
    fn ack_without_a_send_records_no_sample() {
        let heartbeater = Heartbeater::new(Duration::from_secs(41), 0);
        heartbeater.ack();
        assert!(heartbeater.ack_ev.is_set());
        assert!(heartbeater.latency().is_infinite());
    }

    #[test]
    fn latency_window_is_capped_with_oldest_evicted() {
        let heartbeater = Heartbeater::new(Duration::from_secs(41), 0);
        for i in 0..15u32 {
            *heartbeater.last_send.write() =
                Some(Instant::now() - Duration::from_millis(u64::from(i) + 1));
            heartbeater.ack();
        }

        let window = heartbeater.latency.lock();
        assert_eq!(window.len(), LATENCY_WINDOW);
        // the five earliest samples (smallest gaps) were evicted
        assert!(window.front().unwrap() >= &Duration::from_millis(6));
    }

    #[test]
    fn ack_measures_the_send_to_ack_gap() {
        let heartbeater = Heartbeater::new(Duration::from_secs(41), 0);
        *heartbeater.last_send.write() = Some(Instant::now() - Duration::from_millis(250));
        heartbeater.ack();

        let latency = heartbeater.latency();
        assert!(latency >= 0.25 && latency < 1.0, "latency {latency}");
        assert!(heartbeater.average_latency().is_finite());
    }

    #[test]
    fn average_is_the_window_mean() {
        let heartbeater = Heartbeater::new(Duration::from_secs(41), 0);
        {
            let mut window = heartbeater.latency.lock();
            window.push_back(Duration::from_millis(100));
            window.push_back(Duration::from_millis(300));
        }
        assert!((heartbeater.average_latency() - 0.2).abs() < 1e-9);
        assert!((heartbeater.latency() - 0.3).abs() < 1e-9);
    }
}
