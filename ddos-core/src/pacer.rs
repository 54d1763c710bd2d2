//! Byte-denominated token bucket governing replay send rate (§4.6).
//!
//! Grounded on the token-bucket shape of this repo's own rate limiter
//! (`security::rate_limit::estimator`), generalized from a per-client
//! packet-count bucket to a single global byte bucket sized for line-rate
//! replay pacing.

use std::time::{Duration, Instant};

/// Minimum interval between `tick()` calls the pacer treats as meaningful;
/// calling more often than this just spins without adding precision (§4.6).
const MIN_TICK_INTERVAL: Duration = Duration::from_micros(100);

/// A token bucket over bytes/sec. `on_sent` debits tokens as bytes go out;
/// `tick` credits tokens back in proportion to elapsed wall time.
pub struct Pacer {
    target_bps: f64,
    capacity_bytes: f64,
    tokens: f64,
    last_tick: Instant,
}

impl Pacer {
    /// `target_bps` is bits/sec (matching the CLI's `--rate-gbps` surface);
    /// `burst_bytes` bounds how far the bucket can get ahead of the rate.
    pub fn new(target_bps: f64, burst_bytes: f64, now: Instant) -> Self {
        Self {
            target_bps,
            capacity_bytes: burst_bytes,
            tokens: burst_bytes,
            last_tick: now,
        }
    }

    pub fn target_bps(&self) -> f64 {
        self.target_bps
    }

    pub fn set_target_bps(&mut self, target_bps: f64) {
        self.target_bps = target_bps;
    }

    /// Refills the bucket for elapsed time since the last call. Calls
    /// closer together than `MIN_TICK_INTERVAL` are no-ops, per §4.6's
    /// 100us responsiveness clamp.
    pub fn tick(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_tick);
        if elapsed < MIN_TICK_INTERVAL {
            return;
        }
        let bytes_per_sec = self.target_bps / 8.0;
        let refill = bytes_per_sec * elapsed.as_secs_f64();
        self.tokens = (self.tokens + refill).min(self.capacity_bytes);
        self.last_tick = now;
    }

    /// True if at least `bytes` worth of tokens are currently available.
    pub fn can_send(&self, bytes: usize) -> bool {
        self.tokens >= bytes as f64
    }

    /// Debits the bucket. The caller is expected to have checked
    /// `can_send` first; calling this past zero tokens is allowed and just
    /// drives the bucket negative, delaying the next `can_send` until
    /// enough `tick`s have refilled it.
    pub fn on_sent(&mut self, bytes: usize) {
        self.tokens -= bytes as f64;
    }

    /// Tokens remaining, for telemetry/debugging.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_to_target_bps_over_a_long_interval() {
        let start = Instant::now();
        let target_bps = 8_000_000.0; // 1 MB/s
        let mut pacer = Pacer::new(target_bps, 1_000_000.0, start);
        pacer.tokens = 0.0;

        let mut sent_bytes: u64 = 0;
        let mut t = start;
        for _ in 0..10_000 {
            t += Duration::from_millis(1);
            pacer.tick(t);
            let chunk = 200usize;
            if pacer.can_send(chunk) {
                pacer.on_sent(chunk);
                sent_bytes += chunk as u64;
            }
        }

        let elapsed_secs = 10.0;
        let achieved_bps = (sent_bytes as f64 * 8.0) / elapsed_secs;
        let ratio = achieved_bps / target_bps;
        assert!((0.9..=1.1).contains(&ratio), "achieved {achieved_bps} vs target {target_bps}");
    }

    #[test]
    fn sub_100us_ticks_are_clamped_to_no_op() {
        let start = Instant::now();
        let mut pacer = Pacer::new(8_000_000.0, 1_000.0, start);
        pacer.tokens = 0.0;
        pacer.tick(start + Duration::from_micros(50));
        assert_eq!(pacer.tokens(), 0.0);
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let start = Instant::now();
        let mut pacer = Pacer::new(8_000_000.0, 500.0, start);
        pacer.tick(start + Duration::from_secs(10));
        assert_eq!(pacer.tokens(), 500.0);
    }

    #[test]
    fn on_sent_can_drive_tokens_negative_until_refilled() {
        let start = Instant::now();
        let mut pacer = Pacer::new(8_000_000.0, 100.0, start);
        pacer.on_sent(150);
        assert!(pacer.tokens() < 0.0);
        assert!(!pacer.can_send(1));
    }
}
