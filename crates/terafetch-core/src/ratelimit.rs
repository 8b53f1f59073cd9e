//! Token-bucket bandwidth limiter shared across download workers.
//!
//! Tokens accrue at `rate` bytes/sec up to a capacity of one second's worth.
//! Workers debit tokens per transferred chunk; when the bucket runs dry the
//! caller sleeps for the deficit. Registered-thread count feeds an "effective
//! rate" so a small cap is split fairly across many workers, and a sliding
//! window of observed throughput can lower (never raise) the cap when the
//! network is not keeping up.

use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::FetchError;

/// Sliding window size for throughput samples.
const MAX_SAMPLES: usize = 10;
/// Minimum samples before dynamic adjustment kicks in.
const MIN_SAMPLES_FOR_ADJUST: usize = 3;
/// Adjustment cadence; hysteresis against oscillation.
const ADJUST_INTERVAL: Duration = Duration::from_secs(5);
/// Guaranteed floor per registered worker before the rate is split evenly.
const MIN_PER_THREAD: u64 = 1024;

struct Bucket {
    rate: u64,
    capacity: u64,
    tokens: f64,
    last_refill: Instant,
    original_rate: u64,
    adjustment: f64,
    last_adjustment: Instant,
}

#[derive(Default)]
struct NetworkStats {
    samples: VecDeque<f64>,
    total_bytes: u64,
    total_duration: Duration,
}

pub struct TokenBucketLimiter {
    bucket: Mutex<Bucket>,
    threads: RwLock<u32>,
    stats: Mutex<NetworkStats>,
}

impl TokenBucketLimiter {
    /// A limiter capped at `bytes_per_second`. 0 disables limiting entirely.
    pub fn new(bytes_per_second: u64) -> Self {
        let now = Instant::now();
        Self {
            bucket: Mutex::new(Bucket {
                rate: bytes_per_second,
                capacity: bytes_per_second,
                tokens: bytes_per_second as f64,
                last_refill: now,
                original_rate: bytes_per_second,
                adjustment: 1.0,
                last_adjustment: now,
            }),
            threads: RwLock::new(0),
            stats: Mutex::new(NetworkStats::default()),
        }
    }

    /// Block until `n` tokens are available and debit them.
    ///
    /// Refills proportionally to elapsed wall time first. When the bucket
    /// cannot cover `n`, the remaining tokens are consumed and the caller
    /// sleeps `deficit / effective_rate`, waking early on cancellation.
    pub fn wait(&self, cancel: &CancelToken, n: usize) -> Result<(), FetchError> {
        let started = Instant::now();
        let needed = n as f64;

        let pause = {
            let mut b = self.bucket.lock().unwrap();
            if b.rate == 0 {
                return Ok(());
            }
            let effective = self.effective_rate_for(b.rate).max(1);
            let now = Instant::now();
            let elapsed = now.duration_since(b.last_refill);
            b.last_refill = now;
            b.tokens =
                (b.tokens + elapsed.as_secs_f64() * effective as f64).min(b.capacity as f64);

            if b.tokens >= needed {
                b.tokens -= needed;
                None
            } else {
                let deficit = needed - b.tokens;
                b.tokens = 0.0;
                Some(Duration::from_secs_f64(deficit / effective as f64))
            }
        };

        if let Some(d) = pause {
            if !cancel.sleep(d) {
                return Err(FetchError::cancelled());
            }
        }

        let elapsed = started.elapsed();
        if n > 0 && !elapsed.is_zero() {
            self.update_network_stats(n as u64, elapsed);
        }
        Ok(())
    }

    /// Replace the cap. Capacity and the adjustment baseline follow; current
    /// tokens are clamped to the new capacity.
    pub fn set_rate(&self, bytes_per_second: u64) {
        let mut b = self.bucket.lock().unwrap();
        b.rate = bytes_per_second;
        b.original_rate = bytes_per_second;
        b.capacity = bytes_per_second;
        b.tokens = b.tokens.min(b.capacity as f64);
    }

    /// Current cap in bytes/sec (after any dynamic adjustment).
    pub fn current_rate(&self) -> u64 {
        self.bucket.lock().unwrap().rate
    }

    pub fn register_thread(&self) {
        *self.threads.write().unwrap() += 1;
    }

    pub fn unregister_thread(&self) {
        let mut count = self.threads.write().unwrap();
        *count = count.saturating_sub(1);
    }

    pub fn thread_count(&self) -> u32 {
        *self.threads.read().unwrap()
    }

    /// Share of the cap each waiter sees. A single worker gets the full rate;
    /// when the cap is too small to give every worker `MIN_PER_THREAD`, it is
    /// split evenly; otherwise all workers draw from the full rate and the
    /// shared bucket itself bounds aggregate consumption.
    fn effective_rate_for(&self, rate: u64) -> u64 {
        let threads = *self.threads.read().unwrap() as u64;
        if threads <= 1 {
            return rate;
        }
        if rate < MIN_PER_THREAD * threads {
            (rate / threads).max(1)
        } else {
            rate
        }
    }

    /// Feed an observed transfer into the sliding window and, at most once
    /// per `ADJUST_INTERVAL`, re-derive the cap from measured utilization.
    pub fn update_network_stats(&self, bytes_transferred: u64, duration: Duration) {
        if bytes_transferred == 0 || duration.is_zero() {
            return;
        }
        let speed = bytes_transferred as f64 / duration.as_secs_f64();
        let (avg, count) = {
            let mut stats = self.stats.lock().unwrap();
            if stats.samples.len() >= MAX_SAMPLES {
                stats.samples.pop_front();
            }
            stats.samples.push_back(speed);
            stats.total_bytes += bytes_transferred;
            stats.total_duration += duration;
            let avg = stats.samples.iter().sum::<f64>() / stats.samples.len() as f64;
            (avg, stats.samples.len())
        };
        self.adjust(avg, count, Instant::now());
    }

    /// Hysteresis: utilization below 0.8 shrinks the factor by 10%; above
    /// 0.95 it recovers by 5%, capped at 1.0. The applied rate never exceeds
    /// the original cap.
    fn adjust(&self, avg_speed: f64, samples: usize, now: Instant) {
        let mut b = self.bucket.lock().unwrap();
        if b.original_rate == 0 || samples < MIN_SAMPLES_FOR_ADJUST {
            return;
        }
        if now.duration_since(b.last_adjustment) < ADJUST_INTERVAL {
            return;
        }
        let utilization = avg_speed / b.original_rate as f64;
        let factor = if utilization < 0.8 {
            b.adjustment * 0.9
        } else if utilization > 0.95 && b.adjustment < 1.0 {
            (b.adjustment * 1.05).min(1.0)
        } else {
            return;
        };
        b.adjustment = factor;
        b.rate = ((b.original_rate as f64 * factor) as u64).max(1);
        b.capacity = b.rate;
        b.tokens = b.tokens.min(b.capacity as f64);
        b.last_adjustment = now;
    }

    #[cfg(test)]
    fn backdate_adjustment_window(&self) {
        let mut b = self.bucket.lock().unwrap();
        if let Some(past) = Instant::now().checked_sub(ADJUST_INTERVAL + Duration::from_secs(1)) {
            b.last_adjustment = past;
        }
    }
}
