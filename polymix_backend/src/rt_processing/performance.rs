use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use quanta::{Clock, Instant as QuantaInstant};

/// Snapshot of callback timing suitable for logging (non-RT).
#[derive(Debug, Clone)]
pub struct PerformanceSnapshot {
    /// Frames rendered since creation or the last reset.
    pub frames_processed: u64,
    pub callback_count: u64,
    /// Callbacks that took longer than the buffer they rendered.
    pub late_callback_count: u64,
    /// Errors reported by the device stream.
    pub stream_error_count: u64,
    pub min_callback_nanos: Option<u64>,
    pub max_callback_nanos: Option<u64>,
    /// EMA of callback duration in nanoseconds.
    pub ema_callback_nanos: f64,
    /// Time budget of one buffer.
    pub expected_callback_nanos: f64,
    pub avg_load_percent: f64,
    pub timestamp: Instant,
}

/// Real-time-safe performance monitor.
///
/// The audio thread only touches atomics (`add_*`, `increment_*`, `scoped_callback`).
/// `snapshot` is meant for a control thread.
pub struct PerformanceMonitor {
    clock: Clock,
    frame_size: usize,
    sample_rate: f32,

    frames_processed: AtomicU64,
    callback_count: AtomicU64,
    late_callback_count: AtomicU64,
    stream_error_count: AtomicU64,

    min_callback_nanos: AtomicU64,
    max_callback_nanos: AtomicU64,
    /// EMA stored as f64 bits
    ema_callback_bits: AtomicU64,
    ema_alpha: f64,
}

impl PerformanceMonitor {
    /// `ema_alpha` is clamped into (0, 1]; 0.05..0.2 gives a readable load figure.
    pub fn new(frame_size: usize, sample_rate: f32, ema_alpha: f64) -> Self {
        Self {
            clock: Clock::new(),
            frame_size,
            sample_rate,
            frames_processed: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
            late_callback_count: AtomicU64::new(0),
            stream_error_count: AtomicU64::new(0),
            min_callback_nanos: AtomicU64::new(u64::MAX),
            max_callback_nanos: AtomicU64::new(0),
            ema_callback_bits: AtomicU64::new(0),
            ema_alpha: ema_alpha.clamp(f64::EPSILON, 1.0),
        }
    }

    #[inline(always)]
    pub fn add_frames_processed(&self, n: u64) {
        self.frames_processed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_callback_count(&self) {
        self.callback_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_stream_error_count(&self) {
        self.stream_error_count.fetch_add(1, Ordering::Relaxed);
    }

    fn expected_callback_nanos(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.frame_size as f64 / self.sample_rate as f64 * 1_000_000_000.0
        } else {
            0.0
        }
    }

    /// Fold one callback duration into min, max and the EMA. Atomics only.
    #[inline(always)]
    pub fn record_callback_duration_nanos(&self, nanos: u64) {
        self.min_callback_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_callback_nanos.fetch_max(nanos, Ordering::Relaxed);

        let expected = self.expected_callback_nanos();
        if expected > 0.0 && nanos as f64 > expected {
            self.late_callback_count.fetch_add(1, Ordering::Relaxed);
        }

        // EMA_new = alpha * x + (1 - alpha) * EMA_old
        let alpha = self.ema_alpha;
        let mut old_bits = self.ema_callback_bits.load(Ordering::Relaxed);
        loop {
            let new_bits =
                (alpha * nanos as f64 + (1.0 - alpha) * f64::from_bits(old_bits)).to_bits();
            match self.ema_callback_bits.compare_exchange_weak(
                old_bits,
                new_bits,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(found) => old_bits = found,
            }
        }
    }

    /// Count a callback and time it until the returned guard drops.
    ///
    /// ```ignore
    /// let _timing = monitor.scoped_callback();
    /// mixer.render_f32(output);
    /// ```
    #[inline(always)]
    pub fn scoped_callback(&self) -> RealtimeGuard<'_> {
        self.increment_callback_count();
        RealtimeGuard {
            monitor: self,
            start: self.clock.now(),
        }
    }

    /// Read the counters. With `reset_peaks`, min, max and EMA start over afterwards.
    pub fn snapshot(&self, reset_peaks: bool) -> PerformanceSnapshot {
        let min_raw = self.min_callback_nanos.load(Ordering::Relaxed);
        let max_raw = self.max_callback_nanos.load(Ordering::Relaxed);
        let ema = f64::from_bits(self.ema_callback_bits.load(Ordering::Relaxed));
        let expected_callback_nanos = self.expected_callback_nanos();
        let avg_load_percent = if expected_callback_nanos > 0.0 {
            ema / expected_callback_nanos * 100.0
        } else {
            0.0
        };

        if reset_peaks {
            self.min_callback_nanos.store(u64::MAX, Ordering::Relaxed);
            self.max_callback_nanos.store(0, Ordering::Relaxed);
            self.ema_callback_bits.store(0, Ordering::Relaxed);
        }

        PerformanceSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            callback_count: self.callback_count.load(Ordering::Relaxed),
            late_callback_count: self.late_callback_count.load(Ordering::Relaxed),
            stream_error_count: self.stream_error_count.load(Ordering::Relaxed),
            min_callback_nanos: (min_raw != u64::MAX).then_some(min_raw),
            max_callback_nanos: (max_raw != 0).then_some(max_raw),
            ema_callback_nanos: ema,
            expected_callback_nanos,
            avg_load_percent,
            timestamp: Instant::now(),
        }
    }

    pub fn reset_all(&self) {
        self.frames_processed.store(0, Ordering::Relaxed);
        self.callback_count.store(0, Ordering::Relaxed);
        self.late_callback_count.store(0, Ordering::Relaxed);
        self.stream_error_count.store(0, Ordering::Relaxed);
        self.min_callback_nanos.store(u64::MAX, Ordering::Relaxed);
        self.max_callback_nanos.store(0, Ordering::Relaxed);
        self.ema_callback_bits.store(0, Ordering::Relaxed);
    }
}

/// Records callback latency on drop. No locks, no allocations.
pub struct RealtimeGuard<'a> {
    monitor: &'a PerformanceMonitor,
    start: QuantaInstant,
}

impl Drop for RealtimeGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self
            .monitor
            .clock
            .now()
            .saturating_duration_since(self.start)
            .as_nanos();
        self.monitor
            .record_callback_duration_nanos(u64::try_from(elapsed).unwrap_or(u64::MAX));
    }
}
