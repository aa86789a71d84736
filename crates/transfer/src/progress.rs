use std::sync::Mutex;
use std::time::{Duration, Instant};

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
///
/// Takes `&self` so it can be shared with a progress callback.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 30 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(30)),
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.inner.lock().unwrap();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// The first sample only marks the start of the window, so fewer than
    /// two samples give 0.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`, `None` while the speed
    /// is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

/// Formats a byte count with a binary unit, e.g. `1.5 MiB`.
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
