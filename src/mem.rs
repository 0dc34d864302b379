use std::time::{Duration, Instant};
use sysinfo::{System, SystemExt};

const REFRESH_EVERY: Duration = Duration::from_millis(500);
const BACKOFF: Duration = Duration::from_millis(25);

/// Low-overhead memory watcher owned by one run.
/// Refreshes at most every `REFRESH_EVERY` and sleeps briefly while available
/// RAM is below `threshold` (fraction of total, e.g. 0.10).
pub struct MemoryGuard {
    sys: System,
    threshold: f64,
    last_check: Instant,
    last_frac: f64,
    throttled: u64,
}

impl MemoryGuard {
    pub fn new(threshold: f64) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            sys,
            threshold: threshold.clamp(0.0, 1.0),
            last_check: Instant::now().checked_sub(REFRESH_EVERY * 2).unwrap_or_else(Instant::now),
            last_frac: 1.0,
            throttled: 0,
        }
    }

    /// Recent estimate of available memory (0.0..=1.0).
    pub fn available_fraction(&mut self) -> f64 {
        let now = Instant::now();
        if now.duration_since(self.last_check) >= REFRESH_EVERY {
            self.sys.refresh_memory();
            let total = self.sys.total_memory() as f64;
            let avail = self.sys.available_memory() as f64;
            self.last_frac = if total > 0.0 { (avail / total).clamp(0.0, 1.0) } else { 1.0 };
            self.last_check = now;
        }
        self.last_frac
    }

    /// Cooperative backoff; cheap enough to call per record.
    pub fn maybe_throttle(&mut self) {
        if self.threshold > 0.0 && self.available_fraction() < self.threshold {
            self.throttled += 1;
            std::thread::sleep(BACKOFF);
        }
    }

    /// How many times this guard has slept.
    pub fn throttled(&self) -> u64 {
        self.throttled
    }
}
