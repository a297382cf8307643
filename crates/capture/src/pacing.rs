use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Paces a producing or consuming loop to a target frequency.
///
/// Yields the current wall-clock tick time in milliseconds once per tick,
/// sleeping away whatever remains of the period. When the loop body is
/// consistently slower than the period the pacer flips into a "slow" state
/// and says so once — not every tick — and once more on recovery, so a
/// vehicle log shows the overrun span instead of a wall of repeats.
///
/// The pacer checks the shared stop flag on every tick and ends the
/// iteration once it is set; this is the sole cancellation point of a
/// governed loop.
pub struct Pacer {
    label: String,
    period: Option<Duration>,
    last: Option<Instant>,
    slow: bool,
    stop: Arc<AtomicBool>,
}

impl Pacer {
    pub fn new(label: impl Into<String>, stop: Arc<AtomicBool>) -> Self {
        Self {
            label: label.into(),
            period: None,
            last: None,
            slow: false,
            stop,
        }
    }

    /// Set the target frequency. `hz = 0.0` disables pacing entirely, for
    /// loops whose upstream source already blocks (a socket, a driver).
    pub fn rate(mut self, hz: f64) -> Self {
        assert!(hz >= 0.0, "target frequency must not be negative");
        self.period = (hz > 0.0).then(|| Duration::from_secs_f64(1.0 / hz));
        self.last = None;
        self
    }

    pub(crate) fn is_slow(&self) -> bool {
        self.slow
    }
}

impl Iterator for Pacer {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.stop.load(Ordering::Relaxed) {
            return None;
        }

        if let (Some(period), Some(last)) = (self.period, self.last) {
            let elapsed = last.elapsed();
            if elapsed < period {
                if self.slow {
                    self.slow = false;
                    tracing::info!("loop '{}' recovered, keeping up again", self.label);
                }
                std::thread::sleep(period - elapsed);
            } else if !self.slow {
                self.slow = true;
                tracing::warn!(
                    "loop '{}' too slow for its {:?} period, output will lag",
                    self.label,
                    period
                );
            }
        }

        self.last = Some(Instant::now());
        Some(common::clock::now_ms())
    }
}
