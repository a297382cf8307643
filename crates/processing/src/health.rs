use mailbox::FrameShape;
use std::collections::VecDeque;

/// Rolling window of latency samples kept per video source.
const LATENCY_WINDOW: usize = 30;

/// Consecutive empty polls before a source is declared dead. Damps the
/// transient scheduling jitter that would otherwise flap the liveness
/// signal every time a producer tick lands late.
const DEAD_THRESHOLD: u32 = 3;

/// Per-channel freshness and latency bookkeeping for a module's inputs.
#[derive(Debug, Default)]
pub struct SourceHealth {
    latencies_ms: VecDeque<u64>,
    shape: Option<FrameShape>,
    frames_read: u64,
    missed_polls: u32,
}

impl SourceHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh frame: updates the latency window against the shared
    /// wall clock and clears the staleness counter.
    pub fn record_frame(&mut self, shape: FrameShape, acquired_at_ms: u64) {
        let latency = common::clock::now_ms().saturating_sub(acquired_at_ms);
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency);
        self.shape = Some(shape);
        self.frames_read += 1;
        self.missed_polls = 0;
    }

    /// Record a poll that returned nothing new. Returns `true` exactly when
    /// the source crosses the staleness threshold, so the caller logs the
    /// transition once instead of every poll.
    pub fn record_miss(&mut self) -> bool {
        self.missed_polls = self.missed_polls.saturating_add(1);
        self.missed_polls == DEAD_THRESHOLD
    }

    pub fn is_dead(&self) -> bool {
        self.missed_polls >= DEAD_THRESHOLD
    }

    /// Running average latency over the window, in milliseconds.
    pub fn latency_ms(&self) -> Option<u64> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        let sum: u64 = self.latencies_ms.iter().sum();
        Some(sum / self.latencies_ms.len() as u64)
    }

    pub fn shape(&self) -> Option<FrameShape> {
        self.shape
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> FrameShape {
        FrameShape::new(&[8, 8], 1).unwrap()
    }

    #[test]
    fn declared_dead_only_after_three_consecutive_misses() {
        let mut health = SourceHealth::new();
        assert!(!health.record_miss());
        assert!(!health.record_miss());
        assert!(health.record_miss(), "third miss crosses the threshold");
        assert!(health.is_dead());
        // Only the crossing reports true.
        assert!(!health.record_miss());
        assert!(health.is_dead());
    }

    #[test]
    fn a_fresh_frame_resets_the_staleness_counter() {
        let mut health = SourceHealth::new();
        health.record_miss();
        health.record_miss();
        health.record_frame(shape(), common::clock::now_ms());
        assert!(!health.is_dead());
        assert!(!health.record_miss());
        assert!(!health.record_miss());
        assert!(health.record_miss());
    }

    #[test]
    fn latency_window_is_bounded() {
        let mut health = SourceHealth::new();
        let now = common::clock::now_ms();
        for _ in 0..100 {
            health.record_frame(shape(), now);
        }
        assert!(health.latencies_ms.len() <= LATENCY_WINDOW);
        assert_eq!(health.frames_read(), 100);
        assert!(health.latency_ms().is_some());
    }

    #[test]
    fn latency_tracks_acquisition_age() {
        let mut health = SourceHealth::new();
        health.record_frame(shape(), common::clock::now_ms().saturating_sub(250));
        let latency = health.latency_ms().unwrap();
        assert!((250..1250).contains(&latency), "latency was {latency}");
    }
}
