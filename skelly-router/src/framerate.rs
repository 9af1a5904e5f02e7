use std::collections::VecDeque;

use skelly_types::CurrentFrameRate;

const DEFAULT_WINDOW: usize = 30;

/// Rolling framerate over the last K inter-payload intervals.
pub struct FramerateTracker {
    window: usize,
    intervals_ns: VecDeque<u64>,
    last_ns: Option<u64>,
}

impl Default for FramerateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl FramerateTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            intervals_ns: VecDeque::with_capacity(window),
            last_ns: None,
        }
    }

    pub fn observe(&mut self, timestamp_ns: u64) {
        if let Some(last) = self.last_ns {
            if timestamp_ns > last {
                if self.intervals_ns.len() == self.window {
                    self.intervals_ns.pop_front();
                }
                self.intervals_ns.push_back(timestamp_ns - last);
            }
        }
        self.last_ns = Some(timestamp_ns);
    }

    /// `None` until at least one interval has been observed.
    pub fn current(&self) -> Option<CurrentFrameRate> {
        if self.intervals_ns.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.intervals_ns.iter().copied().collect();
        sorted.sort_unstable();
        let mean_ns =
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        let median_ns = if sorted.len() % 2 == 1 {
            sorted[sorted.len() / 2] as f64
        } else {
            (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) as f64 / 2.0
        };
        Some(CurrentFrameRate {
            mean_fps: 1e9 / mean_ns,
            median_fps: 1e9 / median_ns,
            window_size: sorted.len(),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_intervals_give_the_nominal_rate() {
        let mut tracker = FramerateTracker::new(10);
        for i in 0..5u64 {
            tracker.observe(i * 33_333_333);
        }
        let rate = tracker.current().unwrap();
        assert!((rate.mean_fps - 30.0).abs() < 0.1);
        assert!((rate.median_fps - 30.0).abs() < 0.1);
        assert_eq!(rate.window_size, 4);
    }

    #[test]
    fn median_shrugs_off_one_stall() {
        let mut tracker = FramerateTracker::new(10);
        let mut now = 0u64;
        for _ in 0..8 {
            now += 33_000_000;
            tracker.observe(now);
        }
        now += 500_000_000; // one stalled payload
        tracker.observe(now);
        let rate = tracker.current().unwrap();
        assert!(rate.median_fps > 25.0);
        assert!(rate.mean_fps < rate.median_fps);
    }

    #[test]
    fn window_is_bounded() {
        let mut tracker = FramerateTracker::new(4);
        for i in 0..100u64 {
            tracker.observe(i * 10_000_000);
        }
        assert_eq!(tracker.current().unwrap().window_size, 4);
    }

    #[test]
    fn empty_tracker_reports_nothing() {
        let tracker = FramerateTracker::new(4);
        assert!(tracker.current().is_none());
    }
}
