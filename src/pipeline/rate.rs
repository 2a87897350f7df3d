//! Rolling frame-rate telemetry over a fixed window of inter-frame deltas

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Number of deltas the windowed average is taken over.
pub const WINDOW_CAPACITY: usize = 50;

/// Windowed average is reported on every Nth iteration.
pub const AVERAGE_INTERVAL: u64 = 5;

/// Frames per second for one delta; zero when the delta is not positive.
pub fn fps(delta_secs: f64) -> f64 {
    if delta_secs > 0.0 {
        1.0 / delta_secs
    } else {
        0.0
    }
}

/// Bounded FIFO of frame deltas. Oldest samples are overwritten once full.
pub struct RateTracker {
    window: HeapRb<f64>,
    last: Option<f64>,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RateTracker {
    pub fn new() -> Self {
        Self {
            window: HeapRb::new(WINDOW_CAPACITY),
            last: None,
        }
    }

    /// Append a delta in seconds. Negative or NaN input is clamped to zero.
    pub fn record_sample(&mut self, delta_secs: f64) {
        let delta = if delta_secs.is_nan() { 0.0 } else { delta_secs.max(0.0) };
        self.window.push_overwrite(delta);
        self.last = Some(delta);
    }

    /// FPS implied by the most recent sample.
    pub fn instantaneous(&self) -> f64 {
        self.last.map_or(0.0, fps)
    }

    /// FPS over the whole window, available only once the window is full.
    pub fn windowed_average(&self) -> Option<f64> {
        if !self.window.is_full() {
            return None;
        }
        let mean = self.window.iter().sum::<f64>() / self.window.occupied_len() as f64;
        Some(fps(mean))
    }

    pub fn len(&self) -> usize {
        self.window.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Window contents, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }
}
