//! Time-windowed metrics history.

use std::collections::VecDeque;
use std::time::Duration;

use crate::types::RolloutMetrics;

/// Samples ordered oldest first, evicted by age on every push.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    samples: VecDeque<RolloutMetrics>,
    window: Duration,
}

impl MetricsHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Append a sample and drop everything older than the window,
    /// measured from the new sample's timestamp.
    pub fn push(&mut self, sample: RolloutMetrics) {
        let window_ms = self.window.as_millis() as u64;
        let cutoff = sample.timestamp.saturating_sub(window_ms);
        self.samples.push_back(sample);
        while self
            .samples
            .front()
            .is_some_and(|oldest| oldest.timestamp < cutoff)
        {
            self.samples.pop_front();
        }
    }

    pub fn samples(&self) -> Vec<RolloutMetrics> {
        self.samples.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&RolloutMetrics> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
