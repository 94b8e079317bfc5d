//! Adaptive frame length.
//!
//! Every committed frame contributes one sample: the ticks the frame needed
//! between commands going out and the last completion report arriving. The next
//! frame's target length is `ceil(mean + 2 * stddev)` over the samples in the
//! window, clamped to `[default, max]`. Under steady latency the target settles
//! just above the slowest peer; a latency spike widens it and it shrinks again
//! once the spike leaves the window.

use std::collections::VecDeque;

/// Sliding window of frame-length samples and the target derived from them.
#[derive(Debug, Clone)]
pub struct PacingModel {
    samples: VecDeque<u32>,
    window_total: u64,
    window_ticks: u64,
    floor: u32,
    ceiling: u32,
    target: u32,
}

impl PacingModel {
    /// A model whose target starts at `default_ticks`.
    ///
    /// `window_ticks` bounds the window by the summed tick counts of its
    /// samples; the newest sample is always kept.
    pub fn new(default_ticks: u32, max_ticks: u32, window_ticks: u32) -> Self {
        let floor = default_ticks.max(1);
        let ceiling = max_ticks.max(floor);
        Self {
            samples: VecDeque::new(),
            window_total: 0,
            window_ticks: u64::from(window_ticks),
            floor,
            ceiling,
            target: floor,
        }
    }

    /// Add a sample and recompute the target. Returns the new target.
    pub fn record(&mut self, ticks: u32) -> u32 {
        self.samples.push_back(ticks);
        self.window_total += u64::from(ticks);
        while self.window_total > self.window_ticks && self.samples.len() > 1 {
            if let Some(old) = self.samples.pop_front() {
                self.window_total -= u64::from(old);
            }
        }
        self.target = self.compute_target();
        self.target
    }

    fn compute_target(&self) -> u32 {
        if self.samples.is_empty() {
            return self.floor;
        }
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().map(|&s| f64::from(s)).sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|&s| (f64::from(s) - mean).powi(2))
            .sum::<f64>()
            / n;
        let raw = (mean + 2.0 * variance.sqrt()).ceil();
        // Saturating float-to-int cast, then clamp.
        (raw as u32).clamp(self.floor, self.ceiling)
    }

    /// Ticks the current frame should last before local commands are sent.
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Samples currently in the window, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_default() {
        let model = PacingModel::new(6, 30, 180);
        assert_eq!(model.target(), 6);
        assert_eq!(model.samples().count(), 0);
    }

    #[test]
    fn test_mean_plus_two_stddev_rounds_up() {
        let mut model = PacingModel::new(6, 30, 180);
        for s in [8, 9, 7, 8, 8] {
            model.record(s);
        }
        // mean 8, population stddev sqrt(0.4) = 0.632
        assert_eq!(model.target(), 10);
    }

    #[test]
    fn test_clamped_to_max() {
        let mut model = PacingModel::new(6, 12, 1000);
        for s in [5, 40, 5, 40] {
            model.record(s);
        }
        assert_eq!(model.target(), 12);
    }

    #[test]
    fn test_never_below_default_or_one() {
        let mut model = PacingModel::new(6, 30, 180);
        for _ in 0..10 {
            model.record(1);
        }
        assert_eq!(model.target(), 6);

        let mut zero = PacingModel::new(0, 0, 180);
        zero.record(0);
        assert_eq!(zero.target(), 1);
    }

    #[test]
    fn test_window_evicts_oldest_by_total_ticks() {
        let mut model = PacingModel::new(1, 100, 20);
        for s in [10, 10, 10] {
            model.record(s);
        }
        assert_eq!(model.samples().collect::<Vec<_>>(), vec![10, 10]);

        // A single sample larger than the window is still kept.
        model.record(50);
        assert_eq!(model.samples().collect::<Vec<_>>(), vec![50]);
        assert_eq!(model.target(), 50);
    }

    #[test]
    fn test_spike_decays_out_of_window() {
        let mut model = PacingModel::new(6, 30, 60);
        model.record(24);
        assert_eq!(model.target(), 24);
        for _ in 0..10 {
            model.record(6);
        }
        assert_eq!(model.target(), 6);
    }
}
