//! Bounded per-component metric history.

use statrs::statistics::Statistics;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::types::MetricSample;

/// Mean and sample standard deviation over a window of one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingStats {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

/// Ring buffer of the most recent samples for one component, oldest first
#[derive(Debug, Clone)]
pub struct MetricHistory {
    capacity: usize,
    samples: VecDeque<MetricSample>,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    /// Most recent value reported for `metric`, even if the latest sample omitted it
    pub fn latest_value(&self, metric: &str) -> Option<f64> {
        self.samples.iter().rev().find_map(|s| s.value(metric))
    }

    /// Latest known value of every metric seen in the window
    pub fn latest_values(&self) -> HashMap<String, f64> {
        let mut values = HashMap::new();
        for sample in self.samples.iter().rev() {
            for (name, value) in &sample.values {
                values.entry(name.clone()).or_insert(*value);
            }
        }
        values
    }

    /// Up to `window` most recent values of `metric`, in chronological order
    pub fn recent_values(&self, metric: &str, window: usize) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .samples
            .iter()
            .rev()
            .filter_map(|s| s.value(metric))
            .take(window)
            .collect();
        values.reverse();
        values
    }

    pub fn rolling_stats(&self, metric: &str, window: usize) -> Option<RollingStats> {
        let values = self.recent_values(metric, window);
        if values.len() < 2 {
            return None;
        }
        Some(RollingStats {
            mean: values.iter().mean(),
            std_dev: values.iter().std_dev(),
            count: values.len(),
        })
    }

    /// Whether `predicate` has held for `metric` continuously over `sustained`,
    /// measured back from the newest sample carrying it.
    ///
    /// Every sample inside the window must satisfy the predicate, and the history
    /// must reach at least as far back as the window start; a shorter history does
    /// not count as sustained. A zero window only looks at the newest value.
    pub fn holds_for<P>(&self, metric: &str, sustained: Duration, predicate: P) -> bool
    where
        P: Fn(f64) -> bool,
    {
        let mut points = self
            .samples
            .iter()
            .rev()
            .filter_map(|s| s.value(metric).map(|v| (s.timestamp_ms, v)));

        let Some((newest_ts, newest)) = points.next() else {
            return false;
        };
        if !predicate(newest) {
            return false;
        }
        if sustained.is_zero() {
            return true;
        }

        let window_ms = i64::try_from(sustained.as_millis()).unwrap_or(i64::MAX);
        let window_start = newest_ts.saturating_sub(window_ms);
        for (ts, value) in points {
            if !predicate(value) {
                return false;
            }
            if ts <= window_start {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64, fps: f64) -> MetricSample {
        MetricSample::new("renderer", ts, HashMap::from([("fps".to_string(), fps)]))
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = MetricHistory::new(3);
        for i in 0..5 {
            history.push(sample(i * 1000, i as f64));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.recent_values("fps", 10), vec![2.0, 3.0, 4.0]);
        assert_eq!(history.latest().map(|s| s.timestamp_ms), Some(4000));
    }

    #[test]
    fn test_latest_values_merge_partial_samples() {
        let mut history = MetricHistory::new(10);
        history.push(MetricSample::new(
            "renderer",
            0,
            HashMap::from([("fps".to_string(), 60.0), ("gpu".to_string(), 40.0)]),
        ));
        history.push(sample(1000, 55.0));

        let latest = history.latest_values();
        assert_eq!(latest.get("fps"), Some(&55.0));
        assert_eq!(latest.get("gpu"), Some(&40.0));
        assert_eq!(history.latest_value("gpu"), Some(40.0));
        assert_eq!(history.latest_value("missing"), None);
    }

    #[test]
    fn test_rolling_stats() {
        let mut history = MetricHistory::new(10);
        for (i, v) in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().enumerate() {
            history.push(sample(i as i64, v));
        }
        let stats = history.rolling_stats("fps", 8).expect("enough samples");
        assert!((stats.mean - 5.0).abs() < 1e-9);
        // sample standard deviation (n - 1)
        assert!((stats.std_dev - 2.138_089_935).abs() < 1e-6);
        assert_eq!(stats.count, 8);

        assert!(MetricHistory::new(4).rolling_stats("fps", 4).is_none());
    }

    #[test]
    fn test_sustained_condition() {
        let mut history = MetricHistory::new(20);
        for ts in [0, 2000, 4000, 6000, 8000, 10_000] {
            history.push(sample(ts, 20.0));
        }
        let low = |v: f64| v < 30.0;

        assert!(history.holds_for("fps", Duration::from_secs(10), low));
        assert!(!history.holds_for("fps", Duration::from_secs(11), low));
        assert!(history.holds_for("fps", Duration::ZERO, low));

        // One good sample inside the window breaks the streak
        history.push(sample(11_000, 50.0));
        history.push(sample(12_000, 20.0));
        assert!(!history.holds_for("fps", Duration::from_secs(5), low));
        assert!(history.holds_for("fps", Duration::ZERO, low));
    }

    #[test]
    fn test_sustained_requires_metric_present() {
        let history = MetricHistory::new(5);
        assert!(!history.holds_for("fps", Duration::ZERO, |_| true));
    }
}
