// Bounded rolling window of recent readings with derived statistics

use crate::types::Reading;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Summary of a window's contents. Always a pure function of the window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub current: f64,
}

impl Statistics {
    /// Compute statistics over `values`. An empty sequence yields all zeros.
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        let mut iter = values.into_iter();
        let first = match iter.next() {
            Some(&v) => v,
            None => return Self::default(),
        };

        let (mut min, mut max, mut avg, mut current) = (first, first, first, first);
        let mut count = 1usize;
        for &v in iter {
            min = min.min(v);
            max = max.max(v);
            current = v;
            count += 1;
            // Running mean; scaling each term first keeps it finite near f64::MAX
            let n = count as f64;
            avg += v / n - avg / n;
        }

        Self {
            min,
            max,
            avg: avg.max(min).min(max),
            current,
        }
    }
}

/// FIFO window of at most `capacity` readings, oldest first.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<Reading>,
    capacity: usize,
    stats: Statistics,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            stats: Statistics::default(),
        }
    }

    /// Append one reading, evicting the oldest if the window is full
    pub fn push(&mut self, value: Reading) {
        self.append(value);
        self.refresh();
    }

    /// Append readings in order, evicting from the front as needed
    pub fn extend<I: IntoIterator<Item = Reading>>(&mut self, values: I) {
        let mut changed = false;
        for value in values {
            self.append(value);
            changed = true;
        }
        if changed {
            self.refresh();
        }
    }

    /// Change the capacity, dropping the oldest readings if it shrinks
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        if self.values.len() > self.capacity {
            let excess = self.values.len() - self.capacity;
            self.values.drain(..excess);
            self.refresh();
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.refresh();
    }

    pub fn stats(&self) -> Statistics {
        self.stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<Reading> {
        self.values.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.values.iter()
    }

    pub fn to_vec(&self) -> Vec<Reading> {
        self.values.iter().copied().collect()
    }

    /// One value per line, oldest to newest, no header and no trailing newline
    pub fn export(&self) -> String {
        self.values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn append(&mut self, value: Reading) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    fn refresh(&mut self) {
        self.stats = Statistics::from_values(&self.values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fifo_eviction() {
        let mut window = RollingWindow::new(3);
        window.extend([9.0, 2.0, 4.0, 8.0]);
        assert_eq!(window.to_vec(), vec![2.0, 4.0, 8.0]);

        let stats = window.stats();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 8.0);
        assert_relative_eq!(stats.avg, 14.0 / 3.0, epsilon = 1e-9);
        assert_eq!(stats.current, 8.0);
    }

    #[test]
    fn test_window_keeps_last_n() {
        for capacity in [1, 2, 5, 50, 100] {
            let mut window = RollingWindow::new(capacity);
            let values: Vec<f64> = (0..capacity * 3 + 1).map(|i| i as f64 * 0.5).collect();
            for &v in &values {
                window.push(v);
                assert!(window.len() <= capacity);
            }
            assert_eq!(window.len(), capacity);
            assert_eq!(window.to_vec(), values[values.len() - capacity..].to_vec());
        }
    }

    #[test]
    fn test_stats_match_recomputation() {
        let mut window = RollingWindow::new(4);
        for v in [3.0, -1.0, 10.0, 2.5, 7.0, 0.0] {
            window.push(v);
            let stats = window.stats();
            assert_eq!(stats, Statistics::from_values(window.iter()));
            assert!(stats.min <= stats.avg && stats.avg <= stats.max);
            assert_eq!(Some(stats.current), window.last());
        }
    }

    #[test]
    fn test_mean_of_huge_readings_stays_finite() {
        let mut window = RollingWindow::new(4);
        window.extend([1.7e308, 1.7e308]);
        let stats = window.stats();
        assert_eq!(stats.avg, 1.7e308);
        assert!(stats.min <= stats.avg && stats.avg <= stats.max);

        window.extend([-1.7e308, 1.7e308]);
        let stats = window.stats();
        assert!(stats.avg.is_finite());
        assert!(stats.min <= stats.avg && stats.avg <= stats.max);
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let mut window = RollingWindow::new(10);
        assert_eq!(window.stats(), Statistics::default());
        window.push(5.0);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.stats(), Statistics::default());
    }

    #[test]
    fn test_shrinking_capacity_drops_oldest() {
        let mut window = RollingWindow::new(5);
        window.extend([1.0, 2.0, 3.0, 4.0, 5.0]);
        window.set_capacity(2);
        assert_eq!(window.to_vec(), vec![4.0, 5.0]);
        assert_eq!(window.stats().min, 4.0);
    }

    #[test]
    fn test_export_format() {
        let mut window = RollingWindow::new(10);
        window.extend([1.0, 2.0, 3.0]);
        assert_eq!(window.export(), "1\n2\n3");

        window.push(4.25);
        assert_eq!(window.export(), "1\n2\n3\n4.25");

        assert_eq!(RollingWindow::new(3).export(), "");
    }
}
