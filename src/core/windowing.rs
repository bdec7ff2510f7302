//! Fixed-capacity sample windows.
//!
//! Windows fill in batches: values accumulate until the window reaches its
//! capacity, the full batch is handed out, and the window starts empty
//! again. Nothing is dropped between batches; the sample after a full batch
//! is the first sample of the next one.

use serde::{Deserialize, Serialize};

/// Window size used by the classifier path.
pub const CLASSIFIER_WINDOW: usize = 50;

/// Window size used by the threshold-band path.
pub const BAND_WINDOW: usize = 100;

/// A batch window of raw values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleWindow {
    capacity: usize,
    values: Vec<f64>,
}

impl SampleWindow {
    /// Create an empty window. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: Vec::with_capacity(capacity),
        }
    }

    /// Append a value, returning the completed batch once the window fills.
    pub fn push(&mut self, value: f64) -> Option<Vec<f64>> {
        self.values.push(value);
        if self.values.len() >= self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// Remove and return whatever the window currently holds.
    pub fn take(&mut self) -> Vec<f64> {
        std::mem::replace(&mut self.values, Vec::with_capacity(self.capacity))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_fills_in_batches() {
        let mut window = SampleWindow::new(3);

        assert!(window.push(1.0).is_none());
        assert!(window.push(2.0).is_none());
        assert_eq!(window.push(3.0), Some(vec![1.0, 2.0, 3.0]));
        assert!(window.is_empty());

        // Next batch starts with the next sample
        assert!(window.push(4.0).is_none());
        assert_eq!(window.values(), &[4.0]);
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = SampleWindow::new(CLASSIFIER_WINDOW);
        let mut batches = 0;
        for i in 0..(CLASSIFIER_WINDOW * 3 + 7) {
            if window.push(i as f64).is_some() {
                batches += 1;
            }
            assert!(window.len() < window.capacity());
        }
        assert_eq!(batches, 3);
        assert_eq!(window.len(), 7);
    }

    #[test]
    fn test_clear() {
        let mut window = SampleWindow::new(BAND_WINDOW);
        window.push(1.0);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.capacity(), BAND_WINDOW);
    }
}
