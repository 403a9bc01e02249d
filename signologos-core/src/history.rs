//! Fixed-capacity FIFO rings for recent detections and predictions.

use std::collections::VecDeque;

use crate::error::HistoryError;
use crate::types::{DetectionResult, ModelPrediction};

pub const DETECTION_CAPACITY: usize = 100;
pub const PREDICTION_CAPACITY: usize = 50;

pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for DetectionResult {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for ModelPrediction {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Keeps the most recent `capacity` items in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Timestamped + Clone> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item`, evicting the oldest entries past capacity.
    ///
    /// Timestamps within a buffer never go backwards; an older item is
    /// rejected and the buffer is left as it was.
    pub fn push(&mut self, item: T) -> Result<(), HistoryError> {
        self.accepts(&item)?;
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        Ok(())
    }

    /// Checks whether `item` could be pushed without changing the buffer.
    ///
    /// Timestamps must be non-decreasing: an item stamped the same as the
    /// newest entry is accepted, an older one is not.
    pub fn accepts(&self, item: &T) -> Result<(), HistoryError> {
        match self.items.back() {
            Some(newest) if item.timestamp() < newest.timestamp() => Err(HistoryError::OutOfOrder {
                newest: newest.timestamp(),
                incoming: item.timestamp(),
            }),
            _ => Ok(()),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// The newest `n` items, oldest first.
    pub fn last(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
