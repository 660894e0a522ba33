use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// One observed price on the client side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub time: DateTime<Utc>,
    pub price: f64,
}

/// Bounded rolling window of observed prices for one symbol.
///
/// Append-and-evict-oldest; the window is rebuilt from scratch on every
/// (re)connect with the snapshot price as its single seed entry.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    points: VecDeque<PricePoint>,
    capacity: usize,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn seeded(capacity: usize, seed: PricePoint) -> Self {
        let mut history = Self::new(capacity);
        history.push(seed);
        history
    }

    pub fn push(&mut self, point: PricePoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.back()
    }

    /// Points in arrival order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PricePoint> {
        self.points.iter()
    }
}
