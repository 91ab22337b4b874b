use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::models::Candle;

/// Thread-safe rolling window of closed candles for one symbol
///
/// Holds at most `capacity` candles; pushing beyond that evicts the
/// oldest. Cloning is cheap and all clones share the same window.
#[derive(Clone)]
pub struct CandleWindow {
    candles: Arc<RwLock<VecDeque<Candle>>>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a closed candle, evicting the oldest past capacity
    pub fn push(&self, candle: Candle) {
        let mut candles = self.candles.write().unwrap();
        candles.push_back(candle);
        while candles.len() > self.capacity {
            candles.pop_front();
        }
    }

    /// All held candles in arrival order, oldest first
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.read().unwrap().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<Candle> {
        self.candles.read().unwrap().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.candles.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.read().unwrap().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
