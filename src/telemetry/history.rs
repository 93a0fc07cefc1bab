//! Bounded per-entity history buffers

use indexmap::IndexMap;
use std::collections::VecDeque;

/// Network charts keep half a minute.
pub const NETWORK_HISTORY: usize = 30;
/// Performance page charts keep a minute.
pub const PERFORMANCE_HISTORY: usize = 60;

/// Fixed-capacity FIFO; the oldest sample is evicted on push when full.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    capacity: usize,
    values: VecDeque<f64>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            values: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(if value.is_finite() { value } else { 0.0 });
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
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
}

/// History buffers keyed by stable entity name ("CPU", "RAM", "/home", "GPU 0").
#[derive(Debug, Clone)]
pub struct HistoryBook {
    capacity: usize,
    buffers: IndexMap<String, HistoryBuffer>,
}

impl HistoryBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: IndexMap::new(),
        }
    }

    pub fn push(&mut self, key: &str, value: f64) {
        let capacity = self.capacity;
        self.buffers
            .entry(key.to_string())
            .or_insert_with(|| HistoryBuffer::new(capacity))
            .push(value);
    }

    pub fn get(&self, key: &str) -> Option<&HistoryBuffer> {
        self.buffers.get(key)
    }

    /// Forget entities that disappeared (unplugged drive, removed adapter).
    pub fn retain_keys<'k>(&mut self, live: impl IntoIterator<Item = &'k str>) {
        let live: std::collections::HashSet<&str> = live.into_iter().collect();
        self.buffers.retain(|k, _| live.contains(k.as_str()));
    }

    pub fn series(&self) -> Vec<(String, Vec<f64>)> {
        self.buffers
            .iter()
            .map(|(k, b)| (k.clone(), b.to_vec()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_never_exceeds_capacity() {
        let mut buf = HistoryBuffer::new(NETWORK_HISTORY);
        for i in 0..100 {
            buf.push(i as f64);
            assert!(buf.len() <= NETWORK_HISTORY);
        }
        assert_eq!(buf.len(), NETWORK_HISTORY);
        assert_eq!(buf.iter().next().copied(), Some(70.0));
        assert_eq!(buf.latest(), Some(99.0));
    }

    #[test]
    fn test_non_finite_samples_become_zero() {
        let mut buf = HistoryBuffer::new(3);
        buf.push(f64::NAN);
        assert_eq!(buf.to_vec(), vec![0.0]);
    }

    #[test]
    fn test_book_keys_by_entity() {
        let mut book = HistoryBook::new(PERFORMANCE_HISTORY);
        book.push("CPU", 10.0);
        book.push("RAM", 40.0);
        book.push("CPU", 12.0);
        assert_eq!(book.get("CPU").map(|b| b.to_vec()), Some(vec![10.0, 12.0]));

        book.retain_keys(["CPU"]);
        assert_eq!(book.len(), 1);
        assert!(book.get("RAM").is_none());
    }
}
