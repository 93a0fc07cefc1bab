//! Ordered collections updated by minimal diffs

use std::collections::HashSet;
use std::hash::Hash;

/// Counts of the edits applied to an `ObservableList`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationStats {
    pub inserts: usize,
    pub removes: usize,
    pub moves: usize,
    pub clears: usize,
}

impl MutationStats {
    pub fn total(&self) -> usize {
        self.inserts + self.removes + self.moves + self.clears
    }
}

impl std::ops::Add for MutationStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            inserts: self.inserts + other.inserts,
            removes: self.removes + other.removes,
            moves: self.moves + other.moves,
            clears: self.clears + other.clears,
        }
    }
}

/// An ordered list that is only ever edited in place: items missing from the
/// desired order are removed, the rest are moved or inserted into position.
/// It is never cleared and rebuilt, so positions of untouched items hold.
#[derive(Debug, Clone)]
pub struct ObservableList<T> {
    items: Vec<T>,
    stats: MutationStats,
    version: u64,
}

impl<T> Default for ObservableList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            stats: MutationStats::default(),
            version: 0,
        }
    }
}

impl<T: Clone + Eq + Hash> ObservableList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position(&self, item: &T) -> Option<usize> {
        self.items.iter().position(|x| x == item)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.position(item).is_some()
    }

    /// Cumulative edits since creation or the last `reset_stats`.
    pub fn stats(&self) -> MutationStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = MutationStats::default();
    }

    /// Bumped whenever an edit is applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Bring the list into `desired` order. Returns whether anything changed.
    pub fn apply(&mut self, desired: &[T]) -> bool {
        let before = self.stats.total();
        let wanted: HashSet<&T> = desired.iter().collect();

        let mut i = self.items.len();
        while i > 0 {
            i -= 1;
            if !wanted.contains(&self.items[i]) {
                self.items.remove(i);
                self.stats.removes += 1;
            }
        }

        for (target, item) in desired.iter().enumerate() {
            if self.items.get(target) == Some(item) {
                continue;
            }
            match self.items[target.min(self.items.len())..]
                .iter()
                .position(|x| x == item)
            {
                Some(offset) => {
                    let moved = self.items.remove(target + offset);
                    self.items.insert(target, moved);
                    self.stats.moves += 1;
                }
                None => {
                    self.items.insert(target, item.clone());
                    self.stats.inserts += 1;
                }
            }
        }
        // Duplicates in `desired` leave extra copies behind.
        self.items.truncate(desired.len());

        let changed = self.stats.total() != before;
        if changed {
            self.version += 1;
        }
        changed
    }
}
