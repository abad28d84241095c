//! Resident tile accounting.

use std::collections::BTreeMap;

/// Count of tiles held in memory, per zoom level and in total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidentBudget {
    per_zoom: BTreeMap<u32, usize>,
    total: usize,
}

impl ResidentBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, zoom: u32, tiles: usize) {
        *self.per_zoom.entry(zoom).or_insert(0) += tiles;
        self.total += tiles;
    }

    /// Give back `tiles` at `zoom`. Releasing more than was reserved is a
    /// bookkeeping bug and saturates at zero.
    pub fn release(&mut self, zoom: u32, tiles: usize) {
        let Some(count) = self.per_zoom.get_mut(&zoom) else {
            debug_assert!(tiles == 0, "release at zoom {zoom} without reservation");
            return;
        };
        debug_assert!(*count >= tiles, "releasing {tiles} of {count} tiles at zoom {zoom}");
        let released = tiles.min(*count);
        *count -= released;
        self.total -= released;
        if *count == 0 {
            self.per_zoom.remove(&zoom);
        }
    }

    pub fn current(&self) -> usize {
        self.total
    }

    pub fn at(&self, zoom: u32) -> usize {
        self.per_zoom.get(&zoom).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_release() {
        let mut budget = ResidentBudget::new();
        budget.reserve(0, 1);
        budget.reserve(1, 4);
        budget.reserve(1, 2);
        assert_eq!(budget.current(), 7);
        assert_eq!(budget.at(1), 6);

        budget.release(1, 6);
        assert_eq!(budget.at(1), 0);
        assert_eq!(budget.current(), 1);
        assert_eq!(budget.at(5), 0);
    }
}
