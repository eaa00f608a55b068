//! Accumulators for matrix entries this rank contributes to but does not own.
//!
//! The key set is fixed once the communication plan exists, so the storage is
//! a flat array of `(row, col)` keys sorted ascending with a parallel array of
//! atomic values, looked up by binary search.

use crate::algs::search::binary_search;
use crate::sparse::atomic::AtomicF64;

#[derive(Clone, Debug, Default)]
pub struct NonLocalData {
    keys: Vec<(usize, usize)>,
    values: Vec<AtomicF64>,
}

impl NonLocalData {
    /// Build from any collection of `(global_row, global_col)` keys.
    /// Duplicates collapse into one accumulator.
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut keys: Vec<_> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        let values = (0..keys.len()).map(|_| AtomicF64::new(0.0)).collect();
        Self { keys, values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline]
    pub fn keys(&self) -> &[(usize, usize)] {
        &self.keys
    }

    #[inline]
    pub fn slot(&self, row: usize, col: usize) -> Option<usize> {
        binary_search(&self.keys, &(row, col))
    }

    #[inline]
    pub fn cell_at(&self, slot: usize) -> &AtomicF64 {
        &self.values[slot]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.slot(row, col).map(|k| self.values[k].load())
    }

    /// Reset every accumulator to zero.
    pub fn zero(&mut self) {
        for v in &self.values {
            v.store(0.0);
        }
    }
}
