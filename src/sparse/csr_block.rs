//! Fixed-pattern compressed sparse row block.
//!
//! The pattern (row pointers + column indices) is written once, row by row,
//! then frozen by [`CsrBlock::finish_pattern`], which sorts each row's columns
//! ascending. After that only values change. Values are atomic cells so that
//! concurrent assembly can accumulate through a shared reference.

use rayon::prelude::*;

use crate::algs::search::binary_search;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::matrix_error::MatrixError;
use crate::sparse::atomic::AtomicF64;

/// A local CSR matrix with a frozen sparsity pattern.
#[derive(Clone, Debug, Default)]
pub struct CsrBlock {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<AtomicF64>,
    /// Rows written so far by `push_row`.
    filled_rows: usize,
    frozen: bool,
}

impl CsrBlock {
    /// Allocate storage for `nrows` rows, `ncols` columns and `nnz` entries.
    ///
    /// Must be followed by `nrows` calls to [`push_row`](Self::push_row) and
    /// one call to [`finish_pattern`](Self::finish_pattern).
    pub fn reserve(nrows: usize, ncols: usize, nnz: usize) -> Self {
        Self {
            nrows,
            ncols,
            row_ptr: vec![0; nrows + 1],
            col_indices: vec![0; nnz],
            values: (0..nnz).map(|_| AtomicF64::new(0.0)).collect(),
            filled_rows: 0,
            frozen: false,
        }
    }

    /// Build a frozen block from explicit per-row column lists.
    pub fn from_pattern<R>(ncols: usize, rows: &[R]) -> Result<Self, MatrixError>
    where
        R: AsRef<[usize]>,
    {
        let nnz = rows.iter().map(|r| r.as_ref().len()).sum();
        let mut block = Self::reserve(rows.len(), ncols, nnz);
        for (i, cols) in rows.iter().enumerate() {
            block.push_row(i, cols.as_ref().iter().copied())?;
        }
        block.finish_pattern()?;
        Ok(block)
    }

    /// Write the columns of row `row`; every inserted entry starts at zero.
    ///
    /// Rows must be pushed in order `0, 1, ..`.
    pub fn push_row<I>(&mut self, row: usize, cols: I) -> Result<(), MatrixError>
    where
        I: IntoIterator<Item = usize>,
    {
        if self.frozen || row != self.filled_rows || row >= self.nrows {
            return Err(MatrixError::InvariantViolation(format!(
                "row {row} pushed out of order (next expected {}, {} rows, frozen = {})",
                self.filled_rows, self.nrows, self.frozen
            )));
        }
        let begin = self.row_ptr[row];
        let reserved = self.col_indices.len() - begin;
        let mut k = 0;
        for j in cols {
            if k == reserved {
                return Err(MatrixError::PatternMismatch {
                    row,
                    reserved,
                    inserted: k + 1,
                });
            }
            if j >= self.ncols {
                return Err(MatrixError::IndexOutOfRange {
                    index: j,
                    size: self.ncols,
                });
            }
            self.col_indices[begin + k] = j;
            self.values[begin + k].store(0.0);
            k += 1;
        }
        self.row_ptr[row + 1] = begin + k;
        self.filled_rows += 1;
        Ok(())
    }

    /// Freeze the pattern: check the fill count and sort every row.
    pub fn finish_pattern(&mut self) -> Result<(), MatrixError> {
        let filled = self.row_ptr[self.filled_rows];
        if self.filled_rows != self.nrows || filled != self.col_indices.len() {
            return Err(MatrixError::PatternMismatch {
                row: self.filled_rows,
                reserved: self.col_indices.len(),
                inserted: filled,
            });
        }
        for i in 0..self.nrows {
            let (begin, end) = (self.row_ptr[i], self.row_ptr[i + 1]);
            let row = &mut self.col_indices[begin..end];
            row.sort_unstable();
            if let Some(w) = row.windows(2).find(|w| w[0] == w[1]) {
                return Err(MatrixError::InvariantViolation(format!(
                    "duplicate column {} in row {i}",
                    w[0]
                )));
            }
        }
        self.frozen = true;
        crate::debug_invariants!(self.validate_invariants(), "CsrBlock::finish_pattern");
        Ok(())
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    #[inline]
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    #[inline]
    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// Snapshot of all stored values in CSR order.
    pub fn values(&self) -> Vec<f64> {
        self.values.iter().map(AtomicF64::load).collect()
    }

    /// Iterate `(col, value)` over row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (begin, end) = (self.row_ptr[i], self.row_ptr[i + 1]);
        self.col_indices[begin..end]
            .iter()
            .copied()
            .zip(self.values[begin..end].iter().map(AtomicF64::load))
    }

    /// Position of `(i, j)` in the value array, if it is in the pattern.
    #[inline]
    pub fn slot(&self, i: usize, j: usize) -> Option<usize> {
        let (&begin, &end) = (self.row_ptr.get(i)?, self.row_ptr.get(i + 1)?);
        binary_search(&self.col_indices[begin..end], &j).map(|k| begin + k)
    }

    /// Value cell at a position returned by [`slot`](Self::slot).
    #[inline]
    pub fn cell_at(&self, slot: usize) -> &AtomicF64 {
        &self.values[slot]
    }

    /// Value cell of `(i, j)`, if it is in the pattern.
    #[inline]
    pub fn cell(&self, i: usize, j: usize) -> Option<&AtomicF64> {
        self.slot(i, j).map(|k| &self.values[k])
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.cell(i, j).map(AtomicF64::load)
    }

    /// Atomically add `v` to `(i, j)`.
    ///
    /// `(i, j)` must be in the pattern; that is checked in debug builds only.
    #[inline]
    pub fn add(&self, i: usize, j: usize, v: f64) {
        match self.cell(i, j) {
            Some(cell) => {
                cell.fetch_add(v);
            }
            None => debug_assert!(false, "({i}, {j}) is not in the CSR pattern"),
        }
    }

    /// Overwrite every stored value with `value`.
    pub fn set_value(&mut self, value: f64) {
        self.values.par_iter().for_each(|v| v.store(value));
    }

    /// Multiply every stored value by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.values
            .par_iter()
            .for_each(|v| v.store(v.load() * factor));
    }

    /// `output[i] += Σ_j A(i, j) * input[j]`, parallel over rows.
    pub fn mult_and_add(&self, output: &mut [f64], input: &[f64]) -> Result<(), MatrixError> {
        if output.len() != self.nrows {
            return Err(MatrixError::DimensionMismatch {
                what: "CSR output vector",
                expected: self.nrows,
                found: output.len(),
            });
        }
        if input.len() != self.ncols {
            return Err(MatrixError::DimensionMismatch {
                what: "CSR input vector",
                expected: self.ncols,
                found: input.len(),
            });
        }
        output.par_iter_mut().enumerate().for_each(|(i, y)| {
            let (begin, end) = (self.row_ptr[i], self.row_ptr[i + 1]);
            for k in begin..end {
                *y += self.values[k].load() * input[self.col_indices[k]];
            }
        });
        Ok(())
    }
}

impl DebugInvariants for CsrBlock {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CsrBlock");
    }

    fn validate_invariants(&self) -> Result<(), MatrixError> {
        ensure(self.row_ptr.len() == self.nrows + 1, || {
            format!("row_ptr has {} entries for {} rows", self.row_ptr.len(), self.nrows)
        })?;
        ensure(self.values.len() == self.col_indices.len(), || {
            "value and column arrays differ in length".to_string()
        })?;
        ensure(self.row_ptr[self.nrows] == self.col_indices.len(), || {
            format!(
                "row_ptr ends at {} but nnz is {}",
                self.row_ptr[self.nrows],
                self.col_indices.len()
            )
        })?;
        for i in 0..self.nrows {
            let (begin, end) = (self.row_ptr[i], self.row_ptr[i + 1]);
            ensure(begin <= end, || format!("row_ptr decreases at row {i}"))?;
            let row = &self.col_indices[begin..end];
            ensure(row.windows(2).all(|w| w[0] < w[1]), || {
                format!("row {i} is not strictly ascending")
            })?;
            ensure(row.iter().all(|&j| j < self.ncols), || {
                format!("row {i} has a column >= {}", self.ncols)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrBlock {
        // [ 0 x 0 x ]
        // [ x 0 0 0 ]
        // [ 0 0 0 0 ]
        CsrBlock::from_pattern(4, &[vec![3, 1], vec![0], vec![]]).unwrap()
    }

    #[test]
    fn rows_are_sorted_after_freeze() {
        let a = sample();
        assert_eq!(a.row_ptr(), &[0, 2, 3, 3]);
        assert_eq!(a.col_indices(), &[1, 3, 0]);
        assert!(a.validate_invariants().is_ok());
    }

    #[test]
    fn slot_lookup_hits_and_misses() {
        let a = sample();
        assert_eq!(a.slot(0, 3), Some(1));
        assert_eq!(a.slot(0, 2), None);
        assert_eq!(a.slot(2, 0), None);
        assert_eq!(a.slot(7, 0), None);
    }

    #[test]
    fn lookup_one_past_last_row_is_none() {
        let a = CsrBlock::from_pattern(3, &[vec![0], vec![1], vec![2]]).unwrap();
        assert_eq!(a.get(a.nrows(), 0), None);
        assert!(a.cell(a.nrows(), 0).is_none());
        assert_eq!(a.get(7, 0), None);
    }

    #[test]
    fn add_set_scale() {
        let mut a = sample();
        a.add(0, 1, 2.0);
        a.add(0, 1, 0.5);
        a.add(1, 0, -1.0);
        assert_eq!(a.get(0, 1), Some(2.5));
        a.scale(2.0);
        assert_eq!(a.values(), vec![5.0, 0.0, -2.0]);
        a.set_value(1.0);
        assert_eq!(a.values(), vec![1.0, 1.0, 1.0]);
        let row0: Vec<_> = a.row(0).collect();
        assert_eq!(row0, vec![(1, 1.0), (3, 1.0)]);
    }

    #[test]
    fn overfilled_row_is_a_pattern_mismatch() {
        let mut a = CsrBlock::reserve(2, 3, 2);
        a.push_row(0, [0, 1]).unwrap();
        let err = a.push_row(1, [2]).unwrap_err();
        assert!(matches!(err, MatrixError::PatternMismatch { row: 1, .. }));
    }

    #[test]
    fn underfilled_block_is_a_pattern_mismatch() {
        let mut a = CsrBlock::reserve(2, 3, 3);
        a.push_row(0, [0]).unwrap();
        a.push_row(1, [1]).unwrap();
        assert!(matches!(
            a.finish_pattern(),
            Err(MatrixError::PatternMismatch { reserved: 3, inserted: 2, .. })
        ));
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = CsrBlock::from_pattern(3, &[vec![1, 1]]).unwrap_err();
        assert!(matches!(err, MatrixError::InvariantViolation(_)));
    }

    #[test]
    fn mult_and_add_accumulates() {
        let a = sample();
        a.add(0, 1, 2.0);
        a.add(0, 3, 1.0);
        a.add(1, 0, 3.0);
        let mut y = vec![1.0, 1.0, 1.0];
        a.mult_and_add(&mut y, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(y, vec![1.0 + 4.0 + 4.0, 1.0 + 3.0, 1.0]);
        assert!(a.mult_and_add(&mut y, &[1.0]).is_err());
    }
}
