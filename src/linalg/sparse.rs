//! Compressed-row sparse matrix with a frozen sparsity pattern.
//!
//! The pattern is collected once from every device stamp through
//! [`SparsityPattern`] and then frozen into a [`SparseMatrix`]. After that
//! point no element can be added: devices address values through row-local
//! offsets that stay valid for the lifetime of the matrix.

use std::collections::BTreeSet;

use crate::error::{DaeError, Result};

/// Builder that collects structurally nonzero `(row, col)` pairs.
#[derive(Debug, Clone)]
pub struct SparsityPattern {
    rows: Vec<BTreeSet<usize>>,
}

impl SparsityPattern {
    /// Create an empty pattern for a square system of `size` variables.
    pub fn new(size: usize) -> Self {
        Self {
            rows: vec![BTreeSet::new(); size],
        }
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Declare `(row, col)` as structurally nonzero.
    pub fn insert(&mut self, row: usize, col: usize) -> Result<()> {
        let size = self.rows.len();
        if row >= size || col >= size {
            return Err(DaeError::OutsidePattern { row, col });
        }
        self.rows[row].insert(col);
        Ok(())
    }

    /// Check whether `(row, col)` has been declared.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows.get(row).is_some_and(|r| r.contains(&col))
    }

    /// Freeze the pattern into a zero-valued matrix.
    pub fn build(&self) -> SparseMatrix {
        let mut row_ptr = Vec::with_capacity(self.rows.len() + 1);
        let mut col_idx = Vec::new();
        row_ptr.push(0);
        for row in &self.rows {
            col_idx.extend(row.iter().copied());
            row_ptr.push(col_idx.len());
        }
        let nnz = col_idx.len();
        SparseMatrix {
            size: self.rows.len(),
            row_ptr,
            col_idx,
            values: vec![0.0; nnz],
        }
    }
}

/// Square sparse matrix in compressed-row storage.
///
/// Column indices inside each row are sorted ascending, so a row-local
/// offset is the position of a column within its row.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    size: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of stored elements.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Clear all values to zero, keeping the pattern.
    pub fn clear(&mut self) {
        self.values.fill(0.0);
    }

    /// Column indices stored in `row`.
    pub fn row_columns(&self, row: usize) -> &[usize] {
        &self.col_idx[self.row_ptr[row]..self.row_ptr[row + 1]]
    }

    /// Values stored in `row`, aligned with [`row_columns`](Self::row_columns).
    pub fn row_values(&self, row: usize) -> &[f64] {
        &self.values[self.row_ptr[row]..self.row_ptr[row + 1]]
    }

    /// Row-local offset of `col` within `row`, if structurally present.
    pub fn col_offset(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.size {
            return None;
        }
        self.row_columns(row).binary_search(&col).ok()
    }

    /// Value at a row-local offset.
    #[inline]
    pub fn at(&self, row: usize, offset: usize) -> f64 {
        self.values[self.row_ptr[row] + offset]
    }

    /// Overwrite the value at a row-local offset.
    #[inline]
    pub fn set_at(&mut self, row: usize, offset: usize, value: f64) {
        self.values[self.row_ptr[row] + offset] = value;
    }

    /// Accumulate into the value at a row-local offset.
    #[inline]
    pub fn add_at(&mut self, row: usize, offset: usize, value: f64) {
        self.values[self.row_ptr[row] + offset] += value;
    }

    /// Value at `(row, col)`, zero when the element is not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.col_offset(row, col)
            .map(|off| self.at(row, off))
            .unwrap_or(0.0)
    }

    /// Accumulate into `(row, col)` by column lookup.
    ///
    /// Slower than [`add_at`](Self::add_at); the pattern cannot grow, so a
    /// missing element is an error.
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let off = self
            .col_offset(row, col)
            .ok_or(DaeError::OutsidePattern { row, col })?;
        self.add_at(row, off, value);
        Ok(())
    }

    /// Iterate over all stored `(row, col, value)` triplets.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.size).flat_map(move |row| {
            self.row_columns(row)
                .iter()
                .zip(self.row_values(row))
                .map(move |(&col, &v)| (row, col, v))
        })
    }

    /// Dense row-major copy (debugging and tests).
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.size * self.size];
        for (row, col, v) in self.triplets() {
            dense[row * self.size + col] = v;
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_matrix() -> SparseMatrix {
        let mut p = SparsityPattern::new(3);
        p.insert(0, 2).unwrap();
        p.insert(0, 0).unwrap();
        p.insert(2, 1).unwrap();
        p.insert(0, 2).unwrap(); // duplicate is harmless
        p.build()
    }

    #[test]
    fn test_pattern_columns_sorted() {
        let m = small_matrix();
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.row_columns(0), &[0, 2]);
        assert!(m.row_columns(1).is_empty());
        assert_eq!(m.col_offset(0, 2), Some(1));
        assert_eq!(m.col_offset(1, 1), None);
    }

    #[test]
    fn test_add_outside_pattern_fails() {
        let mut m = small_matrix();
        assert!(m.add(2, 1, 1.5).is_ok());
        assert!(matches!(
            m.add(1, 1, 1.0),
            Err(DaeError::OutsidePattern { row: 1, col: 1 })
        ));
        assert_eq!(m.get(2, 1), 1.5);
        assert_eq!(m.get(1, 1), 0.0);
    }

    #[test]
    fn test_offsets_accumulate() {
        let mut m = small_matrix();
        m.add_at(0, 1, 2.0);
        m.add_at(0, 1, 3.0);
        assert_eq!(m.get(0, 2), 5.0);
        m.clear();
        assert_eq!(m.get(0, 2), 0.0);
    }

    #[test]
    fn test_pattern_rejects_out_of_range() {
        let mut p = SparsityPattern::new(2);
        assert!(p.insert(2, 0).is_err());
    }
}
