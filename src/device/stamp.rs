//! Jacobian stamps: the sparsity each device type declares.
//!
//! A stamp row is a local equation (external variables first, then
//! internal ones); its entries are the local columns that equation depends
//! on. Stamps are immutable once built. Fixed-topology device types share
//! one stamp through [`StampRegistry`]; devices whose variable count depends
//! on a parameter build their own.
//!
//! A [`StampMap`] also records variable collapses. When a device merges one
//! local variable into another (a zero series resistance, say) it keeps
//! loading in its full numbering and the map translates to the reduced
//! stamp that is registered with the global matrix.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{DaeError, Result};

use super::DeviceKind;

/// Declared `(local row, local column)` pairs of one device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JacobianStamp {
    rows: Vec<Vec<usize>>,
}

impl JacobianStamp {
    /// Build a stamp from explicit rows. Column order inside a row is kept.
    pub fn new(rows: Vec<Vec<usize>>) -> Self {
        Self { rows }
    }

    /// Every row depends on every column.
    pub fn dense(size: usize) -> Self {
        Self::new(vec![(0..size).collect(); size])
    }

    /// `size` rows that declare nothing.
    pub fn empty(size: usize) -> Self {
        Self::new(vec![Vec::new(); size])
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Columns declared for `row`.
    pub fn row(&self, row: usize) -> &[usize] {
        &self.rows[row]
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.rows
    }

    /// Position of `col` within `row`, if declared.
    pub fn position(&self, row: usize, col: usize) -> Option<usize> {
        self.rows.get(row)?.iter().position(|&c| c == col)
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.position(row, col).is_some()
    }

    /// Total number of declared pairs.
    pub fn num_entries(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Iterate over `(row, col)` pairs in declaration order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(r, cols)| cols.iter().map(move |&c| (r, c)))
    }

    /// Largest column index referenced, if any.
    pub fn max_column(&self) -> Option<usize> {
        self.rows.iter().flatten().copied().max()
    }
}

impl fmt::Display for JacobianStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.rows.iter().enumerate() {
            write!(f, "row {i:>3}:")?;
            for c in row {
                write!(f, " {c}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A device's full stamp together with its reduced (collapsed) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampMap {
    full: JacobianStamp,
    reduced: JacobianStamp,
    /// full local variable -> reduced local variable
    var_map: Vec<usize>,
    /// full (row, position) -> position inside reduced row `var_map[row]`
    col_map: Vec<Vec<usize>>,
}

impl StampMap {
    /// A map that collapses nothing.
    pub fn identity(stamp: JacobianStamp) -> Self {
        let var_map = (0..stamp.num_rows()).collect();
        let col_map = stamp.rows.iter().map(|r| (0..r.len()).collect()).collect();
        Self {
            reduced: stamp.clone(),
            full: stamp,
            var_map,
            col_map,
        }
    }

    /// Merge reduced variable `from` into reduced variable `to`.
    ///
    /// `from` must come after `to`; later variables shift down by one. The
    /// reduced rows come out in ascending column order. Collapses chain:
    /// indices always refer to the reduced numbering left by the previous
    /// collapse.
    pub fn collapse(mut self, from: usize, to: usize) -> Result<Self> {
        let size = self.reduced.num_rows();
        if from <= to {
            return Err(DaeError::InvalidCollapse {
                from,
                to,
                message: "source must come after target".to_string(),
            });
        }
        if from >= size {
            return Err(DaeError::InvalidCollapse {
                from,
                to,
                message: format!("stamp only has {size} rows"),
            });
        }

        let renumber = |k: usize| match k {
            k if k == from => to,
            k if k > from => k - 1,
            k => k,
        };
        for v in &mut self.var_map {
            *v = renumber(*v);
        }
        self.rebuild(size - 1);
        Ok(self)
    }

    fn rebuild(&mut self, reduced_size: usize) {
        let mut fill: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); reduced_size];
        for (row, cols) in self.full.rows.iter().enumerate() {
            let r = self.var_map[row];
            fill[r].extend(cols.iter().map(|&c| self.var_map[c]));
        }
        self.reduced = JacobianStamp::new(
            fill.into_iter().map(|s| s.into_iter().collect()).collect(),
        );
        self.col_map = self
            .full
            .rows
            .iter()
            .enumerate()
            .map(|(row, cols)| {
                let reduced_row = self.reduced.row(self.var_map[row]);
                cols.iter()
                    .map(|&c| {
                        let target = self.var_map[c];
                        // present by construction of `fill`
                        reduced_row.iter().position(|&rc| rc == target).unwrap_or(0)
                    })
                    .collect()
            })
            .collect();
    }

    /// The stamp as the device declares it in its own numbering.
    pub fn full(&self) -> &JacobianStamp {
        &self.full
    }

    /// The stamp actually registered with the global matrix.
    pub fn reduced(&self) -> &JacobianStamp {
        &self.reduced
    }

    /// Reduced variable for full local variable `var`.
    #[inline]
    pub fn var(&self, var: usize) -> usize {
        self.var_map[var]
    }

    /// Reduced `(row, position)` for full stamp entry `(row, position)`.
    #[inline]
    pub fn entry(&self, row: usize, pos: usize) -> (usize, usize) {
        (self.var_map[row], self.col_map[row][pos])
    }

    /// Whether any variable was collapsed.
    pub fn is_collapsed(&self) -> bool {
        self.reduced.num_rows() != self.full.num_rows()
    }

    /// Number of variables in the reduced numbering.
    pub fn num_reduced_vars(&self) -> usize {
        self.reduced.num_rows()
    }
}

/// Per-type cache of shared stamps.
///
/// Owned by the device manager and handed to device constructors, so the
/// "build once per type" property holds without process-wide statics.
#[derive(Debug, Default)]
pub struct StampRegistry {
    stamps: HashMap<(DeviceKind, &'static str), Arc<StampMap>>,
}

impl StampRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared stamp for `(kind, variant)`, building it on first use.
    pub fn get_or_build<F>(&mut self, kind: DeviceKind, variant: &'static str, build: F) -> Result<Arc<StampMap>>
    where
        F: FnOnce() -> Result<StampMap>,
    {
        if let Some(map) = self.stamps.get(&(kind, variant)) {
            return Ok(Arc::clone(map));
        }
        let map = Arc::new(build()?);
        log::debug!("built {kind} jacobian stamp '{variant}' ({} entries)", map.reduced().num_entries());
        self.stamps.insert((kind, variant), Arc::clone(&map));
        Ok(map)
    }

    /// Previously built stamp, if any.
    pub fn get(&self, kind: DeviceKind, variant: &'static str) -> Option<Arc<StampMap>> {
        self.stamps.get(&(kind, variant)).cloned()
    }

    /// Number of cached stamps.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
