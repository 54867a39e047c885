//! Index registry: the local-to-global (LID) bookkeeping of one instance.
//!
//! Registration happens in two independent phases after topology
//! resolution. Variable, state and store indices come first; Jacobian
//! offsets follow once the global sparsity pattern is frozen. Every
//! registration is accepted exactly once and must match the declared
//! layout; anything else is a fatal setup error.

use crate::error::{DaeError, Registration, Result, VariableClass};
use crate::linalg::SparseMatrix;

use super::stamp::{JacobianStamp, StampMap};

/// Declared variable counts of an instance (reduced numbering).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableLayout {
    pub ext: usize,
    pub int: usize,
    pub state: usize,
    pub store: usize,
}

impl VariableLayout {
    pub fn new(ext: usize, int: usize, state: usize, store: usize) -> Self {
        Self {
            ext,
            int,
            state,
            store,
        }
    }

    /// External plus internal variables.
    pub fn num_vars(&self) -> usize {
        self.ext + self.int
    }
}

/// Registered global indices of one instance.
#[derive(Debug, Clone)]
pub struct IndexRegistry {
    instance: String,
    layout: VariableLayout,
    /// external then internal global ids, empty until registered
    vars: Option<Vec<usize>>,
    states: Option<Vec<usize>>,
    stores: Option<Vec<usize>>,
    jac_offsets: Option<Vec<Vec<usize>>>,
}

impl IndexRegistry {
    pub fn new(instance: impl Into<String>, layout: VariableLayout) -> Self {
        Self {
            instance: instance.into(),
            layout,
            vars: None,
            states: None,
            stores: None,
            jac_offsets: None,
        }
    }

    pub fn layout(&self) -> VariableLayout {
        self.layout
    }

    fn check_count(&self, class: VariableClass, expected: usize, ids: &[usize]) -> Result<()> {
        if ids.len() != expected {
            return Err(DaeError::count_mismatch(
                &self.instance,
                class,
                expected,
                ids.len(),
            ));
        }
        Ok(())
    }

    fn check_fresh<T>(&self, slot: &Option<T>, what: Registration) -> Result<()> {
        if slot.is_some() {
            return Err(DaeError::AlreadyRegistered {
                instance: self.instance.clone(),
                what,
            });
        }
        Ok(())
    }

    /// Register external and internal solution-variable indices.
    pub fn register_indices(&mut self, ext: &[usize], int: &[usize]) -> Result<()> {
        self.check_fresh(&self.vars, Registration::Indices)?;
        self.check_count(VariableClass::External, self.layout.ext, ext)?;
        self.check_count(VariableClass::Internal, self.layout.int, int)?;
        let mut vars = Vec::with_capacity(ext.len() + int.len());
        vars.extend_from_slice(ext);
        vars.extend_from_slice(int);
        log::debug!("{}: registered variable indices {:?}", self.instance, vars);
        self.vars = Some(vars);
        Ok(())
    }

    /// Register state-vector indices.
    pub fn register_state_indices(&mut self, states: &[usize]) -> Result<()> {
        self.check_fresh(&self.states, Registration::StateIndices)?;
        self.check_count(VariableClass::State, self.layout.state, states)?;
        self.states = Some(states.to_vec());
        Ok(())
    }

    /// Register store-vector indices.
    pub fn register_store_indices(&mut self, stores: &[usize]) -> Result<()> {
        self.check_fresh(&self.stores, Registration::StoreIndices)?;
        self.check_count(VariableClass::Store, self.layout.store, stores)?;
        self.stores = Some(stores.to_vec());
        Ok(())
    }

    /// Register row-local matrix offsets, one per stamp entry.
    pub fn register_jacobian_indices(&mut self, offsets: Vec<Vec<usize>>, stamp: &JacobianStamp) -> Result<()> {
        self.check_fresh(&self.jac_offsets, Registration::JacobianIndices)?;
        if offsets.len() != stamp.num_rows() {
            return Err(DaeError::JacobianShapeMismatch {
                instance: self.instance.clone(),
                row: offsets.len().min(stamp.num_rows()),
                message: format!(
                    "{} offset rows for {} stamp rows",
                    offsets.len(),
                    stamp.num_rows()
                ),
            });
        }
        for (row, (offs, cols)) in offsets.iter().zip(stamp.rows()).enumerate() {
            if offs.len() != cols.len() {
                return Err(DaeError::JacobianShapeMismatch {
                    instance: self.instance.clone(),
                    row,
                    message: format!("{} offsets for {} stamp columns", offs.len(), cols.len()),
                });
            }
        }
        self.jac_offsets = Some(offsets);
        Ok(())
    }

    /// Whether a registration step has happened.
    pub fn is_registered(&self, what: Registration) -> bool {
        match what {
            Registration::Indices => self.vars.is_some(),
            Registration::StateIndices => self.states.is_some(),
            Registration::StoreIndices => self.stores.is_some(),
            Registration::JacobianIndices => self.jac_offsets.is_some(),
        }
    }

    fn missing(&self, what: Registration) -> DaeError {
        DaeError::not_registered(&self.instance, what)
    }

    /// External then internal global ids.
    pub fn vars(&self) -> Result<&[usize]> {
        self.vars
            .as_deref()
            .ok_or_else(|| self.missing(Registration::Indices))
    }

    /// State-vector global ids.
    pub fn states(&self) -> Result<&[usize]> {
        self.states
            .as_deref()
            .ok_or_else(|| self.missing(Registration::StateIndices))
    }

    /// Store-vector global ids.
    pub fn stores(&self) -> Result<&[usize]> {
        self.stores
            .as_deref()
            .ok_or_else(|| self.missing(Registration::StoreIndices))
    }

    /// Cached row-local offsets per stamp row.
    pub fn jac_offsets(&self) -> Result<&[Vec<usize>]> {
        self.jac_offsets
            .as_deref()
            .ok_or_else(|| self.missing(Registration::JacobianIndices))
    }
}

/// Solution indices seen through a device's full local numbering.
#[derive(Debug, Clone, Copy)]
pub struct Lids<'a> {
    vars: &'a [usize],
    map: &'a StampMap,
}

impl<'a> Lids<'a> {
    pub(crate) fn new(vars: &'a [usize], map: &'a StampMap) -> Self {
        Self { vars, map }
    }

    /// Global id of full local variable `local`.
    #[inline]
    pub fn var(&self, local: usize) -> usize {
        self.vars[self.map.var(local)]
    }

    /// Read a vector entry for full local variable `local`.
    #[inline]
    pub fn read(&self, vec: &[f64], local: usize) -> f64 {
        vec[self.var(local)]
    }

    /// Accumulate into a vector entry for full local variable `local`.
    #[inline]
    pub fn add(&self, vec: &mut [f64], local: usize, value: f64) {
        vec[self.var(local)] += value;
    }
}

/// Matrix offsets seen through a device's full local numbering.
#[derive(Debug, Clone, Copy)]
pub struct JacLids<'a> {
    vars: &'a [usize],
    offsets: &'a [Vec<usize>],
    map: &'a StampMap,
}

impl<'a> JacLids<'a> {
    pub(crate) fn new(vars: &'a [usize], offsets: &'a [Vec<usize>], map: &'a StampMap) -> Self {
        Self { vars, offsets, map }
    }

    /// Global row and row-local offset of full stamp entry `(row, pos)`.
    #[inline]
    pub fn entry(&self, row: usize, pos: usize) -> (usize, usize) {
        let (r, p) = self.map.entry(row, pos);
        (self.vars[r], self.offsets[r][p])
    }

    /// Accumulate into the matrix element of full stamp entry `(row, pos)`.
    #[inline]
    pub fn add(&self, matrix: &mut SparseMatrix, row: usize, pos: usize, value: f64) {
        let (global_row, offset) = self.entry(row, pos);
        matrix.add_at(global_row, offset, value);
    }
}
