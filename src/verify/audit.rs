//! Stamp conformance audit.
//!
//! One instance is loaded into zeroed copies of the global structures, and
//! every nonzero it produced is checked against the `(row, col)` pairs its
//! stamp declares. Writes to rows it did not register are flagged as well.
//! The global system itself is left untouched.

use std::collections::HashSet;
use std::fmt;

use crate::assembly::{DaeMatrices, DaeVectors, EvalContext, VariableNames};
use crate::device::DeviceInstance;
use crate::error::{DaeError, Result};
use crate::linalg::SparseMatrix;

/// A nonzero element an instance wrote outside its stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct StampViolation {
    pub instance: String,
    /// "dFdx", "dQdx", "F" or "Q"
    pub matrix: &'static str,
    pub row: usize,
    /// Global column, `None` for vector rows
    pub col: Option<usize>,
    pub value: f64,
}

impl StampViolation {
    /// Convert into the crate error, naming the variables involved.
    pub fn into_error(self, names: &VariableNames) -> DaeError {
        DaeError::StampViolation {
            instance: self.instance,
            matrix: self.matrix,
            row_name: names.name(self.row).to_string(),
            col_name: self
                .col
                .map(|c| names.name(c).to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl fmt::Display for StampViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.col {
            Some(col) => write!(
                f,
                "{}: {} element ({}, {}) = {:e} outside stamp",
                self.instance, self.matrix, self.row, col, self.value
            ),
            None => write!(
                f,
                "{}: {} row {} = {:e} not registered",
                self.instance, self.matrix, self.row, self.value
            ),
        }
    }
}

/// Load `dev` in isolation and report out-of-stamp writes.
pub fn audit_instance(
    dev: &mut dyn DeviceInstance,
    ctx: &EvalContext,
    vectors: &DaeVectors,
    matrices: &DaeMatrices,
) -> Result<Vec<StampViolation>> {
    let vars = dev.core().registry().vars()?.to_vec();
    let allowed: HashSet<(usize, usize)> = dev
        .jacobian_stamp()
        .pairs()
        .map(|(r, c)| (vars[r], vars[c]))
        .collect();
    let rows: HashSet<usize> = vars.iter().copied().collect();

    let mut scratch = vectors.clone();
    scratch.zero_residuals();
    let mut df_dx = matrices.df_dx.clone();
    let mut dq_dx = matrices.dq_dx.clone();
    df_dx.clear();
    dq_dx.clear();

    dev.update_intermediate_vars(ctx, &scratch.solution)?;
    dev.update_primary_state(ctx, &mut scratch.state.next)?;
    scratch.update_state_derivs(ctx);
    dev.update_secondary_state(ctx, &scratch.state_deriv, &mut scratch.store.next)?;
    dev.load_q_vector(&mut scratch.q)?;
    dev.load_f_vector(&mut scratch.f)?;
    dev.load_dq_dx(&mut dq_dx)?;
    dev.load_df_dx(&mut df_dx)?;
    // leave the instance consistent with the real system
    dev.update_intermediate_vars(ctx, &vectors.solution)?;

    let name = dev.name().to_string();
    let mut violations = Vec::new();
    for (label, matrix) in [("dFdx", &df_dx), ("dQdx", &dq_dx)] {
        violations.extend(matrix_violations(&name, label, matrix, &allowed));
    }
    for (label, vec) in [("F", &scratch.f), ("Q", &scratch.q)] {
        violations.extend(
            vec.iter()
                .enumerate()
                .filter(|&(row, &v)| v != 0.0 && !rows.contains(&row))
                .map(|(row, &value)| StampViolation {
                    instance: name.clone(),
                    matrix: label,
                    row,
                    col: None,
                    value,
                }),
        );
    }
    for v in &violations {
        log::error!("{v}");
    }
    Ok(violations)
}

fn matrix_violations<'a>(
    instance: &'a str,
    label: &'static str,
    matrix: &'a SparseMatrix,
    allowed: &'a HashSet<(usize, usize)>,
) -> impl Iterator<Item = StampViolation> + 'a {
    matrix
        .triplets()
        .filter(move |&(r, c, v)| v != 0.0 && !allowed.contains(&(r, c)))
        .map(move |(row, col, value)| StampViolation {
            instance: instance.to_string(),
            matrix: label,
            row,
            col: Some(col),
            value,
        })
}
