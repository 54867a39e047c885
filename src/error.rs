//! Error types for the DAE assembly core.
//!
//! This module provides a unified error type [`DaeError`] that covers
//! every failure the core can report: registration defects, structural
//! violations of the frozen sparsity pattern, load-cycle ordering mistakes
//! and numerical Jacobian test failures.
//!
//! Configuration and structural errors are fatal: a device that registers
//! the wrong number of indices corrupts the shared matrix for every other
//! device, so callers are expected to abort setup instead of recovering.

use thiserror::Error;

use crate::assembly::LoadPhase;

/// Result type alias using [`DaeError`].
pub type Result<T> = std::result::Result<T, DaeError>;

/// Which class of variable an index array refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableClass {
    External,
    Internal,
    State,
    Store,
}

impl std::fmt::Display for VariableClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VariableClass::External => "external",
            VariableClass::Internal => "internal",
            VariableClass::State => "state",
            VariableClass::Store => "store",
        };
        f.write_str(s)
    }
}

/// Which registration step a load or query depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Indices,
    StateIndices,
    StoreIndices,
    JacobianIndices,
}

impl std::fmt::Display for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Registration::Indices => "variable indices",
            Registration::StateIndices => "state indices",
            Registration::StoreIndices => "store indices",
            Registration::JacobianIndices => "jacobian indices",
        };
        f.write_str(s)
    }
}

/// Unified error type for all DAE core operations.
#[derive(Error, Debug)]
pub enum DaeError {
    // ============ Registration Errors ============
    /// Supplied index array does not match the declared variable count
    #[error("Instance '{instance}': {class} index count mismatch (declared {expected}, supplied {actual})")]
    IndexCountMismatch {
        instance: String,
        class: VariableClass,
        expected: usize,
        actual: usize,
    },

    /// Jacobian offsets do not have the shape of the stamp
    #[error("Instance '{instance}': jacobian offsets do not match stamp shape at row {row}: {message}")]
    JacobianShapeMismatch {
        instance: String,
        row: usize,
        message: String,
    },

    /// A registration step was performed twice
    #[error("Instance '{instance}': {what} registered more than once")]
    AlreadyRegistered { instance: String, what: Registration },

    /// A load or query happened before the registration it depends on
    #[error("Instance '{instance}': {what} used before registration")]
    NotRegistered { instance: String, what: Registration },

    /// Two instances share a name
    #[error("Duplicate instance name '{name}'")]
    DuplicateInstance { name: String },

    /// A terminal references a node the topology does not know
    #[error("Instance '{instance}' references unknown node '{node}'")]
    UnknownNode { instance: String, node: String },

    /// Invalid device parameter value
    #[error("Invalid parameter '{param}' for instance '{instance}': {message}")]
    InvalidParameter {
        instance: String,
        param: String,
        message: String,
    },

    /// Unknown or malformed option in the device option block
    #[error("Invalid device option '{option}': {message}")]
    InvalidOption { option: String, message: String },

    // ============ Structural Errors ============
    /// Matrix element is not part of the frozen sparsity pattern
    #[error("Element ({row}, {col}) is outside the matrix sparsity pattern")]
    OutsidePattern { row: usize, col: usize },

    /// An instance wrote a matrix element its stamp does not declare
    #[error("Instance '{instance}' wrote {matrix} element ({row_name}, {col_name}) outside its jacobian stamp")]
    StampViolation {
        instance: String,
        matrix: &'static str,
        row_name: String,
        col_name: String,
    },

    /// Load-cycle phases were invoked out of order
    #[error("Load phase {requested} requested after {current} in the same pass")]
    PhaseOrder {
        current: LoadPhase,
        requested: LoadPhase,
    },

    /// A stamp collapse referenced invalid rows
    #[error("Invalid stamp collapse of {from} into {to}: {message}")]
    InvalidCollapse {
        from: usize,
        to: usize,
        message: String,
    },

    // ============ Verification Errors ============
    /// Analytic and numerical jacobians disagree
    #[error("Numerical jacobian test failure for '{instance}' ({failures} failing entries); set warn_on_failure to demote this to a warning")]
    JacobianTestFailure { instance: String, failures: usize },
}

impl DaeError {
    /// Create an index count mismatch error
    pub fn count_mismatch(
        instance: impl Into<String>,
        class: VariableClass,
        expected: usize,
        actual: usize,
    ) -> Self {
        Self::IndexCountMismatch {
            instance: instance.into(),
            class,
            expected,
            actual,
        }
    }

    /// Create a not-registered error
    pub fn not_registered(instance: impl Into<String>, what: Registration) -> Self {
        Self::NotRegistered {
            instance: instance.into(),
            what,
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        instance: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            instance: instance.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create an invalid option error
    pub fn invalid_option(option: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            message: message.into(),
        }
    }

    /// Whether the error is a fatal setup defect (as opposed to a test failure).
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, DaeError::JacobianTestFailure { .. })
    }
}
