//! Diagnostics for device derivatives.
//!
//! - [`JacobianVerifier`] compares each instance's analytic dF/dx and dQ/dx
//!   against one-sided finite differences and renders a [`JacobianReport`].
//! - [`audit_instance`] checks that an instance only writes the elements its
//!   Jacobian stamp declares.

mod audit;
mod numerical;
mod report;

pub use audit::{audit_instance, StampViolation};
pub use numerical::{relative_error, JacobianVerifier};
pub use report::{JacobianComparison, JacobianReport, MatrixKind, TestStatus};
