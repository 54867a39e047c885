//! Linear-algebra containers shared by the assembler and the verifier.
//!
//! Factorization and solving belong to the outer nonlinear driver; this
//! module only provides the storage the devices load into.

mod sparse;

pub use sparse::{SparseMatrix, SparsityPattern};
