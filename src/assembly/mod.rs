//! DAE assembler: the per-pass load cycle every device obeys.
//!
//! Each evaluation pass runs, strictly in order:
//!
//! ```text
//! UpdateIntermediateVars -> UpdatePrimaryState -> UpdateSecondaryState
//!     -> LoadQVector -> LoadFVector -> LoadDQdx -> LoadDFdx
//! ```
//!
//! The first three phases read the global solution and fill per-instance
//! caches and the state/store vectors. The load phases only ever
//! accumulate (`+=`) into the global F, Q, dF/dx and dQ/dx, so instances
//! sharing a circuit node never depend on each other's write order.

mod context;
mod phase;
mod system;

pub use context::EvalContext;
pub use phase::{LoadPhase, PassTracker};
pub use system::{DaeMatrices, DaeSystem, DaeVectors, VariableNames, VectorHistory};
