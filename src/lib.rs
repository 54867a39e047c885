//! # DAE Core
//!
//! Device load-cycle assembly and numerical Jacobian verification for
//! circuit simulators.
//!
//! A circuit is treated as the differential-algebraic system
//!
//! ```text
//! dQ(x)/dt + F(x) - B(t) = 0
//! ```
//!
//! where every device instance contributes to the residuals F and Q and to
//! their Jacobians dF/dx and dQ/dx. Source values are folded into F.
//!
//! ## Architecture
//!
//! - [`device`] - the [`DeviceInstance`] contract, index registration,
//!   Jacobian stamps and a set of reference devices
//! - [`assembly`] - evaluation context, load phases and the global vectors
//!   and matrices
//! - [`manager`] - [`DeviceManager`], which owns the instances, binds them to
//!   a topology and drives the load cycle
//! - [`verify`] - the finite-difference Jacobian test and the stamp audit
//! - [`options`] - the device option block
//! - [`linalg`] - the frozen-pattern sparse matrix
//!
//! ## Usage
//!
//! ```no_run
//! use dae_core::device::{Resistor, VoltageSource, Waveform};
//! use dae_core::{DeviceManager, DeviceOptions, EvalContext};
//!
//! # fn main() -> dae_core::Result<()> {
//! let mut mgr = DeviceManager::with_options(DeviceOptions::new().with_test_jacobian(true));
//! let v = VoltageSource::new("V1", ["in", "0"], Waveform::Dc(1.0), mgr.stamps_mut())?;
//! let r = Resistor::new("R1", ["in", "0"], 100.0, mgr.stamps_mut())?;
//! mgr.add_instance(Box::new(v))?;
//! mgr.add_instance(Box::new(r))?;
//!
//! let topology = mgr.topology();
//! let mut sys = mgr.bind(&topology)?;
//! let ctx = EvalContext::dc_op();
//! sys.zero_loads();
//! mgr.update_state(&ctx, &mut sys.vectors)?;
//! sys.vectors.update_state_derivs(&ctx);
//! mgr.load_dae_vectors(&ctx, &mut sys.vectors)?;
//! mgr.load_dae_matrices(&ctx, &mut sys.vectors, &mut sys.matrices)?;
//! # Ok(())
//! # }
//! ```

pub mod assembly;
pub mod device;
pub mod error;
pub mod linalg;
pub mod manager;
pub mod options;
pub mod verify;

// Re-export main types for convenience
pub use assembly::{DaeMatrices, DaeSystem, DaeVectors, EvalContext, LoadPhase, VariableNames};
pub use device::{DeviceInstance, DeviceKind, JacobianStamp};
pub use error::{DaeError, Result};
pub use manager::{DeviceManager, Topology};
pub use options::DeviceOptions;
pub use verify::{JacobianReport, JacobianVerifier, TestStatus};

/// Thermal voltage at room temperature (approximately 26mV)
pub const THERMAL_VOLTAGE: f64 = 0.0258;
