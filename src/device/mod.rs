//! Device models and the contract they obey.
//!
//! This module provides the load-cycle contract ([`DeviceInstance`]), the
//! LID bookkeeping every instance carries ([`InstanceCore`]) and a small
//! library of reference devices:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source, Current Source
//! - Nonlinear: Diode, Neuron
//! - Distributed: RC line
//!
//! Each device writes into the shared DAE through its registered global
//! indices only, and only ever accumulates.

mod capacitor;
mod diode;
mod inductor;
mod neuron;
mod rc_line;
mod registry;
mod resistor;
mod sources;
mod stamp;

pub use capacitor::Capacitor;
pub use diode::{Diode, DiodeParams};
pub use inductor::Inductor;
pub use neuron::{Neuron, NeuronParams};
pub use rc_line::RcLine;
pub use registry::{IndexRegistry, JacLids, Lids, VariableLayout};
pub use resistor::Resistor;
pub use sources::{CurrentSource, VoltageSource, Waveform};
pub use stamp::{JacobianStamp, StampMap, StampRegistry};

use std::fmt;
use std::sync::Arc;

use crate::assembly::{EvalContext, VectorHistory};
use crate::error::Result;
use crate::linalg::SparseMatrix;

/// Device type; one collection exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKind {
    Resistor,
    Capacitor,
    Inductor,
    VoltageSource,
    CurrentSource,
    Diode,
    Neuron,
    RcLine,
    /// Device types defined outside this crate
    Custom(&'static str),
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Resistor => "resistor",
            DeviceKind::Capacitor => "capacitor",
            DeviceKind::Inductor => "inductor",
            DeviceKind::VoltageSource => "vsrc",
            DeviceKind::CurrentSource => "isrc",
            DeviceKind::Diode => "diode",
            DeviceKind::Neuron => "neuron",
            DeviceKind::RcLine => "rcline",
            DeviceKind::Custom(name) => name,
        };
        f.write_str(s)
    }
}

/// Identity, terminals and registered indices shared by every device.
#[derive(Debug, Clone)]
pub struct InstanceCore {
    name: String,
    kind: DeviceKind,
    terminals: Vec<String>,
    stamp: Arc<StampMap>,
    registry: IndexRegistry,
}

impl InstanceCore {
    /// Create the core of an instance.
    ///
    /// `layout` counts variables in the reduced numbering of `stamp`.
    pub fn new(
        name: impl Into<String>,
        kind: DeviceKind,
        terminals: Vec<String>,
        layout: VariableLayout,
        stamp: Arc<StampMap>,
    ) -> Self {
        let name = name.into();
        debug_assert_eq!(layout.num_vars(), stamp.num_reduced_vars());
        Self {
            registry: IndexRegistry::new(name.clone(), layout),
            name,
            kind,
            terminals,
            stamp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Node names of the external variables, in local order.
    pub fn terminals(&self) -> &[String] {
        &self.terminals
    }

    pub fn layout(&self) -> VariableLayout {
        self.registry.layout()
    }

    pub fn stamp_map(&self) -> &StampMap {
        &self.stamp
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut IndexRegistry {
        &mut self.registry
    }

    /// Solution indices in full local numbering.
    pub fn lids(&self) -> Result<Lids<'_>> {
        Ok(Lids::new(self.registry.vars()?, &self.stamp))
    }

    /// Matrix offsets in full local numbering.
    pub fn jac(&self) -> Result<JacLids<'_>> {
        Ok(JacLids::new(
            self.registry.vars()?,
            self.registry.jac_offsets()?,
            &self.stamp,
        ))
    }

    pub fn states(&self) -> Result<&[usize]> {
        self.registry.states()
    }

    pub fn stores(&self) -> Result<&[usize]> {
        self.registry.stores()
    }
}

/// The load-cycle contract of one device instance.
///
/// Loads are called in [`LoadPhase`](crate::assembly::LoadPhase) order within
/// a pass. Every load accumulates into the global structures at the
/// instance's registered indices and nowhere else. Index numbering seen by
/// [`test_exempt`](Self::test_exempt) is the reduced local numbering.
pub trait DeviceInstance: fmt::Debug + Send + Sync {
    fn core(&self) -> &InstanceCore;

    fn core_mut(&mut self) -> &mut InstanceCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn kind(&self) -> DeviceKind {
        self.core().kind()
    }

    fn layout(&self) -> VariableLayout {
        self.core().layout()
    }

    /// The stamp registered with the global matrices.
    fn jacobian_stamp(&self) -> &JacobianStamp {
        self.core().stamp_map().reduced()
    }

    /// Names of the internal variables, in local order.
    fn internal_names(&self) -> Vec<String> {
        (0..self.layout().int)
            .map(|i| format!("{}_int{}", self.name(), i))
            .collect()
    }

    fn register_indices(&mut self, ext: &[usize], int: &[usize]) -> Result<()> {
        self.core_mut().registry_mut().register_indices(ext, int)
    }

    fn register_state_indices(&mut self, states: &[usize]) -> Result<()> {
        self.core_mut().registry_mut().register_state_indices(states)
    }

    fn register_store_indices(&mut self, stores: &[usize]) -> Result<()> {
        self.core_mut().registry_mut().register_store_indices(stores)
    }

    fn register_jacobian_indices(&mut self, offsets: Vec<Vec<usize>>) -> Result<()> {
        let core = self.core_mut();
        let stamp = Arc::clone(&core.stamp);
        core.registry_mut()
            .register_jacobian_indices(offsets, stamp.reduced())
    }

    /// Read the solution and cache intermediate quantities.
    fn update_intermediate_vars(&mut self, ctx: &EvalContext, solution: &VectorHistory) -> Result<()>;

    /// Write state variables computed from the cached intermediates.
    fn update_primary_state(&mut self, _ctx: &EvalContext, _state_next: &mut [f64]) -> Result<()> {
        Ok(())
    }

    /// Read state derivatives and write store variables.
    fn update_secondary_state(
        &mut self,
        _ctx: &EvalContext,
        _state_deriv: &[f64],
        _store_next: &mut [f64],
    ) -> Result<()> {
        Ok(())
    }

    /// Accumulate the charge/flux contribution.
    fn load_q_vector(&self, _q: &mut [f64]) -> Result<()> {
        Ok(())
    }

    /// Accumulate the algebraic contribution.
    fn load_f_vector(&self, f: &mut [f64]) -> Result<()>;

    /// Accumulate dQ/dx.
    fn load_dq_dx(&self, _dq_dx: &mut SparseMatrix) -> Result<()> {
        Ok(())
    }

    /// Accumulate dF/dx.
    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()>;

    /// Seed the solution and state with user initial conditions.
    fn set_initial_conditions(&mut self, _solution: &mut VectorHistory, _state: &mut VectorHistory) -> Result<()> {
        Ok(())
    }

    /// Whether `(row, col)` cannot be checked by finite differences in `ctx`.
    fn test_exempt(&self, _row: usize, _col: usize, _ctx: &EvalContext) -> bool {
        false
    }
}

/// Shared stamps for the two-terminal kinds.
pub(crate) fn two_terminal_stamp() -> JacobianStamp {
    JacobianStamp::dense(2)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers that bind a single instance to a tiny private system.

    use super::*;
    use crate::linalg::{SparseMatrix, SparsityPattern};

    /// Global ids: ground is 0, external nodes and internals follow.
    pub struct Bench {
        pub solution: VectorHistory,
        pub state: VectorHistory,
        pub state_deriv: Vec<f64>,
        pub store: VectorHistory,
        pub f: Vec<f64>,
        pub q: Vec<f64>,
        pub df_dx: SparseMatrix,
        pub dq_dx: SparseMatrix,
    }

    /// Register `dev` with `ext` as its external ids and fresh ids for the rest.
    pub fn bind(dev: &mut dyn DeviceInstance, ext: &[usize], size: usize) -> Bench {
        let layout = dev.layout();
        let int: Vec<usize> = (0..layout.int).map(|i| size + i).collect();
        let n = size + layout.int;
        dev.register_indices(ext, &int).unwrap();
        let states: Vec<usize> = (0..layout.state).collect();
        let stores: Vec<usize> = (0..layout.store).collect();
        dev.register_state_indices(&states).unwrap();
        dev.register_store_indices(&stores).unwrap();

        let vars: Vec<usize> = ext.iter().chain(&int).copied().collect();
        let mut pattern = SparsityPattern::new(n);
        for (r, c) in dev.jacobian_stamp().pairs() {
            pattern.insert(vars[r], vars[c]).unwrap();
        }
        let df_dx = pattern.build();
        let offsets = dev
            .jacobian_stamp()
            .rows()
            .iter()
            .enumerate()
            .map(|(r, cols)| {
                cols.iter()
                    .map(|&c| df_dx.col_offset(vars[r], vars[c]).unwrap())
                    .collect()
            })
            .collect();
        dev.register_jacobian_indices(offsets).unwrap();

        Bench {
            solution: VectorHistory::new(n),
            state: VectorHistory::new(layout.state),
            state_deriv: vec![0.0; layout.state],
            store: VectorHistory::new(layout.store),
            f: vec![0.0; n],
            q: vec![0.0; n],
            dq_dx: df_dx.clone(),
            df_dx,
        }
    }

    impl Bench {
        /// One full load pass.
        pub fn load(&mut self, dev: &mut dyn DeviceInstance, ctx: &EvalContext) {
            self.f.fill(0.0);
            self.q.fill(0.0);
            self.df_dx.clear();
            self.dq_dx.clear();
            dev.update_intermediate_vars(ctx, &self.solution).unwrap();
            dev.update_primary_state(ctx, &mut self.state.next).unwrap();
            let pdt = ctx.pdt();
            for ((d, n), c) in self
                .state_deriv
                .iter_mut()
                .zip(&self.state.next)
                .zip(&self.state.curr)
            {
                *d = pdt * (n - c);
            }
            dev.update_secondary_state(ctx, &self.state_deriv, &mut self.store.next)
                .unwrap();
            dev.load_q_vector(&mut self.q).unwrap();
            dev.load_f_vector(&mut self.f).unwrap();
            dev.load_dq_dx(&mut self.dq_dx).unwrap();
            dev.load_df_dx(&mut self.df_dx).unwrap();
        }
    }
}
