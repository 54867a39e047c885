//! Linear resistor.
//!
//! ```text
//! F[pos] += G * (v_pos - v_neg)
//! F[neg] -= G * (v_pos - v_neg)
//! ```
//!
//! The lead current is kept in one store variable.

use crate::assembly::{EvalContext, VectorHistory};
use crate::error::{DaeError, Result};
use crate::linalg::SparseMatrix;

use super::{
    two_terminal_stamp, DeviceInstance, DeviceKind, InstanceCore, StampMap, StampRegistry,
    VariableLayout,
};

const POS: usize = 0;
const NEG: usize = 1;

/// A resistor between two nodes.
#[derive(Debug, Clone)]
pub struct Resistor {
    core: InstanceCore,
    pub resistance: f64,
    /// Voltage across the resistor at the last update
    v_drop: f64,
}

impl Resistor {
    /// Create a new resistor between `nodes = [positive, negative]`.
    pub fn new(name: &str, nodes: [&str; 2], resistance: f64, stamps: &mut StampRegistry) -> Result<Self> {
        if !resistance.is_finite() || resistance <= 0.0 {
            return Err(DaeError::invalid_parameter(
                name,
                "R",
                format!("resistance must be positive, got {resistance}"),
            ));
        }
        let stamp = stamps.get_or_build(DeviceKind::Resistor, "base", || {
            Ok(StampMap::identity(two_terminal_stamp()))
        })?;
        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Resistor,
                nodes.iter().map(|n| n.to_string()).collect(),
                VariableLayout::new(2, 0, 0, 1),
                stamp,
            ),
            resistance,
            v_drop: 0.0,
        })
    }

    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }

    /// Current through the resistor at the last update.
    pub fn current(&self) -> f64 {
        self.conductance() * self.v_drop
    }
}

impl DeviceInstance for Resistor {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        self.v_drop = lids.read(&solution.next, POS) - lids.read(&solution.next, NEG);
        Ok(())
    }

    fn update_secondary_state(
        &mut self,
        _ctx: &EvalContext,
        _state_deriv: &[f64],
        store_next: &mut [f64],
    ) -> Result<()> {
        let stores = self.core.stores()?;
        store_next[stores[0]] = self.current();
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        let i = self.current();
        lids.add(f, POS, i);
        lids.add(f, NEG, -i);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        let g = self.conductance();
        jac.add(df_dx, POS, 0, g);
        jac.add(df_dx, POS, 1, -g);
        jac.add(df_dx, NEG, 0, -g);
        jac.add(df_dx, NEG, 1, g);
        Ok(())
    }
}
