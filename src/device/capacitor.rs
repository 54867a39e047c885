//! Linear capacitor, charge-based.
//!
//! ```text
//! q = C * (v_pos - v_neg)
//! Q[pos] += q        Q[neg] -= q
//! ```
//!
//! `IC=` adds a branch-current unknown. At the DC operating point the branch
//! carries the current needed to hold `v_pos - v_neg = IC`; afterwards the
//! branch row only keeps the matrix nonsingular and its diagonal is not
//! testable by finite differences.

use crate::assembly::{EvalContext, VectorHistory};
use crate::error::{DaeError, Result};
use crate::linalg::SparseMatrix;

use super::{
    two_terminal_stamp, DeviceInstance, DeviceKind, InstanceCore, JacobianStamp, StampMap,
    StampRegistry, VariableLayout,
};

const POS: usize = 0;
const NEG: usize = 1;
const BRA: usize = 2;

/// A capacitor between two nodes.
#[derive(Debug, Clone)]
pub struct Capacitor {
    core: InstanceCore,
    pub capacitance: f64,
    /// Initial voltage across the capacitor
    pub ic: Option<f64>,

    // Intermediates
    v_drop: f64,
    charge: f64,
    i_branch: f64,
    ic_active: bool,
}

impl Capacitor {
    /// Create a new capacitor between `nodes = [positive, negative]`.
    pub fn new(
        name: &str,
        nodes: [&str; 2],
        capacitance: f64,
        ic: Option<f64>,
        stamps: &mut StampRegistry,
    ) -> Result<Self> {
        if !capacitance.is_finite() || capacitance < 0.0 {
            return Err(DaeError::invalid_parameter(
                name,
                "C",
                format!("capacitance must be non-negative, got {capacitance}"),
            ));
        }
        let (stamp, layout) = if ic.is_some() {
            let stamp = stamps.get_or_build(DeviceKind::Capacitor, "ic", || {
                Ok(StampMap::identity(JacobianStamp::dense(3)))
            })?;
            (stamp, VariableLayout::new(2, 1, 1, 1))
        } else {
            let stamp = stamps.get_or_build(DeviceKind::Capacitor, "base", || {
                Ok(StampMap::identity(two_terminal_stamp()))
            })?;
            (stamp, VariableLayout::new(2, 0, 1, 1))
        };
        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Capacitor,
                nodes.iter().map(|n| n.to_string()).collect(),
                layout,
                stamp,
            ),
            capacitance,
            ic,
            v_drop: 0.0,
            charge: 0.0,
            i_branch: 0.0,
            ic_active: false,
        })
    }
}

impl DeviceInstance for Capacitor {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn internal_names(&self) -> Vec<String> {
        if self.ic.is_some() {
            vec![format!("{}_branch", self.core.name())]
        } else {
            Vec::new()
        }
    }

    fn update_intermediate_vars(&mut self, ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        self.ic_active = ctx.dc_op && self.ic.is_some();
        self.v_drop = lids.read(&solution.next, POS) - lids.read(&solution.next, NEG);
        let v_cap = match self.ic {
            Some(ic) if self.ic_active => ic,
            _ => self.v_drop,
        };
        self.charge = self.capacitance * v_cap;
        self.i_branch = if self.ic.is_some() {
            lids.read(&solution.next, BRA)
        } else {
            0.0
        };
        Ok(())
    }

    fn update_primary_state(&mut self, _ctx: &EvalContext, state_next: &mut [f64]) -> Result<()> {
        let states = self.core.states()?;
        state_next[states[0]] = self.charge;
        Ok(())
    }

    fn update_secondary_state(
        &mut self,
        _ctx: &EvalContext,
        state_deriv: &[f64],
        store_next: &mut [f64],
    ) -> Result<()> {
        let states = self.core.states()?;
        let stores = self.core.stores()?;
        store_next[stores[0]] = if self.ic_active {
            self.i_branch
        } else {
            state_deriv[states[0]]
        };
        Ok(())
    }

    fn load_q_vector(&self, q: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        lids.add(q, POS, self.charge);
        lids.add(q, NEG, -self.charge);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        if let Some(ic) = self.ic {
            let lids = self.core.lids()?;
            if self.ic_active {
                lids.add(f, POS, self.i_branch);
                lids.add(f, NEG, -self.i_branch);
                lids.add(f, BRA, self.v_drop - ic);
            }
        }
        Ok(())
    }

    fn load_dq_dx(&self, dq_dx: &mut SparseMatrix) -> Result<()> {
        if self.ic_active {
            return Ok(());
        }
        let jac = self.core.jac()?;
        let c = self.capacitance;
        jac.add(dq_dx, POS, POS, c);
        jac.add(dq_dx, POS, NEG, -c);
        jac.add(dq_dx, NEG, POS, -c);
        jac.add(dq_dx, NEG, NEG, c);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        if self.ic.is_none() {
            return Ok(());
        }
        // the IC stamp is dense, so a position equals its column
        let jac = self.core.jac()?;
        if self.ic_active {
            jac.add(df_dx, POS, BRA, 1.0);
            jac.add(df_dx, NEG, BRA, -1.0);
            jac.add(df_dx, BRA, POS, 1.0);
            jac.add(df_dx, BRA, NEG, -1.0);
        } else {
            jac.add(df_dx, BRA, BRA, 1.0);
        }
        Ok(())
    }

    fn set_initial_conditions(&mut self, _solution: &mut VectorHistory, state: &mut VectorHistory) -> Result<()> {
        let Some(ic) = self.ic else {
            return Ok(());
        };
        let q_id = self.core.states()?[0];
        self.charge = self.capacitance * ic;
        state.curr[q_id] = self.charge;
        state.next[q_id] = self.charge;
        Ok(())
    }

    fn test_exempt(&self, row: usize, col: usize, ctx: &EvalContext) -> bool {
        !ctx.dc_op && self.ic.is_some() && row == BRA && col == BRA
    }
}
