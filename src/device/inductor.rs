//! Linear inductor with a branch-current unknown.
//!
//! ```text
//! F[pos] += i        F[neg] -= i        F[bra] += -(v_pos - v_neg)
//! Q[bra] += L * i
//! ```
//!
//! With `IC=` given, the DC operating point treats the inductor as a current
//! source of value `IC`. The branch equation then degenerates to a diagonal
//! placeholder that finite differences cannot reproduce, so that element is
//! reported as untestable.

use crate::assembly::{EvalContext, VectorHistory};
use crate::error::{DaeError, Result};
use crate::linalg::SparseMatrix;

use super::{
    DeviceInstance, DeviceKind, InstanceCore, JacobianStamp, StampMap, StampRegistry,
    VariableLayout,
};

const POS: usize = 0;
const NEG: usize = 1;
const BRA: usize = 2;

/// pos: [bra], neg: [bra], bra: [pos, neg, bra]
fn inductor_stamp() -> JacobianStamp {
    JacobianStamp::new(vec![vec![BRA], vec![BRA], vec![POS, NEG, BRA]])
}

/// An inductor between two nodes.
#[derive(Debug, Clone)]
pub struct Inductor {
    core: InstanceCore,
    pub inductance: f64,
    /// Initial branch current
    pub ic: Option<f64>,

    // Intermediates
    v_drop: f64,
    current: f64,
    flux: f64,
    ic_active: bool,
}

impl Inductor {
    /// Create a new inductor between `nodes = [positive, negative]`.
    pub fn new(
        name: &str,
        nodes: [&str; 2],
        inductance: f64,
        ic: Option<f64>,
        stamps: &mut StampRegistry,
    ) -> Result<Self> {
        if !inductance.is_finite() || inductance <= 0.0 {
            return Err(DaeError::invalid_parameter(
                name,
                "L",
                format!("inductance must be positive, got {inductance}"),
            ));
        }
        let stamp = stamps.get_or_build(DeviceKind::Inductor, "base", || {
            Ok(StampMap::identity(inductor_stamp()))
        })?;
        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Inductor,
                nodes.iter().map(|n| n.to_string()).collect(),
                VariableLayout::new(2, 1, 1, 0),
                stamp,
            ),
            inductance,
            ic,
            v_drop: 0.0,
            current: 0.0,
            flux: 0.0,
            ic_active: false,
        })
    }
}

impl DeviceInstance for Inductor {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn internal_names(&self) -> Vec<String> {
        vec![format!("{}_branch", self.core.name())]
    }

    fn update_intermediate_vars(&mut self, ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        self.ic_active = ctx.dc_op && self.ic.is_some();
        self.v_drop = lids.read(&solution.next, POS) - lids.read(&solution.next, NEG);
        self.current = match self.ic {
            Some(ic) if self.ic_active => ic,
            _ => lids.read(&solution.next, BRA),
        };
        self.flux = self.inductance * self.current;
        Ok(())
    }

    fn update_primary_state(&mut self, _ctx: &EvalContext, state_next: &mut [f64]) -> Result<()> {
        let states = self.core.states()?;
        state_next[states[0]] = self.flux;
        Ok(())
    }

    fn load_q_vector(&self, q: &mut [f64]) -> Result<()> {
        self.core.lids()?.add(q, BRA, self.flux);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        let coef = if self.ic_active { 0.0 } else { -self.v_drop };
        lids.add(f, POS, self.current);
        lids.add(f, NEG, -self.current);
        lids.add(f, BRA, coef);
        Ok(())
    }

    fn load_dq_dx(&self, dq_dx: &mut SparseMatrix) -> Result<()> {
        // flux is pinned to L * IC
        if self.ic_active {
            return Ok(());
        }
        self.core.jac()?.add(dq_dx, BRA, 2, self.inductance);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        if self.ic_active {
            // current source at the operating point; keep the branch row nonsingular
            jac.add(df_dx, BRA, 2, 1.0);
        } else {
            jac.add(df_dx, POS, 0, 1.0);
            jac.add(df_dx, NEG, 0, -1.0);
            jac.add(df_dx, BRA, 0, -1.0);
            jac.add(df_dx, BRA, 1, 1.0);
        }
        Ok(())
    }

    fn set_initial_conditions(&mut self, solution: &mut VectorHistory, state: &mut VectorHistory) -> Result<()> {
        let Some(ic) = self.ic else {
            return Ok(());
        };
        let bra = self.core.lids()?.var(BRA);
        let flux_id = self.core.states()?[0];
        solution.curr[bra] = ic;
        solution.next[bra] = ic;
        state.curr[flux_id] = self.inductance * ic;
        state.next[flux_id] = self.inductance * ic;
        self.flux = self.inductance * ic;
        Ok(())
    }

    fn test_exempt(&self, row: usize, col: usize, ctx: &EvalContext) -> bool {
        ctx.dc_op && self.ic.is_some() && row == BRA && col == BRA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::bind;
    use approx::assert_relative_eq;

    fn inductor(ic: Option<f64>) -> Inductor {
        Inductor::new("L1", ["a", "0"], 1e-3, ic, &mut StampRegistry::new()).unwrap()
    }

    #[test]
    fn test_inductor_transient_loads() {
        let mut l = inductor(None);
        let mut bench = bind(&mut l, &[1, 0], 2);
        // ids: gnd 0, a 1, branch 2
        bench.solution.next = vec![0.0, 0.5, 2.0];
        bench.load(&mut l, &EvalContext::transient(0.0, 1e-6, 1));

        assert_relative_eq!(bench.f[1], 2.0);
        assert_relative_eq!(bench.f[0], -2.0);
        assert_relative_eq!(bench.f[2], -0.5);
        assert_relative_eq!(bench.q[2], 2e-3);
        assert_relative_eq!(bench.state.next[0], 2e-3);
        assert_relative_eq!(bench.dq_dx.get(2, 2), 1e-3);
        assert_relative_eq!(bench.df_dx.get(1, 2), 1.0);
        assert_relative_eq!(bench.df_dx.get(2, 1), -1.0);
        assert_relative_eq!(bench.df_dx.get(2, 0), 1.0);
    }

    #[test]
    fn test_inductor_ic_at_operating_point() {
        let mut l = inductor(Some(0.25));
        let mut bench = bind(&mut l, &[1, 0], 2);
        bench.solution.next = vec![0.0, 3.0, 9.0];
        let ctx = EvalContext::dc_op();
        bench.load(&mut l, &ctx);

        assert_relative_eq!(bench.f[1], 0.25);
        assert_eq!(bench.f[2], 0.0);
        assert_relative_eq!(bench.df_dx.get(2, 2), 1.0);
        assert_eq!(bench.df_dx.get(1, 2), 0.0);
        // the flux does not follow the branch variable
        assert_relative_eq!(bench.q[2], 0.25e-3);
        assert_eq!(bench.dq_dx.get(2, 2), 0.0);
        assert!(l.test_exempt(BRA, BRA, &ctx));
        assert!(!l.test_exempt(POS, BRA, &ctx));
        assert!(!l.test_exempt(BRA, BRA, &EvalContext::transient(0.0, 1e-6, 1)));
    }

    #[test]
    fn test_inductor_set_ic() {
        let mut l = inductor(Some(0.1));
        let mut bench = bind(&mut l, &[1, 0], 2);
        l.set_initial_conditions(&mut bench.solution, &mut bench.state)
            .unwrap();
        assert_eq!(bench.solution.curr[2], 0.1);
        assert_relative_eq!(bench.state.curr[0], 1e-4);
    }
}
