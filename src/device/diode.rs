//! Junction diode with series resistance.
//!
//! Uses the Shockley diode equation on the internal junction `P -> cathode`:
//!   Id = Is * (exp(Vd / (n * Vt)) - 1)
//!
//! Above `v_crit` the exponential is continued linearly with the slope it has
//! at `v_crit`, which keeps Newton iterates finite while leaving the
//! derivative continuous. Stored charge is `tt * Id + cj * Vd`.
//!
//! The series resistance sits between the anode and an internal node `P`.
//! With `rs == 0` the internal node is collapsed into the anode and the
//! device registers the reduced 2x2 stamp.

use crate::assembly::{EvalContext, VectorHistory};
use crate::error::{DaeError, Result};
use crate::linalg::SparseMatrix;
use crate::THERMAL_VOLTAGE;

use super::{
    DeviceInstance, DeviceKind, InstanceCore, JacobianStamp, StampMap, StampRegistry,
    VariableLayout,
};

const ANODE: usize = 0;
const CATHODE: usize = 1;
const INTERNAL: usize = 2;

/// Leakage conductance in parallel with the junction.
const GMIN: f64 = 1e-12;

/// Parameters for a diode model.
#[derive(Debug, Clone)]
pub struct DiodeParams {
    /// Saturation current (Is), typically 1e-14 to 1e-12 A
    pub is: f64,
    /// Ideality factor (n), typically 1.0 to 2.0
    pub n: f64,
    /// Series resistance; zero collapses the internal node
    pub rs: f64,
    /// Transit time
    pub tt: f64,
    /// Junction capacitance (voltage independent)
    pub cj: f64,
    /// Junction voltage above which the current is continued linearly
    pub v_crit: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self {
            is: 1e-14,
            n: 1.0,
            rs: 0.0,
            tt: 0.0,
            cj: 0.0,
            v_crit: 0.7, // About 27 * Vt
        }
    }
}

impl DiodeParams {
    /// Create parameters for a germanium diode (lower forward voltage).
    pub fn germanium() -> Self {
        Self {
            is: 1e-9,
            n: 1.5,
            v_crit: 0.5,
            ..Self::default()
        }
    }

    pub fn with_rs(mut self, rs: f64) -> Self {
        self.rs = rs;
        self
    }

    pub fn with_charge(mut self, tt: f64, cj: f64) -> Self {
        self.tt = tt;
        self.cj = cj;
        self
    }

    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * THERMAL_VOLTAGE
    }

    fn validate(&self, name: &str) -> Result<()> {
        let checks = [
            ("IS", self.is, self.is > 0.0),
            ("N", self.n, self.n > 0.0),
            ("RS", self.rs, self.rs >= 0.0),
            ("TT", self.tt, self.tt >= 0.0),
            ("CJ", self.cj, self.cj >= 0.0),
        ];
        for (param, value, ok) in checks {
            if !value.is_finite() || !ok {
                return Err(DaeError::invalid_parameter(
                    name,
                    param,
                    format!("out of range: {value}"),
                ));
            }
        }
        Ok(())
    }
}

/// A diode component.
#[derive(Debug, Clone)]
pub struct Diode {
    core: InstanceCore,
    pub params: DiodeParams,

    // Intermediates
    v_series: f64,
    v_junction: f64,
    id: f64,
    gd: f64,
    charge: f64,
}

impl Diode {
    /// Create a new diode between `nodes = [anode, cathode]`.
    pub fn new(name: &str, nodes: [&str; 2], params: DiodeParams, stamps: &mut StampRegistry) -> Result<Self> {
        params.validate(name)?;
        // anode: [anode, P]  cathode: [cathode, P]  P: [anode, cathode, P]
        let full = || {
            JacobianStamp::new(vec![
                vec![ANODE, INTERNAL],
                vec![CATHODE, INTERNAL],
                vec![ANODE, CATHODE, INTERNAL],
            ])
        };
        let (stamp, layout) = if params.rs > 0.0 {
            let stamp = stamps.get_or_build(DeviceKind::Diode, "rs", || Ok(StampMap::identity(full())))?;
            (stamp, VariableLayout::new(2, 1, 1, 1))
        } else {
            let stamp = stamps.get_or_build(DeviceKind::Diode, "no-rs", || {
                StampMap::identity(full()).collapse(INTERNAL, ANODE)
            })?;
            (stamp, VariableLayout::new(2, 0, 1, 1))
        };
        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Diode,
                nodes.iter().map(|n| n.to_string()).collect(),
                layout,
                stamp,
            ),
            params,
            v_series: 0.0,
            v_junction: 0.0,
            id: 0.0,
            gd: 0.0,
            charge: 0.0,
        })
    }

    /// Calculate the junction current at a given voltage.
    pub fn current(&self, v: f64) -> f64 {
        let p = &self.params;
        let n_vt = p.n_vt();
        let i = if v > p.v_crit {
            // Linear extrapolation for high forward bias
            let e = (p.v_crit / n_vt).exp();
            p.is * (e - 1.0) + p.is / n_vt * e * (v - p.v_crit)
        } else {
            p.is * ((v / n_vt).exp() - 1.0)
        };
        i + GMIN * v
    }

    /// Calculate the conductance (dI/dV) at a given voltage.
    pub fn conductance(&self, v: f64) -> f64 {
        let p = &self.params;
        let n_vt = p.n_vt();
        p.is / n_vt * (v.min(p.v_crit) / n_vt).exp() + GMIN
    }

    /// Junction current at the last update.
    pub fn junction_current(&self) -> f64 {
        self.id
    }
}

impl DeviceInstance for Diode {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn internal_names(&self) -> Vec<String> {
        if self.core.stamp_map().is_collapsed() {
            Vec::new()
        } else {
            vec![format!("{}_internal", self.core.name())]
        }
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        let x = &solution.next;
        self.v_series = lids.read(x, ANODE) - lids.read(x, INTERNAL);
        self.v_junction = lids.read(x, INTERNAL) - lids.read(x, CATHODE);
        self.id = self.current(self.v_junction);
        self.gd = self.conductance(self.v_junction);
        self.charge = self.params.tt * self.id + self.params.cj * self.v_junction;
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
        _state_deriv: &[f64],
        store_next: &mut [f64],
    ) -> Result<()> {
        let stores = self.core.stores()?;
        store_next[stores[0]] = self.id;
        Ok(())
    }

    fn load_q_vector(&self, q: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        lids.add(q, INTERNAL, self.charge);
        lids.add(q, CATHODE, -self.charge);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        if self.params.rs > 0.0 {
            let i_rs = self.v_series / self.params.rs;
            lids.add(f, ANODE, i_rs);
            lids.add(f, INTERNAL, -i_rs);
        }
        lids.add(f, INTERNAL, self.id);
        lids.add(f, CATHODE, -self.id);
        Ok(())
    }

    fn load_dq_dx(&self, dq_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        let cd = self.params.tt * self.gd + self.params.cj;
        jac.add(dq_dx, INTERNAL, 2, cd);
        jac.add(dq_dx, INTERNAL, 1, -cd);
        jac.add(dq_dx, CATHODE, 0, cd);
        jac.add(dq_dx, CATHODE, 1, -cd);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        if self.params.rs > 0.0 {
            let gs = 1.0 / self.params.rs;
            jac.add(df_dx, ANODE, 0, gs);
            jac.add(df_dx, ANODE, 1, -gs);
            jac.add(df_dx, INTERNAL, 0, -gs);
            jac.add(df_dx, INTERNAL, 2, gs);
        }
        let gd = self.gd;
        jac.add(df_dx, INTERNAL, 2, gd);
        jac.add(df_dx, INTERNAL, 1, -gd);
        jac.add(df_dx, CATHODE, 0, gd);
        jac.add(df_dx, CATHODE, 1, -gd);
        Ok(())
    }
}
