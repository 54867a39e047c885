//! Leaky integrate-and-fire neuron between a membrane node and a reference.
//!
//! ```text
//! q = Cm * vm                         vm = v_mem - v_ref
//! F[mem] += gL * (vm - EL) [+ g_reset * (vm - v_reset) while firing]
//! ```
//!
//! The neuron fires when the last accepted membrane voltage reached the
//! threshold. The decision reads `solution.curr` only, so it cannot flip
//! while Newton (or the finite-difference verifier) perturbs `solution.next`.
//! There is no firing at the DC operating point.

use crate::assembly::{EvalContext, VectorHistory};
use crate::error::{DaeError, Result};
use crate::linalg::SparseMatrix;

use super::{
    two_terminal_stamp, DeviceInstance, DeviceKind, InstanceCore, StampMap, StampRegistry,
    VariableLayout,
};

const MEM: usize = 0;
const REF: usize = 1;

/// Membrane parameters.
#[derive(Debug, Clone)]
pub struct NeuronParams {
    /// Membrane capacitance
    pub cm: f64,
    /// Leak conductance
    pub g_leak: f64,
    /// Leak reversal potential
    pub e_leak: f64,
    /// Firing threshold
    pub v_thresh: f64,
    /// Potential the reset branch pulls towards
    pub v_reset: f64,
    /// Conductance of the reset branch
    pub g_reset: f64,
}

impl Default for NeuronParams {
    fn default() -> Self {
        Self {
            cm: 1e-9,
            g_leak: 1e-7,
            e_leak: -0.065,
            v_thresh: -0.050,
            v_reset: -0.070,
            g_reset: 1e-3,
        }
    }
}

/// An integrate-and-fire neuron.
#[derive(Debug, Clone)]
pub struct Neuron {
    core: InstanceCore,
    pub params: NeuronParams,
    spikes: u64,
    last_spike_step: Option<usize>,

    // Intermediates
    vm: f64,
    firing: bool,
    counted: bool,
}

impl Neuron {
    /// Create a neuron with `nodes = [membrane, reference]`.
    pub fn new(name: &str, nodes: [&str; 2], params: NeuronParams, stamps: &mut StampRegistry) -> Result<Self> {
        if !(params.cm > 0.0 && params.g_leak >= 0.0 && params.g_reset >= 0.0) {
            return Err(DaeError::invalid_parameter(
                name,
                "CM",
                "membrane capacitance must be positive and conductances non-negative",
            ));
        }
        if params.v_reset >= params.v_thresh {
            return Err(DaeError::invalid_parameter(
                name,
                "VRESET",
                "reset potential must lie below the threshold",
            ));
        }
        let stamp = stamps.get_or_build(DeviceKind::Neuron, "base", || {
            Ok(StampMap::identity(two_terminal_stamp()))
        })?;
        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Neuron,
                nodes.iter().map(|n| n.to_string()).collect(),
                VariableLayout::new(2, 0, 1, 1),
                stamp,
            ),
            params,
            spikes: 0,
            last_spike_step: None,
            vm: 0.0,
            firing: false,
            counted: false,
        })
    }

    /// Spikes counted so far.
    pub fn spikes(&self) -> u64 {
        self.spikes
    }

    pub fn is_firing(&self) -> bool {
        self.firing
    }

    fn conductance(&self) -> f64 {
        if self.firing {
            self.params.g_leak + self.params.g_reset
        } else {
            self.params.g_leak
        }
    }
}

impl DeviceInstance for Neuron {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        self.vm = lids.read(&solution.next, MEM) - lids.read(&solution.next, REF);
        let vm_accepted = lids.read(&solution.curr, MEM) - lids.read(&solution.curr, REF);
        self.firing = !ctx.dc_op && vm_accepted >= self.params.v_thresh;
        // one spike per step, however many passes the step takes
        self.counted = self.firing && self.last_spike_step != Some(ctx.step_number);
        Ok(())
    }

    fn update_primary_state(&mut self, _ctx: &EvalContext, state_next: &mut [f64]) -> Result<()> {
        let states = self.core.states()?;
        state_next[states[0]] = self.params.cm * self.vm;
        Ok(())
    }

    fn update_secondary_state(
        &mut self,
        ctx: &EvalContext,
        _state_deriv: &[f64],
        store_next: &mut [f64],
    ) -> Result<()> {
        let stores = self.core.stores()?;
        if self.counted {
            self.spikes += 1;
            self.last_spike_step = Some(ctx.step_number);
            self.counted = false;
            log::debug!("{} fired at t = {:e}", self.core.name(), ctx.time);
        }
        store_next[stores[0]] = self.spikes as f64;
        Ok(())
    }

    fn load_q_vector(&self, q: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        let charge = self.params.cm * self.vm;
        lids.add(q, MEM, charge);
        lids.add(q, REF, -charge);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        let p = &self.params;
        let mut i = p.g_leak * (self.vm - p.e_leak);
        if self.firing {
            i += p.g_reset * (self.vm - p.v_reset);
        }
        lids.add(f, MEM, i);
        lids.add(f, REF, -i);
        Ok(())
    }

    fn load_dq_dx(&self, dq_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        let c = self.params.cm;
        jac.add(dq_dx, MEM, MEM, c);
        jac.add(dq_dx, MEM, REF, -c);
        jac.add(dq_dx, REF, MEM, -c);
        jac.add(dq_dx, REF, REF, c);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        let g = self.conductance();
        jac.add(df_dx, MEM, MEM, g);
        jac.add(df_dx, MEM, REF, -g);
        jac.add(df_dx, REF, MEM, -g);
        jac.add(df_dx, REF, REF, g);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::bind;
    use approx::assert_relative_eq;

    fn neuron() -> Neuron {
        Neuron::new("N1", ["m", "0"], NeuronParams::default(), &mut StampRegistry::new()).unwrap()
    }

    #[test]
    fn test_no_firing_at_operating_point() {
        let mut n = neuron();
        let mut bench = bind(&mut n, &[1, 0], 2);
        bench.solution.curr = vec![0.0, 0.0];
        bench.solution.next = vec![0.0, 0.0];
        bench.load(&mut n, &EvalContext::dc_op());
        assert!(!n.is_firing());
        assert_relative_eq!(bench.df_dx.get(1, 1), 1e-7);
    }

    #[test]
    fn test_fires_from_accepted_solution() {
        let mut n = neuron();
        let mut bench = bind(&mut n, &[1, 0], 2);
        bench.solution.curr = vec![0.0, -0.040];
        bench.solution.next = vec![0.0, -0.060];
        let ctx = EvalContext::transient(1e-3, 1e-5, 7);
        bench.load(&mut n, &ctx);
        assert!(n.is_firing());
        assert_relative_eq!(bench.df_dx.get(1, 1), 1e-7 + 1e-3);
        let expected = 1e-7 * (-0.060 + 0.065) + 1e-3 * (-0.060 + 0.070);
        assert_relative_eq!(bench.f[1], expected);
        assert_eq!(bench.store.next[0], 1.0);

        // more passes within the same step do not count again
        bench.load(&mut n, &ctx);
        assert_eq!(n.spikes(), 1);

        bench.load(&mut n, &EvalContext::transient(1.01e-3, 1e-5, 8));
        assert_eq!(n.spikes(), 2);
    }

    #[test]
    fn test_reset_must_be_below_threshold() {
        let params = NeuronParams {
            v_reset: 0.0,
            ..NeuronParams::default()
        };
        assert!(Neuron::new("N1", ["m", "0"], params, &mut StampRegistry::new()).is_err());
    }
}
