//! Lumped RC transmission line.
//!
//! The line is split into `segments` equal resistors between `in` and `out`.
//! Each of the `segments - 1` internal nodes carries an equal share of the
//! total capacitance to the `ref` terminal. The variable count depends on a
//! parameter, so every instance builds its own stamp.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::assembly::{EvalContext, VectorHistory};
use crate::error::{DaeError, Result};
use crate::linalg::SparseMatrix;

use super::{DeviceInstance, DeviceKind, InstanceCore, JacobianStamp, StampMap, VariableLayout};

const IN: usize = 0;
const OUT: usize = 1;
const REF: usize = 2;

/// Stamp positions of a two-node element: (a,a) (a,b) (b,a) (b,b).
#[derive(Debug, Clone, Copy)]
struct Branch {
    a: usize,
    b: usize,
    pos: [usize; 4],
}

/// A distributed RC line.
#[derive(Debug, Clone)]
pub struct RcLine {
    core: InstanceCore,
    pub resistance: f64,
    pub capacitance: f64,
    pub segments: usize,
    resistors: Vec<Branch>,
    capacitors: Vec<Branch>,

    // Intermediates: node voltages along the line, `in` first
    v: Vec<f64>,
}

impl RcLine {
    /// Create a line with `nodes = [in, out, ref]`.
    pub fn new(name: &str, nodes: [&str; 3], resistance: f64, capacitance: f64, segments: usize) -> Result<Self> {
        if segments == 0 {
            return Err(DaeError::invalid_parameter(name, "N", "at least one segment required"));
        }
        if !(resistance > 0.0 && resistance.is_finite()) {
            return Err(DaeError::invalid_parameter(
                name,
                "R",
                format!("resistance must be positive, got {resistance}"),
            ));
        }
        if !(capacitance >= 0.0 && capacitance.is_finite()) {
            return Err(DaeError::invalid_parameter(
                name,
                "C",
                format!("capacitance must be non-negative, got {capacitance}"),
            ));
        }

        let num_internal = segments - 1;
        let num_vars = 3 + num_internal;
        // local variable of the k-th node along the line
        let node = |k: usize| match k {
            0 => IN,
            k if k == segments => OUT,
            k => REF + k,
        };
        let resistor_pairs: Vec<(usize, usize)> = (0..segments).map(|k| (node(k), node(k + 1))).collect();
        let capacitor_pairs: Vec<(usize, usize)> = (1..segments).map(|k| (node(k), REF)).collect();

        let mut fill = vec![BTreeSet::new(); num_vars];
        for &(a, b) in resistor_pairs.iter().chain(&capacitor_pairs) {
            fill[a].extend([a, b]);
            fill[b].extend([a, b]);
        }
        let stamp = JacobianStamp::new(fill.into_iter().map(|s| s.into_iter().collect()).collect());

        let branch = |(a, b): (usize, usize)| -> Result<Branch> {
            let pos = |row: usize, col: usize| {
                stamp
                    .position(row, col)
                    .ok_or(DaeError::OutsidePattern { row, col })
            };
            Ok(Branch {
                a,
                b,
                pos: [pos(a, a)?, pos(a, b)?, pos(b, a)?, pos(b, b)?],
            })
        };
        let resistors = resistor_pairs.into_iter().map(branch).collect::<Result<Vec<_>>>()?;
        let capacitors = capacitor_pairs.into_iter().map(branch).collect::<Result<Vec<_>>>()?;
        log::debug!("{name}: rc line stamp with {} entries", stamp.num_entries());

        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::RcLine,
                nodes.iter().map(|n| n.to_string()).collect(),
                VariableLayout::new(3, num_internal, num_internal, 0),
                Arc::new(StampMap::identity(stamp)),
            ),
            resistance,
            capacitance,
            segments,
            resistors,
            capacitors,
            v: vec![0.0; num_vars],
        })
    }

    fn segment_conductance(&self) -> f64 {
        self.segments as f64 / self.resistance
    }

    fn node_capacitance(&self) -> f64 {
        if self.segments > 1 {
            self.capacitance / (self.segments - 1) as f64
        } else {
            0.0
        }
    }

    fn stamp_branch(&self, matrix: &mut SparseMatrix, br: &Branch, g: f64) -> Result<()> {
        let jac = self.core.jac()?;
        jac.add(matrix, br.a, br.pos[0], g);
        jac.add(matrix, br.a, br.pos[1], -g);
        jac.add(matrix, br.b, br.pos[2], -g);
        jac.add(matrix, br.b, br.pos[3], g);
        Ok(())
    }
}

impl DeviceInstance for RcLine {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn internal_names(&self) -> Vec<String> {
        (1..self.segments)
            .map(|k| format!("{}_node{}", self.core.name(), k))
            .collect()
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        for (local, v) in self.v.iter_mut().enumerate() {
            *v = lids.read(&solution.next, local);
        }
        Ok(())
    }

    fn update_primary_state(&mut self, _ctx: &EvalContext, state_next: &mut [f64]) -> Result<()> {
        let states = self.core.states()?;
        let c = self.node_capacitance();
        for (br, &id) in self.capacitors.iter().zip(states) {
            state_next[id] = c * (self.v[br.a] - self.v[br.b]);
        }
        Ok(())
    }

    fn load_q_vector(&self, q: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        let c = self.node_capacitance();
        for br in &self.capacitors {
            let charge = c * (self.v[br.a] - self.v[br.b]);
            lids.add(q, br.a, charge);
            lids.add(q, br.b, -charge);
        }
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        let g = self.segment_conductance();
        for br in &self.resistors {
            let i = g * (self.v[br.a] - self.v[br.b]);
            lids.add(f, br.a, i);
            lids.add(f, br.b, -i);
        }
        Ok(())
    }

    fn load_dq_dx(&self, dq_dx: &mut SparseMatrix) -> Result<()> {
        let c = self.node_capacitance();
        for br in &self.capacitors {
            self.stamp_branch(dq_dx, br, c)?;
        }
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let g = self.segment_conductance();
        for br in &self.resistors {
            self.stamp_branch(df_dx, br, g)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::bind;
    use approx::assert_relative_eq;

    #[test]
    fn test_stamp_grows_with_segments() {
        let line = RcLine::new("T1", ["a", "b", "0"], 100.0, 1e-9, 4).unwrap();
        let layout = line.layout();
        assert_eq!(layout.int, 3);
        assert_eq!(layout.state, 3);
        assert_eq!(line.jacobian_stamp().num_rows(), 6);
        // ref couples to every internal node and itself
        assert_eq!(line.jacobian_stamp().row(REF), &[2, 3, 4, 5]);
        // in only sees its neighbour
        assert_eq!(line.jacobian_stamp().row(IN), &[0, 3]);
        assert_eq!(line.internal_names()[0], "T1_node1");
    }

    #[test]
    fn test_single_segment_is_a_resistor() {
        let mut line = RcLine::new("T1", ["a", "b", "0"], 50.0, 1e-9, 1).unwrap();
        let mut bench = bind(&mut line, &[1, 2, 0], 3);
        bench.solution.next = vec![0.0, 1.0, 0.0];
        bench.load(&mut line, &EvalContext::dc_op());
        assert_relative_eq!(bench.f[1], 0.02);
        assert_relative_eq!(bench.f[2], -0.02);
        assert_eq!(bench.dq_dx.to_dense().iter().filter(|&&v| v != 0.0).count(), 0);
    }

    #[test]
    fn test_line_loads() {
        let mut line = RcLine::new("T1", ["a", "b", "0"], 100.0, 2e-9, 2).unwrap();
        // ids: gnd 0, a 1, b 2, node1 3
        let mut bench = bind(&mut line, &[1, 2, 0], 3);
        bench.solution.next = vec![0.0, 1.0, 0.0, 0.4];
        bench.load(&mut line, &EvalContext::dc_op());
        let g = 2.0 / 100.0;
        assert_relative_eq!(bench.f[1], g * 0.6);
        assert_relative_eq!(bench.f[3], -g * 0.6 + g * 0.4);
        assert_relative_eq!(bench.q[3], 2e-9 * 0.4);
        assert_relative_eq!(bench.dq_dx.get(3, 3), 2e-9);
        assert_relative_eq!(bench.df_dx.get(3, 3), 2.0 * g);
        assert_relative_eq!(bench.state.next[0], 2e-9 * 0.4);
    }

    #[test]
    fn test_zero_segments_rejected() {
        assert!(RcLine::new("T1", ["a", "b", "0"], 1.0, 1.0, 0).is_err());
    }
}
