//! Synthetic devices and a load-pass helper shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use dae_core::assembly::VectorHistory;
use dae_core::device::{InstanceCore, StampMap, VariableLayout};
use dae_core::linalg::SparseMatrix;
use dae_core::{DaeError, DaeSystem, DeviceInstance, DeviceKind, DeviceManager, EvalContext, JacobianStamp, Result};

/// Run one full load pass over a freshly zeroed system.
pub fn full_pass(mgr: &mut DeviceManager, sys: &mut DaeSystem, ctx: &EvalContext) -> Result<()> {
    sys.zero_loads();
    accumulate_pass(mgr, sys, ctx)
}

/// Run one load pass without zeroing the residuals and matrices first.
pub fn accumulate_pass(mgr: &mut DeviceManager, sys: &mut DaeSystem, ctx: &EvalContext) -> Result<()> {
    mgr.update_state(ctx, &mut sys.vectors)?;
    sys.vectors.update_state_derivs(ctx);
    mgr.load_dae_vectors(ctx, &mut sys.vectors)?;
    mgr.load_dae_matrices(ctx, &mut sys.vectors, &mut sys.matrices)
}

fn terminals(nodes: &[&str]) -> Vec<String> {
    nodes.iter().map(|n| n.to_string()).collect()
}

/// Three-terminal linear block: `F = A x`, `Q = B x`.
#[derive(Debug)]
pub struct LinearBlock {
    core: InstanceCore,
    a: [[f64; 3]; 3],
    b: [[f64; 3]; 3],
    x: [f64; 3],
}

impl LinearBlock {
    pub fn new(name: &str, nodes: [&str; 3], a: [[f64; 3]; 3], b: [[f64; 3]; 3]) -> Self {
        let stamp = Arc::new(StampMap::identity(JacobianStamp::dense(3)));
        Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Custom("linear-block"),
                terminals(&nodes),
                VariableLayout::new(3, 0, 0, 0),
                stamp,
            ),
            a,
            b,
            x: [0.0; 3],
        }
    }
}

impl DeviceInstance for LinearBlock {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        for (i, x) in self.x.iter_mut().enumerate() {
            *x = lids.read(&solution.next, i);
        }
        Ok(())
    }

    fn load_q_vector(&self, q: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        for (i, row) in self.b.iter().enumerate() {
            lids.add(q, i, row.iter().zip(&self.x).map(|(b, x)| b * x).sum());
        }
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        for (i, row) in self.a.iter().enumerate() {
            lids.add(f, i, row.iter().zip(&self.x).map(|(a, x)| a * x).sum());
        }
        Ok(())
    }

    fn load_dq_dx(&self, dq_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        for (i, row) in self.b.iter().enumerate() {
            for (j, &b) in row.iter().enumerate() {
                jac.add(dq_dx, i, j, b);
            }
        }
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        for (i, row) in self.a.iter().enumerate() {
            for (j, &a) in row.iter().enumerate() {
                jac.add(df_dx, i, j, a);
            }
        }
        Ok(())
    }
}

/// Two-terminal element with current `k * v^2` from terminal 0 to 1.
///
/// `slope` scales the analytic derivative; anything but 1 is wrong.
#[derive(Debug)]
pub struct Square {
    core: InstanceCore,
    k: f64,
    slope: f64,
    v: f64,
}

impl Square {
    pub fn new(name: &str, nodes: [&str; 2], k: f64) -> Self {
        let stamp = Arc::new(StampMap::identity(JacobianStamp::dense(2)));
        Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Custom("square"),
                terminals(&nodes),
                VariableLayout::new(2, 0, 0, 0),
                stamp,
            ),
            k,
            slope: 1.0,
            v: 0.0,
        }
    }

    pub fn with_wrong_slope(mut self, slope: f64) -> Self {
        self.slope = slope;
        self
    }
}

impl DeviceInstance for Square {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        self.v = lids.read(&solution.next, 0) - lids.read(&solution.next, 1);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        let i = self.k * self.v * self.v;
        lids.add(f, 0, i);
        lids.add(f, 1, -i);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        let g = self.slope * 2.0 * self.k * self.v;
        jac.add(df_dx, 0, 0, g);
        jac.add(df_dx, 0, 1, -g);
        jac.add(df_dx, 1, 0, -g);
        jac.add(df_dx, 1, 1, g);
        Ok(())
    }
}

/// Conductance that declares only its diagonal but writes the full block.
#[derive(Debug)]
pub struct Sloppy {
    core: InstanceCore,
    g: f64,
    v: f64,
}

impl Sloppy {
    pub fn new(name: &str, nodes: [&str; 2], g: f64) -> Self {
        let stamp = Arc::new(StampMap::identity(JacobianStamp::new(vec![vec![0], vec![1]])));
        Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Custom("sloppy"),
                terminals(&nodes),
                VariableLayout::new(2, 0, 0, 0),
                stamp,
            ),
            g,
            v: 0.0,
        }
    }
}

impl DeviceInstance for Sloppy {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        self.v = lids.read(&solution.next, 0) - lids.read(&solution.next, 1);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        lids.add(f, 0, self.g * self.v);
        lids.add(f, 1, -self.g * self.v);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let lids = self.core.lids()?;
        let (a, b) = (lids.var(0), lids.var(1));
        df_dx.add(a, a, self.g)?;
        df_dx.add(a, b, -self.g)?;
        df_dx.add(b, a, -self.g)?;
        df_dx.add(b, b, self.g)?;
        Ok(())
    }
}

/// Declares three external variables but is built with two terminals.
#[derive(Debug)]
pub struct Miscounted {
    core: InstanceCore,
}

impl Miscounted {
    pub fn new(name: &str, nodes: [&str; 2]) -> Self {
        let stamp = Arc::new(StampMap::identity(JacobianStamp::dense(3)));
        Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Custom("miscounted"),
                terminals(&nodes),
                VariableLayout::new(3, 0, 0, 0),
                stamp,
            ),
        }
    }
}

impl DeviceInstance for Miscounted {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, _solution: &VectorHistory) -> Result<()> {
        Ok(())
    }

    fn load_f_vector(&self, _f: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn load_df_dx(&self, _df_dx: &mut SparseMatrix) -> Result<()> {
        Ok(())
    }
}

/// Conductance that only evaluates at its operating point `x0`.
///
/// Any other terminal voltage, such as a finite-difference perturbation,
/// makes `update_intermediate_vars` fail.
#[derive(Debug)]
pub struct Pinned {
    core: InstanceCore,
    g: f64,
    x0: f64,
    v: f64,
}

impl Pinned {
    pub fn new(name: &str, nodes: [&str; 2], g: f64, x0: f64) -> Self {
        let stamp = Arc::new(StampMap::identity(JacobianStamp::dense(2)));
        Self {
            core: InstanceCore::new(
                name,
                DeviceKind::Custom("pinned"),
                terminals(&nodes),
                VariableLayout::new(2, 0, 0, 0),
                stamp,
            ),
            g,
            x0,
            v: 0.0,
        }
    }
}

impl DeviceInstance for Pinned {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, _ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        let lids = self.core.lids()?;
        let v = lids.read(&solution.next, 0) - lids.read(&solution.next, 1);
        if v != self.x0 {
            return Err(DaeError::invalid_parameter(
                self.core.name(),
                "v",
                format!("{v} is outside the operating point"),
            ));
        }
        self.v = v;
        Ok(())
    }

    fn load_q_vector(&self, q: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        lids.add(q, 0, 1e-9 * self.v);
        lids.add(q, 1, -1e-9 * self.v);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        lids.add(f, 0, self.g * self.v);
        lids.add(f, 1, -self.g * self.v);
        Ok(())
    }

    fn load_dq_dx(&self, dq_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        jac.add(dq_dx, 0, 0, 1e-9);
        jac.add(dq_dx, 0, 1, -1e-9);
        jac.add(dq_dx, 1, 0, -1e-9);
        jac.add(dq_dx, 1, 1, 1e-9);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        jac.add(df_dx, 0, 0, self.g);
        jac.add(df_dx, 0, 1, -self.g);
        jac.add(df_dx, 1, 0, -self.g);
        jac.add(df_dx, 1, 1, self.g);
        Ok(())
    }
}
