//! All instances of one device kind, driven one phase at a time.

use crate::assembly::{EvalContext, LoadPhase, PassTracker, VectorHistory};
use crate::device::{DeviceInstance, DeviceKind};
use crate::error::Result;
use crate::linalg::SparseMatrix;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Instances of a single [`DeviceKind`], in insertion order.
#[derive(Debug)]
pub struct DeviceCollection {
    kind: DeviceKind,
    instances: Vec<Box<dyn DeviceInstance>>,
    tracker: PassTracker,
}

impl DeviceCollection {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            instances: Vec::new(),
            tracker: PassTracker::new(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub(crate) fn push(&mut self, dev: Box<dyn DeviceInstance>) -> usize {
        self.instances.push(dev);
        self.instances.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&dyn DeviceInstance> {
        self.instances.get(index).map(|d| d.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn DeviceInstance + 'static)> {
        self.instances.get_mut(index).map(|d| d.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn DeviceInstance> {
        self.instances.iter().map(|d| d.as_ref())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn DeviceInstance>> {
        self.instances.iter_mut()
    }

    /// Phase the collection reached in the current pass.
    pub fn phase(&self) -> Option<LoadPhase> {
        self.tracker.current()
    }

    /// Start a pass: every instance reads the solution.
    pub fn update_intermediate_vars(&mut self, ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        self.tracker.advance(LoadPhase::UpdateIntermediateVars)?;
        self.each_intermediate(ctx, solution)
    }

    #[cfg(feature = "parallel")]
    fn each_intermediate(&mut self, ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        // read-only access to the solution, private caches per instance
        self.instances
            .par_iter_mut()
            .try_for_each(|dev| dev.update_intermediate_vars(ctx, solution))
    }

    #[cfg(not(feature = "parallel"))]
    fn each_intermediate(&mut self, ctx: &EvalContext, solution: &VectorHistory) -> Result<()> {
        for dev in &mut self.instances {
            dev.update_intermediate_vars(ctx, solution)?;
        }
        Ok(())
    }

    pub fn update_primary_state(&mut self, ctx: &EvalContext, state_next: &mut [f64]) -> Result<()> {
        self.tracker.advance(LoadPhase::UpdatePrimaryState)?;
        for dev in &mut self.instances {
            dev.update_primary_state(ctx, state_next)?;
        }
        Ok(())
    }

    pub fn update_secondary_state(
        &mut self,
        ctx: &EvalContext,
        state_deriv: &[f64],
        store_next: &mut [f64],
    ) -> Result<()> {
        self.tracker.advance(LoadPhase::UpdateSecondaryState)?;
        for dev in &mut self.instances {
            dev.update_secondary_state(ctx, state_deriv, store_next)?;
        }
        Ok(())
    }

    pub fn load_q_vector(&mut self, q: &mut [f64]) -> Result<()> {
        self.tracker.advance(LoadPhase::LoadQVector)?;
        self.instances.iter().try_for_each(|dev| dev.load_q_vector(q))
    }

    pub fn load_f_vector(&mut self, f: &mut [f64]) -> Result<()> {
        self.tracker.advance(LoadPhase::LoadFVector)?;
        self.instances.iter().try_for_each(|dev| dev.load_f_vector(f))
    }

    pub fn load_dq_dx(&mut self, dq_dx: &mut SparseMatrix) -> Result<()> {
        self.tracker.advance(LoadPhase::LoadDQdx)?;
        self.instances.iter().try_for_each(|dev| dev.load_dq_dx(dq_dx))
    }

    pub fn load_df_dx(&mut self, df_dx: &mut SparseMatrix) -> Result<()> {
        self.tracker.advance(LoadPhase::LoadDFdx)?;
        self.instances.iter().try_for_each(|dev| dev.load_df_dx(df_dx))
    }
}
