//! Independent voltage and current sources.
//!
//! Source values are folded into F, so `B(t)` stays empty for these devices
//! and the verifier sees them as ordinary constant-in-x contributions.

use std::f64::consts::PI;

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

/// Time dependence of a source value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Constant value
    Dc(f64),
    /// `offset + amplitude * sin(2*pi*freq*(t - delay))` for `t >= delay`
    Sine {
        offset: f64,
        amplitude: f64,
        freq: f64,
        delay: f64,
    },
}

impl Waveform {
    /// Value at `ctx.time`; the DC operating point sees the offset.
    pub fn value(&self, ctx: &EvalContext) -> f64 {
        match *self {
            Waveform::Dc(v) => v,
            Waveform::Sine {
                offset,
                amplitude,
                freq,
                delay,
            } => {
                if ctx.dc_op || ctx.time < delay {
                    offset
                } else {
                    offset + amplitude * (2.0 * PI * freq * (ctx.time - delay)).sin()
                }
            }
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if let Waveform::Sine { freq, .. } = *self {
            if !freq.is_finite() || freq < 0.0 {
                return Err(DaeError::invalid_parameter(
                    name,
                    "FREQ",
                    format!("frequency must be non-negative, got {freq}"),
                ));
            }
        }
        Ok(())
    }
}

/// A voltage source.
///
/// The branch current is an internal unknown. The source enforces
/// `V+ - V- = V_source`.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    core: InstanceCore,
    pub waveform: Waveform,

    // Intermediates
    v_drop: f64,
    current: f64,
    source: f64,
}

impl VoltageSource {
    /// Create a new voltage source between `nodes = [positive, negative]`.
    pub fn new(name: &str, nodes: [&str; 2], waveform: Waveform, stamps: &mut StampRegistry) -> Result<Self> {
        waveform.validate(name)?;
        let stamp = stamps.get_or_build(DeviceKind::VoltageSource, "base", || {
            Ok(StampMap::identity(JacobianStamp::new(vec![
                vec![BRA],
                vec![BRA],
                vec![POS, NEG],
            ])))
        })?;
        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::VoltageSource,
                nodes.iter().map(|n| n.to_string()).collect(),
                VariableLayout::new(2, 1, 0, 0),
                stamp,
            ),
            waveform,
            v_drop: 0.0,
            current: 0.0,
            source: 0.0,
        })
    }

    /// Branch current at the last update.
    pub fn current(&self) -> f64 {
        self.current
    }
}

impl DeviceInstance for VoltageSource {
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
        self.v_drop = lids.read(&solution.next, POS) - lids.read(&solution.next, NEG);
        self.current = lids.read(&solution.next, BRA);
        self.source = self.waveform.value(ctx);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        lids.add(f, POS, self.current);
        lids.add(f, NEG, -self.current);
        lids.add(f, BRA, self.v_drop - self.source);
        Ok(())
    }

    fn load_df_dx(&self, df_dx: &mut SparseMatrix) -> Result<()> {
        let jac = self.core.jac()?;
        jac.add(df_dx, POS, 0, 1.0);
        jac.add(df_dx, NEG, 0, -1.0);
        jac.add(df_dx, BRA, 0, 1.0);
        jac.add(df_dx, BRA, 1, -1.0);
        Ok(())
    }
}

/// A current source; current flows from + through the source to -.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    core: InstanceCore,
    pub waveform: Waveform,
    source: f64,
}

impl CurrentSource {
    /// Create a new current source between `nodes = [positive, negative]`.
    pub fn new(name: &str, nodes: [&str; 2], waveform: Waveform, stamps: &mut StampRegistry) -> Result<Self> {
        waveform.validate(name)?;
        let stamp = stamps.get_or_build(DeviceKind::CurrentSource, "base", || {
            Ok(StampMap::identity(JacobianStamp::empty(2)))
        })?;
        Ok(Self {
            core: InstanceCore::new(
                name,
                DeviceKind::CurrentSource,
                nodes.iter().map(|n| n.to_string()).collect(),
                VariableLayout::new(2, 0, 0, 0),
                stamp,
            ),
            waveform,
            source: 0.0,
        })
    }
}

impl DeviceInstance for CurrentSource {
    fn core(&self) -> &InstanceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstanceCore {
        &mut self.core
    }

    fn update_intermediate_vars(&mut self, ctx: &EvalContext, _solution: &VectorHistory) -> Result<()> {
        self.source = self.waveform.value(ctx);
        Ok(())
    }

    fn load_f_vector(&self, f: &mut [f64]) -> Result<()> {
        let lids = self.core.lids()?;
        lids.add(f, POS, self.source);
        lids.add(f, NEG, -self.source);
        Ok(())
    }

    fn load_df_dx(&self, _df_dx: &mut SparseMatrix) -> Result<()> {
        self.core.jac()?;
        Ok(())
    }
}
