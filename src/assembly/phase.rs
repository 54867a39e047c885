//! Load-cycle state machine.

use std::fmt;

use crate::error::{DaeError, Result};

/// One step of the per-pass load cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadPhase {
    UpdateIntermediateVars,
    UpdatePrimaryState,
    UpdateSecondaryState,
    LoadQVector,
    LoadFVector,
    LoadDQdx,
    LoadDFdx,
}

impl LoadPhase {
    /// All phases in order.
    pub const ALL: [LoadPhase; 7] = [
        LoadPhase::UpdateIntermediateVars,
        LoadPhase::UpdatePrimaryState,
        LoadPhase::UpdateSecondaryState,
        LoadPhase::LoadQVector,
        LoadPhase::LoadFVector,
        LoadPhase::LoadDQdx,
        LoadPhase::LoadDFdx,
    ];

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<LoadPhase> {
        let pos = Self::ALL.iter().position(|&p| p == self)?;
        Self::ALL.get(pos + 1).copied()
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadPhase::UpdateIntermediateVars => "UpdateIntermediateVars",
            LoadPhase::UpdatePrimaryState => "UpdatePrimaryState",
            LoadPhase::UpdateSecondaryState => "UpdateSecondaryState",
            LoadPhase::LoadQVector => "LoadQVector",
            LoadPhase::LoadFVector => "LoadFVector",
            LoadPhase::LoadDQdx => "LoadDQdx",
            LoadPhase::LoadDFdx => "LoadDFdx",
        };
        f.write_str(s)
    }
}

/// Tracks which phase a collection reached in the current pass.
///
/// A pass begins with [`LoadPhase::UpdateIntermediateVars`]; every later
/// phase must come strictly after the previous one. Phases may be skipped.
#[derive(Debug, Clone, Default)]
pub struct PassTracker {
    current: Option<LoadPhase>,
}

impl PassTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last phase entered in this pass.
    pub fn current(&self) -> Option<LoadPhase> {
        self.current
    }

    /// Move to `phase`, failing if that would go backwards within the pass.
    pub fn advance(&mut self, phase: LoadPhase) -> Result<()> {
        match self.current {
            _ if phase == LoadPhase::UpdateIntermediateVars => {}
            None => {
                return Err(DaeError::PhaseOrder {
                    current: LoadPhase::UpdateIntermediateVars,
                    requested: phase,
                })
            }
            Some(current) if phase <= current => {
                return Err(DaeError::PhaseOrder {
                    current,
                    requested: phase,
                })
            }
            Some(_) => {}
        }
        self.current = Some(phase);
        Ok(())
    }

    /// Forget the current pass.
    pub fn reset(&mut self) {
        self.current = None;
    }
}
