//! Solver-phase information handed to every load-cycle call.

/// Immutable evaluation context for one load pass.
///
/// Devices never read solver flags from ambient state; whatever they need
/// to pick an algebraic branch is in here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalContext {
    /// DC operating point (true) or transient (false)
    pub dc_op: bool,
    /// Newton iteration within the current step
    pub newton_iter: usize,
    /// Simulation time being solved for
    pub time: f64,
    /// Time of the last accepted step
    pub accepted_time: f64,
    /// Current time step (zero at the operating point)
    pub step: f64,
    /// Index of the current time step (zero at the operating point)
    pub step_number: usize,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::dc_op()
    }
}

impl EvalContext {
    /// Context for the DC operating point.
    pub fn dc_op() -> Self {
        Self {
            dc_op: true,
            newton_iter: 0,
            time: 0.0,
            accepted_time: 0.0,
            step: 0.0,
            step_number: 0,
        }
    }

    /// Context for a transient step from `accepted_time` to `accepted_time + step`.
    pub fn transient(accepted_time: f64, step: f64, step_number: usize) -> Self {
        Self {
            dc_op: false,
            newton_iter: 0,
            time: accepted_time + step,
            accepted_time,
            step,
            step_number,
        }
    }

    /// Same context at a different Newton iteration.
    pub fn with_newton_iter(mut self, newton_iter: usize) -> Self {
        self.newton_iter = newton_iter;
        self
    }

    /// Backward-Euler derivative coefficient `1/step` (zero at DC).
    pub fn pdt(&self) -> f64 {
        if self.dc_op || self.step <= 0.0 {
            0.0
        } else {
            1.0 / self.step
        }
    }
}
