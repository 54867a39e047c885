//! Global vectors and matrices the devices load into.
//!
//! All of these are owned by the outer nonlinear/time-integration driver.
//! The core only borrows them mutably for the length of one assembly or
//! verification call.

use crate::linalg::SparseMatrix;

use super::EvalContext;

/// A quantity kept at three time levels.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHistory {
    /// Value at the last accepted step before `curr`
    pub last: Vec<f64>,
    /// Value at the last accepted step
    pub curr: Vec<f64>,
    /// Value being solved for
    pub next: Vec<f64>,
}

impl VectorHistory {
    /// Zero-filled history of length `size`.
    pub fn new(size: usize) -> Self {
        Self {
            last: vec![0.0; size],
            curr: vec![0.0; size],
            next: vec![0.0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    /// Shift the time levels after a step is accepted.
    pub fn accept(&mut self) {
        std::mem::swap(&mut self.last, &mut self.curr);
        self.curr.copy_from_slice(&self.next);
    }
}

/// Dense global vectors of the DAE `dQ(x)/dt + F(x) - B(t) = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct DaeVectors {
    /// Solution (Newton unknowns)
    pub solution: VectorHistory,
    /// Auxiliary per-step device state
    pub state: VectorHistory,
    /// Time derivative of `state.next`, supplied by the integrator
    pub state_deriv: Vec<f64>,
    /// Quantities kept across steps that are not unknowns (lead currents, ...)
    pub store: VectorHistory,
    /// Algebraic / flux residual
    pub f: Vec<f64>,
    /// Charge / storage residual
    pub q: Vec<f64>,
}

impl DaeVectors {
    /// Allocate zeroed vectors for the given variable counts.
    pub fn new(num_solution: usize, num_state: usize, num_store: usize) -> Self {
        Self {
            solution: VectorHistory::new(num_solution),
            state: VectorHistory::new(num_state),
            state_deriv: vec![0.0; num_state],
            store: VectorHistory::new(num_store),
            f: vec![0.0; num_solution],
            q: vec![0.0; num_solution],
        }
    }

    /// Zero F and Q before a full assembly pass.
    pub fn zero_residuals(&mut self) {
        self.f.fill(0.0);
        self.q.fill(0.0);
    }

    /// Backward-Euler estimate of the state derivative.
    pub fn update_state_derivs(&mut self, ctx: &EvalContext) {
        let pdt = ctx.pdt();
        for ((d, next), curr) in self
            .state_deriv
            .iter_mut()
            .zip(&self.state.next)
            .zip(&self.state.curr)
        {
            *d = pdt * (next - curr);
        }
    }

    /// Shift every history after a step is accepted.
    pub fn accept_step(&mut self) {
        self.solution.accept();
        self.state.accept();
        self.store.accept();
    }
}

/// The two global Jacobian matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct DaeMatrices {
    /// dF/dx
    pub df_dx: SparseMatrix,
    /// dQ/dx
    pub dq_dx: SparseMatrix,
}

impl DaeMatrices {
    /// Zero both matrices before a full assembly pass.
    pub fn clear(&mut self) {
        self.df_dx.clear();
        self.dq_dx.clear();
    }
}

/// Names of the global solution variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableNames {
    names: Vec<String>,
    ground: Option<usize>,
}

impl VariableNames {
    pub fn new(names: Vec<String>, ground: Option<usize>) -> Self {
        Self { names, ground }
    }

    /// Name of global variable `index`.
    pub fn name(&self, index: usize) -> &str {
        self.names.get(index).map(String::as_str).unwrap_or("?")
    }

    /// Global index of a named variable.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Global index of the ground reference, if the system has one.
    pub fn ground(&self) -> Option<usize> {
        self.ground
    }

    pub fn is_ground(&self, index: usize) -> bool {
        self.ground == Some(index)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Everything the driver owns for one bound circuit.
#[derive(Debug, Clone)]
pub struct DaeSystem {
    pub vectors: DaeVectors,
    pub matrices: DaeMatrices,
    pub names: VariableNames,
}

impl DaeSystem {
    /// Zero F, Q, dF/dx and dQ/dx.
    pub fn zero_loads(&mut self) {
        self.vectors.zero_residuals();
        self.matrices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_accept() {
        let mut h = VectorHistory::new(2);
        h.next.copy_from_slice(&[1.0, 2.0]);
        h.accept();
        h.next.copy_from_slice(&[3.0, 4.0]);
        h.accept();
        assert_eq!(h.last, vec![1.0, 2.0]);
        assert_eq!(h.curr, vec![3.0, 4.0]);
    }

    #[test]
    fn test_backward_euler_derivs() {
        let mut v = DaeVectors::new(1, 2, 0);
        v.state.curr.copy_from_slice(&[1.0, 0.0]);
        v.state.next.copy_from_slice(&[1.5, -1.0]);
        v.update_state_derivs(&EvalContext::transient(0.0, 0.5, 1));
        assert_eq!(v.state_deriv, vec![1.0, -2.0]);
    }

    #[test]
    fn test_names_lookup() {
        let names = VariableNames::new(vec!["gnd".into(), "in".into()], Some(0));
        assert_eq!(names.index_of("IN"), Some(1));
        assert!(names.is_ground(0));
        assert_eq!(names.name(7), "?");
    }
}
