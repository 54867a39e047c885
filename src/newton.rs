//! Minimal dense Newton driver for the `daecheck` demo circuits.
//!
//! Backward-Euler on the charge form:
//!
//! ```text
//! r(x) = F(x) + (Q(x) - Q_accepted) / h        J = dF/dx + dQ/dx / h
//! ```
//!
//! At the DC operating point `1/h` is zero. The ground row is pinned to
//! `x[gnd] = 0`.

use dae_core::{DaeError, DaeSystem, DeviceManager, EvalContext, JacobianReport};
use thiserror::Error;

/// Convergence tolerance on the Newton update.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-9;

/// Maximum Newton iterations per pass.
pub const MAX_ITERATIONS: usize = 50;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Dae(#[from] DaeError),

    #[error("Singular jacobian at pivot {0}")]
    SingularMatrix(usize),

    #[error("Newton failed to converge after {iterations} iterations (max update {max_update:e})")]
    ConvergenceFailure { iterations: usize, max_update: f64 },
}

/// Dense LU factorisation with partial pivoting.
#[derive(Debug, Default)]
struct DenseLu {
    size: usize,
    lu: Vec<f64>,
    pivots: Vec<usize>,
}

impl DenseLu {
    fn factor(&mut self, a: Vec<f64>, size: usize) -> Result<(), DriverError> {
        let n = size;
        self.size = n;
        self.lu = a;
        self.pivots = (0..n).collect();

        for k in 0..n {
            let mut max_val = self.lu[k * n + k].abs();
            let mut max_row = k;
            for i in (k + 1)..n {
                let val = self.lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }
            if max_val < 1e-15 {
                return Err(DriverError::SingularMatrix(k));
            }

            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    self.lu.swap(k * n + j, max_row * n + j);
                }
            }

            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    self.lu[i * n + j] -= factor * self.lu[k * n + j];
                }
            }
        }
        Ok(())
    }

    fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.size;
        let mut x: Vec<f64> = self.pivots.iter().map(|&p| b[p]).collect();

        // L y = P b
        for i in 0..n {
            for j in 0..i {
                x[i] -= self.lu[i * n + j] * x[j];
            }
        }
        // U x = y
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                x[i] -= self.lu[i * n + j] * x[j];
            }
            x[i] /= self.lu[i * n + i];
        }
        x
    }
}

/// Newton iteration over the manager's load cycle.
#[derive(Debug, Default)]
pub struct Newton {
    lu: DenseLu,
    /// Q at the last accepted step
    q_accepted: Vec<f64>,
}

impl Newton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solve one DC or transient pass starting from `solution.next`.
    ///
    /// `inspect` sees the Jacobian reports of every iteration, since the
    /// manager keeps only those of its latest matrix load. Returns the
    /// number of iterations used.
    pub fn solve<R>(
        &mut self,
        mgr: &mut DeviceManager,
        sys: &mut DaeSystem,
        ctx: &EvalContext,
        mut inspect: R,
    ) -> Result<usize, DriverError>
    where
        R: FnMut(&[JacobianReport]),
    {
        let n = sys.names.len();
        let ground = sys.names.ground();
        let pdt = ctx.pdt();
        if self.q_accepted.len() != n {
            self.q_accepted = vec![0.0; n];
        }

        let mut max_update = f64::INFINITY;
        for iter in 0..MAX_ITERATIONS {
            let ctx = ctx.with_newton_iter(iter);
            sys.zero_loads();
            mgr.update_state(&ctx, &mut sys.vectors)?;
            sys.vectors.update_state_derivs(&ctx);
            mgr.load_dae_vectors(&ctx, &mut sys.vectors)?;
            mgr.load_dae_matrices(&ctx, &mut sys.vectors, &mut sys.matrices)?;
            inspect(mgr.jacobian_reports());

            let mut jac = sys.matrices.df_dx.to_dense();
            if pdt != 0.0 {
                for (j, q) in jac.iter_mut().zip(sys.matrices.dq_dx.to_dense()) {
                    *j += pdt * q;
                }
            }
            let mut rhs: Vec<f64> = (0..n)
                .map(|i| -(sys.vectors.f[i] + pdt * (sys.vectors.q[i] - self.q_accepted[i])))
                .collect();
            if let Some(g) = ground {
                jac[g * n..(g + 1) * n].fill(0.0);
                jac[g * n + g] = 1.0;
                rhs[g] = -sys.vectors.solution.next[g];
            }

            self.lu.factor(jac, n)?;
            let dx = self.lu.solve(&rhs);
            max_update = dx.iter().fold(0.0f64, |m, d| m.max(d.abs()));
            for (x, d) in sys.vectors.solution.next.iter_mut().zip(&dx) {
                *x += d;
            }
            log::trace!("newton iteration {iter}: max update {max_update:e}");

            if max_update < CONVERGENCE_TOLERANCE {
                return Ok(iter + 1);
            }
        }

        Err(DriverError::ConvergenceFailure {
            iterations: MAX_ITERATIONS,
            max_update,
        })
    }

    /// Accept the converged pass as the new time point.
    pub fn accept(&mut self, sys: &mut DaeSystem) {
        self.q_accepted.clone_from(&sys.vectors.q);
        sys.vectors.accept_step();
    }
}
