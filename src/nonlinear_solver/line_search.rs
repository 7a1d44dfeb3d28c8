use nalgebra::DVector;

use crate::{non_linear_solver_error, DaeSolverError, IndexType};

/// Backtracking line search, derived from the line search in the Sundials IDA consistent
/// initialisation (https://github.com/LLNL/sundials/blob/main/src/ida/ida_ic.c)
///
/// Parameters:
/// - tau: step size reduction factor (0 < tau < 1), default 0.5
/// - c: Armijo condition constant (0 < c < 1), default 1e-4
/// - steptol: minimum step size, default eps^(2/3)
/// - max_iter: maximum number of line search iterations, default 100
pub struct BacktrackingLineSearch {
    pub tau: f64,
    pub c: f64,
    pub steptol: f64,
    pub max_iter: IndexType,
    pub n_iters: IndexType,
}

impl Default for BacktrackingLineSearch {
    fn default() -> Self {
        Self {
            tau: 0.5,
            c: 1e-4,
            steptol: f64::EPSILON.powf(2.0 / 3.0),
            max_iter: 100,
            n_iters: 0,
        }
    }
}

impl BacktrackingLineSearch {
    /// Starting from `x0` with Newton direction `delta` (so the full step is `x0 - delta`) of
    /// weighted norm `norm`, find `alpha` such that the norm of the next Newton update at
    /// `x0 - alpha * delta`, as returned by `update_norm`, satisfies the Armijo condition.
    /// Returns the accepted `alpha` and the new update norm.
    ///
    /// The directional derivative of `phi = 0.5 ||J^{-1} F||^2` along the Newton direction is
    /// `-||J^{-1} F||^2`, so the Armijo condition reduces to
    /// `phi(x0 - alpha delta) <= phi0 - c * alpha * ||J^{-1} F||^2`.
    pub fn take_optimal_step(
        &mut self,
        x0: &DVector<f64>,
        delta: &DVector<f64>,
        norm: f64,
        mut update_norm: impl FnMut(&DVector<f64>) -> Result<f64, DaeSolverError>,
    ) -> Result<(f64, f64), DaeSolverError> {
        self.n_iters = 0;
        let phi0 = 0.5 * norm * norm;
        let two_phi0 = norm * norm;
        let min_alpha = self.steptol / norm.max(f64::EPSILON);
        let mut alpha = 1.0;
        for i in 0..self.max_iter {
            let x = x0 - delta * alpha;
            let new_norm = update_norm(&x)?;
            self.n_iters = i + 1;
            let phi1 = 0.5 * new_norm * new_norm;
            if phi1 <= phi0 - self.c * alpha * two_phi0 {
                return Ok((alpha, new_norm));
            }
            alpha *= self.tau;
            if alpha < min_alpha {
                return Err(non_linear_solver_error!(LinesearchFailedMinStep));
            }
        }
        Err(non_linear_solver_error!(LinesearchFailedMaxIterations))
    }
}
