use nalgebra::DVector;

use crate::{
    linear_solver::{FactorizedJacobian, LinearSolver},
    matrix::Sparsity,
    non_linear_solver_error,
    nonlinear_solver::convergence::{Convergence, ConvergenceStatus},
    DaeSolverError, SparseColMat,
};

/// Newton iteration for `fun(x) = 0`, starting from `xn`. `linear_solver` overwrites its
/// argument `b` with `J^{-1} b`. Convergence is measured on the Newton updates, weighted relative
/// to `error_y`.
pub fn newton_iteration(
    xn: &mut DVector<f64>,
    tmp: &mut DVector<f64>,
    error_y: &DVector<f64>,
    fun: impl Fn(&DVector<f64>, &mut DVector<f64>) -> Result<(), DaeSolverError>,
    linear_solver: impl Fn(&mut DVector<f64>) -> Result<(), DaeSolverError>,
    convergence: &mut Convergence,
) -> Result<(), DaeSolverError> {
    convergence.reset();
    loop {
        fun(xn, tmp)?;
        //tmp = f_at_n

        linear_solver(tmp)?;
        //tmp = -delta_n

        *xn -= &*tmp;
        // xn = xn + delta_n

        match convergence.check_new_iteration(tmp, error_y) {
            ConvergenceStatus::Continue => continue,
            ConvergenceStatus::Converged => return Ok(()),
            ConvergenceStatus::Diverged => return Err(non_linear_solver_error!(NewtonDiverged)),
            ConvergenceStatus::MaximumIterations => break,
        }
    }
    Err(non_linear_solver_error!(NewtonDidNotConverge))
}

/// Modified Newton solver, reusing one factorized Jacobian for as long as the caller allows.
pub struct NewtonNonlinearSolver<LS: LinearSolver> {
    factorization: FactorizedJacobian<LS>,
    tmp: DVector<f64>,
}

impl<LS: LinearSolver> NewtonNonlinearSolver<LS> {
    pub fn new(sparsity: &Sparsity, shift_drift_threshold: f64) -> Result<Self, DaeSolverError> {
        Ok(Self {
            factorization: FactorizedJacobian::new(sparsity, shift_drift_threshold)?,
            tmp: DVector::zeros(sparsity.nrows()),
        })
    }

    pub fn factorization(&self) -> &FactorizedJacobian<LS> {
        &self.factorization
    }

    pub fn is_jacobian_valid_for(&self, cj: f64) -> bool {
        self.factorization.is_valid_for(cj)
    }

    pub fn clear_jacobian(&mut self) {
        self.factorization.invalidate();
    }

    /// Factorize a new Jacobian `jac`, evaluated at shift `cj`.
    pub fn reset_jacobian(&mut self, jac: &SparseColMat, cj: f64) -> Result<(), DaeSolverError> {
        self.factorization.factorize(jac, cj)
    }

    /// Solve the linearised problem `J * x = b`, where `J` was given to [Self::reset_jacobian].
    /// The input `b` is provided in `x`, and the solution is returned in `x`.
    pub fn solve_linearised_in_place(
        &self,
        cj: f64,
        x: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        self.factorization.solve_in_place(cj, x)
    }

    /// Solve `fun(x) = 0` in place, where the Jacobian of `fun` is `dF/dy + cj * dF/dy'`.
    pub fn solve_in_place(
        &mut self,
        fun: impl Fn(&DVector<f64>, &mut DVector<f64>) -> Result<(), DaeSolverError>,
        xn: &mut DVector<f64>,
        cj: f64,
        error_y: &DVector<f64>,
        convergence: &mut Convergence,
    ) -> Result<(), DaeSolverError> {
        let factorization = &self.factorization;
        let linear_solver = |x: &mut DVector<f64>| factorization.solve_in_place(cj, x);
        newton_iteration(xn, &mut self.tmp, error_y, fun, linear_solver, convergence)
    }
}
