use ::nalgebra::DVector;

use crate::{linear_solver_error, matrix::Sparsity, DaeSolverError, SparseColMat};

pub mod faer;
pub mod nalgebra;

pub use self::faer::sparse_lu::FaerSparseLU;
pub use self::nalgebra::lu::LU as NalgebraLU;

/// A solver for the linear problem `Ax = b`, where `A` is the Jacobian `dF/dy + cj * dF/dy'`
pub trait LinearSolver: Default {
    /// Set the sparsity of the matrices to be factorized, performing any symbolic analysis.
    /// Any previous factorization is discarded.
    fn set_problem(&mut self, sparsity: &Sparsity) -> Result<(), DaeSolverError>;

    /// Numerically factorize `matrix`, which must have the sparsity given to [Self::set_problem].
    /// Fails with [crate::error::LinearSolverError::SingularMatrix] if the matrix is singular.
    fn set_linearisation(&mut self, matrix: &SparseColMat) -> Result<(), DaeSolverError>;

    /// Discard the current numerical factorization.
    fn clear_linearisation(&mut self);

    /// Solve the problem `Ax = b` and return the solution `x`.
    fn solve(&self, b: &DVector<f64>) -> Result<DVector<f64>, DaeSolverError> {
        let mut b = b.clone();
        self.solve_in_place(&mut b)?;
        Ok(b)
    }

    fn solve_in_place(&self, b: &mut DVector<f64>) -> Result<(), DaeSolverError>;
}

/// Owned handle to a factorized Jacobian, valid only near the shift constant `cj` it was built
/// with.
///
/// A solve with a shift `cj` within `shift_drift_threshold` (relative) of the factorized shift
/// reuses the factorization, and the correction is scaled by `2 / (1 + cj / cj_factorized)`.
/// Further away, or after [FactorizedJacobian::invalidate], every solve fails until the
/// Jacobian is factorized again.
pub struct FactorizedJacobian<LS: LinearSolver> {
    solver: LS,
    cj: Option<f64>,
    shift_drift_threshold: f64,
    number_of_factorizations: usize,
    number_of_singular_factorizations: usize,
}

impl<LS: LinearSolver> FactorizedJacobian<LS> {
    pub fn new(sparsity: &Sparsity, shift_drift_threshold: f64) -> Result<Self, DaeSolverError> {
        let mut solver = LS::default();
        solver.set_problem(sparsity)?;
        Ok(Self {
            solver,
            cj: None,
            shift_drift_threshold,
            number_of_factorizations: 0,
            number_of_singular_factorizations: 0,
        })
    }

    /// Factorize `jac`, which was evaluated at shift `cj`. On failure the handle is left invalid.
    pub fn factorize(&mut self, jac: &SparseColMat, cj: f64) -> Result<(), DaeSolverError> {
        self.cj = None;
        self.number_of_factorizations += 1;
        match self.solver.set_linearisation(jac) {
            Ok(()) => {
                self.cj = Some(cj);
                Ok(())
            }
            Err(e) => {
                self.number_of_singular_factorizations += 1;
                self.solver.clear_linearisation();
                Err(e)
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.cj = None;
        self.solver.clear_linearisation();
    }

    /// The shift constant of the current factorization, if it is valid.
    pub fn cj(&self) -> Option<f64> {
        self.cj
    }

    pub fn is_valid_for(&self, cj: f64) -> bool {
        match self.cj {
            Some(cj_fact) => (cj / cj_fact - 1.0).abs() <= self.shift_drift_threshold,
            None => false,
        }
    }

    /// Solve `J(cj) x = b` in place using the current factorization.
    pub fn solve_in_place(&self, cj: f64, b: &mut DVector<f64>) -> Result<(), DaeSolverError> {
        let cj_fact = match self.cj {
            Some(cj_fact) if self.is_valid_for(cj) => cj_fact,
            Some(cj_fact) => {
                return Err(linear_solver_error!(FactorizationStale {
                    factorized: cj_fact,
                    requested: cj
                }))
            }
            None => return Err(linear_solver_error!(LuNotInitialized)),
        };
        self.solver.solve_in_place(b)?;
        let ratio = cj / cj_fact;
        if ratio != 1.0 {
            *b *= 2.0 / (1.0 + ratio);
        }
        if b.iter().any(|x| !x.is_finite()) {
            return Err(linear_solver_error!(SingularMatrix));
        }
        Ok(())
    }

    pub fn number_of_factorizations(&self) -> usize {
        self.number_of_factorizations
    }

    pub fn number_of_singular_factorizations(&self) -> usize {
        self.number_of_singular_factorizations
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::error::LinearSolverError;
    use approx::assert_relative_eq;

    pub fn linear_problem() -> (SparseColMat, DVector<f64>, DVector<f64>) {
        // [2 1 0]
        // [0 3 0]
        // [1 0 4]
        let a = SparseColMat::try_from_triplets(
            3,
            3,
            vec![(0, 0, 2.0), (2, 0, 1.0), (0, 1, 1.0), (1, 1, 3.0), (2, 2, 4.0)],
        )
        .unwrap();
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let b = DVector::from_vec(vec![4.0, 6.0, 13.0]);
        (a, x, b)
    }

    pub fn test_linear_solver<LS: LinearSolver>() {
        let (a, x, b) = linear_problem();
        let mut solver = LS::default();
        solver.set_problem(a.sparsity()).unwrap();
        assert!(solver.solve(&b).is_err());
        solver.set_linearisation(&a).unwrap();
        let soln = solver.solve(&b).unwrap();
        for i in 0..3 {
            assert_relative_eq!(soln[i], x[i], epsilon = 1e-12);
        }
    }

    pub fn test_singular_matrix<LS: LinearSolver>() {
        let a = SparseColMat::try_from_triplets(2, 2, vec![(0, 0, 1.0), (1, 0, 1.0), (0, 1, 0.0), (1, 1, 0.0)])
            .unwrap();
        let mut handle = FactorizedJacobian::<LS>::new(a.sparsity(), 0.3).unwrap();
        let mut b = DVector::from_vec(vec![1.0, 2.0]);
        let failed = handle
            .factorize(&a, 1.0)
            .and_then(|_| handle.solve_in_place(1.0, &mut b));
        assert!(matches!(
            failed,
            Err(DaeSolverError::LinearSolverError(
                LinearSolverError::SingularMatrix
            ))
        ));
    }

    #[test]
    fn test_factorization_validity() {
        let (a, x, b) = linear_problem();
        let mut handle = FactorizedJacobian::<FaerSparseLU>::new(a.sparsity(), 0.3).unwrap();
        assert!(!handle.is_valid_for(1.0));
        handle.factorize(&a, 1.0).unwrap();
        assert!(handle.is_valid_for(1.0));
        assert!(handle.is_valid_for(1.25));
        assert!(!handle.is_valid_for(1.5));

        let mut soln = b.clone();
        handle.solve_in_place(1.0, &mut soln).unwrap();
        assert_relative_eq!(soln, x, epsilon = 1e-12);

        // reused at a nearby shift, the correction is damped
        let mut soln = b.clone();
        handle.solve_in_place(1.2, &mut soln).unwrap();
        assert_relative_eq!(soln, x * (2.0 / 2.2), epsilon = 1e-12);

        let mut soln = b.clone();
        assert!(handle.solve_in_place(2.0, &mut soln).is_err());
        handle.invalidate();
        assert!(handle.solve_in_place(1.0, &mut soln).is_err());
        assert_eq!(handle.number_of_factorizations(), 1);
    }
}
