use faer::{
    solvers::SpSolver,
    sparse::{
        linalg::solvers::{Lu, SymbolicLu},
        SymbolicSparseColMat,
    },
    Col,
};
use nalgebra::DVector;

use crate::{
    error::LinearSolverError, linear_solver::LinearSolver, linear_solver_error, matrix::Sparsity,
    DaeSolverError, IndexType, SparseColMat,
};

/// A [LinearSolver] that uses the sparse LU decomposition in the [`faer`](https://github.com/sarah-ek/faer-rs) library to solve the linear system.
///
/// The symbolic analysis is done once in [LinearSolver::set_problem], each call to
/// [LinearSolver::set_linearisation] only redoes the numerical factorization.
#[derive(Default)]
pub struct FaerSparseLU {
    lu: Option<Lu<IndexType, f64>>,
    lu_symbolic: Option<SymbolicLu<IndexType>>,
    symbolic: Option<SymbolicSparseColMat<IndexType>>,
}

impl LinearSolver for FaerSparseLU {
    fn set_problem(&mut self, sparsity: &Sparsity) -> Result<(), DaeSolverError> {
        self.lu = None;
        let indices = sparsity.indices();
        let (symbolic, _) =
            SymbolicSparseColMat::try_new_from_indices(sparsity.nrows(), sparsity.ncols(), &indices)
                .map_err(|e| LinearSolverError::SymbolicFactorizationFailed(format!("{e:?}")))?;
        let lu_symbolic = SymbolicLu::try_new(symbolic.as_ref())
            .map_err(|e| LinearSolverError::SymbolicFactorizationFailed(format!("{e:?}")))?;
        self.symbolic = Some(symbolic);
        self.lu_symbolic = Some(lu_symbolic);
        Ok(())
    }

    fn set_linearisation(&mut self, matrix: &SparseColMat) -> Result<(), DaeSolverError> {
        self.lu = None;
        let (symbolic, lu_symbolic) = match (self.symbolic.as_ref(), self.lu_symbolic.as_ref()) {
            (Some(s), Some(l)) => (s, l),
            _ => return Err(linear_solver_error!(LinearSolverNotSetup)),
        };
        if matrix.nnz() != symbolic.row_indices().len() {
            return Err(linear_solver_error!(LinearSolverMatrixVectorNotCompatible));
        }
        if matrix.values().iter().any(|v| !v.is_finite()) {
            return Err(linear_solver_error!(SingularMatrix));
        }
        // the symbolic structure was built from the same column-major ordered indices, so the
        // value arrays line up
        let faer_matrix =
            faer::sparse::SparseColMat::<IndexType, f64>::new(symbolic.clone(), matrix.values().to_vec());
        // faer panics on an exactly zero pivot instead of returning an error
        let lu = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Lu::try_new_with_symbolic(lu_symbolic.clone(), faer_matrix.as_ref())
        }))
        .map_err(|_| LinearSolverError::SingularMatrix)?
        .map_err(|_| LinearSolverError::SingularMatrix)?;
        self.lu = Some(lu);
        Ok(())
    }

    fn clear_linearisation(&mut self) {
        self.lu = None;
    }

    fn solve_in_place(&self, b: &mut DVector<f64>) -> Result<(), DaeSolverError> {
        let lu = match self.lu.as_ref() {
            Some(lu) => lu,
            None => return Err(linear_solver_error!(LuNotInitialized)),
        };
        let mut x = Col::<f64>::from_fn(b.len(), |i| b[i]);
        lu.solve_in_place(&mut x);
        for i in 0..b.len() {
            b[i] = x[i];
        }
        if b.iter().any(|v| !v.is_finite()) {
            return Err(linear_solver_error!(SingularMatrix));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::linear_solver::tests::{test_linear_solver, test_singular_matrix};

    #[test]
    fn test_faer_sparse_lu() {
        test_linear_solver::<FaerSparseLU>();
    }

    #[test]
    fn test_faer_sparse_lu_singular() {
        test_singular_matrix::<FaerSparseLU>();
    }

    #[test]
    fn test_zero_pivot_then_regular_matrix() {
        let singular =
            SparseColMat::try_from_triplets(2, 2, vec![(0, 0, 0.0), (1, 0, 0.0), (0, 1, 1.0), (1, 1, 2.0)])
                .unwrap();
        let mut solver = FaerSparseLU::default();
        solver.set_problem(singular.sparsity()).unwrap();
        assert!(matches!(
            solver.set_linearisation(&singular),
            Err(DaeSolverError::LinearSolverError(LinearSolverError::SingularMatrix))
        ));
        assert!(solver.solve(&DVector::from_element(2, 1.0)).is_err());

        // the symbolic analysis survives a failed numeric factorization
        let regular =
            SparseColMat::try_from_triplets(2, 2, vec![(0, 0, 1.0), (1, 0, 0.0), (0, 1, 1.0), (1, 1, 2.0)])
                .unwrap();
        solver.set_linearisation(&regular).unwrap();
        let x = solver.solve(&DVector::from_vec(vec![3.0, 4.0])).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 2.0, epsilon = 1e-12);
    }
}
