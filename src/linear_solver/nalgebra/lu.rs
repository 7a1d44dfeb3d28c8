use nalgebra::{DVector, Dyn};

use crate::{
    linear_solver::LinearSolver, linear_solver_error, matrix::Sparsity, DaeSolverError,
    SparseColMat,
};

/// A [LinearSolver] that uses the dense LU decomposition in the [`nalgebra` library](https://nalgebra.org/) to solve the linear system.
///
/// Useful for small systems where the sparse structure gives no advantage.
#[derive(Clone, Default)]
pub struct LU {
    lu: Option<nalgebra::LU<f64, Dyn, Dyn>>,
    n: usize,
}

impl LinearSolver for LU {
    fn set_problem(&mut self, sparsity: &Sparsity) -> Result<(), DaeSolverError> {
        if sparsity.nrows() != sparsity.ncols() {
            return Err(linear_solver_error!(LinearSolverMatrixVectorNotCompatible));
        }
        self.n = sparsity.nrows();
        self.lu = None;
        Ok(())
    }

    fn set_linearisation(&mut self, matrix: &SparseColMat) -> Result<(), DaeSolverError> {
        self.lu = None;
        if matrix.nrows() != self.n {
            return Err(linear_solver_error!(LinearSolverMatrixVectorNotCompatible));
        }
        let lu = matrix.to_dense().lu();
        if !lu.is_invertible() {
            return Err(linear_solver_error!(SingularMatrix));
        }
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
        match lu.solve_mut(b) {
            true => Ok(()),
            false => Err(linear_solver_error!(SingularMatrix)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_solver::tests::{test_linear_solver, test_singular_matrix};

    #[test]
    fn test_nalgebra_lu() {
        test_linear_solver::<LU>();
    }

    #[test]
    fn test_nalgebra_lu_singular() {
        test_singular_matrix::<LU>();
    }
}
