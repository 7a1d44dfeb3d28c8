use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

use crate::{error::MatrixError, DaeSolverError, IndexType};

pub mod sparsity;

pub use sparsity::Sparsity;

/// A sparse matrix in compressed-column form, with a fixed structure and mutable values.
///
/// The value array is laid out exactly as external sparse-Jacobian suppliers expect: entry `k` is
/// at row `row_indices()[k]`, in the column `j` with `col_ptrs()[j] <= k < col_ptrs()[j + 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseColMat {
    sparsity: Sparsity,
    values: Vec<f64>,
}

impl SparseColMat {
    pub fn new_from_sparsity(sparsity: Sparsity) -> Self {
        let values = vec![0.0; sparsity.nnz()];
        Self { sparsity, values }
    }

    pub fn try_from_csc(
        nrows: IndexType,
        ncols: IndexType,
        col_ptrs: Vec<IndexType>,
        row_indices: Vec<IndexType>,
        values: Vec<f64>,
    ) -> Result<Self, DaeSolverError> {
        let sparsity = Sparsity::try_from_csc(nrows, ncols, col_ptrs, row_indices)?;
        if values.len() != sparsity.nnz() {
            return Err(MatrixError::InvalidCsc(format!(
                "{} values given for {} non-zeros",
                values.len(),
                sparsity.nnz()
            ))
            .into());
        }
        Ok(Self { sparsity, values })
    }

    pub fn try_from_triplets(
        nrows: IndexType,
        ncols: IndexType,
        triplets: Vec<(IndexType, IndexType, f64)>,
    ) -> Result<Self, DaeSolverError> {
        let indices = triplets.iter().map(|&(i, j, _)| (i, j)).collect();
        let sparsity = Sparsity::try_from_indices(nrows, ncols, indices)?;
        let mut ret = Self::new_from_sparsity(sparsity);
        for (i, j, v) in triplets {
            if let Some(k) = ret.sparsity.get_index(i, j) {
                ret.values[k] += v;
            }
        }
        Ok(ret)
    }

    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    pub fn nrows(&self) -> IndexType {
        self.sparsity.nrows()
    }

    pub fn ncols(&self) -> IndexType {
        self.sparsity.ncols()
    }

    pub fn nnz(&self) -> IndexType {
        self.sparsity.nnz()
    }

    pub fn col_ptrs(&self) -> &[IndexType] {
        self.sparsity.col_ptrs()
    }

    pub fn row_indices(&self) -> &[IndexType] {
        self.sparsity.row_indices()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn get(&self, row: IndexType, col: IndexType) -> f64 {
        self.sparsity
            .get_index(row, col)
            .map_or(0.0, |k| self.values[k])
    }

    pub fn set_zero(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Perform a matrix-vector multiplication `y = alpha * self * x + beta * y`.
    pub fn gemv(&self, alpha: f64, x: &DVector<f64>, beta: f64, y: &mut DVector<f64>) {
        *y *= beta;
        let col_ptrs = self.col_ptrs();
        let row_indices = self.row_indices();
        for j in 0..self.ncols() {
            let xj = alpha * x[j];
            for k in col_ptrs[j]..col_ptrs[j + 1] {
                y[row_indices[k]] += self.values[k] * xj;
            }
        }
    }

    /// Add column `j` of the matrix to `v`.
    pub fn add_column_to_vector(&self, j: IndexType, v: &mut DVector<f64>) {
        let col_ptrs = self.col_ptrs();
        let row_indices = self.row_indices();
        for k in col_ptrs[j]..col_ptrs[j + 1] {
            v[row_indices[k]] += self.values[k];
        }
    }

    /// Copy into a nalgebra-sparse matrix sharing the same layout.
    pub fn to_nalgebra(&self) -> Result<CscMatrix<f64>, DaeSolverError> {
        CscMatrix::try_from_pattern_and_values(self.sparsity.pattern().clone(), self.values.clone())
            .map_err(|e| MatrixError::InvalidCsc(format!("{e:?}")).into())
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut ret = DMatrix::zeros(self.nrows(), self.ncols());
        for ((i, j), v) in self.sparsity.indices().into_iter().zip(self.values.iter()) {
            ret[(i, j)] = *v;
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triplets_and_gemv() {
        // [1 0 2]
        // [0 3 0]
        let m = SparseColMat::try_from_triplets(2, 3, vec![(0, 0, 1.0), (1, 1, 3.0), (0, 2, 2.0)])
            .unwrap();
        assert_eq!(m.col_ptrs(), &[0, 1, 2, 3]);
        assert_eq!(m.values(), &[1.0, 3.0, 2.0]);
        let x = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let mut y = DVector::from_vec(vec![1.0, 1.0]);
        m.gemv(2.0, &x, 1.0, &mut y);
        assert_eq!(y, DVector::from_vec(vec![7.0, 7.0]));
        assert_eq!(m.to_dense()[(0, 2)], 2.0);
        assert_eq!(m.to_nalgebra().unwrap().nnz(), 3);
    }

    #[test]
    fn test_try_from_csc_checks_value_count() {
        let m = SparseColMat::try_from_csc(2, 2, vec![0, 1, 2], vec![0, 1], vec![1.0]);
        assert!(m.is_err());
        let m = SparseColMat::try_from_csc(2, 2, vec![0, 1, 2], vec![0, 1], vec![1.0, 2.0]).unwrap();
        assert_eq!(m.get(1, 1), 2.0);
        assert_eq!(m.get(0, 1), 0.0);
    }
}
