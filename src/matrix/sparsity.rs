use nalgebra_sparse::pattern::SparsityPattern;

use crate::{error::MatrixError, DaeSolverError, IndexType};

/// Structural non-zero pattern of a square or rectangular matrix in compressed-column form.
///
/// Column `j` holds the row indices `row_indices()[col_ptrs()[j]..col_ptrs()[j + 1]]`, sorted and
/// unique. The number of non-zeros is `col_ptrs()[ncols]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sparsity {
    pattern: SparsityPattern,
}

impl Sparsity {
    /// Create a pattern from column pointers and row indices, checking that the data is a valid
    /// compressed-column layout.
    pub fn try_from_csc(
        nrows: IndexType,
        ncols: IndexType,
        col_ptrs: Vec<IndexType>,
        row_indices: Vec<IndexType>,
    ) -> Result<Self, DaeSolverError> {
        let pattern =
            SparsityPattern::try_from_offsets_and_indices(ncols, nrows, col_ptrs, row_indices)
                .map_err(|e| MatrixError::InvalidCsc(format!("{e:?}")))?;
        Ok(Self { pattern })
    }

    /// Create a pattern from a list of (row, column) pairs, duplicates are merged.
    pub fn try_from_indices(
        nrows: IndexType,
        ncols: IndexType,
        mut indices: Vec<(IndexType, IndexType)>,
    ) -> Result<Self, DaeSolverError> {
        if indices.iter().any(|&(i, j)| i >= nrows || j >= ncols) {
            return Err(MatrixError::IndexOutOfBounds.into());
        }
        indices.sort_by_key(|&(i, j)| (j, i));
        indices.dedup();
        let mut col_ptrs = vec![0; ncols + 1];
        for &(_, j) in indices.iter() {
            col_ptrs[j + 1] += 1;
        }
        for j in 0..ncols {
            col_ptrs[j + 1] += col_ptrs[j];
        }
        let row_indices = indices.into_iter().map(|(i, _)| i).collect();
        Self::try_from_csc(nrows, ncols, col_ptrs, row_indices)
    }

    pub fn dense(nrows: IndexType, ncols: IndexType) -> Self {
        let col_ptrs = (0..=ncols).map(|j| j * nrows).collect();
        let row_indices = (0..ncols).flat_map(|_| 0..nrows).collect();
        Self {
            pattern: SparsityPattern::try_from_offsets_and_indices(
                ncols,
                nrows,
                col_ptrs,
                row_indices,
            )
            .unwrap_or_else(|_| SparsityPattern::zeros(ncols, nrows)),
        }
    }

    pub fn new_diagonal(n: IndexType) -> Self {
        Self {
            pattern: SparsityPattern::try_from_offsets_and_indices(
                n,
                n,
                (0..=n).collect(),
                (0..n).collect(),
            )
            .unwrap_or_else(|_| SparsityPattern::zeros(n, n)),
        }
    }

    pub fn nrows(&self) -> IndexType {
        self.pattern.minor_dim()
    }

    pub fn ncols(&self) -> IndexType {
        self.pattern.major_dim()
    }

    pub fn nnz(&self) -> IndexType {
        self.pattern.nnz()
    }

    pub fn col_ptrs(&self) -> &[IndexType] {
        self.pattern.major_offsets()
    }

    pub fn row_indices(&self) -> &[IndexType] {
        self.pattern.minor_indices()
    }

    /// Row indices of the non-zeros in column `j`.
    pub fn column(&self, j: IndexType) -> &[IndexType] {
        self.pattern.lane(j)
    }

    /// All (row, column) pairs in storage order.
    pub fn indices(&self) -> Vec<(IndexType, IndexType)> {
        (0..self.ncols())
            .flat_map(|j| self.column(j).iter().map(move |&i| (i, j)))
            .collect()
    }

    /// Position of entry (row, col) in the value array, if it is structurally non-zero.
    pub fn get_index(&self, row: IndexType, col: IndexType) -> Option<IndexType> {
        if col >= self.ncols() {
            return None;
        }
        let start = self.col_ptrs()[col];
        self.column(col)
            .binary_search(&row)
            .ok()
            .map(|offset| start + offset)
    }

    pub fn union(&self, other: &Sparsity) -> Result<Sparsity, DaeSolverError> {
        if self.nrows() != other.nrows() || self.ncols() != other.ncols() {
            return Err(MatrixError::UnionIncompatibleShapes.into());
        }
        let mut indices = self.indices();
        indices.extend(other.indices());
        Self::try_from_indices(self.nrows(), self.ncols(), indices)
    }

    pub(crate) fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }
}
