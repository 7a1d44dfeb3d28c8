use nalgebra::DVector;

use crate::{matrix::Sparsity, DaeSolverError, SparseColMat};

use self::{coloring::nonzeros2graph, greedy_coloring::color_graph_greedy};

pub mod coloring;
pub mod graph;
pub mod greedy_coloring;

/// Column grouping for finite-difference approximation of a sparse Jacobian.
///
/// Columns that never share a non-zero row are given the same color, so a whole color group can
/// be perturbed with a single residual evaluation.
pub struct JacobianColoring {
    cols_per_color: Vec<Vec<usize>>,
    // (index into the value array, row, column) for every non-zero with a column of this color
    dst_per_color: Vec<Vec<(usize, usize, usize)>>,
}

impl JacobianColoring {
    pub fn new(sparsity: &Sparsity) -> Self {
        let non_zeros = sparsity.indices();
        let graph = nonzeros2graph(non_zeros.as_slice(), sparsity.nrows(), sparsity.ncols());
        let coloring = color_graph_greedy(&graph);
        let max_color = coloring.iter().max().copied().unwrap_or(0);
        let mut cols_per_color = vec![Vec::new(); max_color];
        let mut dst_per_color = vec![Vec::new(); max_color];
        for (j, c) in coloring.iter().enumerate() {
            cols_per_color[c - 1].push(j);
        }
        for (k, (i, j)) in non_zeros.into_iter().enumerate() {
            dst_per_color[coloring[j] - 1].push((k, i, j));
        }
        Self {
            cols_per_color,
            dst_per_color,
        }
    }

    pub fn ncolors(&self) -> usize {
        self.cols_per_color.len()
    }

    /// Approximate `dF/dy + cj * dF/dy'` at `(y, yp)` by forward differences, writing the values
    /// into `jac`, which must have the sparsity the coloring was built from. `f0` is the residual
    /// at `(y, yp)`. Each column `j` is perturbed by
    /// `max(sqrt(eps) * max(|y_j|, |yp_j| / cj), atol_j + rtol * |y_j|)` in `y` and `cj` times
    /// that in `yp`. Returns the number of residual evaluations.
    #[allow(clippy::too_many_arguments)]
    pub fn finite_difference_inplace(
        &self,
        residual: impl Fn(&DVector<f64>, &DVector<f64>, &mut DVector<f64>) -> Result<(), DaeSolverError>,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        cj: f64,
        f0: &DVector<f64>,
        atol: &DVector<f64>,
        rtol: f64,
        jac: &mut SparseColMat,
    ) -> Result<usize, DaeSolverError> {
        let srur = f64::EPSILON.sqrt();
        let mut y_pert = y.clone();
        let mut yp_pert = yp.clone();
        let mut f1 = DVector::zeros(f0.len());
        let mut inc = DVector::zeros(y.len());
        for j in 0..y.len() {
            inc[j] = (srur * y[j].abs().max(yp[j].abs() / cj)).max(atol[j] + rtol * y[j].abs());
        }
        let values = jac.values_mut();
        for (cols, dsts) in self.cols_per_color.iter().zip(self.dst_per_color.iter()) {
            for &j in cols {
                y_pert[j] += inc[j];
                yp_pert[j] += cj * inc[j];
            }
            residual(&y_pert, &yp_pert, &mut f1)?;
            for &(k, i, j) in dsts {
                values[k] = (f1[i] - f0[i]) / inc[j];
            }
            for &j in cols {
                y_pert[j] = y[j];
                yp_pert[j] = yp[j];
            }
        }
        Ok(self.ncolors())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tridiagonal(n: usize) -> Sparsity {
        let mut indices = Vec::new();
        for i in 0..n {
            for j in i.saturating_sub(1)..(i + 2).min(n) {
                indices.push((i, j));
            }
        }
        Sparsity::try_from_indices(n, n, indices).unwrap()
    }

    #[test]
    fn test_coloring_tridiagonal() {
        let sparsity = tridiagonal(5);
        let graph = nonzeros2graph(&sparsity.indices(), 5, 5);
        let coloring = color_graph_greedy(&graph);
        insta::assert_yaml_snapshot!(coloring, @r###"
        - 1
        - 2
        - 3
        - 1
        - 2
        "###);
        assert_eq!(JacobianColoring::new(&sparsity).ncolors(), 3);
    }

    #[test]
    fn test_finite_difference_jacobian() {
        // F0 = yp0 + y0 * y1
        // F1 = yp1 - y0^2
        // F2 = y2 - y1
        let residual = |y: &DVector<f64>,
                        yp: &DVector<f64>,
                        f: &mut DVector<f64>|
         -> Result<(), DaeSolverError> {
            f[0] = yp[0] + y[0] * y[1];
            f[1] = yp[1] - y[0] * y[0];
            f[2] = y[2] - y[1];
            Ok(())
        };
        let sparsity = Sparsity::try_from_indices(
            3,
            3,
            vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 1), (2, 2)],
        )
        .unwrap();
        let coloring = JacobianColoring::new(&sparsity);
        let mut jac = SparseColMat::new_from_sparsity(sparsity);
        let y = DVector::from_vec(vec![2.0, 3.0, 3.0]);
        let yp = DVector::from_vec(vec![-6.0, 4.0, 0.0]);
        let mut f0 = DVector::zeros(3);
        residual(&y, &yp, &mut f0).unwrap();
        let cj = 10.0;
        let atol = DVector::from_element(3, 1e-10);
        let nevals = coloring
            .finite_difference_inplace(residual, &y, &yp, cj, &f0, &atol, 1e-10, &mut jac)
            .unwrap();
        assert_eq!(nevals, coloring.ncolors());
        // analytic: [cj + y1, y0, 0; -2 y0, cj, 0; 0, -1, 1]
        let expect = [(0, 0, 13.0), (0, 1, 2.0), (1, 0, -4.0), (1, 1, 10.0), (2, 1, -1.0), (2, 2, 1.0)];
        for (i, j, v) in expect {
            assert_relative_eq!(jac.get(i, j), v, epsilon = 1e-5);
        }
    }
}
