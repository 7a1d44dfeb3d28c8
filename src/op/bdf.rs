use std::cell::{Cell, RefCell};

use nalgebra::{DMatrix, DVector};

use crate::{evaluator::DaeEvaluator, DaeSolverError, SparseColMat};

use super::JacobianOp;

/// Set `psi_neg_y0 = alpha_k * sum_{i=1}^{k} gamma_i D^i - y_predict`, the history term of the
/// NDF corrector for differences `diff` at order `k`.
pub fn psi_neg_y0(
    diff: &DMatrix<f64>,
    gamma: &[f64],
    alpha: &[f64],
    order: usize,
    y_predict: &DVector<f64>,
    psi_neg_y0: &mut DVector<f64>,
) {
    psi_neg_y0.fill(0.0);
    for (i, &gamma_i) in gamma.iter().enumerate().take(order + 1).skip(1) {
        psi_neg_y0.axpy(gamma_i, &diff.column(i), 1.0);
    }
    *psi_neg_y0 *= alpha[order];
    *psi_neg_y0 -= y_predict;
}

// callable to solve for G(y) = F(t, y, (y - y0 + psi) * cj) = 0
pub struct BdfCallable<'a, E: DaeEvaluator + ?Sized> {
    op: JacobianOp<'a, E>,
    psi_neg_y0: RefCell<DVector<f64>>,
    cj: Cell<f64>,
    t: Cell<f64>,
    yp: RefCell<DVector<f64>>,
}

impl<'a, E: DaeEvaluator + ?Sized> BdfCallable<'a, E> {
    pub fn new(op: JacobianOp<'a, E>) -> Self {
        let n = op.nstates();
        Self {
            op,
            psi_neg_y0: RefCell::new(DVector::zeros(n)),
            cj: Cell::new(0.0),
            t: Cell::new(0.0),
            yp: RefCell::new(DVector::zeros(n)),
        }
    }

    pub fn op(&self) -> &JacobianOp<'a, E> {
        &self.op
    }

    /// Shift constant `cj = 1 / (h * alpha)` for step size `h` and NDF coefficient `alpha`.
    pub fn set_cj(&self, h: f64, alpha: f64) {
        self.cj.set(1.0 / (h * alpha));
    }

    pub fn cj(&self) -> f64 {
        self.cj.get()
    }

    pub fn set_time(&self, t: f64) {
        self.t.set(t);
    }

    pub fn t(&self) -> f64 {
        self.t.get()
    }

    pub fn set_psi_and_y0(
        &self,
        diff: &DMatrix<f64>,
        gamma: &[f64],
        alpha: &[f64],
        order: usize,
        y_predict: &DVector<f64>,
    ) {
        psi_neg_y0(
            diff,
            gamma,
            alpha,
            order,
            y_predict,
            &mut self.psi_neg_y0.borrow_mut(),
        );
    }

    /// The derivative implied by the corrector at `y`, `yp = (y - y0 + psi) * cj`.
    pub fn yp_inplace(&self, y: &DVector<f64>, yp: &mut DVector<f64>) {
        yp.copy_from(y);
        *yp += &*self.psi_neg_y0.borrow();
        *yp *= self.cj.get();
    }

    pub fn call_inplace(&self, y: &DVector<f64>, r: &mut DVector<f64>) -> Result<(), DaeSolverError> {
        let mut yp = self.yp.borrow_mut();
        self.yp_inplace(y, &mut yp);
        self.op.residual_inplace(self.t.get(), y, &yp, r)
    }

    /// Evaluate `dF/dy + cj * dF/dy'` at `(y, yp(y))`.
    pub fn jacobian_inplace(
        &self,
        y: &DVector<f64>,
        jac: &mut SparseColMat,
    ) -> Result<(), DaeSolverError> {
        let mut yp = self.yp.borrow_mut();
        self.yp_inplace(y, &mut yp);
        self.op
            .jacobian_inplace(self.t.get(), y, &yp, self.cj.get(), jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::CallbackEvaluator;
    use approx::assert_relative_eq;

    #[test]
    fn test_bdf_callable() {
        // F(y, yp) = yp + 0.1 y
        let eval = CallbackEvaluator::builder(2, |_t, y, yp, r| {
            r[0] = yp[0] + 0.1 * y[0];
            r[1] = yp[1] + 0.1 * y[1];
        })
        .jacobian_structure(2, || vec![0, 1], || vec![0, 1, 2])
        .jacobian(|_t, _y, _yp, cj, values| {
            values[0] = cj + 0.1;
            values[1] = cj + 0.1;
        })
        .build()
        .unwrap();
        let atol = DVector::from_element(2, 1e-6);
        let op = JacobianOp::new(&eval, true, &atol, 1e-6).unwrap();
        let callable = BdfCallable::new(op);
        // h * alpha = 0.1
        callable.set_cj(0.1, 1.0);
        *callable.psi_neg_y0.borrow_mut() = DVector::from_vec(vec![1.1, 1.2]);
        let y = DVector::from_vec(vec![1.0, 1.0]);

        // yp = (y + psi_neg_y0) * cj = |21|
        //                              |22|
        // G(y) = yp + 0.1 y = |21.1|
        //                     |22.1|
        let mut r = DVector::zeros(2);
        callable.call_inplace(&y, &mut r).unwrap();
        assert_relative_eq!(r[0], 21.1, epsilon = 1e-10);
        assert_relative_eq!(r[1], 22.1, epsilon = 1e-10);

        let mut jac = SparseColMat::new_from_sparsity(callable.op().sparsity().clone());
        callable.jacobian_inplace(&y, &mut jac).unwrap();
        assert_relative_eq!(jac.get(0, 0), 10.1, epsilon = 1e-10);
        assert_relative_eq!(jac.get(1, 1), 10.1, epsilon = 1e-10);
        assert_eq!(jac.get(0, 1), 0.0);
    }

    #[test]
    fn test_psi_first_order() {
        // first order: psi = alpha_1 * gamma_1 * D^1 = h * yp
        let mut diff = DMatrix::zeros(1, 8);
        diff[(0, 0)] = 2.0;
        diff[(0, 1)] = 0.5;
        let gamma = [0.0, 1.0];
        let alpha = [0.0, 1.0];
        let y_predict = DVector::from_element(1, 2.5);
        let mut out = DVector::zeros(1);
        psi_neg_y0(&diff, &gamma, &alpha, 1, &y_predict, &mut out);
        assert_relative_eq!(out[0], 0.5 - 2.5);
    }
}
