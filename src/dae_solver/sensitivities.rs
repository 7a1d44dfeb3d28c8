use std::cell::RefCell;

use nalgebra::{DMatrix, DVector};

use crate::{
    evaluator::DaeEvaluator,
    linear_solver::{FactorizedJacobian, LinearSolver},
    nonlinear_solver::{convergence::Convergence, newton::newton_iteration},
    op::bdf::psi_neg_y0,
    DaeSolverError,
};

/// Corrector for the forward sensitivity equations
/// `dF/dy * s_i + dF/dy' * s_i' + dF/dp_i = 0`, discretised with the same NDF formula, step and
/// order as the state, and solved with the factorization of the state corrector.
///
/// The sensitivity equations are linear in `s_i`, so with a fresh factorization one Newton
/// iteration is exact, and a reused factorization converges at the rate the state corrector
/// tolerated.
pub struct SensitivityCorrector {
    psi_neg_s0: RefCell<DVector<f64>>,
    sp: RefCell<DVector<f64>>,
    tmp: RefCell<DVector<f64>>,
    newton_tmp: DVector<f64>,
    s_predict: DVector<f64>,
    s_new: Vec<DVector<f64>>,
    sp_new: Vec<DVector<f64>>,
    s_delta: Vec<DVector<f64>>,
}

impl SensitivityCorrector {
    pub fn new(nstates: usize, nparams: usize) -> Self {
        Self {
            psi_neg_s0: RefCell::new(DVector::zeros(nstates)),
            sp: RefCell::new(DVector::zeros(nstates)),
            tmp: RefCell::new(DVector::zeros(nstates)),
            newton_tmp: DVector::zeros(nstates),
            s_predict: DVector::zeros(nstates),
            s_new: vec![DVector::zeros(nstates); nparams],
            sp_new: vec![DVector::zeros(nstates); nparams],
            s_delta: vec![DVector::zeros(nstates); nparams],
        }
    }

    /// Solve for the sensitivities at `(t_new, y_new, yp_new)`, the state just accepted, given the
    /// sensitivity differences `sdiff` of the previous step. The results are available from
    /// [Self::s_new], [Self::sp_new] and [Self::s_delta] until the next call.
    #[allow(clippy::too_many_arguments)]
    pub fn solve<E: DaeEvaluator + ?Sized, LS: LinearSolver>(
        &mut self,
        eval: &E,
        t_new: f64,
        y_new: &DVector<f64>,
        yp_new: &DVector<f64>,
        sdiff: &[DMatrix<f64>],
        order: usize,
        gamma: &[f64],
        alpha: &[f64],
        cj: f64,
        factorization: &FactorizedJacobian<LS>,
        convergence: &mut Convergence,
    ) -> Result<usize, DaeSolverError> {
        let mut niter = 0;
        for (i, sdiff_i) in sdiff.iter().enumerate() {
            self.s_predict.fill(0.0);
            for j in 0..=order {
                self.s_predict += sdiff_i.column(j);
            }
            psi_neg_y0(
                sdiff_i,
                gamma,
                alpha,
                order,
                &self.s_predict,
                &mut self.psi_neg_s0.borrow_mut(),
            );

            let s = &mut self.s_new[i];
            s.copy_from(&self.s_predict);
            let psi_neg_s0 = &self.psi_neg_s0;
            let sp = &self.sp;
            let tmp = &self.tmp;
            let fun = |s: &DVector<f64>, out: &mut DVector<f64>| {
                let mut sp = sp.borrow_mut();
                sp.copy_from(s);
                *sp += &*psi_neg_s0.borrow();
                *sp *= cj;
                eval.sens_residual_inplace(t_new, y_new, yp_new, s, &sp, i, &mut tmp.borrow_mut(), out)
            };
            let linear_solver = |x: &mut DVector<f64>| factorization.solve_in_place(cj, x);
            let result = newton_iteration(
                s,
                &mut self.newton_tmp,
                &self.s_predict,
                fun,
                linear_solver,
                convergence,
            );
            niter += convergence.niter();
            result?;

            let sp_new = &mut self.sp_new[i];
            sp_new.copy_from(s);
            *sp_new += &*self.psi_neg_s0.borrow();
            *sp_new *= cj;
            let s_delta = &mut self.s_delta[i];
            s_delta.copy_from(s);
            *s_delta -= &self.s_predict;
        }
        Ok(niter)
    }

    pub fn s_new(&self) -> &[DVector<f64>] {
        &self.s_new
    }

    pub fn sp_new(&self) -> &[DVector<f64>] {
        &self.sp_new
    }

    pub fn s_delta(&self) -> &[DVector<f64>] {
        &self.s_delta
    }
}
