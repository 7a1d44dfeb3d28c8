//! Nonlinear problems posed on top of a [DaeEvaluator] for the integration driver: the BDF
//! corrector equation ([bdf::BdfCallable]) and the consistent initialisation problem
//! ([init::InitOp]).

use std::cell::Cell;

use nalgebra::DVector;

use crate::{
    config_error, evaluation_error, evaluator::DaeEvaluator, jacobian::JacobianColoring,
    matrix::Sparsity, DaeSolverError, SparseColMat,
};

pub mod bdf;
pub mod init;

/// Evaluates the residual and the iteration matrix `dF/dy + cj * dF/dy'` of a DAE, using the
/// evaluator's analytic Jacobian or, if that is not wanted, colored finite differences of the
/// residual.
pub struct JacobianOp<'a, E: DaeEvaluator + ?Sized> {
    eval: &'a E,
    coloring: Option<JacobianColoring>,
    atol: &'a DVector<f64>,
    rtol: f64,
    number_of_jac_evals: Cell<usize>,
    number_of_residual_evals: Cell<usize>,
}

impl<'a, E: DaeEvaluator + ?Sized> JacobianOp<'a, E> {
    pub fn new(
        eval: &'a E,
        use_analytic_jacobian: bool,
        atol: &'a DVector<f64>,
        rtol: f64,
    ) -> Result<Self, DaeSolverError> {
        let coloring = if use_analytic_jacobian {
            if !eval.has_jacobian() {
                return Err(config_error!(JacobianNotAvailable));
            }
            None
        } else {
            Some(JacobianColoring::new(eval.jacobian_sparsity()))
        };
        Ok(Self {
            eval,
            coloring,
            atol,
            rtol,
            number_of_jac_evals: Cell::new(0),
            number_of_residual_evals: Cell::new(0),
        })
    }

    pub fn eval(&self) -> &'a E {
        self.eval
    }

    pub fn sparsity(&self) -> &Sparsity {
        self.eval.jacobian_sparsity()
    }

    pub fn nstates(&self) -> usize {
        self.eval.nstates()
    }

    pub fn residual_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        r: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        self.number_of_residual_evals
            .set(self.number_of_residual_evals.get() + 1);
        self.eval.residual_inplace(t, y, yp, r)
    }

    pub fn jacobian_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        cj: f64,
        jac: &mut SparseColMat,
    ) -> Result<(), DaeSolverError> {
        self.number_of_jac_evals
            .set(self.number_of_jac_evals.get() + 1);
        match self.coloring.as_ref() {
            None => self.eval.jacobian_inplace(t, y, yp, cj, jac)?,
            Some(coloring) => {
                let mut f0 = DVector::zeros(y.len());
                self.residual_inplace(t, y, yp, &mut f0)?;
                let nevals = coloring.finite_difference_inplace(
                    |y, yp, f| self.eval.residual_inplace(t, y, yp, f),
                    y,
                    yp,
                    cj,
                    &f0,
                    self.atol,
                    self.rtol,
                    jac,
                )?;
                self.number_of_residual_evals
                    .set(self.number_of_residual_evals.get() + nevals);
            }
        }
        if jac.values().iter().any(|x| !x.is_finite()) {
            return Err(evaluation_error!(NonFiniteOutput {
                function: "jacobian",
                t
            }));
        }
        Ok(())
    }

    pub fn number_of_jac_evals(&self) -> usize {
        self.number_of_jac_evals.get()
    }

    pub fn number_of_residual_evals(&self) -> usize {
        self.number_of_residual_evals.get()
    }
}
