//! The evaluator contract between the solver and the functions defining a DAE
//! `F(t, y, y') = 0`.
//!
//! Two interchangeable backends implement [DaeEvaluator]:
//! - [CallbackEvaluator] dispatches every call to host supplied closures,
//! - [ExpressionEvaluator] evaluates precompiled expression graphs (see [crate::expr]).

use nalgebra::DVector;

use crate::{evaluation_error, matrix::Sparsity, vector::VectorExt, DaeSolverError, SparseColMat};

pub mod callback;
pub mod expression;

pub use callback::{CallbackEvaluator, CallbackEvaluatorBuilder};
pub use expression::{ExpressionEvaluator, ExpressionFunctions};

/// Uniform interface to the functions of a DAE system `F(t, y, y') = 0` with `nparams`
/// parameters and `nevents` event indicators.
///
/// Implementations must not change their dimensions during a solve, and must hold no mutable state
/// that spans calls if they are shared between concurrent solves.
pub trait DaeEvaluator {
    fn nstates(&self) -> usize;
    fn nparams(&self) -> usize;
    fn nevents(&self) -> usize;

    /// Structural sparsity of `dF/dy + cj * dF/dy'`. The values written by
    /// [DaeEvaluator::jacobian_inplace] follow this layout.
    fn jacobian_sparsity(&self) -> &Sparsity;

    /// True if [DaeEvaluator::jacobian_inplace] is implemented.
    fn has_jacobian(&self) -> bool;

    /// True if [DaeEvaluator::mass_action_inplace] and
    /// [DaeEvaluator::jac_parameter_action_inplace] are implemented, which forward sensitivities
    /// need.
    fn has_sensitivities(&self) -> bool;

    /// Residual `r = F(t, y, yp)`.
    fn residual_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        r: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError>;

    /// Values of `dF/dy + cj * dF/dy'`, written into `jac` which has the layout of
    /// [DaeEvaluator::jacobian_sparsity].
    fn jacobian_inplace(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _yp: &DVector<f64>,
        _cj: f64,
        _jac: &mut SparseColMat,
    ) -> Result<(), DaeSolverError> {
        Err(evaluation_error!(NotProvided, "jacobian"))
    }

    /// Mass action `mv = dF/dy' * v`.
    fn mass_action_inplace(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _v: &DVector<f64>,
        _mv: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        Err(evaluation_error!(NotProvided, "mass_action"))
    }

    /// Jacobian-vector action `jv = dF/dy * v`. The default implementation uses a forward
    /// difference of the residual along `v`.
    fn jac_vector_action_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        v: &DVector<f64>,
        jv: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        finite_difference_jvp(self, t, y, yp, v, jv)
    }

    /// Right hand side of the sensitivity equation for parameter `i`, `out = dF/dp_i`.
    fn jac_parameter_action_inplace(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _yp: &DVector<f64>,
        _i: usize,
        _out: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        Err(evaluation_error!(NotProvided, "jac_parameter_action"))
    }

    /// Event indicators `g(t, y, yp)`, of length [DaeEvaluator::nevents].
    fn event_indicators_inplace(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _yp: &DVector<f64>,
        g: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        if g.is_empty() {
            Ok(())
        } else {
            Err(evaluation_error!(NotProvided, "event_indicators"))
        }
    }

    /// Residual of the sensitivity equation for parameter `i`,
    /// `out = dF/dy * s + dF/dy' * sp + dF/dp_i`. `tmp` is workspace of length
    /// [DaeEvaluator::nstates].
    #[allow(clippy::too_many_arguments)]
    fn sens_residual_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        s: &DVector<f64>,
        sp: &DVector<f64>,
        i: usize,
        tmp: &mut DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        self.jac_vector_action_inplace(t, y, yp, s, out)?;
        self.mass_action_inplace(t, y, sp, tmp)?;
        *out += &*tmp;
        self.jac_parameter_action_inplace(t, y, yp, i, tmp)?;
        *out += &*tmp;
        check_output("sensitivity residual", t, out)
    }
}

/// Forward difference approximation of `jv = dF/dy * v` using two residual evaluations.
pub(crate) fn finite_difference_jvp<E: DaeEvaluator + ?Sized>(
    eval: &E,
    t: f64,
    y: &DVector<f64>,
    yp: &DVector<f64>,
    v: &DVector<f64>,
    jv: &mut DVector<f64>,
) -> Result<(), DaeSolverError> {
    let vnorm = v.amax();
    if vnorm == 0.0 {
        jv.fill(0.0);
        return Ok(());
    }
    let eps = f64::EPSILON.sqrt() * y.amax().max(1.0) / vnorm;
    let mut f0 = DVector::zeros(jv.len());
    eval.residual_inplace(t, y, yp, &mut f0)?;
    let y_pert = y + v * eps;
    eval.residual_inplace(t, &y_pert, yp, jv)?;
    *jv -= &f0;
    *jv /= eps;
    Ok(())
}

pub(crate) fn check_input(function: &'static str, t: f64, y: &DVector<f64>) -> Result<(), DaeSolverError> {
    if !t.is_finite() || !y.is_all_finite() {
        return Err(evaluation_error!(NonFiniteInput { function, t }));
    }
    Ok(())
}

pub(crate) fn check_output(function: &'static str, t: f64, r: &DVector<f64>) -> Result<(), DaeSolverError> {
    if !r.is_all_finite() {
        return Err(evaluation_error!(NonFiniteOutput { function, t }));
    }
    Ok(())
}
