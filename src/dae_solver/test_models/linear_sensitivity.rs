use nalgebra::DVector;

use crate::{
    evaluator::{CallbackEvaluator, ExpressionEvaluator},
    expr::Expr,
    DaeBuilder, DaeProblem,
};

// y0' + p0 y0 = 0
// y1 - p1 y0 = 0
// with y0(0) = 1, so that y0 = exp(-p0 t) and y1 = p1 exp(-p0 t)
pub fn linear_sensitivity_evaluator(p: [f64; 2]) -> CallbackEvaluator<'static> {
    CallbackEvaluator::builder(2, move |_t, y, yp, r| {
        r[0] = yp[0] + p[0] * y[0];
        r[1] = y[1] - p[1] * y[0];
    })
    .jacobian_structure(3, || vec![0, 1, 1], || vec![0, 2, 3])
    .jacobian(move |_t, _y, _yp, cj, values| {
        values[0] = cj + p[0];
        values[1] = -p[1];
        values[2] = 1.0;
    })
    .mass_action(|_t, _y, v, mv| {
        mv[0] = v[0];
        mv[1] = 0.0;
    })
    .jac_vector_action(move |_t, _y, _yp, v, jv| {
        jv[0] = p[0] * v[0];
        jv[1] = v[1] - p[1] * v[0];
    })
    .jac_parameter_action(2, |_t, y, _yp, i, out| match i {
        0 => {
            out[0] = y[0];
            out[1] = 0.0;
        }
        _ => {
            out[0] = 0.0;
            out[1] = -y[0];
        }
    })
    .build()
    .expect("linear sensitivity evaluator")
}

/// The same system built from expression graphs, with the Jacobian and the sensitivity terms
/// derived symbolically.
pub fn linear_sensitivity_expression_evaluator(p: [f64; 2]) -> ExpressionEvaluator {
    let residual = [
        Expr::yp(0) + Expr::p(0) * Expr::y(0),
        Expr::y(1) - Expr::p(1) * Expr::y(0),
    ];
    ExpressionEvaluator::from_residual(&residual, &[], p.to_vec())
        .expect("linear sensitivity expression evaluator")
}

pub fn linear_sensitivity_problem() -> DaeProblem {
    DaeBuilder::new()
        .y0([1.0, 0.5])
        .yp0([-2.0, 0.0])
        .differential([true, false])
        .rtol(1e-7)
        .atol([1e-9])
        .sensitivities(2)
        .use_analytic_jacobian(true)
        .build()
        .expect("linear sensitivity problem")
}

/// Exact `(y, [dy/dp0, dy/dp1])` at `t` for parameters `p`.
pub fn linear_sensitivity_solution(p: [f64; 2], t: f64) -> (DVector<f64>, Vec<DVector<f64>>) {
    let e = (-p[0] * t).exp();
    let y = DVector::from_vec(vec![e, p[1] * e]);
    let s0 = DVector::from_vec(vec![-t * e, -p[1] * t * e]);
    let s1 = DVector::from_vec(vec![0.0, e]);
    (y, vec![s0, s1])
}
