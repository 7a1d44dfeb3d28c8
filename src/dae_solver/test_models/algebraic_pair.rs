use nalgebra::DVector;

use crate::{evaluator::CallbackEvaluator, DaeBuilder, DaeProblem};

// index-1 pair
// y0' + y0 = 0
// y1 - 2 y0 = 0
pub fn algebraic_pair_evaluator() -> CallbackEvaluator<'static> {
    CallbackEvaluator::builder(2, |_t, y, yp, r| {
        r[0] = yp[0] + y[0];
        r[1] = y[1] - 2.0 * y[0];
    })
    .jacobian_structure(3, || vec![0, 1, 1], || vec![0, 2, 3])
    .jacobian(|_t, _y, _yp, cj, values| {
        values[0] = cj + 1.0;
        values[1] = -2.0;
        values[2] = 1.0;
    })
    .build()
    .expect("algebraic pair evaluator")
}

/// The pair starting from `y1 = y1_guess` and `y0' = 0`, which the consistent initialisation must
/// correct to `y1 = 2`, `y0' = -1`.
pub fn algebraic_pair_problem(y1_guess: f64) -> (DaeProblem, CallbackEvaluator<'static>) {
    let problem = DaeBuilder::new()
        .y0([1.0, y1_guess])
        .yp0([0.0, 0.0])
        .differential([true, false])
        .rtol(1e-6)
        .atol([1e-8])
        .use_analytic_jacobian(true)
        .build()
        .expect("algebraic pair problem");
    (problem, algebraic_pair_evaluator())
}

pub fn algebraic_pair_solution(t: f64) -> DVector<f64> {
    let y0 = (-t).exp();
    DVector::from_vec(vec![y0, 2.0 * y0])
}
