use nalgebra::DVector;

use crate::{evaluator::CallbackEvaluator, DaeBuilder, DaeProblem};

// y' + a y = 0, J = cj + a
pub fn exponential_decay_evaluator(a: f64) -> CallbackEvaluator<'static> {
    CallbackEvaluator::builder(1, move |_t, y, yp, r| {
        r[0] = yp[0] + a * y[0];
    })
    .jacobian_structure(1, || vec![0], || vec![0, 1])
    .jacobian(move |_t, _y, _yp, cj, values| {
        values[0] = cj + a;
    })
    .build()
    .expect("exponential decay evaluator")
}

/// `y' + y = 0` with `y(0) = 1`, atol = 1e-8, rtol = 1e-6.
pub fn exponential_decay_problem(use_analytic_jacobian: bool) -> (DaeProblem, CallbackEvaluator<'static>) {
    let problem = DaeBuilder::new()
        .y0([1.0])
        .yp0([-1.0])
        .rtol(1e-6)
        .atol([1e-8])
        .use_analytic_jacobian(use_analytic_jacobian)
        .build()
        .expect("exponential decay problem");
    (problem, exponential_decay_evaluator(1.0))
}

pub fn exponential_decay_solution(t: f64) -> DVector<f64> {
    DVector::from_element(1, (-t).exp())
}

/// Exponential decay with the event indicator `g = t - t_event`.
pub fn exponential_decay_with_event_problem(
    t_event: f64,
) -> (DaeProblem, CallbackEvaluator<'static>) {
    let (problem, _) = exponential_decay_problem(true);
    let eval = CallbackEvaluator::builder(1, |_t, y, yp, r| {
        r[0] = yp[0] + y[0];
    })
    .jacobian_structure(1, || vec![0], || vec![0, 1])
    .jacobian(|_t, _y, _yp, cj, values| {
        values[0] = cj + 1.0;
    })
    .events(1, move |t, _y, _yp, g| {
        g[0] = t - t_event;
    })
    .build()
    .expect("exponential decay evaluator with event");
    (problem, eval)
}
