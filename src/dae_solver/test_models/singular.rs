use std::cell::Cell;

use crate::{evaluator::CallbackEvaluator, DaeBuilder, DaeProblem, SolverConfig};

/// Time at which the Jacobians of these models become singular.
pub const T_SINGULAR: f64 = 2.0;

fn a(t: f64) -> f64 {
    if t < T_SINGULAR {
        1.0
    } else {
        0.0
    }
}

// y0' + y0 = 0
// a(t) y1 - 1 = 0
// the algebraic equation loses its solution at t = 2, and dF/dy becomes singular
pub fn persistent_singular_problem() -> (DaeProblem, CallbackEvaluator<'static>) {
    let eval = CallbackEvaluator::builder(2, |t, y, yp, r| {
        r[0] = yp[0] + y[0];
        r[1] = a(t) * y[1] - 1.0;
    })
    .jacobian_structure(2, || vec![0, 1], || vec![0, 1, 2])
    .jacobian(|t, _y, _yp, cj, values| {
        values[0] = cj + 1.0;
        values[1] = a(t);
    })
    .build()
    .expect("singular evaluator");
    let problem = DaeBuilder::new()
        .y0([1.0, 1.0])
        .yp0([-1.0, 0.0])
        .differential([true, false])
        .rtol(1e-6)
        .atol([1e-8])
        .use_analytic_jacobian(true)
        .build()
        .expect("singular problem");
    (problem, eval)
}

// y0' + y0 = 0
// y1 - 1 = 0
// the first `nfailures` Jacobians requested after t = 2 have a zero column, the residual is regular
pub fn transient_singular_problem(nfailures: usize) -> (DaeProblem, CallbackEvaluator<'static>) {
    let failures = Cell::new(0usize);
    let eval = CallbackEvaluator::builder(2, |_t, y, yp, r| {
        r[0] = yp[0] + y[0];
        r[1] = y[1] - 1.0;
    })
    .jacobian_structure(2, || vec![0, 1], || vec![0, 1, 2])
    .jacobian(move |t, _y, _yp, cj, values| {
        values[0] = cj + 1.0;
        values[1] = 1.0;
        if t >= T_SINGULAR && failures.get() < nfailures {
            failures.set(failures.get() + 1);
            values[1] = 0.0;
        }
    })
    .build()
    .expect("transient singular evaluator");
    let config = SolverConfig {
        jacobian_refresh_steps: 1,
        ..Default::default()
    };
    let problem = DaeBuilder::new()
        .y0([1.0, 1.0])
        .yp0([-1.0, 0.0])
        .differential([true, false])
        .rtol(1e-6)
        .atol([1e-8])
        .use_analytic_jacobian(true)
        .config(config)
        .build()
        .expect("transient singular problem");
    (problem, eval)
}
