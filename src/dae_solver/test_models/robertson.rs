use crate::{evaluator::CallbackEvaluator, DaeBuilder, DaeProblem};

// Robertson chemical kinetics in index-1 DAE form
// y0' + 0.04 y0 - 1e4 y1 y2 = 0
// y1' - 0.04 y0 + 1e4 y1 y2 + 3e7 y1^2 = 0
// y0 + y1 + y2 - 1 = 0
pub fn robertson_evaluator() -> CallbackEvaluator<'static> {
    CallbackEvaluator::builder(3, |_t, y, yp, r| {
        r[0] = yp[0] + 0.04 * y[0] - 1.0e4 * y[1] * y[2];
        r[1] = yp[1] - 0.04 * y[0] + 1.0e4 * y[1] * y[2] + 3.0e7 * y[1] * y[1];
        r[2] = y[0] + y[1] + y[2] - 1.0;
    })
    .jacobian(|_t, y, _yp, cj, values| {
        // dense, column major
        values[0] = cj + 0.04;
        values[1] = -0.04;
        values[2] = 1.0;
        values[3] = -1.0e4 * y[2];
        values[4] = cj + 1.0e4 * y[2] + 6.0e7 * y[1];
        values[5] = 1.0;
        values[6] = -1.0e4 * y[1];
        values[7] = 1.0e4 * y[1];
        values[8] = 1.0;
    })
    .build()
    .expect("robertson evaluator")
}

pub fn robertson_problem(use_analytic_jacobian: bool) -> (DaeProblem, CallbackEvaluator<'static>) {
    let problem = DaeBuilder::new()
        .y0([1.0, 0.0, 0.0])
        .yp0([-0.04, 0.04, 0.0])
        .differential([true, true, false])
        .rtol(1e-4)
        .atol([1e-8, 1e-10, 1e-8])
        .use_analytic_jacobian(use_analytic_jacobian)
        .build()
        .expect("robertson problem");
    (problem, robertson_evaluator())
}
