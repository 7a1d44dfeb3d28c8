//! # daesol
//!
//! `daesol` solves differential-algebraic equations (DAEs) of index one in the fully implicit form
//!
//! ```text
//! F(t, y, y') = 0,  y(t0) = y0,  y'(t0) = yp0,
//! ```
//!
//! with a variable order, variable step BDF (NDF) method, a sparse Jacobian factorized by faer
//! and reused under modified Newton, weighted error control over the differential components,
//! terminal events and forward sensitivities with respect to the parameters of `F`.
//!
//! ## Defining a problem
//!
//! The initial state, tolerances and options are given with a [DaeBuilder], which validates them
//! and returns a [DaeProblem]. The functions of the DAE are supplied by an evaluator, either
//! - a [CallbackEvaluator] wrapping closures for the residual, the Jacobian `dF/dy + cj dF/dy'`
//!   in compressed-column form, and optionally the sensitivity terms and event indicators, or
//! - an [ExpressionEvaluator] built from [expr::Expr] graphs, which derives the Jacobian, its
//!   sparsity pattern and the sensitivity terms symbolically.
//!
//! ## Solving
//!
//! [solve] (or [solve_callback] and [solve_expression]) runs the integration over a time grid and
//! returns a [Trajectory] with the recorded points, a [SolveStatus], the event that stopped the
//! solve if any, and [SolverStatistics]. Configuration errors are returned as `Err`, numerical
//! failures end the solve with a failed status and keep the points reached so far.
//!
//! The driver itself ([Bdf]) can also be stepped by hand, see [Bdf::step] and
//! [Bdf::set_stop_time].
//!
//! ## Diagnostics
//!
//! The crate logs through the [log] facade; install a logger to see step rejections, Jacobian
//! refreshes and failures.

pub mod dae_solver;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod jacobian;
pub mod linear_solver;
pub mod matrix;
pub mod nonlinear_solver;
pub mod op;
pub mod solve;
pub mod vector;

pub type IndexType = usize;

pub use dae_solver::{
    Bdf, BdfState, DaeBuilder, DaeProblem, DriverState, EventRecord, FailureCode, OutputMode,
    SensitivityStatus, SolveStatus, SolverConfig, SolverStatistics, StepOutcome, Trajectory,
};
pub use error::DaeSolverError;
pub use evaluator::{CallbackEvaluator, DaeEvaluator, ExpressionEvaluator};
pub use linear_solver::{FaerSparseLU, LinearSolver, NalgebraLU};
pub use matrix::{SparseColMat, Sparsity};
pub use solve::{solve, solve_callback, solve_expression, solve_with};

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::{solve_callback, CallbackEvaluator, DaeBuilder, SolveStatus};

    // WARNING: if this test fails and you make a change to the code, you should update the README.md file as well!!!
    #[test]
    fn test_readme() {
        // Robertson kinetics with the conservation law as an algebraic equation
        let problem = DaeBuilder::new()
            .y0([1.0, 0.0, 0.0])
            .yp0([-0.04, 0.04, 0.0])
            .differential([true, true, false])
            .rtol(1e-4)
            .atol([1.0e-8, 1.0e-6, 1.0e-6])
            .build()
            .unwrap();
        let eval = CallbackEvaluator::builder(3, |_t, y, yp, r| {
            r[0] = yp[0] + 0.04 * y[0] - 1.0e4 * y[1] * y[2];
            r[1] = yp[1] - 0.04 * y[0] + 1.0e4 * y[1] * y[2] + 3.0e7 * y[1] * y[1];
            r[2] = y[0] + y[1] + y[2] - 1.0;
        })
        .build()
        .unwrap();

        let trajectory = solve_callback(&[0.0, 0.4], &problem, &eval).unwrap();
        assert_eq!(trajectory.status(), SolveStatus::Success);
        let y = trajectory.last_y().unwrap();
        assert_relative_eq!(y[0], 0.9851, epsilon = 1e-3);
        assert_relative_eq!(y.sum(), 1.0, epsilon = 1e-6);
    }
}
