//! Solve entry points. Each call owns its driver, state and trajectory; nothing is shared
//! between calls.

use log::warn;

use crate::{
    config_error,
    dae_solver::{
        trajectory::TrajectoryRecorder, Bdf, DaeProblem, FailureCode, SolveStatus,
        SolverStatistics, Trajectory,
    },
    error::DaeSolverError,
    evaluator::{CallbackEvaluator, DaeEvaluator, ExpressionEvaluator},
    linear_solver::{FaerSparseLU, LinearSolver},
};

/// Solve `problem` for the DAE defined by `eval` over the time grid `t_eval`, using the sparse LU
/// of faer for the iteration matrix.
///
/// The first grid time must not be before `problem.t0`, the last one is the final time. The only
/// errors returned are configuration errors, found before any integration; numerical failures
/// are reported by [Trajectory::status].
pub fn solve<E: DaeEvaluator + ?Sized>(
    t_eval: &[f64],
    problem: &DaeProblem,
    eval: &E,
) -> Result<Trajectory, DaeSolverError> {
    solve_with::<E, FaerSparseLU>(t_eval, problem, eval)
}

/// As [solve], with the linear solver `LS` factorizing the iteration matrix.
pub fn solve_with<E: DaeEvaluator + ?Sized, LS: LinearSolver>(
    t_eval: &[f64],
    problem: &DaeProblem,
    eval: &E,
) -> Result<Trajectory, DaeSolverError> {
    check_problem(t_eval, problem, eval)?;
    match Bdf::<E, LS>::new(problem, eval) {
        Ok(solver) => Ok(solver.solve(t_eval)),
        Err(DaeSolverError::ConfigurationError(e)) => Err(e.into()),
        Err(e) => {
            // only the symbolic analysis of the Jacobian structure can fail here
            warn!("Linear solver could not be set up: {}", e);
            let status = SolveStatus::Failed(FailureCode::SingularJacobian);
            Ok(TrajectoryRecorder::new(problem.nparams).finish(status, SolverStatistics::default()))
        }
    }
}

/// Solve with host supplied callbacks, see [CallbackEvaluator].
pub fn solve_callback(
    t_eval: &[f64],
    problem: &DaeProblem,
    eval: &CallbackEvaluator,
) -> Result<Trajectory, DaeSolverError> {
    solve(t_eval, problem, eval)
}

/// Solve with precompiled expression graphs, see [ExpressionEvaluator].
pub fn solve_expression(
    t_eval: &[f64],
    problem: &DaeProblem,
    eval: &ExpressionEvaluator,
) -> Result<Trajectory, DaeSolverError> {
    solve(t_eval, problem, eval)
}

fn check_problem<E: DaeEvaluator + ?Sized>(
    t_eval: &[f64],
    problem: &DaeProblem,
    eval: &E,
) -> Result<(), DaeSolverError> {
    problem.check()?;
    if t_eval.len() < 2
        || t_eval.iter().any(|t| !t.is_finite())
        || t_eval.windows(2).any(|w| w[1] <= w[0])
        || t_eval[0] < problem.t0
    {
        return Err(config_error!(InvalidTimeGrid));
    }
    let n = problem.nstates();
    if eval.nstates() != n {
        return Err(config_error!(DimensionMismatch {
            name: "evaluator states",
            expected: n,
            found: eval.nstates()
        }));
    }
    let sparsity = eval.jacobian_sparsity();
    if sparsity.nrows() != n || sparsity.ncols() != n {
        return Err(config_error!(InvalidSparsity, format!(
            "pattern is {}x{} for {} states",
            sparsity.nrows(),
            sparsity.ncols(),
            n
        )));
    }
    if problem.nparams > 0 {
        if eval.nparams() != problem.nparams {
            return Err(config_error!(DimensionMismatch {
                name: "sensitivity parameters",
                expected: problem.nparams,
                found: eval.nparams()
            }));
        }
        if !eval.has_sensitivities() {
            return Err(config_error!(SensitivitiesNotSupported));
        }
    }
    if problem.use_analytic_jacobian && !eval.has_jacobian() {
        return Err(config_error!(JacobianNotAvailable));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        dae_solver::test_models::{
            exponential_decay::{exponential_decay_evaluator, exponential_decay_problem},
            linear_sensitivity::{
                linear_sensitivity_expression_evaluator, linear_sensitivity_problem,
            },
            robertson::robertson_problem,
        },
        linear_solver::NalgebraLU,
        DaeBuilder,
    };

    #[test]
    fn test_invalid_time_grids() {
        let (problem, eval) = exponential_decay_problem(true);
        let messages = [
            vec![0.0],
            vec![0.0, 1.0, 1.0],
            vec![0.0, 2.0, 1.0],
            vec![-1.0, 1.0],
            vec![0.0, f64::NAN],
        ]
        .iter()
        .map(|t_eval| solve_callback(t_eval, &problem, &eval).unwrap_err().to_string())
        .collect::<Vec<_>>();
        assert!(messages.iter().all(|m| m == &messages[0]));
        insta::assert_snapshot!(messages[0], @"Configuration error: Time grid must contain at least two strictly increasing points not before t0");
    }

    #[test]
    fn test_evaluator_must_match_problem() {
        let problem = DaeBuilder::new()
            .y0([1.0, 1.0])
            .build()
            .unwrap();
        let eval = exponential_decay_evaluator(1.0);
        let err = solve(&[0.0, 1.0], &problem, &eval).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Configuration error: evaluator states has wrong length: expected 2, got 1");
    }

    #[test]
    fn test_sensitivity_parameters_must_match() {
        let problem = DaeBuilder::new()
            .y0([1.0])
            .yp0([-1.0])
            .sensitivities(1)
            .build()
            .unwrap();
        let eval = exponential_decay_evaluator(1.0);
        let err = solve(&[0.0, 1.0], &problem, &eval).unwrap_err();
        assert!(matches!(
            err,
            DaeSolverError::ConfigurationError(crate::error::ConfigurationError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_edited_problem_is_checked_again() {
        let (problem, eval) = exponential_decay_problem(true);
        let wrong_flags = DaeProblem {
            differential: vec![true, false],
            ..problem.clone()
        };
        let err = solve(&[0.0, 1.0], &wrong_flags, &eval).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Configuration error: differential has wrong length: expected 1, got 2");

        let zero_atol = DaeProblem {
            atol: nalgebra::DVector::zeros(1),
            ..problem
        };
        let err = solve(&[0.0, 1.0], &zero_atol, &eval).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Configuration error: atol must be strictly positive and finite, got 0");
    }

    #[test]
    fn test_expression_entry_point() {
        let problem = linear_sensitivity_problem();
        let eval = linear_sensitivity_expression_evaluator([2.0, 0.5]);
        let trajectory = solve_expression(&[0.0, 0.5], &problem, &eval).unwrap();
        assert_eq!(trajectory.status(), SolveStatus::Success);
        assert_relative_eq!(trajectory.last_y().unwrap()[0], (-1.0f64).exp(), epsilon = 1e-5);
    }

    #[test]
    fn test_dense_linear_solver_agrees() {
        let (problem, eval) = robertson_problem(true);
        let sparse = solve(&[0.0, 1.0], &problem, &eval).unwrap();
        let dense = solve_with::<_, NalgebraLU>(&[0.0, 1.0], &problem, &eval).unwrap();
        assert_eq!(dense.status(), SolveStatus::Success);
        let (a, b) = (sparse.last_y().unwrap(), dense.last_y().unwrap());
        for i in 0..3 {
            assert_relative_eq!(a[i], b[i], epsilon = 1e-7, max_relative = 1e-4);
        }
    }
}
