use std::cell::RefCell;

use log::debug;
use nalgebra::DVector;

use crate::{
    dae_solver_error,
    evaluator::DaeEvaluator,
    linear_solver::{FactorizedJacobian, LinearSolver},
    non_linear_solver_error,
    nonlinear_solver::line_search::BacktrackingLineSearch,
    op::{init::InitOp, JacobianOp},
    vector::VectorExt,
    DaeSolverError, SparseColMat,
};

use super::{problem::DaeProblem, trajectory::SolverStatistics};

/// First step size: a fraction of the integration span, reduced so that the first order
/// prediction `h * yp` is within half the tolerance of the differential components.
pub(crate) fn initial_step_size(problem: &DaeProblem, y: &DVector<f64>, yp: &DVector<f64>, tf: f64) -> f64 {
    let mut h = problem.config.initial_step_fraction * (tf - problem.t0).abs();
    let ypnorm = yp
        .squared_norm_masked(y, &problem.atol, problem.rtol, &problem.differential)
        .sqrt();
    if h * ypnorm > 0.5 {
        h = 0.5 / ypnorm;
    }
    h
}

/// Correct `y` (algebraic components) and `yp` (differential components) so that
/// `F(t0, y, yp) = 0`, using Newton iterations with a backtracking line search on the iteration
/// matrix at `cj = 1 / h0`. The Jacobian is rebuilt whenever the iteration stalls, up to
/// `maximum_initialisation_attempts` times.
///
/// On success `solver` holds a factorization valid at `cj`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn make_consistent<E: DaeEvaluator + ?Sized, LS: LinearSolver>(
    op: &JacobianOp<'_, E>,
    problem: &DaeProblem,
    cj: f64,
    y: &mut DVector<f64>,
    yp: &mut DVector<f64>,
    solver: &mut FactorizedJacobian<LS>,
    jac: &mut SparseColMat,
    statistics: &mut SolverStatistics,
) -> Result<(), DaeSolverError> {
    let t0 = problem.t0;
    let config = &problem.config;
    let n = y.len();
    let init = InitOp::new(&problem.differential, cj, y, yp);
    let residual = |y: &DVector<f64>, yp: &DVector<f64>, r: &mut DVector<f64>| {
        op.residual_inplace(t0, y, yp, r)
    };
    let mut x = init.pack();
    let mut delta = DVector::zeros(n);
    let mut trial = DVector::zeros(n);
    let mut line_search = BacktrackingLineSearch::default();

    for attempt in 0..config.maximum_initialisation_attempts {
        init.unpack(&x);
        op.jacobian_inplace(t0, &init.y(), &init.yp(), cj, jac)?;
        solver.factorize(jac, cj)?;

        init.call_inplace(&residual, &x, &mut delta)?;
        solver.solve_in_place(cj, &mut delta)?;
        let y_scale = init.y().clone();
        let norm_of = |d: &DVector<f64>| d.squared_norm(&y_scale, &problem.atol, problem.rtol).sqrt();
        let mut norm = norm_of(&delta);

        for _ in 0..config.maximum_initialisation_iterations {
            statistics.number_of_initialisation_iterations += 1;
            debug!(
                "Consistent initialisation attempt {}, update norm = {:.3e}",
                attempt + 1,
                norm
            );
            if norm <= config.initialisation_tolerance {
                x -= &delta;
                init.unpack(&x);
                y.copy_from(&*init.y());
                yp.copy_from(&*init.yp());
                return Ok(());
            }
            let step = line_search.take_optimal_step(&x, &delta, norm, |x_trial| {
                init.call_inplace(&residual, x_trial, &mut trial)?;
                solver.solve_in_place(cj, &mut trial)?;
                Ok(norm_of(&trial))
            });
            let (alpha, new_norm) = match step {
                Ok(step) => step,
                Err(e) => {
                    debug!("Consistent initialisation line search failed: {}", e);
                    break;
                }
            };
            x.axpy(-alpha, &delta, 1.0);
            init.call_inplace(&residual, &x, &mut delta)?;
            solver.solve_in_place(cj, &mut delta)?;
            let rate = new_norm / norm;
            norm = new_norm;
            if rate > config.newton_divergence_rate && norm > config.initialisation_tolerance {
                debug!("Consistent initialisation stalled with rate {:.3e}", rate);
                break;
            }
        }
    }
    Err(non_linear_solver_error!(InitialisationFailed {
        attempts: config.maximum_initialisation_attempts
    }))
}

/// Correct the initial sensitivities `s` (algebraic components) and `sp` (differential
/// components) so that the sensitivity residual vanishes at `t0`, reusing the factorization left
/// by [make_consistent].
#[allow(clippy::too_many_arguments)]
pub(crate) fn make_sensitivities_consistent<E: DaeEvaluator + ?Sized, LS: LinearSolver>(
    eval: &E,
    problem: &DaeProblem,
    cj: f64,
    y: &DVector<f64>,
    yp: &DVector<f64>,
    solver: &FactorizedJacobian<LS>,
    s: &mut [DVector<f64>],
    sp: &mut [DVector<f64>],
) -> Result<(), DaeSolverError> {
    let t0 = problem.t0;
    let n = y.len();
    let tmp = RefCell::new(DVector::zeros(n));
    let mut delta = DVector::zeros(n);
    for (i, (si, spi)) in s.iter_mut().zip(sp.iter_mut()).enumerate() {
        let init = InitOp::new(&problem.differential, cj, si, spi);
        let residual = |s: &DVector<f64>, sp: &DVector<f64>, r: &mut DVector<f64>| {
            eval.sens_residual_inplace(t0, y, yp, s, sp, i, &mut tmp.borrow_mut(), r)
        };
        let mut x = init.pack();
        let mut converged = false;
        for _ in 0..problem.config.maximum_initialisation_iterations {
            init.call_inplace(&residual, &x, &mut delta)?;
            solver.solve_in_place(cj, &mut delta)?;
            x -= &delta;
            let norm = delta
                .squared_norm(&init.y(), &problem.atol, problem.rtol)
                .sqrt();
            if norm <= problem.config.initialisation_tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(dae_solver_error!(SensitivitySolveFailed { time: t0 }));
        }
        init.unpack(&x);
        let (s_new, sp_new) = init.into_state();
        *si = s_new;
        *spi = sp_new;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dae_solver::test_models::{
            algebraic_pair::algebraic_pair_problem,
            linear_sensitivity::{linear_sensitivity_evaluator, linear_sensitivity_problem},
        },
        linear_solver::FaerSparseLU,
    };
    use approx::assert_relative_eq;

    #[test]
    fn test_initial_step_size() {
        let (problem, _eval) = algebraic_pair_problem(2.0);
        let y = problem.y0.clone();
        // only the differential derivative counts: |yp0| / (1e-6 + 1e-8) is large
        let yp = DVector::from_vec(vec![-1.0, 1e6]);
        let h = initial_step_size(&problem, &y, &yp, 10.0);
        assert_relative_eq!(h, 0.5 * (1e-6 + 1e-8), epsilon = 1e-15);
        let h = initial_step_size(&problem, &y, &DVector::zeros(2), 10.0);
        assert_relative_eq!(h, 0.01);
    }

    #[test]
    fn test_consistent_initialisation_of_algebraic_pair() {
        let (problem, eval) = algebraic_pair_problem(1.5);
        let op = JacobianOp::new(&eval, true, &problem.atol, problem.rtol).unwrap();
        let mut solver = FactorizedJacobian::<FaerSparseLU>::new(op.sparsity(), 0.3).unwrap();
        let mut jac = SparseColMat::new_from_sparsity(op.sparsity().clone());
        let mut statistics = SolverStatistics::default();
        let mut y = problem.y0.clone();
        let mut yp = problem.yp0.clone();
        let cj = 1.0 / 1e-3;
        make_consistent(&op, &problem, cj, &mut y, &mut yp, &mut solver, &mut jac, &mut statistics)
            .unwrap();
        assert_relative_eq!(y[0], 1.0);
        assert_relative_eq!(y[1], 2.0, epsilon = 1e-8);
        assert_relative_eq!(yp[0], -1.0, epsilon = 1e-8);
        assert!(statistics.number_of_initialisation_iterations >= 1);
        assert!(solver.is_valid_for(cj));
    }

    #[test]
    fn test_consistent_sensitivities() {
        let p = [2.0, 0.5];
        let problem = linear_sensitivity_problem();
        let eval = linear_sensitivity_evaluator(p);
        let op = JacobianOp::new(&eval, true, &problem.atol, problem.rtol).unwrap();
        let mut solver = FactorizedJacobian::<FaerSparseLU>::new(op.sparsity(), 0.3).unwrap();
        let mut jac = SparseColMat::new_from_sparsity(op.sparsity().clone());
        let mut statistics = SolverStatistics::default();
        let mut y = problem.y0.clone();
        let mut yp = problem.yp0.clone();
        let cj = 1.0 / 1e-3;
        make_consistent(&op, &problem, cj, &mut y, &mut yp, &mut solver, &mut jac, &mut statistics)
            .unwrap();
        let mut s = problem.s0.clone();
        let mut sp = problem.sp0.clone();
        make_sensitivities_consistent(&eval, &problem, cj, &y, &yp, &solver, &mut s, &mut sp)
            .unwrap();
        // s0 = 0 at t = 0, s0' = -y0 for p0, s1 = y0 for p1
        assert_relative_eq!(sp[0][0], -1.0, epsilon = 1e-8);
        assert_relative_eq!(s[0][1], 0.0, epsilon = 1e-8);
        assert_relative_eq!(sp[1][0], 0.0, epsilon = 1e-8);
        assert_relative_eq!(s[1][1], 1.0, epsilon = 1e-8);
    }
}
