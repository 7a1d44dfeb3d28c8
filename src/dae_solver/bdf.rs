use log::{debug, info, trace, warn};
use nalgebra::{DMatrix, DVector};

use crate::{
    dae_solver_error,
    error::{NonLinearSolverError, SolverError},
    evaluator::DaeEvaluator,
    linear_solver::{FactorizedJacobian, FaerSparseLU, LinearSolver},
    nonlinear_solver::{
        convergence::Convergence,
        newton::NewtonNonlinearSolver,
        root::{Root, RootFinder},
    },
    op::{bdf::BdfCallable, JacobianOp},
    vector::VectorExt,
    DaeSolverError, IndexType, SparseColMat,
};

use super::{
    config::OutputMode,
    init::{initial_step_size, make_consistent, make_sensitivities_consistent},
    jacobian_update::{JacobianUpdate, SolverState},
    problem::DaeProblem,
    sensitivities::SensitivityCorrector,
    state::{interpolate_derivative_from_diff, interpolate_from_diff, BdfState},
    trajectory::{
        EventRecord, FailureCode, SolveStatus, SolverStatistics, Trajectory, TrajectoryRecorder,
    },
};

/// Why [Bdf::step] returned.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    /// A step was accepted, the state is at an internal time step.
    InternalTimestep,
    /// A step was accepted and the state is at the stop time set by [Bdf::set_stop_time].
    TstopReached,
}

/// States of the integration driver, see [Bdf::solve].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DriverState {
    Initializing,
    Stepping,
    EventPending(StepOutcome),
    Completed(SolveStatus),
    Failed(FailureCode),
}

/// Driver state at the start of an accepted step, restored to integrate up to an event inside
/// the step.
#[derive(Clone)]
struct StepSnapshot {
    state: BdfState,
    n_equal_steps: usize,
    sensitivity_failed_at: Option<f64>,
    number_of_steps: usize,
}

/// Implements a variable order Backward Difference Formula (BDF) integrator for the DAE
/// `F(t, y, y') = 0`.
///
/// The basic algorithm is derived in \[1\]. This particular implementation follows the Matlab
/// routine ode15s described in \[2\] and the SciPy implementation \[3\], which feature the NDF
/// formulas for improved stability, with associated differences in the error constants. The
/// corrector is a modified Newton iteration on `dF/dy + cj * dF/dy'`, whose factorization is
/// reused while the shift constant `cj` stays within a drift threshold. Algebraic components are
/// excluded from the local error test.
///
/// # References
///
/// \[1\] Byrne, G. D., & Hindmarsh, A. C. (1975). A polyalgorithm for the numerical solution of ordinary differential equations. ACM Transactions on Mathematical Software (TOMS), 1(1), 71-96.
/// \[2\] Shampine, L. F., & Reichelt, M. W. (1997). The matlab ode suite. SIAM journal on scientific computing, 18(1), 1-22.
/// \[3\] Virtanen, P., Gommers, R., Oliphant, T. E., Haberland, M., Reddy, T., Cournapeau, D., ... & Van Mulbregt, P. (2020). SciPy 1.0: fundamental algorithms for scientific computing in Python. Nature methods, 17(3), 261-272.
pub struct Bdf<'a, E: DaeEvaluator + ?Sized, LS: LinearSolver = FaerSparseLU> {
    problem: &'a DaeProblem,
    callable: BdfCallable<'a, E>,
    nonlinear_solver: NewtonNonlinearSolver<LS>,
    convergence: Convergence<'a>,
    sens_convergence: Convergence<'a>,
    jacobian_update: JacobianUpdate,
    jac: SparseColMat,
    state: BdfState,
    n_equal_steps: usize,
    alpha: Vec<f64>,
    gamma: Vec<f64>,
    error_const2: Vec<f64>,
    max_order: usize,
    tstop: Option<f64>,
    sensitivities: Option<SensitivityCorrector>,
    sensitivity_failed_at: Option<f64>,
    last_failure: Option<FailureCode>,
    number_of_attempts: usize,
    init_factorizations: usize,
    statistics: SolverStatistics,
}

impl<'a, E: DaeEvaluator + ?Sized, LS: LinearSolver> Bdf<'a, E, LS> {
    const MAX_ORDER: IndexType = BdfState::MAX_ORDER;

    pub fn new(problem: &'a DaeProblem, eval: &'a E) -> Result<Self, DaeSolverError> {
        problem.check()?;
        let config = &problem.config;
        let op = JacobianOp::new(eval, problem.use_analytic_jacobian, &problem.atol, problem.rtol)?;
        let nonlinear_solver = NewtonNonlinearSolver::new(op.sparsity(), config.shift_drift_threshold)?;
        let jac = SparseColMat::new_from_sparsity(op.sparsity().clone());
        let callable = BdfCallable::new(op);

        let mut convergence = Convergence::new(problem.rtol, &problem.atol)
            .with_tolerance(config.newton_tolerance, config.newton_divergence_rate);
        convergence.set_max_iter(config.maximum_newton_iterations);
        let mut sens_convergence = convergence.clone();
        sens_convergence.set_max_iter(config.maximum_sensitivity_iterations);

        // kappa values for difference orders, taken from Table 1 of [1]
        let kappa = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];
        let mut alpha = vec![0.0];
        let mut gamma = vec![0.0];
        let mut error_const2 = vec![1.0];
        for i in 1..=Self::MAX_ORDER {
            let i_t = i as f64;
            gamma.push(gamma[i - 1] + 1.0 / i_t);
            alpha.push(1.0 / ((1.0 - kappa[i]) * gamma[i]));
            error_const2.push((kappa[i] * gamma[i] + 1.0 / (i_t + 1.0)).powi(2));
        }

        let nstates = problem.nstates();
        let sensitivities = if problem.nparams > 0 {
            Some(SensitivityCorrector::new(nstates, problem.nparams))
        } else {
            None
        };
        let state = BdfState::new(
            problem.t0,
            1.0,
            problem.y0.clone(),
            problem.yp0.clone(),
            problem.s0.clone(),
            problem.sp0.clone(),
        );

        Ok(Self {
            problem,
            callable,
            nonlinear_solver,
            convergence,
            sens_convergence,
            jacobian_update: JacobianUpdate::new(config.jacobian_refresh_steps),
            jac,
            state,
            n_equal_steps: 0,
            alpha,
            gamma,
            error_const2,
            max_order: config.max_order.min(Self::MAX_ORDER),
            tstop: None,
            sensitivities,
            sensitivity_failed_at: None,
            last_failure: None,
            number_of_attempts: 0,
            init_factorizations: 0,
            statistics: SolverStatistics::default(),
        })
    }

    pub fn state(&self) -> &BdfState {
        &self.state
    }

    pub fn order(&self) -> usize {
        self.state.order
    }

    /// Time at which the sensitivity solve failed, if it has.
    pub fn sensitivity_failed_at(&self) -> Option<f64> {
        self.sensitivity_failed_at
    }

    pub fn statistics(&self) -> SolverStatistics {
        let op = self.callable.op();
        let mut statistics = self.statistics.clone();
        statistics.number_of_jacobian_evals = op.number_of_jac_evals();
        statistics.number_of_residual_evals = op.number_of_residual_evals();
        statistics.number_of_linear_solver_setups =
            self.nonlinear_solver.factorization().number_of_factorizations() + self.init_factorizations;
        statistics.final_step_size = self.state.h;
        statistics
    }

    /// Make the initial state consistent and choose the first step for an integration up to
    /// `tf`.
    pub fn initialise(&mut self, tf: f64) -> Result<(), DaeSolverError> {
        let problem = self.problem;
        let op = self.callable.op();
        let mut y = problem.y0.clone();
        let mut yp = problem.yp0.clone();
        let h0 = initial_step_size(problem, &y, &yp, tf);
        let cj = 1.0 / h0;

        let mut factorization =
            FactorizedJacobian::<LS>::new(op.sparsity(), problem.config.shift_drift_threshold)?;
        let mut jac = SparseColMat::new_from_sparsity(op.sparsity().clone());
        let result = make_consistent(
            op,
            problem,
            cj,
            &mut y,
            &mut yp,
            &mut factorization,
            &mut jac,
            &mut self.statistics,
        );
        self.init_factorizations += factorization.number_of_factorizations();
        result?;
        debug!("Consistent initial state found at t = {}", problem.t0);

        let mut s = problem.s0.clone();
        let mut sp = problem.sp0.clone();
        if problem.nparams > 0 {
            if let Err(e) = make_sensitivities_consistent(
                op.eval(),
                problem,
                cj,
                &y,
                &yp,
                &factorization,
                &mut s,
                &mut sp,
            ) {
                warn!("Initial sensitivities could not be made consistent: {}", e);
                self.sensitivity_failed_at = Some(problem.t0);
            }
        }

        let h = initial_step_size(problem, &y, &yp, tf);
        self.state = BdfState::new(problem.t0, h, y, yp, s, sp);
        self.n_equal_steps = 0;
        self.callable.set_cj(h, self.alpha[self.state.order]);
        self.jacobian_update.mark_stale();
        self.statistics.initial_step_size = h;
        Ok(())
    }

    /// Set a stop time for the solver. The solver stops when the internal time reaches this
    /// time, and then unsets it. A stop time before the current time is an error.
    pub fn set_stop_time(&mut self, tstop: f64) -> Result<(), DaeSolverError> {
        if tstop <= self.state.t {
            return Err(dae_solver_error!(StopTimeBeforeCurrentTime {
                stop_time: tstop,
                state_time: self.state.t
            }));
        }
        self.tstop = Some(tstop);
        Ok(())
    }

    /// Interpolate the state at `t` within the last step.
    pub fn interpolate(&self, t: f64) -> DVector<f64> {
        let state = &self.state;
        interpolate_from_diff(t, state.t, state.h, state.order, &state.diff)
    }

    /// Interpolate the time derivative of the state at `t` within the last step.
    pub fn interpolate_yp(&self, t: f64) -> DVector<f64> {
        let state = &self.state;
        interpolate_derivative_from_diff(t, state.t, state.h, state.order, &state.diff)
    }

    /// Interpolate the sensitivities at `t` within the last step.
    pub fn interpolate_sens(&self, t: f64) -> Vec<DVector<f64>> {
        let state = &self.state;
        state
            .sdiff
            .iter()
            .map(|sdiff| interpolate_from_diff(t, state.t, state.h, state.order, sdiff))
            .collect()
    }

    fn _compute_r(order: usize, factor: f64) -> DMatrix<f64> {
        //computes the R matrix with entries
        //given by the first equation on page 8 of [1]
        //
        //This is used to update the differences matrix when step size h is varied
        //according to factor = h_{n+1} / h_n
        //
        //Note that the U matrix also defined in the same section can be also be
        //found using factor = 1, which corresponds to R with a constant step size
        let mut r = DMatrix::zeros(order + 1, order + 1);

        // r[0, 0:order] = 1
        for j in 0..=order {
            r[(0, j)] = 1.0;
        }
        // r[i, j] = r[i, j-1] * (j - 1 - factor * i) / j
        for i in 1..=order {
            for j in 1..=order {
                let i_t = i as f64;
                let j_t = j as f64;
                r[(i, j)] = r[(i - 1, j)] * (i_t - 1.0 - factor * j_t) / i_t;
            }
        }
        r
    }

    fn _update_step_size(&mut self, factor: f64) {
        //If step size h is changed then also need to update the terms in
        //the first equation of page 9 of [1]:
        //
        //- constant c = h / (1-kappa) gamma_k term
        //- the factorization of the iteration matrix is only rebuilt if c drifts too far
        let order = self.state.order;
        self.state.h *= factor;
        self.n_equal_steps = 0;

        // update D using equations in section 3.2 of [1]
        let u = Self::_compute_r(order, 1.0);
        let r = Self::_compute_r(order, factor);
        let ru = r * u;
        // D[0:order+1] = D[0:order+1] * RU
        let rescale = |diff: &mut DMatrix<f64>| {
            let scaled = diff.columns(0, order + 1) * &ru;
            diff.columns_mut(0, order + 1).copy_from(&scaled);
        };
        rescale(&mut self.state.diff);
        for sdiff in self.state.sdiff.iter_mut() {
            rescale(sdiff);
        }

        self.callable.set_cj(self.state.h, self.alpha[order]);
    }

    fn _update_diff(order: usize, d: &DVector<f64>, diff: &mut DMatrix<f64>) {
        //update of difference equations can be done efficiently
        //by reusing d and D.
        //
        //From first equation on page 4 of [1]:
        //d = y_n - y^0_n = D^{k + 1} y_n
        //
        //Standard backwards difference gives
        //D^{j + 1} y_n = D^{j} y_n - D^{j} y_{n - 1}
        //
        //Combining these gives the following algorithm
        let d_minus_order_plus_one = d - diff.column(order + 1);
        diff.column_mut(order + 2).copy_from(&d_minus_order_plus_one);
        diff.column_mut(order + 1).copy_from(d);
        for i in (0..=order).rev() {
            let tmp = diff.column(i + 1).into_owned();
            let mut col = diff.column_mut(i);
            col += &tmp;
        }
    }

    fn _predict_forward(&self) -> (DVector<f64>, f64) {
        let state = &self.state;
        // predict forward to new step (eq 2 in [1])
        let mut y_predict = DVector::zeros(state.y.len());
        for i in 0..=state.order {
            y_predict += state.diff.column(i);
        }

        // update psi and c (h, D, y0 has changed)
        self.callable
            .set_psi_and_y0(&state.diff, &self.gamma, &self.alpha, state.order, &y_predict);
        let t_new = state.t + state.h;
        self.callable.set_time(t_new);
        (y_predict, t_new)
    }

    fn troundoff(&self) -> f64 {
        100.0 * f64::EPSILON * (self.state.t.abs() + self.state.h.abs())
    }

    /// Shorten the next step so that it does not pass the stop time.
    fn clamp_step_to_tstop(&mut self) {
        if let Some(tstop) = self.tstop {
            let state = &self.state;
            if state.t + state.h > tstop {
                let factor = (tstop - state.t) / state.h;
                self._update_step_size(factor);
            }
        }
    }

    /// Refresh the Jacobian if the refresh policy or the shift constant drift asks for it.
    /// Returns true if a new Jacobian was factorized.
    fn refresh_jacobian(
        &mut self,
        y_predict: &DVector<f64>,
        solver_state: SolverState,
    ) -> Result<bool, DaeSolverError> {
        let cj = self.callable.cj();
        if self.nonlinear_solver.is_jacobian_valid_for(cj)
            && !self.jacobian_update.check_jacobian_update(solver_state)
        {
            return Ok(false);
        }
        debug!(
            "Refreshing Jacobian at t = {}, cj = {:.3e} ({:?})",
            self.callable.t(),
            cj,
            solver_state
        );
        self.jacobian_update.mark_stale();
        self.callable.jacobian_inplace(y_predict, &mut self.jac)?;
        self.nonlinear_solver.reset_jacobian(&self.jac, cj)?;
        self.jacobian_update.update_jacobian(cj);
        Ok(true)
    }

    /// Take one step, retrying with smaller steps until the step is accepted or a failure limit
    /// is reached.
    pub fn step(&mut self) -> Result<StepOutcome, DaeSolverError> {
        let problem = self.problem;
        let config = &problem.config;
        let rtol = problem.rtol;
        let atol = &problem.atol;

        if f64::EPSILON * self.state.y.squared_norm(&self.state.y, atol, rtol).sqrt() > 1.0 {
            return Err(dae_solver_error!(ToleranceTooSmall { time: self.state.t }));
        }
        self.clamp_step_to_tstop();

        let mut solver_state = SolverState::StepSuccess;
        let mut error_test_fails = 0;
        let mut convergence_fails = 0;

        // loop until step is accepted
        let (y_new, y_delta, error_norm, safety) = loop {
            if self.number_of_attempts >= config.maximum_steps {
                return Err(dae_solver_error!(MaximumStepsExceeded {
                    steps: config.maximum_steps
                }));
            }
            self.number_of_attempts += 1;

            let h = self.state.h;
            let t = self.state.t;
            if h < config.minimum_timestep || h <= 10.0 * f64::EPSILON * t.abs() {
                return Err(dae_solver_error!(StepSizeTooSmall { time: t }));
            }

            let (y_predict, t_new) = self._predict_forward();
            let mut y_new = y_predict.clone();
            let cj = self.callable.cj();

            // we will try and use the old jacobian unless convergence of newton iteration
            // fails, or the shift constant has drifted too far
            let (refreshed, solver_result) = match self.refresh_jacobian(&y_predict, solver_state) {
                Ok(fresh) => {
                    let callable = &self.callable;
                    let result = self.nonlinear_solver.solve_in_place(
                        |y, r| callable.call_inplace(y, r),
                        &mut y_new,
                        cj,
                        &y_predict,
                        &mut self.convergence,
                    );
                    self.statistics.number_of_nonlinear_solver_iterations +=
                        self.convergence.niter();
                    (fresh, result)
                }
                // a Jacobian that cannot be evaluated or factorized is as fresh as it gets
                Err(e) => (true, Err(e)),
            };

            match solver_result {
                Ok(()) => {
                    // test error is within tolerance, combine eq 3, 4 and 6 from [1] to obtain
                    // error. Note that error = C_k * h^{k+1} y^{k+1} and
                    // d = D^{k+1} y_{n+1} \approx h^{k+1} y^{k+1}
                    let order = self.state.order;
                    let y_delta = &y_new - &y_predict;
                    let error_norm = y_delta
                        .squared_norm_masked(&y_new, atol, rtol, &problem.differential)
                        * self.error_const2[order];

                    let maxiter = self.convergence.max_iter() as f64;
                    let niter = self.convergence.niter() as f64;
                    let safety = 0.9 * (2.0 * maxiter + 1.0) / (2.0 * maxiter + niter);

                    if error_norm <= 1.0 {
                        // step is accepted
                        break (y_new, y_delta, error_norm, safety);
                    }

                    // step is rejected
                    // calculate optimal step size factor as per eq 2.46 of [2]
                    // and reduce step size and try again
                    self.statistics.number_of_error_test_failures += 1;
                    error_test_fails += 1;
                    if error_test_fails >= config.maximum_error_test_failures {
                        return Err(dae_solver_error!(TooManyErrorTestFailures { time: t }));
                    }
                    let factor = (safety * error_norm.powf(-0.5 / (order as f64 + 1.0)))
                        .max(config.minimum_timestep_shrink);
                    debug!(
                        "Error test failed at t = {}, error norm = {:.3e}, step factor = {:.3}",
                        t_new, error_norm, factor
                    );
                    self._update_step_size(factor);
                    solver_state = SolverState::ErrorTestFail;
                }
                Err(e) => {
                    self.statistics.number_of_nonlinear_solver_fails += 1;
                    let cause = classify_step_failure(&e);
                    if cause == FailureCode::SingularJacobian {
                        self.statistics.number_of_singular_jacobians += 1;
                    }
                    self.last_failure = Some(cause);
                    convergence_fails += 1;
                    if convergence_fails >= config.maximum_convergence_failures {
                        return Err(dae_solver_error!(TooManyConvergenceFailures { time: t }));
                    }
                    self.jacobian_update.mark_stale();
                    if refreshed || cause != FailureCode::NonConvergence {
                        // newton iteration did not converge with a fresh jacobian (or the
                        // jacobian is unusable), reduce the step size and try again
                        debug!("Newton iteration failed at t = {} ({}): {}", t_new, cause, e);
                        self._update_step_size(config.convergence_failure_shrink);
                        solver_state = SolverState::SecondConvergenceFail;
                    } else {
                        // newton iteration did not converge with an old jacobian, so update the
                        // jacobian and try again with the same step
                        debug!("Newton iteration failed at t = {} with an old Jacobian: {}", t_new, e);
                        solver_state = SolverState::FirstConvergenceFail;
                    }
                }
            }
        };

        let t_new = self.state.t + self.state.h;
        let mut yp_new = DVector::zeros(y_new.len());
        self.callable.yp_inplace(&y_new, &mut yp_new);

        // advance the sensitivities with the step just accepted
        self.sensitivity_step(t_new, &y_new, &yp_new);

        // take the accepted step
        let order = self.state.order;
        self.state.t = t_new;
        self.state.y = y_new;
        self.state.yp = yp_new;
        Self::_update_diff(order, &y_delta, &mut self.state.diff);
        if self.sensitivity_failed_at.is_none() {
            if let Some(sens) = self.sensitivities.as_ref() {
                for (i, sdiff) in self.state.sdiff.iter_mut().enumerate() {
                    Self::_update_diff(order, &sens.s_delta()[i], sdiff);
                }
                self.state.s.clone_from_slice(sens.s_new());
                self.state.sp.clone_from_slice(sens.sp_new());
            }
        }

        // a clean step clears the cause recorded for an earlier struggle
        if convergence_fails == 0 {
            self.last_failure = None;
        }

        // update statistics
        self.statistics.number_of_steps += 1;
        if error_norm > self.statistics.maximum_error_norm {
            self.statistics.maximum_error_norm = error_norm;
        }
        self.jacobian_update.step();
        trace!(
            "Accepted step to t = {}, h = {:.3e}, order = {}, error norm = {:.3e}",
            t_new,
            self.state.h,
            order,
            error_norm
        );

        // a change in order is only done after running at order k for k + 1 steps
        // (see page 83 of [2])
        self.n_equal_steps += 1;
        if self.n_equal_steps > order {
            self._select_order_and_step(error_norm, safety);
        }

        // check if the stop time has been reached
        if let Some(tstop) = self.tstop {
            if (self.state.t - tstop).abs() <= self.troundoff() {
                self.state.t = tstop;
                self.tstop = None;
                return Ok(StepOutcome::TstopReached);
            }
        }
        Ok(StepOutcome::InternalTimestep)
    }

    fn _select_order_and_step(&mut self, error_norm: f64, safety: f64) {
        let problem = self.problem;
        let config = &problem.config;
        let order = self.state.order;
        let y = &self.state.y;
        let diff = &self.state.diff;
        let norm_of = |i: usize| {
            diff.column(i).into_owned().squared_norm_masked(
                y,
                &problem.atol,
                problem.rtol,
                &problem.differential,
            )
        };

        // similar to the optimal step size factor we calculated above for the current
        // order k, we need to calculate the optimal step size factors for orders
        // k-1 and k+1. To do this, we note that the error = C_k * D^{k+1} y_n
        let error_m_norm = if order > 1 {
            norm_of(order) * self.error_const2[order - 1]
        } else {
            f64::INFINITY
        };
        let error_p_norm = if order < self.max_order {
            norm_of(order + 2) * self.error_const2[order + 1]
        } else {
            f64::INFINITY
        };

        let error_norms = [error_m_norm, error_norm, error_p_norm];
        let factors = error_norms
            .iter()
            .enumerate()
            .map(|(i, error_norm)| error_norm.powf(-0.5 / (i as f64 + order as f64)))
            .collect::<Vec<_>>();

        // now we have the three factors for orders k-1, k and k+1, pick the maximum in
        // order to maximise the resultant step size, keeping the current order on ties
        let mut max_index = 1;
        for i in [0, 2] {
            if factors[i] > factors[max_index] {
                max_index = i;
            }
        }
        let new_order = order + max_index - 1;
        if new_order != order {
            debug!("Order changed from {} to {} at t = {}", order, new_order, self.state.t);
        }
        self.state.order = new_order;

        let factor = (safety * factors[max_index])
            .min(config.maximum_timestep_growth)
            .max(config.minimum_timestep_shrink);
        if factor >= config.minimum_timestep_growth
            || factor < config.maximum_timestep_shrink
            || new_order != order
        {
            self._update_step_size(factor);
        }
    }

    fn sensitivity_step(&mut self, t_new: f64, y_new: &DVector<f64>, yp_new: &DVector<f64>) {
        if self.sensitivity_failed_at.is_some() {
            return;
        }
        let sens = match self.sensitivities.as_mut() {
            Some(sens) => sens,
            None => return,
        };
        let result = sens.solve(
            self.callable.op().eval(),
            t_new,
            y_new,
            yp_new,
            &self.state.sdiff,
            self.state.order,
            &self.gamma,
            &self.alpha,
            self.callable.cj(),
            self.nonlinear_solver.factorization(),
            &mut self.sens_convergence,
        );
        match result {
            Ok(niter) => self.statistics.number_of_nonlinear_solver_iterations += niter,
            Err(e) => {
                warn!(
                    "Sensitivity solve failed at t = {}, sensitivities are not advanced further: {}",
                    t_new, e
                );
                self.sensitivity_failed_at = Some(t_new);
            }
        }
    }

    /// Map a failure of the driver to the diagnostic code reported in the trajectory.
    fn failure_code(&self, e: &DaeSolverError) -> FailureCode {
        match e {
            DaeSolverError::DaeSolverError(err) => match err {
                SolverError::MaximumStepsExceeded { .. } => FailureCode::MaximumStepsExceeded,
                SolverError::ToleranceTooSmall { .. } => FailureCode::ToleranceTooSmall,
                SolverError::TooManyErrorTestFailures { .. } => FailureCode::ErrorTestFailures,
                SolverError::TooManyConvergenceFailures { .. } => {
                    self.last_failure.unwrap_or(FailureCode::NonConvergence)
                }
                SolverError::StepSizeTooSmall { .. } => {
                    self.last_failure.unwrap_or(FailureCode::StepSizeTooSmall)
                }
                _ => FailureCode::NonConvergence,
            },
            DaeSolverError::NonLinearSolverError(NonLinearSolverError::InitialisationFailed {
                ..
            }) => FailureCode::InitializationFailure,
            e => classify_step_failure(e),
        }
    }

    /// Run the driver to completion over `t_eval`, whose last entry is the final time, and
    /// return the recorded trajectory.
    ///
    /// The driver moves through the states
    /// - [DriverState::Initializing]: consistent initial conditions, then the first point is
    ///   recorded,
    /// - [DriverState::Stepping]: one accepted step,
    /// - [DriverState::EventPending]: root finding over the accepted step, output, and the check
    ///   for the final time,
    ///
    /// until it is [DriverState::Completed] or [DriverState::Failed]. Numerical failures end
    /// the solve with a status, never an error.
    pub fn solve(mut self, t_eval: &[f64]) -> Trajectory {
        let problem = self.problem;
        let tf = t_eval.last().copied().unwrap_or(problem.t0);
        let mut recorder = TrajectoryRecorder::new(problem.nparams);
        let mut root_finder = None;
        let mut snapshot: Option<StepSnapshot> = None;
        let mut next_grid = 0;
        let mut phase = DriverState::Initializing;

        loop {
            phase = match phase {
                DriverState::Initializing => match self.start(tf, &mut root_finder) {
                    Ok(()) => {
                        self.record_sensitivity_failure(&mut recorder);
                        recorder.push(self.state.t, self.state.y.clone(), self.state.s.clone());
                        next_grid = t_eval.iter().take_while(|&&t| t <= self.state.t).count();
                        DriverState::Stepping
                    }
                    Err(e) => {
                        warn!("Consistent initialisation failed: {}", e);
                        DriverState::Failed(FailureCode::InitializationFailure)
                    }
                },
                DriverState::Stepping => {
                    if root_finder.is_some() {
                        snapshot = Some(self.snapshot());
                    }
                    match self.step() {
                        Ok(outcome) => DriverState::EventPending(outcome),
                        Err(e) => {
                            let code = self.failure_code(&e);
                            warn!("Integration failed at t = {}: {} ({})", self.state.t, e, code);
                            DriverState::Failed(code)
                        }
                    }
                }
                DriverState::EventPending(outcome) => {
                    let root = match root_finder.as_mut() {
                        Some(root_finder) => {
                            let eval = self.callable.op().eval();
                            let root_fn = |t: f64, g: &mut DVector<f64>| {
                                let y = self.interpolate(t);
                                let yp = self.interpolate_yp(t);
                                eval.event_indicators_inplace(t, &y, &yp, g)
                            };
                            root_finder.check_root(root_fn, self.state.t)
                        }
                        None => Ok(None),
                    };
                    match root {
                        Err(e) => {
                            warn!("Event indicators could not be evaluated: {}", e);
                            DriverState::Failed(classify_step_failure(&e))
                        }
                        Ok(Some(root)) => self.finish_on_event(
                            root,
                            snapshot.take(),
                            t_eval,
                            &mut next_grid,
                            &mut recorder,
                        ),
                        Ok(None) => {
                            self.record_sensitivity_failure(&mut recorder);
                            self.record_step(t_eval, &mut next_grid, &mut recorder);
                            if outcome == StepOutcome::TstopReached {
                                DriverState::Completed(SolveStatus::Success)
                            } else {
                                DriverState::Stepping
                            }
                        }
                    }
                }
                DriverState::Completed(status) => {
                    let statistics = self.statistics();
                    info!(
                        "Solve finished with status {} at t = {}: {} steps, {} error test failures, {} Newton failures, {} Jacobian evaluations",
                        status,
                        self.state.t,
                        statistics.number_of_steps,
                        statistics.number_of_error_test_failures,
                        statistics.number_of_nonlinear_solver_fails,
                        statistics.number_of_jacobian_evals
                    );
                    return recorder.finish(status, statistics);
                }
                DriverState::Failed(code) => {
                    self.record_sensitivity_failure(&mut recorder);
                    // the last point reached is the terminal point of a time grid solve
                    if problem.config.output == OutputMode::TimeGrid
                        && recorder.last_t().is_some_and(|t| t < self.state.t)
                    {
                        recorder.push(self.state.t, self.state.y.clone(), self.state.s.clone());
                    }
                    let statistics = self.statistics();
                    warn!("Solve failed at t = {} with status {}", self.state.t, code);
                    return recorder.finish(SolveStatus::Failed(code), statistics);
                }
            };
        }
    }

    fn start(&mut self, tf: f64, root_finder: &mut Option<RootFinder>) -> Result<(), DaeSolverError> {
        self.initialise(tf)?;
        self.set_stop_time(tf)?;
        let eval = self.callable.op().eval();
        let nevents = eval.nevents();
        if nevents > 0 {
            let mut finder = RootFinder::new(nevents, self.problem.config.maximum_root_iterations);
            let state = &self.state;
            finder.init(
                |t, g| eval.event_indicators_inplace(t, &state.y, &state.yp, g),
                state.t,
            )?;
            *root_finder = Some(finder);
        }
        Ok(())
    }

    fn record_sensitivity_failure(&self, recorder: &mut TrajectoryRecorder) {
        if let Some(t) = self.sensitivity_failed_at {
            recorder.set_sensitivity_failure(t);
        }
    }

    /// In [OutputMode::TimeGrid], record the dense output at every grid time up to `t_end`
    /// (inclusive if `inclusive`) that lies within the last step.
    fn record_grid(
        &self,
        t_eval: &[f64],
        next_grid: &mut usize,
        t_end: f64,
        inclusive: bool,
        recorder: &mut TrajectoryRecorder,
    ) {
        if self.problem.config.output != OutputMode::TimeGrid {
            return;
        }
        while *next_grid < t_eval.len() {
            let t = t_eval[*next_grid];
            if t > t_end || (!inclusive && t >= t_end) {
                break;
            }
            if t == self.state.t {
                recorder.push(t, self.state.y.clone(), self.state.s.clone());
            } else {
                recorder.push(t, self.interpolate(t), self.interpolate_sens(t));
            }
            *next_grid += 1;
        }
    }

    fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            state: self.state.clone(),
            n_equal_steps: self.n_equal_steps,
            sensitivity_failed_at: self.sensitivity_failed_at,
            number_of_steps: self.statistics.number_of_steps,
        }
    }

    fn restore(&mut self, snapshot: StepSnapshot) {
        self.state = snapshot.state;
        self.n_equal_steps = snapshot.n_equal_steps;
        self.sensitivity_failed_at = snapshot.sensitivity_failed_at;
        self.statistics.number_of_steps = snapshot.number_of_steps;
        self.callable.set_cj(self.state.h, self.alpha[self.state.order]);
        self.jacobian_update.mark_stale();
    }

    /// Record the step just accepted, according to the output mode.
    fn record_step(&self, t_eval: &[f64], next_grid: &mut usize, recorder: &mut TrajectoryRecorder) {
        match self.problem.config.output {
            OutputMode::AcceptedSteps => {
                recorder.push(self.state.t, self.state.y.clone(), self.state.s.clone())
            }
            OutputMode::TimeGrid => {
                self.record_grid(t_eval, next_grid, self.state.t, true, recorder)
            }
        }
    }

    /// A root was found in the last accepted step. If it lies strictly inside the step, back up
    /// to the start of the step and integrate to the root, so that the recorded point satisfies
    /// the corrector equation. Output before the root comes from the steps that end at it.
    fn finish_on_event(
        &mut self,
        root: Root,
        snapshot: Option<StepSnapshot>,
        t_eval: &[f64],
        next_grid: &mut usize,
        recorder: &mut TrajectoryRecorder,
    ) -> DriverState {
        if !root.localized {
            warn!(
                "Event localisation did not converge within {} iterations, using t = {}",
                self.problem.config.maximum_root_iterations, root.t
            );
        }
        debug!("Event found at t = {} for indicators {:?}", root.t, root.indices);
        let event = EventRecord {
            t: root.t,
            indices: root.indices.clone(),
            localized: root.localized,
        };

        let inside_step = (self.state.t - root.t).abs() > self.troundoff();
        let (y, s) = match snapshot {
            Some(snapshot) if inside_step => {
                let accepted = self.snapshot();
                self.restore(snapshot);
                match self.integrate_to_event(root.t, t_eval, next_grid, recorder) {
                    Ok(()) => (self.state.y.clone(), self.state.s.clone()),
                    Err(e) => {
                        warn!(
                            "Re-integration to the event at t = {} failed, interpolating instead: {}",
                            root.t, e
                        );
                        self.restore(accepted);
                        self.interpolate_to_event(root.t, t_eval, next_grid, recorder)
                    }
                }
            }
            _ if inside_step => self.interpolate_to_event(root.t, t_eval, next_grid, recorder),
            _ => {
                self.record_sensitivity_failure(recorder);
                self.record_grid(t_eval, next_grid, root.t, false, recorder);
                (self.state.y.clone(), self.state.s.clone())
            }
        };
        self.record_sensitivity_failure(recorder);
        recorder.push(root.t, y, s);
        recorder.set_event(event);
        DriverState::Completed(SolveStatus::SuccessWithEvent)
    }

    fn integrate_to_event(
        &mut self,
        t: f64,
        t_eval: &[f64],
        next_grid: &mut usize,
        recorder: &mut TrajectoryRecorder,
    ) -> Result<(), DaeSolverError> {
        if t <= self.state.t {
            return Ok(());
        }
        self.set_stop_time(t)?;
        while self.step()? != StepOutcome::TstopReached {
            self.record_sensitivity_failure(recorder);
            self.record_step(t_eval, next_grid, recorder);
        }
        self.record_sensitivity_failure(recorder);
        self.record_grid(t_eval, next_grid, t, false, recorder);
        Ok(())
    }

    /// Dense output of the last accepted step before the event, and the interpolated event point.
    fn interpolate_to_event(
        &self,
        t: f64,
        t_eval: &[f64],
        next_grid: &mut usize,
        recorder: &mut TrajectoryRecorder,
    ) -> (DVector<f64>, Vec<DVector<f64>>) {
        self.record_sensitivity_failure(recorder);
        self.record_grid(t_eval, next_grid, t, false, recorder);
        (self.interpolate(t), self.interpolate_sens(t))
    }
}

/// Classify a failed corrector attempt by its cause.
fn classify_step_failure(e: &DaeSolverError) -> FailureCode {
    match e {
        DaeSolverError::LinearSolverError(_) => FailureCode::SingularJacobian,
        DaeSolverError::EvaluationError(_) => FailureCode::EvaluationFailure,
        _ => FailureCode::NonConvergence,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    use super::*;
    use crate::{
        dae_solver::{
            config::SolverConfig,
            test_models::{
                algebraic_pair::{algebraic_pair_problem, algebraic_pair_solution},
                exponential_decay::{
                    exponential_decay_problem, exponential_decay_solution,
                    exponential_decay_with_event_problem,
                },
                linear_sensitivity::{
                    linear_sensitivity_evaluator, linear_sensitivity_expression_evaluator,
                    linear_sensitivity_problem, linear_sensitivity_solution,
                },
                robertson::robertson_problem,
                singular::{persistent_singular_problem, transient_singular_problem, T_SINGULAR},
            },
            trajectory::SensitivityStatus,
        },
        evaluator::CallbackEvaluator,
        DaeBuilder,
    };

    fn solve_model<E: DaeEvaluator + ?Sized>(problem: &DaeProblem, eval: &E, t_eval: &[f64]) -> Trajectory {
        Bdf::<E, FaerSparseLU>::new(problem, eval)
            .unwrap()
            .solve(t_eval)
    }

    #[test]
    fn test_compute_r_identity_for_unit_factor() {
        // R(1) * U = U * U is the identity, rescaling by a factor of one leaves diff unchanged
        let order = 3;
        let u = Bdf::<CallbackEvaluator, FaerSparseLU>::_compute_r(order, 1.0);
        let uu = &u * &u;
        assert_relative_eq!(uu, DMatrix::identity(order + 1, order + 1), epsilon = 1e-12);
    }

    #[test]
    fn test_update_diff() {
        let mut diff = DMatrix::zeros(1, BdfState::MAX_ORDER + 3);
        diff[(0, 0)] = 1.0;
        diff[(0, 1)] = 0.5;
        let d = DVector::from_element(1, 0.25);
        Bdf::<CallbackEvaluator, FaerSparseLU>::_update_diff(1, &d, &mut diff);
        // col(3) = d - col(2), col(2) = d, col(1) += col(2), col(0) += col(1)
        assert_relative_eq!(diff[(0, 3)], 0.25);
        assert_relative_eq!(diff[(0, 2)], 0.25);
        assert_relative_eq!(diff[(0, 1)], 0.75);
        assert_relative_eq!(diff[(0, 0)], 1.75);
    }

    #[test]
    fn test_exponential_decay() {
        let (problem, eval) = exponential_decay_problem(true);
        let trajectory = solve_model(&problem, &eval, &[0.0, 5.0]);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        assert_relative_eq!(trajectory.last_t().unwrap(), 5.0);
        let y = trajectory.last_y().unwrap();
        assert_relative_eq!(y[0], exponential_decay_solution(5.0)[0], epsilon = 1e-5);
        let statistics = trajectory.statistics();
        assert!(statistics.number_of_steps > 10);
        assert!(statistics.number_of_linear_solver_setups >= 1);
        assert!(statistics.final_step_size > 0.0);
    }

    #[test]
    fn test_accepted_steps_pass_the_error_test() {
        let (problem, eval) = robertson_problem(true);
        let trajectory = solve_model(&problem, &eval, &[0.0, 40.0]);
        assert!(trajectory.status().is_success());
        let statistics = trajectory.statistics();
        assert!(statistics.maximum_error_norm > 0.0);
        assert!(statistics.maximum_error_norm <= 1.0);
        let y = trajectory.last_y().unwrap();
        // mass is conserved by the algebraic constraint
        assert_relative_eq!(y.sum(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(y[0], 0.7158, epsilon = 1e-3);
    }

    #[test]
    fn test_finite_difference_jacobian_matches_analytic() {
        let (analytic, eval) = robertson_problem(true);
        let (fd, _) = robertson_problem(false);
        let t_eval = [0.0, 10.0];
        let y_analytic = solve_model(&analytic, &eval, &t_eval).last_y().unwrap().clone();
        let trajectory = solve_model(&fd, &eval, &t_eval);
        assert!(trajectory.status().is_success());
        let y_fd = trajectory.last_y().unwrap();
        for i in 0..3 {
            assert_relative_eq!(y_fd[i], y_analytic[i], epsilon = 1e-6, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_algebraic_residuals_stay_within_tolerance() {
        let (problem, eval) = algebraic_pair_problem(0.0);
        let trajectory = solve_model(&problem, &eval, &[0.0, 3.0]);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        assert!(trajectory.len() > 2);
        for y in trajectory.y().iter() {
            let residual = y[1] - 2.0 * y[0];
            assert!(residual.abs() <= problem.atol[1] + problem.rtol * y[1].abs());
        }
        let expected = algebraic_pair_solution(3.0);
        let y = trajectory.last_y().unwrap();
        assert_relative_eq!(y[0], expected[0], epsilon = 1e-5);
        assert_relative_eq!(y[1], expected[1], epsilon = 1e-5);
    }

    #[test]
    fn test_inconsistent_initial_state_is_corrected() {
        let (problem, eval) = algebraic_pair_problem(7.0);
        let trajectory = solve_model(&problem, &eval, &[0.0, 1.0]);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        // the first recorded point is the consistent initial state
        assert_relative_eq!(trajectory.y()[0][1], 2.0, epsilon = 1e-8);
        assert!(trajectory.statistics().number_of_initialisation_iterations >= 1);
    }

    #[test]
    fn test_repeated_solves_are_identical() {
        let (problem, eval) = robertson_problem(true);
        let t_eval = [0.0, 1.0];
        let first = solve_model(&problem, &eval, &t_eval);
        let second = solve_model(&problem, &eval, &t_eval);
        assert_eq!(first.t(), second.t());
        assert_eq!(first.y_flat(), second.y_flat());
        assert_eq!(first.statistics(), second.statistics());
    }

    #[test]
    fn test_time_grid_output() {
        let (problem, eval) = exponential_decay_problem(true);
        let problem = DaeProblem {
            config: SolverConfig {
                output: OutputMode::TimeGrid,
                ..problem.config.clone()
            },
            ..problem
        };
        let t_eval = [0.0, 0.5, 1.0, 2.5, 4.0];
        let trajectory = solve_model(&problem, &eval, &t_eval);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        assert_eq!(trajectory.t(), &t_eval);
        for (t, y) in trajectory.t().iter().zip(trajectory.y()) {
            assert_relative_eq!(y[0], (-t).exp(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_event_stops_the_solve() {
        let t_event = 1.3;
        let (problem, eval) = exponential_decay_with_event_problem(t_event);
        let trajectory = solve_model(&problem, &eval, &[0.0, 5.0]);
        assert_eq!(trajectory.status(), SolveStatus::SuccessWithEvent);
        assert_eq!(trajectory.status().code(), 2);
        let event = trajectory.event().unwrap();
        assert!(event.localized);
        assert_eq!(event.indices, vec![0]);
        assert_relative_eq!(event.t, t_event, epsilon = 1e-8);
        assert_relative_eq!(trajectory.last_t().unwrap(), event.t);
        assert!(trajectory.t().iter().all(|&t| t <= event.t));
        let y = trajectory.last_y().unwrap();
        assert_relative_eq!(y[0], (-t_event).exp(), epsilon = 1e-5);
        // t0 and one point per accepted step, the step past the event is not counted
        assert_eq!(trajectory.len(), trajectory.statistics().number_of_steps + 1);
    }

    #[test]
    fn test_sensitivity_failure_past_the_event_is_discarded() {
        // y' + p y = 0 stopped at t = 1.3, with dF/dp undefined just after the event
        let t_event = 1.3;
        let eval = CallbackEvaluator::builder(1, |_t, y, yp, r| {
            r[0] = yp[0] + 2.0 * y[0];
        })
        .jacobian_structure(1, || vec![0], || vec![0, 1])
        .jacobian(|_t, _y, _yp, cj, values| {
            values[0] = cj + 2.0;
        })
        .mass_action(|_t, _y, v, mv| mv.copy_from(v))
        .jac_vector_action(|_t, _y, _yp, v, jv| {
            jv[0] = 2.0 * v[0];
        })
        .jac_parameter_action(1, move |t, y, _yp, _i, out| {
            out[0] = if t > t_event + 1e-6 { f64::NAN } else { y[0] };
        })
        .events(1, move |t, _y, _yp, g| {
            g[0] = t - t_event;
        })
        .build()
        .unwrap();
        let problem = DaeBuilder::new()
            .y0([1.0])
            .yp0([-2.0])
            .rtol(1e-6)
            .atol([1e-8])
            .sensitivities(1)
            .use_analytic_jacobian(true)
            .build()
            .unwrap();
        let trajectory = solve_model(&problem, &eval, &[0.0, 2.0]);
        assert_eq!(trajectory.status(), SolveStatus::SuccessWithEvent);
        assert_eq!(trajectory.sensitivity_status(), SensitivityStatus::Complete);
        let last = trajectory.len() - 1;
        assert_relative_eq!(trajectory.t()[last], t_event, epsilon = 1e-8);
        // ds/dt + 2 s + y = 0, s(0) = 0 gives s = -t exp(-2 t)
        let expected = -t_event * (-2.0 * t_event).exp();
        assert_relative_eq!(trajectory.s()[last][0][0], expected, epsilon = 1e-4);
    }

    #[test]
    fn test_sensitivities_of_linear_dae() {
        let p = [2.0, 0.5];
        let problem = linear_sensitivity_problem();
        let eval = linear_sensitivity_evaluator(p);
        let trajectory = solve_model(&problem, &eval, &[0.0, 1.0]);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        assert_eq!(trajectory.sensitivity_status(), SensitivityStatus::Complete);
        let (y, s) = linear_sensitivity_solution(p, 1.0);
        let last = trajectory.len() - 1;
        assert_relative_eq!(trajectory.y()[last], y, epsilon = 1e-5);
        for i in 0..2 {
            assert_relative_eq!(trajectory.s()[last][i], s[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_sensitivities_of_expression_backend() {
        let p = [2.0, 0.5];
        let problem = linear_sensitivity_problem();
        let eval = linear_sensitivity_expression_evaluator(p);
        let trajectory = solve_model(&problem, &eval, &[0.0, 1.0]);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        assert_eq!(trajectory.sensitivity_status(), SensitivityStatus::Complete);
        let (y, s) = linear_sensitivity_solution(p, 1.0);
        let last = trajectory.len() - 1;
        assert_relative_eq!(trajectory.y()[last], y, epsilon = 1e-5);
        for i in 0..2 {
            assert_relative_eq!(trajectory.s()[last][i], s[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_sensitivity_failure_is_partial() {
        // y' + p y = 0, with dF/dp undefined after t = 1
        let eval = CallbackEvaluator::builder(1, |_t, y, yp, r| {
            r[0] = yp[0] + 2.0 * y[0];
        })
        .jacobian_structure(1, || vec![0], || vec![0, 1])
        .jacobian(|_t, _y, _yp, cj, values| {
            values[0] = cj + 2.0;
        })
        .mass_action(|_t, _y, v, mv| mv.copy_from(v))
        .jac_vector_action(|_t, _y, _yp, v, jv| {
            jv[0] = 2.0 * v[0];
        })
        .jac_parameter_action(1, |t, y, _yp, _i, out| {
            out[0] = if t > 1.0 { f64::NAN } else { y[0] };
        })
        .build()
        .unwrap();
        let problem = DaeBuilder::new()
            .y0([1.0])
            .yp0([-2.0])
            .rtol(1e-6)
            .atol([1e-8])
            .sensitivities(1)
            .use_analytic_jacobian(true)
            .build()
            .unwrap();
        let trajectory = solve_model(&problem, &eval, &[0.0, 2.0]);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        let failed_at = match trajectory.sensitivity_status() {
            SensitivityStatus::Partial { failed_at } => failed_at,
            status => panic!("expected partial sensitivities, got {:?}", status),
        };
        assert!(failed_at > 1.0);
        for (t, s) in trajectory.t().iter().zip(trajectory.s()) {
            if *t < failed_at {
                assert!(s[0][0].is_finite());
            } else {
                assert!(s[0][0].is_nan());
            }
        }
        assert_relative_eq!(trajectory.last_y().unwrap()[0], (-4.0f64).exp(), epsilon = 1e-5);
    }

    #[test]
    fn test_persistent_singular_jacobian_fails() {
        let (problem, eval) = persistent_singular_problem();
        let trajectory = solve_model(&problem, &eval, &[0.0, 4.0]);
        assert_eq!(
            trajectory.status(),
            SolveStatus::Failed(FailureCode::SingularJacobian)
        );
        assert_eq!(trajectory.status().to_string(), "failed: singular Jacobian");
        assert!(trajectory.statistics().number_of_singular_jacobians >= 1);
        assert!(trajectory.last_t().unwrap() <= T_SINGULAR);
    }

    #[test]
    fn test_transient_singular_jacobian_recovers() {
        let (problem, eval) = transient_singular_problem(2);
        let trajectory = solve_model(&problem, &eval, &[0.0, 4.0]);
        assert_eq!(trajectory.status(), SolveStatus::Success);
        assert!(trajectory.statistics().number_of_singular_jacobians >= 1);
        let y = trajectory.last_y().unwrap();
        assert_relative_eq!(y[0], (-4.0f64).exp(), epsilon = 1e-5);
        assert_relative_eq!(y[1], 1.0, epsilon = 1e-8);
    }

    #[test]
    fn test_maximum_steps() {
        let (problem, eval) = exponential_decay_problem(true);
        let problem = DaeProblem {
            config: SolverConfig {
                maximum_steps: 5,
                ..problem.config.clone()
            },
            ..problem
        };
        let trajectory = solve_model(&problem, &eval, &[0.0, 5.0]);
        assert_eq!(
            trajectory.status(),
            SolveStatus::Failed(FailureCode::MaximumStepsExceeded)
        );
        assert_eq!(trajectory.status().code(), -1);
        // the points reached before the failure are kept
        assert!(trajectory.len() > 1);
    }

    #[test]
    fn test_stop_time_before_current_time() {
        let (problem, eval) = exponential_decay_problem(true);
        let mut solver = Bdf::<_, FaerSparseLU>::new(&problem, &eval).unwrap();
        solver.initialise(1.0).unwrap();
        assert!(solver.set_stop_time(0.0).is_err());
        solver.set_stop_time(0.5).unwrap();
        while solver.step().unwrap() != StepOutcome::TstopReached {}
        assert_eq!(solver.state().t(), 0.5);
        assert_relative_eq!(solver.state().y()[0], (-0.5f64).exp(), epsilon = 1e-5);
        let t_mid = 0.5 - 0.5 * solver.state().h();
        assert_relative_eq!(solver.interpolate(t_mid)[0], (-t_mid).exp(), epsilon = 1e-5);
    }
}
