use std::fmt;

use nalgebra::DVector;
use serde::Serialize;

use crate::IndexType;

/// Diagnostic code of a solve that stopped before reaching the final time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureCode {
    MaximumStepsExceeded,
    ToleranceTooSmall,
    ErrorTestFailures,
    NonConvergence,
    SingularJacobian,
    EvaluationFailure,
    StepSizeTooSmall,
    InitializationFailure,
}

impl FailureCode {
    pub fn code(&self) -> i32 {
        match self {
            FailureCode::MaximumStepsExceeded => -1,
            FailureCode::ToleranceTooSmall => -2,
            FailureCode::ErrorTestFailures => -3,
            FailureCode::NonConvergence => -4,
            FailureCode::SingularJacobian => -6,
            FailureCode::EvaluationFailure => -8,
            FailureCode::StepSizeTooSmall => -10,
            FailureCode::InitializationFailure => -14,
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureCode::MaximumStepsExceeded => "maximum number of steps exceeded",
            FailureCode::ToleranceTooSmall => "tolerance too small",
            FailureCode::ErrorTestFailures => "too many error test failures",
            FailureCode::NonConvergence => "nonlinear solver did not converge",
            FailureCode::SingularJacobian => "singular Jacobian",
            FailureCode::EvaluationFailure => "evaluation of the DAE functions failed",
            FailureCode::StepSizeTooSmall => "step size too small",
            FailureCode::InitializationFailure => "consistent initialisation failed",
        };
        f.write_str(text)
    }
}

/// Terminal status of a solve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum SolveStatus {
    Success,
    SuccessWithEvent,
    Failed(FailureCode),
}

impl SolveStatus {
    /// Integer status code: zero or positive on success, negative on failure.
    pub fn code(&self) -> i32 {
        match self {
            SolveStatus::Success => 0,
            SolveStatus::SuccessWithEvent => 2,
            SolveStatus::Failed(code) => code.code(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, SolveStatus::Failed(_))
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Success => f.write_str("success"),
            SolveStatus::SuccessWithEvent => f.write_str("success with event"),
            SolveStatus::Failed(code) => write!(f, "failed: {}", code),
        }
    }
}

/// The terminal event of a solve.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventRecord {
    pub t: f64,
    /// Indicators that crossed zero at `t`.
    pub indices: Vec<IndexType>,
    /// False if root localisation hit its iteration cap, `t` is then the end of the last bracket.
    pub localized: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum SensitivityStatus {
    NotRequested,
    Complete,
    /// The sensitivity solve failed at `failed_at`. Sensitivities recorded after that time are NaN.
    Partial { failed_at: f64 },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SolverStatistics {
    pub number_of_steps: usize,
    pub number_of_error_test_failures: usize,
    pub number_of_nonlinear_solver_iterations: usize,
    pub number_of_nonlinear_solver_fails: usize,
    pub number_of_jacobian_evals: usize,
    pub number_of_linear_solver_setups: usize,
    pub number_of_singular_jacobians: usize,
    pub number_of_residual_evals: usize,
    pub number_of_initialisation_iterations: usize,
    pub maximum_error_norm: f64,
    pub initial_step_size: f64,
    pub final_step_size: f64,
}

/// The result of a solve: the recorded times, states and sensitivities, plus the terminal status.
///
/// A trajectory is always returned, even when the solve fails, and then holds every point
/// recorded before the failure.
#[derive(Clone, Debug)]
pub struct Trajectory {
    t: Vec<f64>,
    y: Vec<DVector<f64>>,
    s: Vec<Vec<DVector<f64>>>,
    status: SolveStatus,
    event: Option<EventRecord>,
    sensitivity_status: SensitivityStatus,
    statistics: SolverStatistics,
}

impl Trajectory {
    pub fn t(&self) -> &[f64] {
        &self.t
    }

    pub fn y(&self) -> &[DVector<f64>] {
        &self.y
    }

    /// Sensitivities for every recorded time, `s()[k][i]` is `dy/dp_i` at `t()[k]`. Empty if no
    /// sensitivities were requested.
    pub fn s(&self) -> &[Vec<DVector<f64>>] {
        &self.s
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    pub fn event(&self) -> Option<&EventRecord> {
        self.event.as_ref()
    }

    pub fn sensitivity_status(&self) -> SensitivityStatus {
        self.sensitivity_status
    }

    pub fn statistics(&self) -> &SolverStatistics {
        &self.statistics
    }

    pub fn last_t(&self) -> Option<f64> {
        self.t.last().copied()
    }

    pub fn last_y(&self) -> Option<&DVector<f64>> {
        self.y.last()
    }

    /// States in time-major order, `nstates` values per recorded time.
    pub fn y_flat(&self) -> Vec<f64> {
        self.y.iter().flat_map(|y| y.iter().copied()).collect()
    }

    /// Sensitivities with respect to parameter `i` in time-major order.
    pub fn sensitivities_flat(&self, i: usize) -> Vec<f64> {
        self.s
            .iter()
            .filter_map(|s| s.get(i))
            .flat_map(|s| s.iter().copied())
            .collect()
    }
}

/// Append-only builder of a [Trajectory], owned by the driver for the duration of one solve.
pub(crate) struct TrajectoryRecorder {
    t: Vec<f64>,
    y: Vec<DVector<f64>>,
    s: Vec<Vec<DVector<f64>>>,
    nparams: usize,
    event: Option<EventRecord>,
    sensitivity_status: SensitivityStatus,
}

impl TrajectoryRecorder {
    pub fn new(nparams: usize) -> Self {
        Self {
            t: Vec::new(),
            y: Vec::new(),
            s: Vec::new(),
            nparams,
            event: None,
            sensitivity_status: if nparams > 0 {
                SensitivityStatus::Complete
            } else {
                SensitivityStatus::NotRequested
            },
        }
    }

    pub fn push(&mut self, t: f64, y: DVector<f64>, s: Vec<DVector<f64>>) {
        self.t.push(t);
        if self.nparams > 0 {
            let s = if self.sensitivities_failed() {
                vec![DVector::from_element(y.len(), f64::NAN); self.nparams]
            } else {
                s
            };
            self.s.push(s);
        }
        self.y.push(y);
    }

    pub fn last_t(&self) -> Option<f64> {
        self.t.last().copied()
    }

    pub fn set_event(&mut self, event: EventRecord) {
        self.event = Some(event);
    }

    pub fn set_sensitivity_failure(&mut self, failed_at: f64) {
        if !self.sensitivities_failed() {
            self.sensitivity_status = SensitivityStatus::Partial { failed_at };
        }
    }

    pub fn sensitivities_failed(&self) -> bool {
        matches!(self.sensitivity_status, SensitivityStatus::Partial { .. })
    }

    pub fn finish(self, status: SolveStatus, statistics: SolverStatistics) -> Trajectory {
        Trajectory {
            t: self.t,
            y: self.y,
            s: self.s,
            status,
            event: self.event,
            sensitivity_status: self.sensitivity_status,
            statistics,
        }
    }
}
