use serde::{Deserialize, Serialize};

use crate::IndexType;

/// Which points of the solution are recorded in the [crate::Trajectory].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// The initial point, every accepted step and the terminal point.
    AcceptedSteps,
    /// The initial point and the dense output at every time of the grid passed to the solve,
    /// plus the event point if the solve stops on an event.
    TimeGrid,
}

/// Tuning constants of the BDF driver.
///
/// Every field has a default, so a partially specified config deserializes to the defaults for
/// the missing fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_order: usize,
    pub minimum_timestep: f64,
    pub maximum_steps: IndexType,
    pub maximum_error_test_failures: IndexType,
    pub maximum_convergence_failures: IndexType,
    pub maximum_newton_iterations: IndexType,
    pub newton_tolerance: f64,
    pub newton_divergence_rate: f64,
    /// Relative change of the shift constant beyond which the factorized Jacobian is rebuilt.
    pub shift_drift_threshold: f64,
    /// Accepted steps after which the Jacobian is rebuilt.
    pub jacobian_refresh_steps: IndexType,
    pub maximum_timestep_growth: f64,
    pub minimum_timestep_growth: f64,
    pub maximum_timestep_shrink: f64,
    pub minimum_timestep_shrink: f64,
    pub convergence_failure_shrink: f64,
    pub initial_step_fraction: f64,
    pub maximum_initialisation_iterations: IndexType,
    pub maximum_initialisation_attempts: IndexType,
    pub initialisation_tolerance: f64,
    pub maximum_root_iterations: IndexType,
    pub maximum_sensitivity_iterations: IndexType,
    pub output: OutputMode,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_order: 5,
            minimum_timestep: 1e-32,
            maximum_steps: 100_000,
            maximum_error_test_failures: 10,
            maximum_convergence_failures: 10,
            maximum_newton_iterations: 4,
            newton_tolerance: 0.33,
            newton_divergence_rate: 0.9,
            shift_drift_threshold: 0.3,
            jacobian_refresh_steps: 20,
            maximum_timestep_growth: 2.1,
            minimum_timestep_growth: 2.0,
            maximum_timestep_shrink: 0.9,
            minimum_timestep_shrink: 0.2,
            convergence_failure_shrink: 0.25,
            initial_step_fraction: 0.001,
            maximum_initialisation_iterations: 10,
            maximum_initialisation_attempts: 5,
            initialisation_tolerance: 0.0033,
            maximum_root_iterations: 50,
            maximum_sensitivity_iterations: 4,
            output: OutputMode::AcceptedSteps,
        }
    }
}
