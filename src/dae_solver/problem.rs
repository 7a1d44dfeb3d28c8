use nalgebra::DVector;

use crate::{config_error, DaeSolverError};

use super::config::SolverConfig;

/// Immutable description of a DAE initial value problem, built and validated by
/// [crate::DaeBuilder].
///
/// The fields are public so that a problem can be varied with struct update syntax, the solve
/// entry points check such a problem again with [DaeProblem::check].
#[derive(Clone, Debug)]
pub struct DaeProblem {
    pub t0: f64,
    pub y0: DVector<f64>,
    pub yp0: DVector<f64>,
    /// `true` for differential components, `false` for algebraic ones.
    pub differential: Vec<bool>,
    pub rtol: f64,
    pub atol: DVector<f64>,
    pub nparams: usize,
    /// Initial sensitivities `dy0/dp_i` and their time derivatives, made consistent before
    /// integration starts.
    pub s0: Vec<DVector<f64>>,
    pub sp0: Vec<DVector<f64>>,
    pub use_analytic_jacobian: bool,
    pub config: SolverConfig,
}

impl DaeProblem {
    pub fn nstates(&self) -> usize {
        self.y0.len()
    }

    pub fn nalgebraic(&self) -> usize {
        self.differential.iter().filter(|&&d| !d).count()
    }

    /// Check the problem for configuration errors: dimensions, non-finite initial values,
    /// tolerances and solver options.
    pub fn check(&self) -> Result<(), DaeSolverError> {
        let n = self.nstates();
        if n == 0 {
            return Err(config_error!(BuilderError, "y0 must not be empty".to_string()));
        }
        check_length("yp0", self.yp0.len(), n)?;
        check_length("differential", self.differential.len(), n)?;
        if !self.t0.is_finite() {
            return Err(config_error!(NonFiniteInitialValue { name: "t0" }));
        }
        if !self.y0.iter().all(|x| x.is_finite()) {
            return Err(config_error!(NonFiniteInitialValue { name: "y0" }));
        }
        if !self.yp0.iter().all(|x| x.is_finite()) {
            return Err(config_error!(NonFiniteInitialValue { name: "yp0" }));
        }

        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return Err(config_error!(InvalidTolerance {
                name: "rtol",
                value: self.rtol,
            }));
        }
        check_length("atol", self.atol.len(), n)?;
        if let Some(&value) = self.atol.iter().find(|a| !(a.is_finite() && **a > 0.0)) {
            return Err(config_error!(InvalidTolerance { name: "atol", value }));
        }

        check_length("initial_sensitivities", self.s0.len(), self.nparams)?;
        check_length("initial_sensitivity_derivatives", self.sp0.len(), self.nparams)?;
        for s in self.s0.iter() {
            check_length("initial_sensitivities", s.len(), n)?;
        }
        for sp in self.sp0.iter() {
            check_length("initial_sensitivity_derivatives", sp.len(), n)?;
        }
        let finite = |v: &Vec<DVector<f64>>| v.iter().all(|s| s.iter().all(|x| x.is_finite()));
        if !finite(&self.s0) || !finite(&self.sp0) {
            return Err(config_error!(NonFiniteInitialValue {
                name: "initial_sensitivities"
            }));
        }

        check_config(&self.config)
    }
}

fn check_length(name: &'static str, found: usize, expected: usize) -> Result<(), DaeSolverError> {
    if found != expected {
        return Err(config_error!(DimensionMismatch {
            name,
            expected,
            found,
        }));
    }
    Ok(())
}

fn check_config(config: &SolverConfig) -> Result<(), DaeSolverError> {
    if config.max_order == 0 || config.max_order > 5 {
        return Err(config_error!(
            BuilderError,
            format!("max_order must be between 1 and 5, got {}", config.max_order)
        ));
    }
    let counts = [
        ("maximum_steps", config.maximum_steps),
        ("maximum_newton_iterations", config.maximum_newton_iterations),
        ("maximum_initialisation_attempts", config.maximum_initialisation_attempts),
        ("maximum_initialisation_iterations", config.maximum_initialisation_iterations),
        ("maximum_sensitivity_iterations", config.maximum_sensitivity_iterations),
        ("maximum_error_test_failures", config.maximum_error_test_failures),
        ("maximum_convergence_failures", config.maximum_convergence_failures),
        ("jacobian_refresh_steps", config.jacobian_refresh_steps),
    ];
    if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
        return Err(config_error!(BuilderError, format!("{} must be at least 1", name)));
    }
    let fractions = [
        ("minimum_timestep_shrink", config.minimum_timestep_shrink),
        ("maximum_timestep_shrink", config.maximum_timestep_shrink),
        ("convergence_failure_shrink", config.convergence_failure_shrink),
        ("initial_step_fraction", config.initial_step_fraction),
    ];
    if let Some((name, value)) = fractions.iter().find(|(_, value)| !(*value > 0.0 && *value < 1.0)) {
        return Err(config_error!(
            BuilderError,
            format!("{} must be in (0, 1), got {}", name, value)
        ));
    }
    if !(config.shift_drift_threshold > 0.0 && config.newton_tolerance > 0.0) {
        return Err(config_error!(
            BuilderError,
            "shift_drift_threshold and newton_tolerance must be positive".to_string()
        ));
    }
    if config.minimum_timestep_growth < 1.0
        || config.maximum_timestep_growth < config.minimum_timestep_growth
    {
        return Err(config_error!(
            BuilderError,
            "timestep growth limits must satisfy 1 <= minimum <= maximum".to_string()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dae_solver::test_models::exponential_decay::exponential_decay_problem,
        error::ConfigurationError,
    };

    #[test]
    fn test_check_catches_edited_problems() {
        let (problem, _) = exponential_decay_problem(true);
        assert!(problem.check().is_ok());

        let wrong_flags = DaeProblem {
            differential: vec![true, false],
            ..problem.clone()
        };
        insta::assert_snapshot!(wrong_flags.check().unwrap_err().to_string(), @"Configuration error: differential has wrong length: expected 1, got 2");

        let zero_atol = DaeProblem {
            atol: DVector::zeros(1),
            ..problem.clone()
        };
        assert!(matches!(
            zero_atol.check(),
            Err(DaeSolverError::ConfigurationError(ConfigurationError::InvalidTolerance { name: "atol", .. }))
        ));

        let missing_sensitivities = DaeProblem {
            nparams: 1,
            ..problem.clone()
        };
        assert!(matches!(
            missing_sensitivities.check(),
            Err(DaeSolverError::ConfigurationError(ConfigurationError::DimensionMismatch { .. }))
        ));

        let bad_config = DaeProblem {
            config: SolverConfig {
                maximum_steps: 0,
                ..problem.config.clone()
            },
            ..problem
        };
        insta::assert_snapshot!(bad_config.check().unwrap_err().to_string(), @"Configuration error: Builder error: maximum_steps must be at least 1");
    }
}
