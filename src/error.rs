use thiserror::Error;

/// Custom error type for Daesol
///
/// This error type is used to wrap all possible errors that can occur when using Daesol.
/// Only [ConfigurationError] is ever returned from a solve entry point, every numerical failure is
/// handled inside the solver and surfaced through the status of the returned trajectory.
#[derive(Error, Debug)]
pub enum DaeSolverError {
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
    #[error("Linear solver error: {0}")]
    LinearSolverError(#[from] LinearSolverError),
    #[error("Non-linear solver error: {0}")]
    NonLinearSolverError(#[from] NonLinearSolverError),
    #[error("Evaluation error: {0}")]
    EvaluationError(#[from] EvaluationError),
    #[error("Matrix error: {0}")]
    MatrixError(#[from] MatrixError),
    #[error("DAE solver error: {0}")]
    DaeSolverError(#[from] SolverError),
    #[error("Error: {0}")]
    Other(String),
}

/// Problems with the inputs of a solve, reported before any integration takes place
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("{name} must be strictly positive and finite, got {value}")]
    InvalidTolerance { name: &'static str, value: f64 },
    #[error("{name} has wrong length: expected {expected}, got {found}")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{name} contains a non-finite value")]
    NonFiniteInitialValue { name: &'static str },
    #[error("Time grid must contain at least two strictly increasing points not before t0")]
    InvalidTimeGrid,
    #[error("Invalid Jacobian sparsity: {0}")]
    InvalidSparsity(String),
    #[error("Analytic Jacobian requested but the evaluator does not provide one")]
    JacobianNotAvailable,
    #[error("Sensitivities requested but the evaluator does not provide the mass and parameter actions")]
    SensitivitiesNotSupported,
    #[error("Expression function {name} has {found} outputs, expected {expected}")]
    ExpressionOutputMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Builder error: {0}")]
    BuilderError(String),
}

/// Possible errors that can occur when factorizing or solving a linear problem
#[derive(Error, Debug)]
pub enum LinearSolverError {
    #[error("Linear solver not setup")]
    LinearSolverNotSetup,
    #[error("LU not initialized")]
    LuNotInitialized,
    #[error("Symbolic factorization failed: {0}")]
    SymbolicFactorizationFailed(String),
    #[error("Jacobian is singular")]
    SingularMatrix,
    #[error("Factorization built at cj = {factorized} is not valid at cj = {requested}")]
    FactorizationStale { factorized: f64, requested: f64 },
    #[error("Linear solver matrix not compatible with vector")]
    LinearSolverMatrixVectorNotCompatible,
}

/// Possible errors that can occur when solving a non-linear problem
#[derive(Error, Debug)]
pub enum NonLinearSolverError {
    #[error("Newton iterations did not converge")]
    NewtonDidNotConverge,
    #[error("Newton iterations diverged")]
    NewtonDiverged,
    #[error("Line search failed: step size is below minimum")]
    LinesearchFailedMinStep,
    #[error("Line search failed: maximum iterations exceeded")]
    LinesearchFailedMaxIterations,
    #[error("Consistent initialisation failed after {attempts} attempts")]
    InitialisationFailed { attempts: usize },
}

/// Possible errors raised while evaluating the DAE functions
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Non-finite input passed to {function} at t = {t}")]
    NonFiniteInput { function: &'static str, t: f64 },
    #[error("{function} returned a non-finite value at t = {t}")]
    NonFiniteOutput { function: &'static str, t: f64 },
    #[error("{0} is not provided by this evaluator")]
    NotProvided(&'static str),
}

/// Fatal failures of the integration driver, each mapped to a status code of the trajectory
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Step size is too small at time = {time}")]
    StepSizeTooSmall { time: f64 },
    #[error("Too many error test failures at time = {time}")]
    TooManyErrorTestFailures { time: f64 },
    #[error("Too many convergence failures at time = {time}")]
    TooManyConvergenceFailures { time: f64 },
    #[error("Maximum number of steps ({steps}) exceeded")]
    MaximumStepsExceeded { steps: usize },
    #[error("Tolerances are too small for machine precision at time = {time}")]
    ToleranceTooSmall { time: f64 },
    #[error("Sensitivity solve failed at time = {time}")]
    SensitivitySolveFailed { time: f64 },
    #[error("Stop time = {stop_time} is before the current time = {state_time}")]
    StopTimeBeforeCurrentTime { stop_time: f64, state_time: f64 },
}

/// Possible errors for matrix operations
#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Invalid compressed-column data: {0}")]
    InvalidCsc(String),
    #[error("Cannot union matrices with different shapes")]
    UnionIncompatibleShapes,
    #[error("Index out of bounds")]
    IndexOutOfBounds,
}

#[macro_export]
macro_rules! config_error {
    ($variant:ident) => {
        $crate::DaeSolverError::from($crate::error::ConfigurationError::$variant)
    };
    ($variant:ident { $($field:tt)* }) => {
        $crate::DaeSolverError::from($crate::error::ConfigurationError::$variant { $($field)* })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::DaeSolverError::from($crate::error::ConfigurationError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! linear_solver_error {
    ($variant:ident) => {
        $crate::DaeSolverError::from($crate::error::LinearSolverError::$variant)
    };
    ($variant:ident { $($field:tt)* }) => {
        $crate::DaeSolverError::from($crate::error::LinearSolverError::$variant { $($field)* })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::DaeSolverError::from($crate::error::LinearSolverError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! non_linear_solver_error {
    ($variant:ident) => {
        $crate::DaeSolverError::from($crate::error::NonLinearSolverError::$variant)
    };
    ($variant:ident { $($field:tt)* }) => {
        $crate::DaeSolverError::from($crate::error::NonLinearSolverError::$variant { $($field)* })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::DaeSolverError::from($crate::error::NonLinearSolverError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! evaluation_error {
    ($variant:ident) => {
        $crate::DaeSolverError::from($crate::error::EvaluationError::$variant)
    };
    ($variant:ident { $($field:tt)* }) => {
        $crate::DaeSolverError::from($crate::error::EvaluationError::$variant { $($field)* })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::DaeSolverError::from($crate::error::EvaluationError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! dae_solver_error {
    ($variant:ident) => {
        $crate::DaeSolverError::from($crate::error::SolverError::$variant)
    };
    ($variant:ident { $($field:tt)* }) => {
        $crate::DaeSolverError::from($crate::error::SolverError::$variant { $($field)* })
    };
}

#[macro_export]
macro_rules! other_error {
    ($msg:expr) => {
        $crate::DaeSolverError::Other($msg.to_string())
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_error_messages() {
        let err = config_error!(DimensionMismatch {
            name: "y0",
            expected: 3,
            found: 2
        });
        insta::assert_snapshot!(err.to_string(), @"Configuration error: y0 has wrong length: expected 3, got 2");
        let err = linear_solver_error!(SingularMatrix);
        insta::assert_snapshot!(err.to_string(), @"Linear solver error: Jacobian is singular");
        let err = evaluation_error!(NotProvided, "mass_action");
        insta::assert_snapshot!(err.to_string(), @"Evaluation error: mass_action is not provided by this evaluator");
        let err = dae_solver_error!(StepSizeTooSmall { time: 2.0 });
        insta::assert_snapshot!(err.to_string(), @"DAE solver error: Step size is too small at time = 2");
    }
}
