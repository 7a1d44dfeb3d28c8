//! The integration driver for `F(t, y, y') = 0`: a variable order BDF (NDF) method with consistent
//! initialisation, weighted error control over the differential components, terminal events and
//! forward sensitivities.

pub mod bdf;
pub mod builder;
pub mod config;
mod init;
pub mod jacobian_update;
pub mod problem;
pub mod sensitivities;
pub mod state;
pub mod test_models;
pub mod trajectory;

pub use bdf::{Bdf, DriverState, StepOutcome};
pub use builder::DaeBuilder;
pub use config::{OutputMode, SolverConfig};
pub use problem::DaeProblem;
pub use state::BdfState;
pub use trajectory::{
    EventRecord, FailureCode, SensitivityStatus, SolveStatus, SolverStatistics, Trajectory,
};
