//! Small DAE systems with known behaviour, shared by the driver tests and the benchmarks.

pub mod algebraic_pair;
pub mod exponential_decay;
pub mod linear_sensitivity;
pub mod robertson;
pub mod singular;
