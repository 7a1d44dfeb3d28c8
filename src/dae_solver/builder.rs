use nalgebra::DVector;

use crate::DaeSolverError;

use super::{
    config::{OutputMode, SolverConfig},
    problem::DaeProblem,
};

/// Builder for DAE problems. Use methods to set the initial state, tolerances and options, then
/// call [DaeBuilder::build], which checks the problem for configuration errors.
///
/// # Example
///
/// ```rust
/// use daesol::{solve_callback, CallbackEvaluator, DaeBuilder};
///
/// // y0' + y0 = 0, y1 - 2 y0 = 0
/// let problem = DaeBuilder::new()
///     .y0([1.0, 2.0])
///     .yp0([-1.0, 0.0])
///     .differential([true, false])
///     .rtol(1e-6)
///     .atol([1e-8])
///     .build()
///     .unwrap();
/// let eval = CallbackEvaluator::builder(2, |_t, y, yp, r| {
///     r[0] = yp[0] + y[0];
///     r[1] = y[1] - 2.0 * y[0];
/// })
/// .build()
/// .unwrap();
/// let trajectory = solve_callback(&[0.0, 1.0], &problem, &eval).unwrap();
/// assert_eq!(trajectory.status().code(), 0);
/// ```
pub struct DaeBuilder {
    t0: f64,
    y0: Vec<f64>,
    yp0: Option<Vec<f64>>,
    differential: Option<Vec<bool>>,
    rtol: f64,
    atol: Vec<f64>,
    nparams: usize,
    s0: Option<Vec<Vec<f64>>>,
    use_analytic_jacobian: bool,
    config: SolverConfig,
}

impl Default for DaeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DaeBuilder {
    /// Create a new builder with default parameters:
    /// - t0 = 0.0
    /// - rtol = 1e-6
    /// - atol = [1e-6]
    /// - every component differential
    /// - yp0 = 0
    /// - no sensitivities
    /// - finite difference Jacobian
    pub fn new() -> Self {
        Self {
            t0: 0.0,
            y0: vec![],
            yp0: None,
            differential: None,
            rtol: 1e-6,
            atol: vec![1e-6],
            nparams: 0,
            s0: None,
            use_analytic_jacobian: false,
            config: SolverConfig::default(),
        }
    }

    pub fn t0(mut self, t0: f64) -> Self {
        self.t0 = t0;
        self
    }

    pub fn y0<V, T>(mut self, y0: V) -> Self
    where
        V: IntoIterator<Item = T>,
        f64: From<T>,
    {
        self.y0 = y0.into_iter().map(f64::from).collect();
        self
    }

    /// Initial guess of the state derivative, corrected by the consistent initialisation.
    pub fn yp0<V, T>(mut self, yp0: V) -> Self
    where
        V: IntoIterator<Item = T>,
        f64: From<T>,
    {
        self.yp0 = Some(yp0.into_iter().map(f64::from).collect());
        self
    }

    /// Flag each component as differential (`true`) or algebraic (`false`).
    pub fn differential(mut self, differential: impl IntoIterator<Item = bool>) -> Self {
        self.differential = Some(differential.into_iter().collect());
        self
    }

    pub fn rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    /// Absolute tolerance, either one value for all components or one per component.
    pub fn atol<V, T>(mut self, atol: V) -> Self
    where
        V: IntoIterator<Item = T>,
        f64: From<T>,
    {
        self.atol = atol.into_iter().map(f64::from).collect();
        self
    }

    /// Number of parameters to compute forward sensitivities for.
    pub fn sensitivities(mut self, nparams: usize) -> Self {
        self.nparams = nparams;
        self
    }

    /// Initial sensitivities `dy0/dp_i`, one vector per parameter. Defaults to zero.
    pub fn initial_sensitivities(mut self, s0: Vec<Vec<f64>>) -> Self {
        self.s0 = Some(s0);
        self
    }

    pub fn use_analytic_jacobian(mut self, use_analytic_jacobian: bool) -> Self {
        self.use_analytic_jacobian = use_analytic_jacobian;
        self
    }

    pub fn config(mut self, config: SolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.config.output = output;
        self
    }

    pub fn build(self) -> Result<DaeProblem, DaeSolverError> {
        let n = self.y0.len();
        let atol = if self.atol.len() == 1 {
            DVector::from_element(n, self.atol[0])
        } else {
            DVector::from_vec(self.atol)
        };
        let s0 = match self.s0 {
            Some(s0) => s0.into_iter().map(DVector::from_vec).collect(),
            None => vec![DVector::zeros(n); self.nparams],
        };
        let problem = DaeProblem {
            t0: self.t0,
            y0: DVector::from_vec(self.y0),
            yp0: self.yp0.map_or_else(|| DVector::zeros(n), DVector::from_vec),
            differential: self.differential.unwrap_or_else(|| vec![true; n]),
            rtol: self.rtol,
            atol,
            nparams: self.nparams,
            s0,
            sp0: vec![DVector::zeros(n); self.nparams],
            use_analytic_jacobian: self.use_analytic_jacobian,
            config: self.config,
        };
        problem.check()?;
        Ok(problem)
    }
}
