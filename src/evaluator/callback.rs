use nalgebra::DVector;

use crate::{
    config_error,
    error::ConfigurationError,
    evaluator::{check_input, check_output, finite_difference_jvp, DaeEvaluator},
    matrix::Sparsity,
    DaeSolverError, SparseColMat,
};

type StateFn<'a> = Box<dyn Fn(f64, &DVector<f64>, &DVector<f64>, &mut DVector<f64>) + 'a>;
type JacobianFn<'a> = Box<dyn Fn(f64, &DVector<f64>, &DVector<f64>, f64, &mut [f64]) + 'a>;
type ActionFn<'a> =
    Box<dyn Fn(f64, &DVector<f64>, &DVector<f64>, &DVector<f64>, &mut DVector<f64>) + 'a>;
type ParameterFn<'a> = Box<dyn Fn(f64, &DVector<f64>, &DVector<f64>, usize, &mut DVector<f64>) + 'a>;

/// Evaluator backend that dispatches every call into host supplied closures.
///
/// Only the residual is required. Without a Jacobian closure the solver approximates the Jacobian
/// by finite differences, without a Jacobian-vector closure the directional derivative is taken
/// by finite differences. Sensitivities need both the mass action and the parameter action.
pub struct CallbackEvaluator<'a> {
    nstates: usize,
    nparams: usize,
    nevents: usize,
    sparsity: Sparsity,
    residual: StateFn<'a>,
    jacobian: Option<JacobianFn<'a>>,
    mass_action: Option<StateFn<'a>>,
    jac_vector_action: Option<ActionFn<'a>>,
    jac_parameter_action: Option<ParameterFn<'a>>,
    events: Option<StateFn<'a>>,
}

impl<'a> CallbackEvaluator<'a> {
    /// Start building an evaluator for a system of `nstates` equations with residual
    /// `residual(t, y, yp, r)`.
    pub fn builder(
        nstates: usize,
        residual: impl Fn(f64, &DVector<f64>, &DVector<f64>, &mut DVector<f64>) + 'a,
    ) -> CallbackEvaluatorBuilder<'a> {
        CallbackEvaluatorBuilder {
            nstates,
            nparams: 0,
            nevents: 0,
            structure: None,
            residual: Box::new(residual),
            jacobian: None,
            mass_action: None,
            jac_vector_action: None,
            jac_parameter_action: None,
            events: None,
        }
    }
}

struct JacobianStructure {
    nnz: usize,
    row_indices: Vec<usize>,
    col_ptrs: Vec<usize>,
}

pub struct CallbackEvaluatorBuilder<'a> {
    nstates: usize,
    nparams: usize,
    nevents: usize,
    structure: Option<JacobianStructure>,
    residual: StateFn<'a>,
    jacobian: Option<JacobianFn<'a>>,
    mass_action: Option<StateFn<'a>>,
    jac_vector_action: Option<ActionFn<'a>>,
    jac_parameter_action: Option<ParameterFn<'a>>,
    events: Option<StateFn<'a>>,
}

impl<'a> CallbackEvaluatorBuilder<'a> {
    /// Compressed-column structure of the Jacobian, read once through the accessors. Without it
    /// the Jacobian is assumed dense.
    pub fn jacobian_structure(
        mut self,
        nnz: usize,
        row_indices: impl FnOnce() -> Vec<usize>,
        col_ptrs: impl FnOnce() -> Vec<usize>,
    ) -> Self {
        self.structure = Some(JacobianStructure {
            nnz,
            row_indices: row_indices(),
            col_ptrs: col_ptrs(),
        });
        self
    }

    /// `jacobian(t, y, yp, cj, values)` writes the non-zeros of `dF/dy + cj * dF/dy'` in the
    /// order of the Jacobian structure.
    pub fn jacobian(
        mut self,
        jacobian: impl Fn(f64, &DVector<f64>, &DVector<f64>, f64, &mut [f64]) + 'a,
    ) -> Self {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    /// `mass_action(t, y, v, mv)` computes `mv = dF/dy' * v`.
    pub fn mass_action(
        mut self,
        mass_action: impl Fn(f64, &DVector<f64>, &DVector<f64>, &mut DVector<f64>) + 'a,
    ) -> Self {
        self.mass_action = Some(Box::new(mass_action));
        self
    }

    /// `jac_vector_action(t, y, yp, v, jv)` computes `jv = dF/dy * v`.
    pub fn jac_vector_action(
        mut self,
        jac_vector_action: impl Fn(f64, &DVector<f64>, &DVector<f64>, &DVector<f64>, &mut DVector<f64>)
            + 'a,
    ) -> Self {
        self.jac_vector_action = Some(Box::new(jac_vector_action));
        self
    }

    /// `jac_parameter_action(t, y, yp, i, out)` computes `out = dF/dp_i` for each of the
    /// `nparams` parameters.
    pub fn jac_parameter_action(
        mut self,
        nparams: usize,
        jac_parameter_action: impl Fn(f64, &DVector<f64>, &DVector<f64>, usize, &mut DVector<f64>)
            + 'a,
    ) -> Self {
        self.nparams = nparams;
        self.jac_parameter_action = Some(Box::new(jac_parameter_action));
        self
    }

    /// `events(t, y, yp, g)` computes the `nevents` event indicators.
    pub fn events(
        mut self,
        nevents: usize,
        events: impl Fn(f64, &DVector<f64>, &DVector<f64>, &mut DVector<f64>) + 'a,
    ) -> Self {
        self.nevents = nevents;
        self.events = Some(Box::new(events));
        self
    }

    pub fn build(self) -> Result<CallbackEvaluator<'a>, DaeSolverError> {
        let n = self.nstates;
        let sparsity = match self.structure {
            Some(structure) => {
                if structure.row_indices.len() != structure.nnz {
                    return Err(config_error!(InvalidSparsity, format!(
                        "nnz = {} but {} row indices given",
                        structure.nnz,
                        structure.row_indices.len()
                    )));
                }
                if structure.col_ptrs.len() != n + 1 {
                    return Err(config_error!(DimensionMismatch {
                        name: "column pointers",
                        expected: n + 1,
                        found: structure.col_ptrs.len()
                    }));
                }
                Sparsity::try_from_csc(n, n, structure.col_ptrs, structure.row_indices)
                    .map_err(|e| ConfigurationError::InvalidSparsity(e.to_string()))?
            }
            None => Sparsity::dense(n, n),
        };
        Ok(CallbackEvaluator {
            nstates: n,
            nparams: self.nparams,
            nevents: self.nevents,
            sparsity,
            residual: self.residual,
            jacobian: self.jacobian,
            mass_action: self.mass_action,
            jac_vector_action: self.jac_vector_action,
            jac_parameter_action: self.jac_parameter_action,
            events: self.events,
        })
    }
}

impl DaeEvaluator for CallbackEvaluator<'_> {
    fn nstates(&self) -> usize {
        self.nstates
    }

    fn nparams(&self) -> usize {
        self.nparams
    }

    fn nevents(&self) -> usize {
        self.nevents
    }

    fn jacobian_sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    fn has_jacobian(&self) -> bool {
        self.jacobian.is_some()
    }

    fn has_sensitivities(&self) -> bool {
        self.mass_action.is_some() && self.jac_parameter_action.is_some()
    }

    fn residual_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        r: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        check_input("residual", t, y)?;
        check_input("residual", t, yp)?;
        (self.residual)(t, y, yp, r);
        check_output("residual", t, r)
    }

    fn jacobian_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        cj: f64,
        jac: &mut SparseColMat,
    ) -> Result<(), DaeSolverError> {
        let Some(jacobian) = self.jacobian.as_ref() else {
            return Err(crate::evaluation_error!(NotProvided, "jacobian"));
        };
        check_input("jacobian", t, y)?;
        check_input("jacobian", t, yp)?;
        jacobian(t, y, yp, cj, jac.values_mut());
        Ok(())
    }

    fn mass_action_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        v: &DVector<f64>,
        mv: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        let Some(mass_action) = self.mass_action.as_ref() else {
            return Err(crate::evaluation_error!(NotProvided, "mass_action"));
        };
        check_input("mass_action", t, y)?;
        check_input("mass_action", t, v)?;
        mass_action(t, y, v, mv);
        check_output("mass_action", t, mv)
    }

    fn jac_vector_action_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        v: &DVector<f64>,
        jv: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        let Some(jac_vector_action) = self.jac_vector_action.as_ref() else {
            return finite_difference_jvp(self, t, y, yp, v, jv);
        };
        check_input("jac_vector_action", t, y)?;
        check_input("jac_vector_action", t, v)?;
        jac_vector_action(t, y, yp, v, jv);
        check_output("jac_vector_action", t, jv)
    }

    fn jac_parameter_action_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        i: usize,
        out: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        let Some(jac_parameter_action) = self.jac_parameter_action.as_ref() else {
            return Err(crate::evaluation_error!(NotProvided, "jac_parameter_action"));
        };
        check_input("jac_parameter_action", t, y)?;
        jac_parameter_action(t, y, yp, i, out);
        check_output("jac_parameter_action", t, out)
    }

    fn event_indicators_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        g: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        match self.events.as_ref() {
            Some(events) => {
                check_input("event_indicators", t, y)?;
                events(t, y, yp, g);
                check_output("event_indicators", t, g)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluationError;
    use approx::assert_relative_eq;

    // F0 = yp0 + p * y0
    // F1 = y1 - 2 y0
    fn evaluator<'a>() -> CallbackEvaluator<'a> {
        let p = 3.0;
        CallbackEvaluator::builder(2, move |_t, y, yp, r| {
            r[0] = yp[0] + p * y[0];
            r[1] = y[1] - 2.0 * y[0];
        })
        .jacobian_structure(3, || vec![0, 1, 1], || vec![0, 2, 3])
        .jacobian(move |_t, _y, _yp, cj, values| {
            values[0] = cj + p;
            values[1] = -2.0;
            values[2] = 1.0;
        })
        .mass_action(|_t, _y, v, mv| {
            mv[0] = v[0];
            mv[1] = 0.0;
        })
        .jac_parameter_action(1, |_t, y, _yp, _i, out| {
            out[0] = y[0];
            out[1] = 0.0;
        })
        .build()
        .unwrap()
    }

    #[test]
    fn test_callback_dispatch() {
        let eval = evaluator();
        assert_eq!(eval.nstates(), 2);
        assert_eq!(eval.nparams(), 1);
        assert!(eval.has_jacobian());
        assert!(eval.has_sensitivities());
        let y = DVector::from_vec(vec![1.0, 2.0]);
        let yp = DVector::from_vec(vec![-3.0, 0.0]);
        let mut r = DVector::zeros(2);
        eval.residual_inplace(0.0, &y, &yp, &mut r).unwrap();
        assert_eq!(r, DVector::from_vec(vec![0.0, 0.0]));

        let mut jac = SparseColMat::new_from_sparsity(eval.jacobian_sparsity().clone());
        eval.jacobian_inplace(0.0, &y, &yp, 10.0, &mut jac).unwrap();
        assert_eq!(jac.get(0, 0), 13.0);
        assert_eq!(jac.get(1, 0), -2.0);
        assert_eq!(jac.get(1, 1), 1.0);

        // no jac_vector_action closure, so this is a finite difference
        let v = DVector::from_vec(vec![1.0, 1.0]);
        let mut jv = DVector::zeros(2);
        eval.jac_vector_action_inplace(0.0, &y, &yp, &v, &mut jv).unwrap();
        assert_relative_eq!(jv[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(jv[1], -1.0, epsilon = 1e-6);

        // dF/dy s + dF/dy' sp + dF/dp
        let mut tmp = DVector::zeros(2);
        let mut out = DVector::zeros(2);
        eval.sens_residual_inplace(0.0, &y, &yp, &v, &v, 0, &mut tmp, &mut out)
            .unwrap();
        assert_relative_eq!(out[0], 3.0 + 1.0 + 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_non_finite_input() {
        let eval = evaluator();
        let y = DVector::from_vec(vec![f64::NAN, 2.0]);
        let yp = DVector::zeros(2);
        let mut r = DVector::zeros(2);
        let err = eval.residual_inplace(0.0, &y, &yp, &mut r).unwrap_err();
        assert!(matches!(
            err,
            DaeSolverError::EvaluationError(EvaluationError::NonFiniteInput { .. })
        ));
    }

    #[test]
    fn test_invalid_structure() {
        let eval = CallbackEvaluator::builder(2, |_t, _y, _yp, _r| {})
            .jacobian_structure(3, || vec![0, 1], || vec![0, 2, 3])
            .build();
        assert!(eval.is_err());
        let eval = CallbackEvaluator::builder(2, |_t, _y, _yp, _r| {})
            .jacobian_structure(2, || vec![1, 0], || vec![0, 2, 2])
            .build();
        assert!(eval.is_err());
    }
}
