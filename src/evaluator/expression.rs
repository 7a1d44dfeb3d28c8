use nalgebra::DVector;

use crate::{
    config_error,
    evaluator::{check_input, check_output, DaeEvaluator},
    expr::{CompiledExpr, Expr, Inputs, Var},
    matrix::Sparsity,
    DaeSolverError, SparseColMat,
};

/// The precompiled graphs of an [ExpressionEvaluator].
///
/// | graph | leaves | outputs |
/// |---|---|---|
/// | `residual` | t, y, yp, p | `F`, n values |
/// | `jacobian` | t, y, yp, p, cj | non-zeros of `dF/dy + cj dF/dy'` in compressed-column order |
/// | `mass_action` | t, y, p, v | `dF/dy' v`, n values |
/// | `jac_vector_action` | t, y, yp, p, v | `dF/dy v`, n values |
/// | `jac_parameter_action` | t, y, yp, p | `dF/dp`, n values per parameter, parameter-major |
/// | `events` | t, y, yp, p | event indicators |
#[derive(Clone, Debug)]
pub struct ExpressionFunctions {
    pub residual: CompiledExpr,
    pub jacobian: CompiledExpr,
    pub mass_action: CompiledExpr,
    pub jac_vector_action: CompiledExpr,
    pub jac_parameter_action: CompiledExpr,
    pub events: CompiledExpr,
}

/// Evaluator backend that evaluates precompiled expression graphs.
///
/// The graphs are immutable, so one evaluator can serve any number of concurrent solves.
#[derive(Clone, Debug)]
pub struct ExpressionEvaluator {
    nstates: usize,
    nevents: usize,
    p: Vec<f64>,
    sparsity: Sparsity,
    functions: ExpressionFunctions,
}

fn check_graph(
    name: &'static str,
    f: &CompiledExpr,
    nout: usize,
    nstates: usize,
    nparams: usize,
    allowed: impl Fn(&Var) -> bool,
) -> Result<(), DaeSolverError> {
    if f.nout() != nout {
        return Err(config_error!(ExpressionOutputMismatch {
            name,
            expected: nout,
            found: f.nout()
        }));
    }
    for var in f.dependencies() {
        let in_range = match var {
            Var::State(i) | Var::StateDot(i) | Var::Direction(i) => i < nstates,
            Var::Param(i) => i < nparams,
            Var::Time | Var::Shift => true,
        };
        if !in_range || !allowed(&var) {
            return Err(config_error!(BuilderError, format!(
                "expression function {name} cannot depend on {var:?}"
            )));
        }
    }
    Ok(())
}

impl ExpressionEvaluator {
    /// Create an evaluator from host-compiled graphs, the static sparsity of the Jacobian and
    /// the parameter values.
    pub fn new(
        functions: ExpressionFunctions,
        sparsity: Sparsity,
        p: Vec<f64>,
    ) -> Result<Self, DaeSolverError> {
        let n = functions.residual.nout();
        let np = p.len();
        if sparsity.nrows() != n || sparsity.ncols() != n {
            return Err(config_error!(InvalidSparsity, format!(
                "expected a {n}x{n} pattern, got {}x{}",
                sparsity.nrows(),
                sparsity.ncols()
            )));
        }
        let no_direction = |v: &Var| !matches!(v, Var::Direction(_) | Var::Shift);
        check_graph("residual", &functions.residual, n, n, np, no_direction)?;
        check_graph("jacobian", &functions.jacobian, sparsity.nnz(), n, np, |v| {
            !matches!(v, Var::Direction(_))
        })?;
        check_graph("mass_action", &functions.mass_action, n, n, np, |v| {
            !matches!(v, Var::StateDot(_) | Var::Shift)
        })?;
        check_graph(
            "jac_vector_action",
            &functions.jac_vector_action,
            n,
            n,
            np,
            |v| !matches!(v, Var::Shift),
        )?;
        check_graph(
            "jac_parameter_action",
            &functions.jac_parameter_action,
            n * np,
            n,
            np,
            no_direction,
        )?;
        let nevents = functions.events.nout();
        check_graph("events", &functions.events, nevents, n, np, no_direction)?;
        Ok(Self {
            nstates: n,
            nevents,
            p,
            sparsity,
            functions,
        })
    }

    /// Build all graphs from the residual `F(t, y, yp, p)` by symbolic differentiation. The
    /// Jacobian sparsity is the structural dependency of each residual on `y` and `yp`.
    /// `F` must be linear in `yp`, so the mass action does not depend on `yp`.
    pub fn from_residual(
        residual: &[Expr],
        events: &[Expr],
        p: Vec<f64>,
    ) -> Result<Self, DaeSolverError> {
        let n = residual.len();
        let mut indices = Vec::new();
        for (i, r) in residual.iter().enumerate() {
            for var in r.dependencies() {
                match var {
                    Var::State(j) | Var::StateDot(j) if j < n => indices.push((i, j)),
                    _ => {}
                }
            }
        }
        let sparsity = Sparsity::try_from_indices(n, n, indices)?;

        let jacobian: Vec<Expr> = sparsity
            .indices()
            .into_iter()
            .map(|(i, j)| {
                residual[i].diff(Var::State(j)) + Expr::cj() * residual[i].diff(Var::StateDot(j))
            })
            .collect();

        let mut mass_action = Vec::with_capacity(n);
        let mut jac_vector_action = Vec::with_capacity(n);
        for r in residual.iter() {
            let mut mv = Expr::zero();
            let mut jv = Expr::zero();
            for var in r.dependencies() {
                match var {
                    Var::StateDot(j) => mv = mv + r.diff(var) * Expr::v(j),
                    Var::State(j) => jv = jv + r.diff(var) * Expr::v(j),
                    _ => {}
                }
            }
            mass_action.push(mv);
            jac_vector_action.push(jv);
        }
        let jac_parameter_action: Vec<Expr> = (0..p.len())
            .flat_map(|k| residual.iter().map(move |r| r.diff(Var::Param(k))))
            .collect();

        let functions = ExpressionFunctions {
            residual: CompiledExpr::compile(residual),
            jacobian: CompiledExpr::compile(&jacobian),
            mass_action: CompiledExpr::compile(&mass_action),
            jac_vector_action: CompiledExpr::compile(&jac_vector_action),
            jac_parameter_action: CompiledExpr::compile(&jac_parameter_action),
            events: CompiledExpr::compile(events),
        };
        Self::new(functions, sparsity, p)
    }

    pub fn parameters(&self) -> &[f64] {
        &self.p
    }

    pub fn functions(&self) -> &ExpressionFunctions {
        &self.functions
    }

    fn inputs<'a>(&'a self, t: f64, y: &'a DVector<f64>, yp: &'a DVector<f64>) -> Inputs<'a> {
        Inputs {
            t,
            y: y.as_slice(),
            yp: yp.as_slice(),
            p: &self.p,
            ..Default::default()
        }
    }
}

impl DaeEvaluator for ExpressionEvaluator {
    fn nstates(&self) -> usize {
        self.nstates
    }

    fn nparams(&self) -> usize {
        self.p.len()
    }

    fn nevents(&self) -> usize {
        self.nevents
    }

    fn jacobian_sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    fn has_jacobian(&self) -> bool {
        true
    }

    fn has_sensitivities(&self) -> bool {
        true
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
        self.functions
            .residual
            .eval(&self.inputs(t, y, yp), r.as_mut_slice());
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
        check_input("jacobian", t, y)?;
        check_input("jacobian", t, yp)?;
        let inputs = Inputs {
            cj,
            ..self.inputs(t, y, yp)
        };
        self.functions.jacobian.eval(&inputs, jac.values_mut());
        Ok(())
    }

    fn mass_action_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        v: &DVector<f64>,
        mv: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        check_input("mass_action", t, y)?;
        check_input("mass_action", t, v)?;
        let inputs = Inputs {
            t,
            y: y.as_slice(),
            p: &self.p,
            v: v.as_slice(),
            ..Default::default()
        };
        self.functions.mass_action.eval(&inputs, mv.as_mut_slice());
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
        check_input("jac_vector_action", t, y)?;
        check_input("jac_vector_action", t, v)?;
        let inputs = Inputs {
            v: v.as_slice(),
            ..self.inputs(t, y, yp)
        };
        self.functions
            .jac_vector_action
            .eval(&inputs, jv.as_mut_slice());
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
        check_input("jac_parameter_action", t, y)?;
        let n = self.nstates;
        let mut all = vec![0.0; n * self.p.len()];
        self.functions
            .jac_parameter_action
            .eval(&self.inputs(t, y, yp), &mut all);
        out.as_mut_slice().copy_from_slice(&all[i * n..(i + 1) * n]);
        check_output("jac_parameter_action", t, out)
    }

    fn event_indicators_inplace(
        &self,
        t: f64,
        y: &DVector<f64>,
        yp: &DVector<f64>,
        g: &mut DVector<f64>,
    ) -> Result<(), DaeSolverError> {
        check_input("event_indicators", t, y)?;
        self.functions
            .events
            .eval(&self.inputs(t, y, yp), g.as_mut_slice());
        check_output("event_indicators", t, g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // F0 = yp0 + p0 * y0 * y1
    // F1 = y1 - y0^2
    fn model() -> ExpressionEvaluator {
        let residual = [
            Expr::yp(0) + Expr::p(0) * Expr::y(0) * Expr::y(1),
            Expr::y(1) - Expr::y(0).powi(2),
        ];
        let events = [Expr::time() - 1.5];
        ExpressionEvaluator::from_residual(&residual, &events, vec![2.0]).unwrap()
    }

    #[test]
    fn test_derived_jacobian() {
        let eval = model();
        assert_eq!(eval.nstates(), 2);
        assert_eq!(eval.nparams(), 1);
        assert_eq!(eval.nevents(), 1);
        // column 0: rows 0, 1; column 1: rows 0, 1
        assert_eq!(eval.jacobian_sparsity().nnz(), 4);
        let y = DVector::from_vec(vec![2.0, 4.0]);
        let yp = DVector::from_vec(vec![-16.0, 0.0]);
        let mut r = DVector::zeros(2);
        eval.residual_inplace(0.0, &y, &yp, &mut r).unwrap();
        assert_eq!(r, DVector::from_vec(vec![0.0, 0.0]));

        let mut jac = SparseColMat::new_from_sparsity(eval.jacobian_sparsity().clone());
        eval.jacobian_inplace(0.0, &y, &yp, 5.0, &mut jac).unwrap();
        // [cj + p y1, p y0; -2 y0, 1]
        assert_relative_eq!(jac.get(0, 0), 13.0);
        assert_relative_eq!(jac.get(0, 1), 4.0);
        assert_relative_eq!(jac.get(1, 0), -4.0);
        assert_relative_eq!(jac.get(1, 1), 1.0);
    }

    #[test]
    fn test_derived_actions() {
        let eval = model();
        let y = DVector::from_vec(vec![2.0, 4.0]);
        let yp = DVector::from_vec(vec![-16.0, 0.0]);
        let v = DVector::from_vec(vec![1.0, -1.0]);
        let mut out = DVector::zeros(2);
        eval.mass_action_inplace(0.0, &y, &v, &mut out).unwrap();
        assert_eq!(out, DVector::from_vec(vec![1.0, 0.0]));
        eval.jac_vector_action_inplace(0.0, &y, &yp, &v, &mut out)
            .unwrap();
        assert_eq!(out, DVector::from_vec(vec![8.0 - 4.0, -4.0 - 1.0]));
        eval.jac_parameter_action_inplace(0.0, &y, &yp, 0, &mut out)
            .unwrap();
        assert_eq!(out, DVector::from_vec(vec![8.0, 0.0]));
        let mut g = DVector::zeros(1);
        eval.event_indicators_inplace(2.0, &y, &yp, &mut g).unwrap();
        assert_relative_eq!(g[0], 0.5);
    }

    #[test]
    fn test_rejects_mismatched_functions() {
        let eval = model();
        let mut functions = eval.functions().clone();
        functions.jacobian = CompiledExpr::compile(&[Expr::one()]);
        let err = ExpressionEvaluator::new(functions, eval.jacobian_sparsity().clone(), vec![2.0]);
        assert!(err.is_err());

        // a parameter index beyond the parameter vector
        let residual = [Expr::yp(0) + Expr::p(3)];
        assert!(ExpressionEvaluator::from_residual(&residual, &[], vec![1.0]).is_err());
    }
}
