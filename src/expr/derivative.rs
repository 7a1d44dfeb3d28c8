use std::collections::{BTreeSet, HashMap};

use super::{BinaryOp, Expr, Node, UnaryOp, Var};

impl Expr {
    /// Symbolic derivative with respect to `var`. Shared subexpressions are differentiated once.
    pub fn diff(&self, var: Var) -> Expr {
        let mut memo = HashMap::new();
        diff_memo(self, var, &mut memo)
    }

    /// The set of leaves this expression depends on.
    pub fn dependencies(&self) -> BTreeSet<Var> {
        let mut visited = HashMap::new();
        let mut vars = BTreeSet::new();
        collect_vars(self, &mut visited, &mut vars);
        vars
    }
}

fn diff_memo(e: &Expr, var: Var, memo: &mut HashMap<usize, Expr>) -> Expr {
    if let Some(d) = memo.get(&e.id()) {
        return d.clone();
    }
    let d = match e.node() {
        Node::Const(_) => Expr::zero(),
        Node::Var(v) => {
            if *v == var {
                Expr::one()
            } else {
                Expr::zero()
            }
        }
        Node::Unary(op, a) => {
            let da = diff_memo(a, var, memo);
            if da.is_zero() {
                Expr::zero()
            } else {
                match op {
                    UnaryOp::Neg => -da,
                    UnaryOp::Exp => e * da,
                    UnaryOp::Ln => da / a,
                    UnaryOp::Sin => a.cos() * da,
                    UnaryOp::Cos => -(a.sin() * da),
                    UnaryOp::Sqrt => da / (2.0 * e),
                    UnaryOp::Tanh => (1.0 - e.powi(2)) * da,
                }
            }
        }
        Node::Binary(op, a, b) => {
            let da = diff_memo(a, var, memo);
            let db = diff_memo(b, var, memo);
            match op {
                BinaryOp::Add => da + db,
                BinaryOp::Sub => da - db,
                BinaryOp::Mul => da * b + a * db,
                BinaryOp::Div => (da - e * db) / b,
            }
        }
        Node::Powi(a, n) => {
            let da = diff_memo(a, var, memo);
            if da.is_zero() {
                Expr::zero()
            } else {
                f64::from(*n) * a.powi(n - 1) * da
            }
        }
    };
    memo.insert(e.id(), d.clone());
    d
}

fn collect_vars(e: &Expr, visited: &mut HashMap<usize, ()>, vars: &mut BTreeSet<Var>) {
    if visited.insert(e.id(), ()).is_some() {
        return;
    }
    match e.node() {
        Node::Const(_) => {}
        Node::Var(v) => {
            vars.insert(*v);
        }
        Node::Unary(_, a) | Node::Powi(a, _) => collect_vars(a, visited, vars),
        Node::Binary(_, a, b) => {
            collect_vars(a, visited, vars);
            collect_vars(b, visited, vars);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CompiledExpr, Inputs};
    use approx::assert_relative_eq;

    fn eval(e: &Expr, y: &[f64]) -> f64 {
        let f = CompiledExpr::compile(&[e.clone()]);
        let mut out = [0.0];
        f.eval(
            &Inputs {
                y,
                ..Default::default()
            },
            &mut out,
        );
        out[0]
    }

    #[test]
    fn test_diff_rules() {
        let x = Expr::y(0);
        let z = Expr::y(1);
        let cases = [
            (x.exp() * &z, 0.5_f64.exp() * 2.0),
            (x.ln() / &z, 1.0 / (0.5 * 2.0)),
            (x.sin() - z.cos(), 0.5_f64.cos()),
            (x.sqrt().tanh(), (1.0 - 0.5_f64.sqrt().tanh().powi(2)) * 0.5 / 0.5_f64.sqrt()),
            (x.powi(3) * 2.0, 6.0 * 0.25),
            (&z / &x, -2.0 / 0.25),
        ];
        for (e, expect) in cases {
            let d = e.diff(Var::State(0));
            assert_relative_eq!(eval(&d, &[0.5, 2.0]), expect, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dependencies() {
        let e = Expr::yp(0) + Expr::p(1) * Expr::y(2).exp();
        let deps = e.dependencies();
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec![Var::State(2), Var::StateDot(0), Var::Param(1)]
        );
        assert!(e.diff(Var::State(0)).is_zero());
    }
}
