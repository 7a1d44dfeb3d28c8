use std::collections::{BTreeSet, HashMap};

use super::{apply_binary, apply_unary, BinaryOp, Expr, Node, UnaryOp, Var};

#[derive(Clone, Debug)]
enum Instr {
    Const(f64),
    Var(Var),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    Powi(usize, i32),
}

/// Values of the leaves of an expression graph. Slices for leaves a graph does not use may be
/// left empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inputs<'a> {
    pub t: f64,
    pub y: &'a [f64],
    pub yp: &'a [f64],
    pub p: &'a [f64],
    pub cj: f64,
    pub v: &'a [f64],
}

/// An expression graph flattened to a sequence of instructions in dependency order, with each
/// shared subexpression evaluated once. Holds no interior state, so it can be shared between
/// threads and evaluated concurrently.
#[derive(Clone, Debug)]
pub struct CompiledExpr {
    instrs: Vec<Instr>,
    outputs: Vec<usize>,
}

impl CompiledExpr {
    pub fn compile(outputs: &[Expr]) -> Self {
        let mut instrs = Vec::new();
        let mut slots = HashMap::new();
        let outputs = outputs
            .iter()
            .map(|e| emit(e, &mut instrs, &mut slots))
            .collect();
        Self { instrs, outputs }
    }

    pub fn nout(&self) -> usize {
        self.outputs.len()
    }

    pub fn ninstructions(&self) -> usize {
        self.instrs.len()
    }

    /// The leaves read by this graph.
    pub fn dependencies(&self) -> BTreeSet<Var> {
        self.instrs
            .iter()
            .filter_map(|i| match i {
                Instr::Var(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Evaluate all outputs into `out`, which must have length [CompiledExpr::nout]. Panics if
    /// a leaf index is outside the corresponding input slice.
    pub fn eval(&self, inputs: &Inputs<'_>, out: &mut [f64]) {
        let mut values = Vec::with_capacity(self.instrs.len());
        for instr in self.instrs.iter() {
            let v = match instr {
                Instr::Const(c) => *c,
                Instr::Var(var) => match *var {
                    Var::Time => inputs.t,
                    Var::State(i) => inputs.y[i],
                    Var::StateDot(i) => inputs.yp[i],
                    Var::Param(i) => inputs.p[i],
                    Var::Shift => inputs.cj,
                    Var::Direction(i) => inputs.v[i],
                },
                Instr::Unary(op, a) => apply_unary(*op, values[*a]),
                Instr::Binary(op, a, b) => apply_binary(*op, values[*a], values[*b]),
                Instr::Powi(a, n) => f64::powi(values[*a], *n),
            };
            values.push(v);
        }
        for (o, &slot) in out.iter_mut().zip(self.outputs.iter()) {
            *o = values[slot];
        }
    }
}

fn emit(e: &Expr, instrs: &mut Vec<Instr>, slots: &mut HashMap<usize, usize>) -> usize {
    if let Some(&slot) = slots.get(&e.id()) {
        return slot;
    }
    let instr = match e.node() {
        Node::Const(c) => Instr::Const(*c),
        Node::Var(v) => Instr::Var(*v),
        Node::Unary(op, a) => Instr::Unary(*op, emit(a, instrs, slots)),
        Node::Binary(op, a, b) => {
            let a = emit(a, instrs, slots);
            let b = emit(b, instrs, slots);
            Instr::Binary(*op, a, b)
        }
        Node::Powi(a, n) => Instr::Powi(emit(a, instrs, slots), *n),
    };
    instrs.push(instr);
    let slot = instrs.len() - 1;
    slots.insert(e.id(), slot);
    slot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_shares_subexpressions() {
        let shared = (Expr::y(0) * Expr::p(0)).exp();
        let outputs = [&shared + Expr::yp(0), &shared * Expr::time()];
        let f = CompiledExpr::compile(&outputs);
        // y0, p0, mul, exp, yp0, add, t, mul
        assert_eq!(f.ninstructions(), 8);
        let mut out = [0.0; 2];
        f.eval(
            &Inputs {
                t: 2.0,
                y: &[0.0],
                yp: &[1.0],
                p: &[3.0],
                ..Default::default()
            },
            &mut out,
        );
        assert_eq!(out, [2.0, 2.0]);
        assert!(f.dependencies().contains(&Var::Param(0)));
    }

    #[test]
    fn test_compiled_expr_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledExpr>();
    }
}
