//! Expression graphs for the compiled evaluator backend.
//!
//! An [Expr] is a reference counted node in a directed acyclic graph built with the usual
//! arithmetic operators, for example the residual of `y' = -k y` is
//! `Expr::yp(0) + Expr::p(0) * Expr::y(0)`. Graphs can be differentiated symbolically
//! ([Expr::diff]) and are compiled to a flat tape ([CompiledExpr]) for evaluation.

use std::{
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
};

mod compile;
mod derivative;

pub use compile::{CompiledExpr, Inputs};

/// A leaf of an expression graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    Time,
    State(usize),
    StateDot(usize),
    Param(usize),
    /// The shift constant `cj` of the Jacobian `dF/dy + cj * dF/dy'`.
    Shift,
    /// Component of the vector in a matrix-vector action.
    Direction(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Ln,
    Sin,
    Cos,
    Sqrt,
    Tanh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug)]
pub(crate) enum Node {
    Const(f64),
    Var(Var),
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    Powi(Expr, i32),
}

#[derive(Clone, Debug)]
pub struct Expr(pub(crate) Rc<Node>);

impl Expr {
    fn new(node: Node) -> Self {
        Self(Rc::new(node))
    }

    pub fn constant(value: f64) -> Self {
        Self::new(Node::Const(value))
    }
    pub fn zero() -> Self {
        Self::constant(0.0)
    }
    pub fn one() -> Self {
        Self::constant(1.0)
    }
    pub fn var(var: Var) -> Self {
        Self::new(Node::Var(var))
    }
    pub fn time() -> Self {
        Self::var(Var::Time)
    }
    pub fn y(i: usize) -> Self {
        Self::var(Var::State(i))
    }
    pub fn yp(i: usize) -> Self {
        Self::var(Var::StateDot(i))
    }
    pub fn p(i: usize) -> Self {
        Self::var(Var::Param(i))
    }
    pub fn cj() -> Self {
        Self::var(Var::Shift)
    }
    pub fn v(i: usize) -> Self {
        Self::var(Var::Direction(i))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    /// Address of the shared node, identifies common subexpressions.
    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn as_constant(&self) -> Option<f64> {
        match self.node() {
            Node::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_constant() == Some(0.0)
    }

    fn is_one(&self) -> bool {
        self.as_constant() == Some(1.0)
    }

    fn unary(op: UnaryOp, a: Expr) -> Expr {
        if let Some(c) = a.as_constant() {
            return Expr::constant(apply_unary(op, c));
        }
        if let (UnaryOp::Neg, Node::Unary(UnaryOp::Neg, inner)) = (op, a.node()) {
            return inner.clone();
        }
        Expr::new(Node::Unary(op, a))
    }

    fn binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return Expr::constant(apply_binary(op, x, y));
        }
        match op {
            BinaryOp::Add if a.is_zero() => b,
            BinaryOp::Add | BinaryOp::Sub if b.is_zero() => a,
            BinaryOp::Sub if a.is_zero() => Expr::unary(UnaryOp::Neg, b),
            BinaryOp::Mul if a.is_zero() || b.is_zero() => Expr::zero(),
            BinaryOp::Mul if a.is_one() => b,
            BinaryOp::Mul | BinaryOp::Div if b.is_one() => a,
            BinaryOp::Div if a.is_zero() => Expr::zero(),
            _ => Expr::new(Node::Binary(op, a, b)),
        }
    }

    pub fn exp(&self) -> Expr {
        Expr::unary(UnaryOp::Exp, self.clone())
    }
    pub fn ln(&self) -> Expr {
        Expr::unary(UnaryOp::Ln, self.clone())
    }
    pub fn sin(&self) -> Expr {
        Expr::unary(UnaryOp::Sin, self.clone())
    }
    pub fn cos(&self) -> Expr {
        Expr::unary(UnaryOp::Cos, self.clone())
    }
    pub fn sqrt(&self) -> Expr {
        Expr::unary(UnaryOp::Sqrt, self.clone())
    }
    pub fn tanh(&self) -> Expr {
        Expr::unary(UnaryOp::Tanh, self.clone())
    }
    pub fn powi(&self, n: i32) -> Expr {
        match n {
            0 => Expr::one(),
            1 => self.clone(),
            _ => match self.as_constant() {
                Some(c) => Expr::constant(c.powi(n)),
                None => Expr::new(Node::Powi(self.clone(), n)),
            },
        }
    }
}

pub(crate) fn apply_unary(op: UnaryOp, a: f64) -> f64 {
    match op {
        UnaryOp::Neg => -a,
        UnaryOp::Exp => a.exp(),
        UnaryOp::Ln => a.ln(),
        UnaryOp::Sin => a.sin(),
        UnaryOp::Cos => a.cos(),
        UnaryOp::Sqrt => a.sqrt(),
        UnaryOp::Tanh => a.tanh(),
    }
}

pub(crate) fn apply_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self.clone())
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self, rhs.clone())
            }
        }
        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs)
            }
        }
        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs.clone())
            }
        }
        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self, Expr::constant(rhs))
            }
        }
        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self.clone(), Expr::constant(rhs))
            }
        }
        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::constant(self), rhs)
            }
        }
        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, Expr::constant(self), rhs.clone())
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplification() {
        let y = Expr::y(0);
        assert!((&y * 0.0).is_zero());
        assert_eq!((Expr::constant(2.0) * 3.0 + 1.0).as_constant(), Some(7.0));
        assert_eq!((&y + 0.0).id(), y.id());
        assert_eq!((1.0 * &y).id(), y.id());
        assert_eq!((-(-&y)).id(), y.id());
        assert_eq!(y.powi(0).as_constant(), Some(1.0));
    }
}
