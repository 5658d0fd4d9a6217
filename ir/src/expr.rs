//! Symbolic integer expressions for extents, addresses and launch dimensions.
//!
//! Leaves are constants, named symbols (input extents, scalar inputs) and launch
//! extents of a [`ParallelType`]. Values are resolved through an
//! [`ExpressionEvaluator`](crate::ExpressionEvaluator).

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::ParallelType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::FromRepr, strum::Display)]
#[repr(u8)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    CeilDiv,
    Mod,
    Max,
    Min,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Applies the operator with C integer semantics. `None` on division by zero or overflow.
    pub fn apply(&self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            Self::Add => lhs.checked_add(rhs),
            Self::Sub => lhs.checked_sub(rhs),
            Self::Mul => lhs.checked_mul(rhs),
            Self::Div => lhs.checked_div(rhs),
            Self::CeilDiv => {
                if rhs == 0 {
                    return None;
                }
                let quotient = lhs / rhs;
                let round_up = lhs % rhs != 0 && ((lhs < 0) == (rhs < 0));
                Some(if round_up { quotient + 1 } else { quotient })
            }
            Self::Mod => lhs.checked_rem(rhs),
            Self::Max => Some(lhs.max(rhs)),
            Self::Min => Some(lhs.min(rhs)),
            Self::Eq => Some((lhs == rhs) as i64),
            Self::Ne => Some((lhs != rhs) as i64),
            Self::Lt => Some((lhs < rhs) as i64),
            Self::Le => Some((lhs <= rhs) as i64),
            Self::Gt => Some((lhs > rhs) as i64),
            Self::Ge => Some((lhs >= rhs) as i64),
            Self::And => Some((lhs != 0 && rhs != 0) as i64),
            Self::Or => Some((lhs != 0 || rhs != 0) as i64),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::CeilDiv => "ceilDiv",
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(i64),
    Symbol(Arc<str>),
    /// Launch extent of a parallel type (`blockDim.x`, `gridDim.y`, ...).
    Parallel(ParallelType),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
}

impl Expr {
    pub fn constant(value: i64) -> Self {
        Self::Const(value)
    }

    pub fn symbol(name: impl Into<Arc<str>>) -> Self {
        Self::Symbol(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Self::Binary(op, Arc::new(lhs.into()), Arc::new(rhs.into()))
    }

    pub fn ceil_div(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::CeilDiv, self, rhs)
    }

    pub fn max(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Max, self, rhs)
    }

    pub fn min(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Min, self, rhs)
    }

    pub fn cmp_eq(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn cmp_ne(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Ne, self, rhs)
    }

    pub fn cmp_lt(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn cmp_le(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Le, self, rhs)
    }

    pub fn cmp_gt(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn cmp_ge(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Ge, self, rhs)
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::And, self, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Or, self, rhs)
    }

    /// Product of `factors`, `1` for an empty iterator.
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Self {
        factors.into_iter().reduce(|acc, factor| acc * factor).unwrap_or(Self::Const(1))
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Self::Const(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Named symbols this expression reads, in first-use order.
    pub fn symbols(&self) -> SmallVec<[Arc<str>; 4]> {
        let mut out = SmallVec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut SmallVec<[Arc<str>; 4]>) {
        match self {
            Self::Symbol(name) if !out.contains(name) => out.push(name.clone()),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_symbols(out);
                rhs.collect_symbols(out);
            }
            _ => {}
        }
    }

    /// Folds the expression bottom-up, resolving leaves through `leaf`.
    pub fn fold(&self, leaf: &impl Fn(&Expr) -> Option<i64>) -> Option<i64> {
        match self {
            Self::Const(value) => Some(*value),
            Self::Binary(op, lhs, rhs) => op.apply(lhs.fold(leaf)?, rhs.fold(leaf)?),
            _ => leaf(self),
        }
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Const(value)
    }
}

impl From<ParallelType> for Expr {
    fn from(ptype: ParallelType) -> Self {
        Self::Parallel(ptype)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

macro_rules! impl_expr_ops {
    ($($trait:ident :: $method:ident => $op:expr),* $(,)?) => {
        $(impl<T: Into<Expr>> std::ops::$trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs)
            }
        })*
    };
}

impl_expr_ops! {
    Add::add => BinaryOp::Add,
    Sub::sub => BinaryOp::Sub,
    Mul::mul => BinaryOp::Mul,
    Div::div => BinaryOp::Div,
    Rem::rem => BinaryOp::Mod,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(value) => write!(f, "{value}"),
            Self::Symbol(name) => f.write_str(name),
            Self::Parallel(ptype) => f.write_str(ptype.extent_name()),
            Self::Binary(op @ (BinaryOp::CeilDiv | BinaryOp::Max | BinaryOp::Min), lhs, rhs) => {
                write!(f, "{}({lhs}, {rhs})", op.symbol())
            }
            Self::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}
