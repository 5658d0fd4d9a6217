use std::collections::HashMap;
use std::sync::Arc;

use strum::EnumCount;

use crate::{Expr, ParallelType};

/// Binds symbols and launch extents to concrete values and evaluates [`Expr`]s against them.
#[derive(Debug, Clone, Default)]
pub struct ExpressionEvaluator {
    symbols: HashMap<Arc<str>, i64>,
    parallel: [Option<i64>; ParallelType::COUNT],
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<Arc<str>>, value: i64) {
        self.symbols.insert(name.into(), value);
    }

    pub fn bind_parallel(&mut self, ptype: ParallelType, value: i64) {
        self.parallel[ptype.index()] = Some(value);
    }

    /// Binds a leaf expression to `value`.
    ///
    /// Returns `false` when `expr` is not a symbol or launch extent, in which case nothing is bound.
    pub fn bind_expr(&mut self, expr: &Expr, value: i64) -> bool {
        match expr {
            Expr::Symbol(name) => {
                self.symbols.insert(name.clone(), value);
                true
            }
            Expr::Parallel(ptype) => {
                self.bind_parallel(*ptype, value);
                true
            }
            _ => false,
        }
    }

    pub fn symbol(&self, name: &str) -> Option<i64> {
        self.symbols.get(name).copied()
    }

    pub fn parallel(&self, ptype: ParallelType) -> Option<i64> {
        self.parallel[ptype.index()]
    }

    pub fn evaluate(&self, expr: &Expr) -> Option<i64> {
        expr.fold(&|leaf| match leaf {
            Expr::Symbol(name) => self.symbol(name),
            Expr::Parallel(ptype) => self.parallel(*ptype),
            _ => None,
        })
    }

    pub fn is_known(&self, expr: &Expr) -> bool {
        self.evaluate(expr).is_some()
    }
}
