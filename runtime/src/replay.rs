//! Maps a buffer laid out in allocation order back to a tensor's logical order.
//!
//! The allocation domain of a tensor is related to its logical domain by splits and merges,
//! recorded in either direction. Starting from a layout whose dimensions follow the allocation
//! domain, each transform is replayed as a view on an ordered frontier of iteration ids until
//! the frontier holds the logical ids, then a final permutation puts them in logical order.
//!
//! For example, a logical `[I1, I2]` allocated as `[I2*I1]` is viewed as `[I2, I1]` and
//! transposed, so it keeps logical semantics over column-major memory.

use kfuse_device::Layout;
use kfuse_ir::{IterId, TensorDomain, TensorView, Transform};
use snafu::OptionExt;

use crate::error::*;
use crate::evaluator::RuntimeEvaluator;

/// Dimensions of `domain` backed by memory, in allocation order.
pub fn allocated_ids(domain: &TensorDomain) -> Vec<IterId> {
    domain
        .maybe_allocation()
        .iter()
        .copied()
        .filter(|id| {
            let id = domain.id(*id);
            !id.is_reduction() && !id.is_stride()
        })
        .collect()
}

struct Replay<'a> {
    tv: &'a TensorView,
    evaluator: &'a RuntimeEvaluator,
    layout: Layout,
    frontier: Vec<IterId>,
}

impl Replay<'_> {
    fn fail<T>(&self, reason: impl Into<String>) -> Result<T> {
        AllocationReplaySnafu { tensor: self.tv.name.clone(), reason: reason.into() }.fail()
    }

    fn position(&self, id: IterId) -> Option<usize> {
        self.frontier.iter().position(|frontier_id| *frontier_id == id)
    }

    fn evaluate(&self, expr: &kfuse_ir::Expr) -> Result<i64> {
        self.evaluator
            .evaluate(expr)
            .context(UnresolvedExtentSnafu { tensor: self.tv.name.clone(), extent: expr.to_string() })
    }

    fn view(&self, result: kfuse_device::Result<Layout>) -> Result<Layout> {
        result.map_err(|source| Error::AllocationReplay { tensor: self.tv.name.clone(), reason: source.to_string() })
    }

    /// `[.., from, ..]` becomes `[.., outer, inner, ..]`.
    fn split(&mut self, from: IterId, outer: IterId, inner: IterId, factor: i64) -> Result<()> {
        // Transforms reached from both sides of the logical domain are skipped.
        let Some(dim) = self.position(from) else {
            return Ok(());
        };
        self.layout = self.view(self.layout.split(dim, factor))?;
        self.frontier.splice(dim..=dim, [outer, inner]);
        Ok(())
    }

    /// `[.., outer, .., inner, ..]` becomes `[.., into, ..]` at the leftmost of the two positions.
    fn merge(&mut self, outer: IterId, inner: IterId, into: IterId) -> Result<()> {
        let (Some(outer_dim), Some(inner_dim)) = (self.position(outer), self.position(inner)) else {
            return Ok(());
        };
        let left = outer_dim.min(inner_dim);

        if outer_dim + 1 != inner_dim {
            let dims: Vec<usize> = (0..left)
                .chain([outer_dim, inner_dim])
                .chain((left..self.layout.rank()).filter(|dim| *dim != outer_dim && *dim != inner_dim))
                .collect();
            self.layout = self.view(self.layout.permute(&dims))?;
        }
        self.layout = self.view(self.layout.merge(left))?;

        let (keep, drop) = if inner_dim < outer_dim { (inner_dim, outer_dim) } else { (outer_dim, inner_dim) };
        self.frontier[keep] = into;
        self.frontier.remove(drop);
        Ok(())
    }

    fn forward(&mut self, transform: &Transform) -> Result<()> {
        match transform {
            Transform::Split { input, outer, inner, factor } => {
                let factor = self.evaluate(factor)?;
                self.split(*input, *outer, *inner, factor)
            }
            Transform::Merge { outer, inner, output } => self.merge(*outer, *inner, *output),
        }
    }

    fn backward(&mut self, transform: &Transform) -> Result<()> {
        match transform {
            Transform::Split { input, outer, inner, .. } => self.merge(*outer, *inner, *input),
            Transform::Merge { outer, inner, output } => {
                let factor = self.evaluate(&self.tv.domain.id(*inner).extent)?;
                self.split(*output, *outer, *inner, factor)
            }
        }
    }
}

/// Replays `layout`, shaped like the allocation domain of `tv`, into logical order.
pub fn allocation_to_logical(tv: &TensorView, layout: Layout, evaluator: &RuntimeEvaluator) -> Result<Layout> {
    let domain = &tv.domain;
    let logical: Vec<IterId> = domain.no_reductions(domain.logical()).collect();
    let allocation = allocated_ids(domain);

    let mut replay = Replay { tv, evaluator, layout, frontier: allocation.clone() };
    if replay.layout.rank() != replay.frontier.len() {
        return replay.fail(format!(
            "layout of rank {} for an allocation domain of rank {}",
            replay.layout.rank(),
            replay.frontier.len()
        ));
    }

    for transform in domain.exprs_between(&allocation, &logical) {
        replay.forward(transform)?;
    }
    for transform in domain.exprs_between(&logical, &allocation).into_iter().rev() {
        replay.backward(transform)?;
    }

    if replay.frontier.len() != logical.len() {
        let remaining = replay.frontier.len();
        return replay.fail(format!("{remaining} dimensions remain after replay, expected {}", logical.len()));
    }
    let mut dims = Vec::with_capacity(logical.len());
    for id in &logical {
        match replay.position(*id) {
            Some(dim) => dims.push(dim),
            None => return replay.fail(format!("logical dimension {} is not reachable from the allocation", id.0)),
        }
    }
    replay.view(replay.layout.permute(&dims))
}
