//! Iteration domains and the split/merge history relating a tensor's logical and
//! allocation orders.
//!
//! Each [`TensorDomain`] owns an arena of [`IterDomain`]s addressed by [`IterId`].
//! Transforms are recorded in creation order, which is a valid topological order.

use std::collections::HashSet;

use smallvec::{SmallVec, smallvec};

use crate::{Expr, ParallelType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IterId(pub u32);

impl IterId {
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterType {
    Iteration,
    Reduction,
    Broadcast,
    /// Stride marker produced by strided views; never allocated.
    Stride,
    /// Sharded across devices; each device holds one slice.
    DeviceDim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterDomain {
    pub extent: Expr,
    /// Logical extent of an expanded broadcast. Memory still holds a single element.
    pub expanded_extent: Option<Expr>,
    pub iter_type: IterType,
    pub parallel: Option<ParallelType>,
}

impl IterDomain {
    pub fn new(extent: impl Into<Expr>) -> Self {
        Self { extent: extent.into(), expanded_extent: None, iter_type: IterType::Iteration, parallel: None }
    }

    pub fn reduction(extent: impl Into<Expr>) -> Self {
        Self { iter_type: IterType::Reduction, ..Self::new(extent) }
    }

    pub fn broadcast() -> Self {
        Self { iter_type: IterType::Broadcast, ..Self::new(1) }
    }

    pub fn expanded(extent: impl Into<Expr>) -> Self {
        Self { expanded_extent: Some(extent.into()), ..Self::broadcast() }
    }

    pub fn device(extent: impl Into<Expr>) -> Self {
        Self { iter_type: IterType::DeviceDim, ..Self::new(extent) }
    }

    pub fn stride(extent: impl Into<Expr>) -> Self {
        Self { iter_type: IterType::Stride, ..Self::new(extent) }
    }

    pub fn parallelize(mut self, ptype: ParallelType) -> Self {
        self.parallel = Some(ptype);
        self
    }

    pub fn is_reduction(&self) -> bool {
        self.iter_type == IterType::Reduction
    }

    pub fn is_broadcast(&self) -> bool {
        self.iter_type == IterType::Broadcast
    }

    pub fn is_stride(&self) -> bool {
        self.iter_type == IterType::Stride
    }

    pub fn is_device_dim(&self) -> bool {
        self.iter_type == IterType::DeviceDim
    }

    pub fn has_expanded_extent(&self) -> bool {
        self.expanded_extent.is_some()
    }

    pub fn maybe_expanded_extent(&self) -> &Expr {
        self.expanded_extent.as_ref().unwrap_or(&self.extent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// `input` becomes `[outer, inner]` with `inner` of extent `factor`.
    Split { input: IterId, outer: IterId, inner: IterId, factor: Expr },
    /// `[outer, inner]` becomes `output`.
    Merge { outer: IterId, inner: IterId, output: IterId },
}

impl Transform {
    pub fn inputs(&self) -> SmallVec<[IterId; 2]> {
        match self {
            Self::Split { input, .. } => smallvec![*input],
            Self::Merge { outer, inner, .. } => smallvec![*outer, *inner],
        }
    }

    pub fn outputs(&self) -> SmallVec<[IterId; 2]> {
        match self {
            Self::Split { outer, inner, .. } => smallvec![*outer, *inner],
            Self::Merge { output, .. } => smallvec![*output],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDomain {
    ids: Vec<IterDomain>,
    logical: Vec<IterId>,
    allocation: Option<Vec<IterId>>,
    transforms: Vec<Transform>,
}

impl TensorDomain {
    /// Domain whose logical order is `ids` in the given order.
    pub fn new(ids: impl IntoIterator<Item = IterDomain>) -> Self {
        let ids: Vec<_> = ids.into_iter().collect();
        let logical = (0..ids.len() as u32).map(IterId).collect();
        Self { ids, logical, allocation: None, transforms: Vec::new() }
    }

    /// Plain iteration domain over the given extents.
    pub fn from_extents<E: Into<Expr>>(extents: impl IntoIterator<Item = E>) -> Self {
        Self::new(extents.into_iter().map(IterDomain::new))
    }

    /// Rank-`rank` domain whose extents are the symbols `{name}.size[i]`.
    pub fn symbolic(name: &str, rank: usize) -> Self {
        Self::from_extents((0..rank).map(|dim| Expr::symbol(format!("{name}.size[{dim}]"))))
    }

    pub fn id(&self, id: IterId) -> &IterDomain {
        &self.ids[id.index()]
    }

    pub fn logical(&self) -> &[IterId] {
        &self.logical
    }

    pub fn allocation(&self) -> Option<&[IterId]> {
        self.allocation.as_deref()
    }

    pub fn has_allocation(&self) -> bool {
        self.allocation.is_some()
    }

    /// Allocation order when one is set, logical order otherwise.
    pub fn maybe_allocation(&self) -> &[IterId] {
        self.allocation.as_deref().unwrap_or(&self.logical)
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn set_allocation(&mut self, ids: Vec<IterId>) {
        self.allocation = Some(ids);
    }

    /// `ids` without reduction dimensions.
    pub fn no_reductions<'a>(&'a self, ids: &'a [IterId]) -> impl Iterator<Item = IterId> + 'a {
        ids.iter().copied().filter(|id| !self.id(*id).is_reduction())
    }

    /// Logical rank without reductions, which is the rank of the runtime tensor.
    pub fn rank(&self) -> usize {
        self.no_reductions(&self.logical).count()
    }

    fn push(&mut self, id: IterDomain) -> IterId {
        self.ids.push(id);
        IterId(self.ids.len() as u32 - 1)
    }

    pub fn split(&mut self, input: IterId, factor: impl Into<Expr>) -> (IterId, IterId) {
        let factor = factor.into();
        let source = self.id(input).clone();
        let outer = self.push(IterDomain {
            extent: source.extent.clone().ceil_div(factor.clone()),
            expanded_extent: None,
            ..source.clone()
        });
        let inner = self.push(IterDomain { extent: factor.clone(), expanded_extent: None, ..source });
        self.transforms.push(Transform::Split { input, outer, inner, factor });
        (outer, inner)
    }

    pub fn merge(&mut self, outer: IterId, inner: IterId) -> IterId {
        let (lhs, rhs) = (self.id(outer).clone(), self.id(inner).clone());
        let iter_type = match (lhs.iter_type, rhs.iter_type) {
            (IterType::Broadcast, IterType::Broadcast) => IterType::Broadcast,
            (IterType::Reduction, _) | (_, IterType::Reduction) => IterType::Reduction,
            (IterType::Broadcast, other) | (other, IterType::Broadcast) => other,
            (other, _) => other,
        };
        let expanded_extent = (lhs.has_expanded_extent() || rhs.has_expanded_extent())
            .then(|| lhs.maybe_expanded_extent().clone() * rhs.maybe_expanded_extent().clone());
        let output =
            self.push(IterDomain { extent: lhs.extent * rhs.extent, expanded_extent, iter_type, parallel: None });
        self.transforms.push(Transform::Merge { outer, inner, output });
        output
    }

    /// Transforms on some path from `from` to `to`, in topological order.
    pub fn exprs_between(&self, from: &[IterId], to: &[IterId]) -> Vec<&Transform> {
        let mut reached: HashSet<IterId> = from.iter().copied().collect();
        let mut forward = Vec::new();
        for transform in &self.transforms {
            if transform.inputs().iter().all(|id| reached.contains(id)) {
                reached.extend(transform.outputs());
                forward.push(transform);
            }
        }

        let mut needed: HashSet<IterId> = to.iter().copied().collect();
        let mut between = Vec::new();
        for transform in forward.into_iter().rev() {
            if transform.outputs().iter().any(|id| needed.contains(id)) {
                needed.extend(transform.inputs());
                between.push(transform);
            }
        }
        between.reverse();
        between
    }
}
