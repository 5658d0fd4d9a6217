//! Sizes and strides of a strided view, in elements.
//!
//! View operations never touch memory; they fail when the result cannot alias the
//! original storage.

use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;

pub type Dims = SmallVec<[i64; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Layout {
    pub sizes: Dims,
    pub strides: Dims,
}

/// Row-major strides for `sizes`. Zero-sized dimensions count as extent 1 in the running product,
/// so `[0, 3]` gets `[3, 1]`.
pub fn contiguous_strides(sizes: &[i64]) -> Dims {
    let mut strides: Dims = SmallVec::from_elem(1, sizes.len());
    let mut running = 1i64;
    for (dim, size) in sizes.iter().enumerate().rev() {
        strides[dim] = running;
        running *= (*size).max(1);
    }
    strides
}

impl Layout {
    pub fn new(sizes: &[i64], strides: &[i64]) -> Self {
        Self { sizes: SmallVec::from_slice(sizes), strides: SmallVec::from_slice(strides) }
    }

    pub fn contiguous(sizes: &[i64]) -> Self {
        Self { sizes: SmallVec::from_slice(sizes), strides: contiguous_strides(sizes) }
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn numel(&self) -> i64 {
        self.sizes.iter().product()
    }

    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1i64;
        for (size, stride) in self.sizes.iter().zip(&self.strides).rev() {
            if *size != 1 && *stride != expected {
                return false;
            }
            expected *= size;
        }
        true
    }

    /// Largest element offset this layout can address, `-1` when empty.
    pub fn max_offset(&self) -> i64 {
        if self.sizes.contains(&0) {
            return -1;
        }
        self.sizes.iter().zip(&self.strides).map(|(size, stride)| (size - 1) * stride.abs()).sum()
    }

    /// Elements of storage needed to back this layout.
    pub fn storage_extent(&self) -> i64 {
        self.max_offset() + 1
    }

    pub fn permute(&self, dims: &[usize]) -> Result<Self> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        let valid =
            dims.len() == rank && dims.iter().all(|dim| *dim < rank && !std::mem::replace(&mut seen[*dim], true));
        ensure!(valid, InvalidPermutationSnafu { dims: dims.to_vec(), rank });

        Ok(Self {
            sizes: dims.iter().map(|dim| self.sizes[*dim]).collect(),
            strides: dims.iter().map(|dim| self.strides[*dim]).collect(),
        })
    }

    /// Broadcasts size-1 dimensions to `sizes` with stride 0.
    pub fn expand(&self, sizes: &[i64]) -> Result<Self> {
        ensure!(
            sizes.len() == self.rank(),
            IncompatibleViewSnafu { sizes: self.sizes.to_vec(), strides: self.strides.to_vec(), target: sizes.to_vec() }
        );
        let mut strides = self.strides.clone();
        for (dim, (&size, &target)) in self.sizes.iter().zip(sizes).enumerate() {
            if size == target {
                continue;
            }
            ensure!(size == 1, InvalidExpandSnafu { dim, size, target });
            strides[dim] = 0;
        }
        Ok(Self { sizes: SmallVec::from_slice(sizes), strides })
    }

    /// Views dimension `dim` as `[size / factor, factor]`.
    pub fn split(&self, dim: usize, factor: i64) -> Result<Self> {
        let size = self.sizes[dim];
        let outer = if factor == 0 { 0 } else { size / factor };
        let mut target = self.sizes.clone();
        target[dim] = outer;
        target.insert(dim + 1, factor);
        ensure!(
            factor > 0 && outer * factor == size,
            IncompatibleViewSnafu {
                sizes: self.sizes.to_vec(),
                strides: self.strides.to_vec(),
                target: target.to_vec(),
            }
        );

        let mut strides = self.strides.clone();
        strides[dim] = self.strides[dim] * factor;
        strides.insert(dim + 1, self.strides[dim]);
        Ok(Self { sizes: target, strides })
    }

    /// Views adjacent dimensions `dim` and `dim + 1` as one.
    pub fn merge(&self, dim: usize) -> Result<Self> {
        let mut target = self.sizes.clone();
        let inner = target.remove(dim + 1);
        target[dim] *= inner;
        self.view(&target)
    }

    /// Reshapes without copying, following the usual stride-chunk rules.
    pub fn view(&self, target: &[i64]) -> Result<Self> {
        match view_strides(&self.sizes, &self.strides, target) {
            Some(strides) => Ok(Self { sizes: SmallVec::from_slice(target), strides }),
            None => IncompatibleViewSnafu {
                sizes: self.sizes.to_vec(),
                strides: self.strides.to_vec(),
                target: target.to_vec(),
            }
            .fail(),
        }
    }
}

fn view_strides(sizes: &[i64], strides: &[i64], target: &[i64]) -> Option<Dims> {
    let numel: i64 = sizes.iter().product();
    if numel != target.iter().product::<i64>() {
        return None;
    }
    if numel == 0 {
        return Some(if sizes == target { SmallVec::from_slice(strides) } else { contiguous_strides(target) });
    }
    if sizes.is_empty() {
        return view_strides(&[1], &[1], target);
    }

    let mut new_strides: Dims = SmallVec::from_elem(0, target.len());
    let mut view_dim = target.len() as isize - 1;
    let mut chunk_base_stride = *strides.last()?;
    let mut tensor_numel = 1i64;
    let mut view_numel = 1i64;
    for dim in (0..sizes.len()).rev() {
        tensor_numel *= sizes[dim];
        let chunk_ends = dim == 0 || (sizes[dim - 1] != 1 && strides[dim - 1] != tensor_numel * chunk_base_stride);
        if !chunk_ends {
            continue;
        }
        while view_dim >= 0 && (view_numel < tensor_numel || target[view_dim as usize] == 1) {
            new_strides[view_dim as usize] = view_numel * chunk_base_stride;
            view_numel *= target[view_dim as usize];
            view_dim -= 1;
        }
        if view_numel != tensor_numel {
            return None;
        }
        if dim > 0 {
            chunk_base_stride = strides[dim - 1];
            tensor_numel = 1;
            view_numel = 1;
        }
    }
    (view_dim == -1).then_some(new_strides)
}
