//! Sizing and allocating fusion outputs and global intermediates.

use std::sync::Arc;

use kfuse_device::{Allocator, Buffer, BufferOptions, Layout, ZeroedMemoryPool};
use kfuse_dtype::{DType, IndexType};
use kfuse_ir::{AliasInfo, AllocationType, Expr, IoRef, KernelValue, LoweredKernel, TensorId, TensorView};
use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::evaluator::RuntimeEvaluator;
use crate::replay::{allocated_ids, allocation_to_logical};

/// Everything needed to allocate one output or intermediate without re-evaluating its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalBufferInfo {
    pub tensor: TensorId,
    /// Logical sizes, expanded dimensions at full extent.
    pub sizes: Vec<i64>,
    /// Strides in logical order. Zero only on expanded dimensions.
    pub strides: Vec<i64>,
    pub dtype: DType,
    pub zero_init: bool,
    pub resets_to_zero: bool,
    pub is_profile_buffer: bool,
}

impl GlobalBufferInfo {
    fn new(tensor: TensorId, (sizes, strides): (Vec<i64>, Vec<i64>), dtype: DType) -> Self {
        Self { tensor, sizes, strides, dtype, zero_init: false, resets_to_zero: false, is_profile_buffer: false }
    }

    /// Describes an existing buffer, used when callers hand in their own outputs.
    pub fn from_buffer(tensor: TensorId, buffer: &Buffer) -> Self {
        Self::new(tensor, (buffer.sizes().to_vec(), buffer.strides().to_vec()), buffer.dtype())
    }

    fn has_expansion(&self) -> bool {
        self.strides.contains(&0)
    }

    /// Sizes of the memory actually backing the buffer: expanded dimensions hold one element.
    pub fn unexpanded_sizes(&self) -> Vec<i64> {
        self.sizes.iter().zip(&self.strides).map(|(size, stride)| if *stride == 0 { 1 } else { *size }).collect()
    }
}

// ============================================================================
// SHAPE INFERENCE
// ============================================================================

/// Strides of a planned buffer: row-major, with stride 0 for expanded dimensions and stride 1 for
/// zero-sized ones. Neither contributes to the running stride. See
/// [`kfuse_device::contiguous_strides`] for plain layouts.
pub fn planned_strides(sizes: &[i64], expand_flags: &[bool]) -> Vec<i64> {
    let mut strides = vec![0; sizes.len()];
    let mut running = 1i64;
    for dim in (0..sizes.len()).rev() {
        strides[dim] = if expand_flags[dim] {
            0
        } else if sizes[dim] == 0 {
            1
        } else {
            let stride = running;
            running *= sizes[dim];
            stride
        };
    }
    strides
}

fn infer_shape(
    tv: &TensorView,
    extents: &[Expr],
    expand_flags: &[bool],
    evaluator: &RuntimeEvaluator,
) -> Result<(Vec<i64>, Vec<i64>)> {
    let sizes = extents
        .iter()
        .map(|extent| {
            evaluator
                .evaluate(extent)
                .context(UnresolvedExtentSnafu { tensor: tv.name.clone(), extent: extent.to_string() })
        })
        .collect::<Result<Vec<_>>>()?;
    let strides = planned_strides(&sizes, expand_flags);
    Ok((sizes, strides))
}

/// Sizes and strides of a tensor allocated along its allocation domain, in logical order.
pub fn infer_shape_of_output(tv: &TensorView, evaluator: &RuntimeEvaluator) -> Result<(Vec<i64>, Vec<i64>)> {
    let domain = &tv.domain;
    let (extents, expand_flags): (Vec<Expr>, Vec<bool>) = allocated_ids(domain)
        .into_iter()
        .map(|id| {
            let id = domain.id(id);
            let extent = if id.is_device_dim() { Expr::Const(1) } else { id.maybe_expanded_extent().clone() };
            (extent, id.has_expanded_extent())
        })
        .unzip();

    let (sizes, strides) = infer_shape(tv, &extents, &expand_flags, evaluator)?;
    if !domain.has_allocation() {
        return Ok((sizes, strides));
    }
    let layout = allocation_to_logical(tv, Layout::new(&sizes, &strides), evaluator)?;
    Ok((layout.sizes.to_vec(), layout.strides.to_vec()))
}

pub fn output_buffer_infos(
    kernel: &LoweredKernel,
    evaluator: &RuntimeEvaluator,
    index_type: IndexType,
) -> Result<Vec<GlobalBufferInfo>> {
    kernel
        .outputs()
        .iter()
        .map(|output| {
            let tv = kernel.tensor(*output);
            let shape = infer_shape_of_output(tv, evaluator)?;
            Ok(GlobalBufferInfo::new(*output, shape, tv.dtype.resolve_index(index_type)))
        })
        .collect()
}

/// Infos for global allocations that are neither inputs nor outputs, in kernel parameter order.
pub fn intermediate_buffer_infos(
    kernel: &LoweredKernel,
    evaluator: &RuntimeEvaluator,
    index_type: IndexType,
    kernel_profile: bool,
) -> Result<Vec<GlobalBufferInfo>> {
    kernel
        .intermediate_allocations()
        .map(|alloc| {
            let tv = kernel.tensor(alloc.buffer);
            let domain = &tv.domain;
            let has_expanded = domain.maybe_allocation().iter().any(|id| domain.id(*id).has_expanded_extent());
            // Halo-padded allocations are only described by the allocation shape.
            let shape = if has_expanded {
                infer_shape_of_output(tv, evaluator)?
            } else {
                infer_shape(tv, &alloc.shape, &vec![false; alloc.shape.len()], evaluator)?
            };

            let mut info = GlobalBufferInfo::new(alloc.buffer, shape, tv.dtype.resolve_index(index_type));
            info.zero_init = alloc.zero_init;
            info.resets_to_zero = alloc.resets_to_zero;
            info.is_profile_buffer = kernel_profile && kernel.summary().profile_buffer == Some(alloc.buffer);
            Ok(info)
        })
        .collect()
}

// ============================================================================
// ALLOCATION
// ============================================================================

fn aliased_tensor(
    kernel: &LoweredKernel,
    evaluator: &RuntimeEvaluator,
    output: usize,
    io: IoRef,
) -> Result<Buffer> {
    let id = match io {
        IoRef::Input(index) => match kernel.inputs().get(index) {
            Some(KernelValue::Tensor(id)) => *id,
            _ => return AliasViolationSnafu { output, reason: format!("input {index} is not a tensor") }.fail(),
        },
        IoRef::Output(index) => kernel.outputs()[index],
    };
    evaluator
        .tensor(id)
        .cloned()
        .context(AliasViolationSnafu { output, reason: format!("{} is not available yet", kernel.tensor(id).name) })
}

fn allocate_output(
    kernel: &LoweredKernel,
    output: usize,
    info: &GlobalBufferInfo,
    alias: AliasInfo,
    allocator: &Arc<dyn Allocator>,
    evaluator: &mut RuntimeEvaluator,
    fill_with_poison: bool,
) -> Result<Buffer> {
    // Duplicated outputs, and outputs that are inputs.
    if let Some(known) = evaluator.tensor(info.tensor) {
        return Ok(known.clone());
    }

    let aliased = alias.aliased_io.map(|io| aliased_tensor(kernel, evaluator, output, io)).transpose()?;
    match alias.kind {
        AllocationType::New => {
            let buffer =
                Buffer::empty_strided(allocator, info.dtype, &info.sizes, &info.strides, BufferOptions::default())?;
            if fill_with_poison {
                buffer.fill_poison()?;
            }
            Ok(buffer)
        }
        // The aliased buffer may hold state the kernel updates in place, so it is passed through
        // untouched instead of being evaluated.
        AllocationType::ReuseBuffer => {
            aliased.context(AliasViolationSnafu { output, reason: "reused buffer has no aliased input or output" })
        }
        AllocationType::Evaluate => {
            let buffer = evaluator.evaluate_tensor(kernel, info.tensor)?;
            if let Some(aliased) = aliased {
                ensure!(
                    buffer.is_alias_of(&aliased),
                    AliasViolationSnafu { output, reason: "evaluated output does not share storage with its alias" }
                );
                ensure!(
                    buffer.sizes() == info.sizes.as_slice(),
                    AliasViolationSnafu {
                        output,
                        reason: format!("evaluated sizes {:?} differ from {:?}", buffer.sizes(), info.sizes),
                    }
                );
            }
            Ok(buffer)
        }
    }
}

/// Allocates or resolves every fusion output.
///
/// Outputs are processed `New` first, so reused and evaluated outputs can refer to other outputs.
/// Each result is bound into `evaluator` before the next one is processed.
pub fn allocate_outputs(
    kernel: &LoweredKernel,
    infos: &[GlobalBufferInfo],
    allocator: &Arc<dyn Allocator>,
    evaluator: &mut RuntimeEvaluator,
    fill_with_poison: bool,
) -> Result<Vec<Buffer>> {
    ensure!(
        infos.len() == kernel.outputs().len(),
        OutputCountMismatchSnafu { expected: kernel.outputs().len(), actual: infos.len() }
    );

    let mut order: Vec<usize> = (0..infos.len()).collect();
    order.sort_by_key(|index| kernel.output_alias(*index).kind != AllocationType::New);

    let mut outputs: Vec<Option<Buffer>> = vec![None; infos.len()];
    for index in order {
        let info = &infos[index];
        let buffer = allocate_output(
            kernel,
            index,
            info,
            kernel.output_alias(index),
            allocator,
            evaluator,
            fill_with_poison,
        )?;
        evaluator.bind_tensor(info.tensor, buffer.clone());
        outputs[index] = Some(buffer);
    }
    Ok(outputs.into_iter().flatten().collect())
}

/// Where zero-initialized intermediates come from.
#[derive(Debug, Clone, Copy)]
pub struct IntermediateOptions<'a> {
    pub pool: &'a ZeroedMemoryPool,
    /// Serve every zero-initialized buffer from the pool, even ones the kernel does not reset.
    pub reuse_zeroed_memory: bool,
    pub fill_with_poison: bool,
}

/// Allocates one intermediate. Expanded buffers are allocated unexpanded, then expanded.
pub fn allocate_intermediate(
    info: &GlobalBufferInfo,
    allocator: &Arc<dyn Allocator>,
    options: IntermediateOptions<'_>,
) -> Result<Buffer> {
    let sizes = info.unexpanded_sizes();
    let buffer = if info.zero_init {
        if options.reuse_zeroed_memory || info.resets_to_zero {
            tracing::trace!(buffer.tensor = info.tensor.0, "zeroed intermediate from pool");
            options.pool.acquire(info.dtype, &sizes)?
        } else {
            Buffer::zeros(allocator, info.dtype, &sizes)?
        }
    } else {
        let buffer = Buffer::empty(allocator, info.dtype, &sizes)?;
        if options.fill_with_poison {
            buffer.fill_poison()?;
        }
        buffer
    };

    if info.has_expansion() { Ok(buffer.expand(&info.sizes)?) } else { Ok(buffer) }
}
