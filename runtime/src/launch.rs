//! Launch geometry and shared memory sizing.

use kfuse_dtype::IndexType;
use kfuse_ir::{Allocation, KernelSummary, LoweredKernel, MemoryType};
use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::evaluator::RuntimeEvaluator;
use crate::launch_params::LaunchParams;

const SMEM_ALIGNMENT: i64 = 16;

fn align_up(bytes: i64, alignment: i64) -> i64 {
    (bytes + alignment - 1) & !(alignment - 1)
}

/// Bytes spanned by `buffers` placed after `offset` bytes of workspace.
///
/// The region after the workspace starts 16-byte aligned. Buffers with an address are placed
/// there, the rest are stacked in declaration order, each 16-byte aligned. Aliasing buffers
/// take no space.
pub fn compute_shared_memory<'a>(
    kernel: &LoweredKernel,
    evaluator: &RuntimeEvaluator,
    buffers: impl IntoIterator<Item = &'a Allocation>,
    index_type: IndexType,
    offset: i64,
) -> Result<i64> {
    let mut total = offset;
    let base = align_up(offset, SMEM_ALIGNMENT);
    let mut next = base;

    for alloc in buffers.into_iter().filter(|alloc| alloc.alias.is_none()) {
        let tv = kernel.tensor(alloc.buffer);
        let size = alloc.size();
        let elements = evaluator
            .evaluate(&size)
            .context(UnresolvedExtentSnafu { tensor: tv.name.clone(), extent: size.to_string() })?;

        let first_byte = match &alloc.address {
            Some(address) => {
                base + evaluator
                    .evaluate(address)
                    .context(UnresolvedExtentSnafu { tensor: tv.name.clone(), extent: address.to_string() })?
            }
            None => next,
        };
        let last_byte = first_byte + elements * tv.dtype.size_with(index_type) as i64;
        total = total.max(last_byte);
        next = next.max(align_up(last_byte, SMEM_ALIGNMENT));
    }
    Ok(total)
}

/// Scratch shared memory used by block and grid reductions and broadcasts.
pub fn reduction_workspace(summary: &KernelSummary, params: &LaunchParams, index_type: IndexType) -> Result<i64> {
    let has_workspace = summary.has_block_or_grid_sync();
    let Some(dtype) = summary.largest_smem_dtype.filter(|_| has_workspace) else {
        return Ok(0);
    };

    let welford_factor = if summary.has_welford() { 3 } else { 1 };
    ensure!(
        !(summary.has_iter_grouped_reductions && welford_factor == 3),
        UnsupportedKernelSnafu { reason: "welford and iteration-grouped reductions cannot be mixed" }
    );

    let mut workspace = dtype.size_with(index_type) as i64
        * summary.num_grouped_iterations
        * welford_factor
        * params.n_threads();
    if let Some(welford_smem) = summary.outer_grouped_grid_welford_smem {
        workspace = workspace.max(welford_smem);
    }
    Ok(workspace)
}

/// Resolves every launch extent and the dynamic shared memory size.
///
/// Extents pinned by `constraints` win. When the kernel could infer a pinned extent itself and
/// disagrees, a warning is logged once per `warned` flag and the constraint is still used.
/// Every launch extent is bound into `evaluator`, so later shape evaluation sees the final values.
pub fn compute_launch_params(
    kernel: &LoweredKernel,
    constraints: &LaunchParams,
    evaluator: &mut RuntimeEvaluator,
    index_type: IndexType,
    warned: &mut bool,
) -> Result<LaunchParams> {
    let mut params = LaunchParams::new();

    for dim in kernel.parallel_dimensions() {
        let Some(value) = constraints.get(dim.ptype) else {
            continue;
        };
        for binding in &dim.bindings {
            if let Some(inferred) = evaluator.evaluate(binding)
                && inferred != value
                && !*warned
            {
                *warned = true;
                tracing::warn!(
                    launch.ptype = %dim.ptype,
                    launch.inferred = inferred,
                    launch.constraint = value,
                    "launch constraint differs from the inferred extent, mixed broadcast axes may be parallelized"
                );
            }
        }
        if !params.has_dim(dim.ptype) {
            params.bind(dim.ptype, value);
            evaluator.bind_parallel(dim.ptype, value);
        }
    }

    for dim in kernel.parallel_dimensions().iter() {
        if params.has_dim(dim.ptype) {
            continue;
        }
        let value = evaluator
            .evaluate(&dim.extent)
            .context(UnresolvedLaunchExtentSnafu { ptype: dim.ptype, extent: dim.extent.to_string() })?;
        if value > 0 {
            evaluator.bind_parallel(dim.ptype, value);
            params.bind(dim.ptype, value);
        }
    }

    let workspace = reduction_workspace(kernel.summary(), &params, index_type)?;
    let smem = compute_shared_memory(
        kernel,
        evaluator,
        kernel.allocations_in(MemoryType::DynamicShared),
        index_type,
        workspace,
    )?;
    params.set_smem(smem);
    Ok(params)
}

/// Checks a dynamic shared memory size against the device limit and the size the kernel expects.
pub fn validate_dynamic_smem(
    static_smem: i64,
    dynamic_smem: i64,
    device_limit: i64,
    expected: Option<i64>,
) -> Result<()> {
    if let Some(expected) = expected {
        ensure!(expected == dynamic_smem, ExpectedSharedMemoryMismatchSnafu { expected, actual: dynamic_smem });
    }
    ensure!(
        static_smem + dynamic_smem <= device_limit,
        SharedMemoryLimitSnafu { static_smem, dynamic_smem, limit: device_limit }
    );
    Ok(())
}
