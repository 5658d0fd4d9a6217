//! Kernel compilation: index width selection, pre-compile checks and binary loading.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use kfuse_device::{Binary, CompileOptions, DeviceProperties, Driver, Function};
use kfuse_dtype::IndexType;
use kfuse_ir::{LoweredKernel, MemoryType, ScheduleHeuristic};
use snafu::ensure;

use crate::arguments::KernelArgumentHolder;
use crate::error::*;
use crate::evaluator::RuntimeEvaluator;
use crate::kernel_cache;
use crate::launch::compute_shared_memory;

/// Identity of one compiled fusion segment, stable across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KernelIdentity {
    pub heuristic: ScheduleHeuristic,
    pub fusion_id: i64,
    pub concrete_id: i64,
    pub runtime_id: i64,
    pub group_id: i64,
}

impl KernelIdentity {
    pub fn kernel_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for KernelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kernel_{}_f{}_c{}_r{}_g{}",
            self.heuristic, self.fusion_id, self.concrete_id, self.runtime_id, self.group_id
        )
    }
}

/// A loaded kernel together with the source and budgets it was built from.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub name: String,
    /// Structured source: preamble, typedefs and kernel.
    pub source: String,
    pub binary: Arc<Binary>,
    pub function: Function,
    pub index_type: IndexType,
    /// Threads per block the register budget was derived for.
    pub block_size: Option<i64>,
    pub max_register_count: Option<u32>,
}

/// Index width for a compilation.
///
/// An explicit request wins but must be wide enough for the arguments. Without one, the
/// narrowest width the arguments allow is used, or 64-bit when there are no arguments.
/// Kernels using bulk copies only address memory with 32-bit indices.
pub fn resolve_index_type(
    requested: Option<IndexType>,
    args: &KernelArgumentHolder,
    has_bulk_copy: bool,
) -> Result<IndexType> {
    let required = args.smallest_index_type();
    match requested {
        Some(requested) => {
            ensure!(
                !(requested == IndexType::Int32 && required == IndexType::Int64),
                IndexTypeConflictSnafu {
                    reason: "compilation with int32 is requested but int64 is required for the arguments"
                }
            );
            ensure!(
                !has_bulk_copy || requested == IndexType::Int32,
                IndexTypeConflictSnafu {
                    reason: "compilation with int64 is requested but bulk copies require int32"
                }
            );
            Ok(requested)
        }
        None if required == IndexType::Int64 => {
            ensure!(
                !has_bulk_copy,
                IndexTypeConflictSnafu {
                    reason: "the arguments require int64 indexing but bulk copies require int32"
                }
            );
            Ok(IndexType::Int64)
        }
        None if has_bulk_copy => Ok(IndexType::Int32),
        None if args.tensors().next().is_none() => Ok(IndexType::Int64),
        None => Ok(required),
    }
}

/// Checks that depend only on the kernel and the device: capability, static shared memory
/// and local memory.
pub fn validate_kernel(kernel: &LoweredKernel, properties: &DeviceProperties, index_type: IndexType) -> Result<()> {
    let summary = kernel.summary();
    ensure!(
        properties.compute_capability >= summary.min_device_version,
        DeviceCapabilitySnafu {
            required: summary.min_device_version,
            actual: properties.compute_capability,
            reason: summary.min_device_version_reason.clone(),
        }
    );

    let static_allocations: Vec<_> = kernel.allocations_in(MemoryType::StaticShared).collect();
    if !static_allocations.is_empty() {
        let required =
            compute_shared_memory(kernel, &RuntimeEvaluator::new(), static_allocations, index_type, 0)?;
        ensure!(
            required <= properties.max_static_shared_memory,
            StaticSharedMemorySnafu { required, limit: properties.max_static_shared_memory }
        );
    }

    let dynamic_local =
        kernel.dynamic_local_allocations().map(|alloc| kernel.tensor(alloc.buffer).name.as_str()).join(", ");
    ensure!(dynamic_local.is_empty(), DynamicLocalMemorySnafu { buffers: dynamic_local });
    Ok(())
}

/// Register budget per thread that lets a block of `block_size` threads fit on one multiprocessor.
pub fn max_registers_for(block_size: i64, properties: &DeviceProperties) -> u32 {
    const MAX_REGISTERS_PER_THREAD: i64 = 255;
    const REGISTER_GRANULARITY: i64 = 8;

    let warp = properties.warp_size.max(1);
    let threads = (block_size.max(1) + warp - 1) / warp * warp;
    let per_thread = properties.registers_per_block / threads / REGISTER_GRANULARITY * REGISTER_GRANULARITY;
    per_thread.clamp(REGISTER_GRANULARITY, MAX_REGISTERS_PER_THREAD) as u32
}

pub fn compile_options(properties: &DeviceProperties, max_register_count: Option<u32>) -> CompileOptions {
    CompileOptions { arch: properties.compute_capability, max_register_count, flags: Vec::new() }
}

/// Compiles `source`, reusing a binary from the global cache when the same source and options
/// were compiled before on this driver, and loads it.
pub fn compile_and_load(
    driver: &dyn Driver,
    source: &str,
    name: &str,
    options: &CompileOptions,
) -> Result<(Arc<Binary>, Function)> {
    let binary = kernel_cache::get_or_compile_binary(source, options, driver.name(), || {
        tracing::debug!(kernel.name = name, compile.options = %options, "compiling kernel");
        driver.compile(source, name, options)
    })?;

    let function = load_binary(driver, &binary, name)?;
    Ok((binary, function))
}

/// Loads a compiled binary after checking the device can run it.
pub fn load_binary(driver: &dyn Driver, binary: &Binary, name: &str) -> Result<Function> {
    let arch = binary.arch;
    let device = driver.properties().compute_capability;
    ensure!(
        arch <= device,
        DeviceCapabilitySnafu { required: arch, actual: device, reason: format!("binary of {name}") }
    );

    let function = driver.load(binary, name)?;
    tracing::debug!(kernel.name = name, kernel.function = %function, "kernel loaded");
    Ok(function)
}
