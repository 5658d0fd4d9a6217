//! The fusion executor.
//!
//! A [`FusionExecutor`] owns one compiled kernel variant. Compilation happens once; every
//! call then goes through the same steps:
//!
//! 1. bind the inputs and look up the [`ExecutorEntry`] for the caller's cache id
//! 2. on a miss, resolve launch parameters and buffer shapes and build a new entry
//! 3. recompile when the block size or register budget outgrew the compiled variant
//! 4. allocate outputs and intermediates, refresh the argument slots and launch
//!
//! Entries are keyed by an opaque shape signature chosen by the caller, so repeated calls
//! with same-shaped arguments only pay for allocation and argument refresh.
//!
//! # Example
//!
//! ```ignore
//! let mut executor = FusionExecutor::new(driver, ExecutorOptions::from_env());
//! executor.compile_fusion(kernel, &args, &LaunchParams::new(), CompileParams::default(), identity)?;
//! let outputs = executor.run_fusion(&args.with_cache_id(7), &LaunchParams::new(), CompileParams::default(), vec![])?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use kfuse_device::{Allocator, Buffer, Driver, Function, FunctionAttribute, ZeroedMemoryPool};
use kfuse_dtype::IndexType;
use kfuse_ir::LoweredKernel;
use snafu::{OptionExt, ensure};

use crate::allocation::{
    GlobalBufferInfo, IntermediateOptions, allocate_intermediate, allocate_outputs, intermediate_buffer_infos,
    output_buffer_infos,
};
use crate::arguments::KernelArgumentHolder;
use crate::codegen::{dump_source, external_source, kernel_code, structured_code};
use crate::compiler::{
    CompiledKernel, KernelIdentity, compile_and_load, compile_options, max_registers_for, resolve_index_type,
    validate_kernel,
};
use crate::config::{CompileParams, ExecutorOptions};
use crate::error::*;
use crate::evaluator::RuntimeEvaluator;
use crate::launch::{compute_launch_params, validate_dynamic_smem};
use crate::launch_params::LaunchParams;
use crate::marshal::ArgumentLayout;

/// Fusions compiled in this process. Selects external source files.
static FUSION_COUNT: AtomicI64 = AtomicI64::new(0);

pub fn global_fusion_count() -> i64 {
    FUSION_COUNT.load(Ordering::Relaxed)
}

/// Everything derived from one shape signature.
#[derive(Debug, Default)]
pub struct ExecutorEntry {
    pub launch_params: LaunchParams,
    pub outputs: Vec<GlobalBufferInfo>,
    pub intermediates: Vec<GlobalBufferInfo>,
    /// Built on the first launch with this entry, refreshed on every later one.
    pub args: ArgumentLayout,
}

/// Counters describing how much work the executor did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorStats {
    pub compilations: usize,
    pub recompilations: usize,
    pub entries_built: usize,
    pub layouts_built: usize,
    pub args_refreshed: usize,
    pub launches: usize,
}

#[derive(Debug)]
pub struct FusionExecutor {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) allocator: Arc<dyn Allocator>,
    pub(crate) options: ExecutorOptions,
    pub(crate) kernel: Option<Arc<LoweredKernel>>,
    pub(crate) identity: KernelIdentity,
    pub(crate) compiled: Option<CompiledKernel>,
    pub(crate) compile_params: CompileParams,
    pub(crate) device_smem_limit: i64,
    pub(crate) warp_size: i64,
    pub(crate) block_size_high_water_mark: i64,
    pub(crate) maxrregcount_high_water_mark: Option<u32>,
    available_dynamic_smem: Option<i64>,
    static_smem: Option<i64>,
    pub(crate) disable_parameter_cache: bool,
    pub(crate) entries: HashMap<u64, ExecutorEntry>,
    zeroed_pool: ZeroedMemoryPool,
    profile_buffer: Option<Buffer>,
    warned_launch_mismatch: bool,
    stats: ExecutorStats,
}

impl FusionExecutor {
    pub fn new(driver: Arc<dyn Driver>, options: ExecutorOptions) -> Self {
        let allocator = driver.allocator();
        let properties = driver.properties();
        Self {
            device_smem_limit: properties.max_shared_memory_per_block_optin,
            warp_size: properties.warp_size,
            zeroed_pool: ZeroedMemoryPool::new(Arc::clone(&allocator)),
            driver,
            allocator,
            options,
            kernel: None,
            identity: KernelIdentity::default(),
            compiled: None,
            compile_params: CompileParams::default(),
            block_size_high_water_mark: 1,
            maxrregcount_high_water_mark: None,
            available_dynamic_smem: None,
            static_smem: None,
            disable_parameter_cache: false,
            entries: HashMap::new(),
            profile_buffer: None,
            warned_launch_mismatch: false,
            stats: ExecutorStats::default(),
        }
    }

    // ========================================================================
    // COMPILATION
    // ========================================================================

    /// Generates, compiles and loads the kernel for `kernel`.
    ///
    /// `args` may be empty. When present, they pick the index width and let the launch
    /// parameters be resolved up front, which fixes the register budget of the first variant.
    pub fn compile_fusion(
        &mut self,
        kernel: Arc<LoweredKernel>,
        args: &KernelArgumentHolder,
        constraints: &LaunchParams,
        mut compile_params: CompileParams,
        identity: KernelIdentity,
    ) -> Result<()> {
        self.identity = identity;
        self.entries.clear();

        if kernel.is_expression_evaluated() {
            tracing::debug!(kernel.name = %identity, "every output is evaluated on the host, nothing to compile");
            self.compiled = None;
            self.kernel = Some(kernel);
            return Ok(());
        }

        let summary = kernel.summary();
        if summary.has_bulk_copy {
            compile_params.enable_magic_zero = false;
        }
        let index_type = resolve_index_type(compile_params.index_type, args, summary.has_bulk_copy)?;
        compile_params.index_type = Some(index_type);

        let properties = self.driver.properties().clone();
        self.device_smem_limit = properties.max_shared_memory_per_block_optin;
        self.warp_size = properties.warp_size;
        self.disable_parameter_cache = kernel.output_extents_depend_on_scalar_inputs();

        let fusion_count = FUSION_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        let name = identity.kernel_name();
        let source = match external_source(&self.options.external_sources, fusion_count)? {
            Some(code) => code,
            None => {
                let code = kernel_code(&kernel, &name);
                structured_code(&code, index_type, compile_params.enable_magic_zero)
            }
        };
        if let Some(dir) = &self.options.dump_source_dir {
            dump_source(dir, &name, &source)?;
        }

        validate_kernel(&kernel, &properties, index_type)?;

        let mut launch_params = None;
        if !args.is_empty() {
            let mut evaluator = RuntimeEvaluator::for_inputs(&kernel, args)?;
            let params = compute_launch_params(
                &kernel,
                constraints,
                &mut evaluator,
                index_type,
                &mut self.warned_launch_mismatch,
            )?;
            launch_params = Some(params);
        }
        let block_size = launch_params.map(|params| params.n_threads());
        if let Some(block_size) = block_size {
            self.block_size_high_water_mark = block_size;
        }
        self.maxrregcount_high_water_mark = compile_params.max_register_count;

        let derived_registers = block_size.map(|threads| max_registers_for(threads, &properties));
        let max_register_count = compile_params.max_register_count.or(derived_registers);
        let options = compile_options(&properties, max_register_count);
        let (binary, function) = compile_and_load(self.driver.as_ref(), &source, &name, &options)?;
        self.stats.compilations += 1;

        tracing::debug!(
            kernel.name = %name,
            kernel.index_type = %index_type,
            kernel.block_size = ?block_size,
            kernel.max_registers = ?max_register_count,
            kernel.magic_zero = compile_params.enable_magic_zero,
            fusion.count = fusion_count,
            "fusion compiled"
        );

        self.compiled =
            Some(CompiledKernel { name, source, binary, function, index_type, block_size, max_register_count });
        self.kernel = Some(kernel);
        self.compile_params = compile_params;
        self.reset_compiled_properties();

        if let Some(params) = launch_params {
            self.ensure_available_dynamic_smem(params.smem())?;
        }
        Ok(())
    }

    /// Recompiles the kept source when the block outgrew the compiled variant or the register
    /// budget changed.
    fn recompile_if_needed(
        &mut self,
        kernel: &LoweredKernel,
        params: &LaunchParams,
        compile_params: &CompileParams,
    ) -> Result<()> {
        let block_size = params.n_threads();
        if block_size <= self.block_size_high_water_mark
            && compile_params.max_register_count == self.maxrregcount_high_water_mark
        {
            return Ok(());
        }

        let compiled = self.compiled.clone().context(NotCompiledSnafu)?;
        let properties = self.driver.properties().clone();
        self.block_size_high_water_mark = block_size;
        self.maxrregcount_high_water_mark = compile_params.max_register_count;

        let max_register_count =
            compile_params.max_register_count.or_else(|| Some(max_registers_for(block_size, &properties)));
        let options = compile_options(&properties, max_register_count);
        let (binary, function) = compile_and_load(self.driver.as_ref(), &compiled.source, &compiled.name, &options)?;
        tracing::debug!(
            kernel.name = %compiled.name,
            kernel.block_size = block_size,
            kernel.max_registers = ?max_register_count,
            kernel.function = %function,
            "kernel recompiled"
        );

        self.compiled =
            Some(CompiledKernel { binary, function, block_size: Some(block_size), max_register_count, ..compiled });
        self.stats.compilations += 1;
        self.stats.recompilations += 1;
        self.reset_compiled_properties();

        if kernel.summary().has_cooperative_grid_reduction {
            // The occupancy query depends on the shared memory window, so it is raised first.
            self.ensure_available_dynamic_smem(params.smem())?;
            self.validate_cooperative_launch(function, params)?;
        }
        Ok(())
    }

    /// Compiles caller-provided source. Unstructured code is wrapped with the preamble first.
    pub fn compile_rtc(&mut self, code: &str, name: &str, structured: bool, index_type: IndexType) -> Result<()> {
        let source = if structured { code.to_string() } else { structured_code(code, index_type, true) };
        let options = compile_options(self.driver.properties(), None);
        let (binary, function) = compile_and_load(self.driver.as_ref(), &source, name, &options)?;
        self.stats.compilations += 1;

        self.compiled = Some(CompiledKernel {
            name: name.to_string(),
            source,
            binary,
            function,
            index_type,
            block_size: None,
            max_register_count: None,
        });
        self.reset_compiled_properties();
        Ok(())
    }

    /// Launches a kernel from [`compile_rtc`](Self::compile_rtc) over `args` and waits for it.
    pub fn run_rtc(&mut self, params: &LaunchParams, args: &[Buffer], index_type: IndexType) -> Result<Duration> {
        let function = self.compiled.as_ref().context(NotCompiledSnafu)?.function;
        let mut layout = ArgumentLayout::for_buffers(args, index_type);

        let start = Instant::now();
        // SAFETY: every slot describes a buffer in `args`, which outlives the synchronize below.
        unsafe { self.driver.launch(function, &params.to_config()?, layout.pointers_mut())? };
        self.driver.synchronize()?;
        self.stats.launches += 1;
        Ok(start.elapsed())
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// Runs the compiled fusion on `args`.
    ///
    /// `outputs` is either empty, in which case outputs are allocated, or holds one buffer per
    /// fusion output for the kernel to write into.
    pub fn run_fusion(
        &mut self,
        args: &KernelArgumentHolder,
        constraints: &LaunchParams,
        compile_params: CompileParams,
        outputs: Vec<Buffer>,
    ) -> Result<Vec<Buffer>> {
        let kernel = self.kernel.clone().context(NotCompiledSnafu)?;
        ensure!(
            outputs.is_empty() || outputs.len() == kernel.outputs().len(),
            OutputCountMismatchSnafu { expected: kernel.outputs().len(), actual: outputs.len() }
        );
        let ordinal = self.driver.properties().ordinal;
        ensure!(args.device_index() == ordinal, DeviceMismatchSnafu { expected: ordinal, actual: args.device_index() });
        tracing::debug!(
            kernel.name = %self.identity,
            run.input_bytes = bytes_processed(args.tensors()),
            "running fusion"
        );

        let mut evaluator = RuntimeEvaluator::for_inputs(&kernel, args)?;
        if kernel.is_expression_evaluated() {
            let outputs = evaluate_outputs(&kernel, &mut evaluator, outputs)?;
            let output_bytes = bytes_processed(&outputs);
            tracing::debug!(kernel.name = %self.identity, run.output_bytes = output_bytes, "fusion evaluated");
            return Ok(outputs);
        }

        let index_type = self.compiled.as_ref().context(NotCompiledSnafu)?.index_type;
        ensure!(args.cache_id().is_none() || outputs.is_empty(), CacheWithPreallocatedOutputsSnafu);
        if let Some(requested) = compile_params.index_type {
            ensure!(requested == index_type, IndexTypeMismatchSnafu { compiled: index_type, requested });
        }

        let cache_id = args.cache_id().filter(|_| !self.disable_parameter_cache);
        let mut entry = match cache_id.and_then(|id| self.entries.remove(&id)) {
            Some(entry) => {
                tracing::trace!(entry.cache_id = ?cache_id, "executor entry cache hit");
                entry
            }
            None => self.initialize_entry(&kernel, constraints, index_type, &outputs, &mut evaluator)?,
        };

        let result = self.execute_entry(&kernel, &mut entry, &mut evaluator, &compile_params, outputs);
        self.zeroed_pool.release_all();
        if let Some(cache_id) = cache_id {
            self.entries.insert(cache_id, entry);
        }

        let outputs = result?;
        tracing::debug!(kernel.name = %self.identity, run.output_bytes = bytes_processed(&outputs), "fusion finished");
        Ok(outputs)
    }

    /// Resolves launch parameters and buffer shapes for a new shape signature.
    fn initialize_entry(
        &mut self,
        kernel: &LoweredKernel,
        constraints: &LaunchParams,
        index_type: IndexType,
        outputs: &[Buffer],
        evaluator: &mut RuntimeEvaluator,
    ) -> Result<ExecutorEntry> {
        let launch_params =
            compute_launch_params(kernel, constraints, evaluator, index_type, &mut self.warned_launch_mismatch)?;
        let static_smem = self.static_smem_size()?;
        let expected_smem = kernel.expected_dynamic_smem();
        validate_dynamic_smem(static_smem, launch_params.smem(), self.device_smem_limit, expected_smem)?;
        run_validations(kernel, evaluator)?;

        let output_infos = if outputs.is_empty() {
            output_buffer_infos(kernel, evaluator, index_type)?
        } else {
            kernel
                .outputs()
                .iter()
                .zip(outputs)
                .map(|(id, buffer)| GlobalBufferInfo::from_buffer(*id, buffer))
                .collect()
        };
        let intermediates = intermediate_buffer_infos(kernel, evaluator, index_type, self.options.kernel_profile)?;

        self.stats.entries_built += 1;
        tracing::debug!(
            kernel.name = %self.identity,
            launch.params = %launch_params,
            entry.outputs = output_infos.len(),
            entry.intermediates = intermediates.len(),
            "executor entry built"
        );
        Ok(ExecutorEntry { launch_params, outputs: output_infos, intermediates, args: ArgumentLayout::default() })
    }

    fn execute_entry(
        &mut self,
        kernel: &LoweredKernel,
        entry: &mut ExecutorEntry,
        evaluator: &mut RuntimeEvaluator,
        compile_params: &CompileParams,
        outputs: Vec<Buffer>,
    ) -> Result<Vec<Buffer>> {
        for (ptype, value) in entry.launch_params.bound() {
            evaluator.bind_parallel(ptype, value);
        }
        self.recompile_if_needed(kernel, &entry.launch_params, compile_params)?;
        let compiled = self.compiled.as_ref().context(NotCompiledSnafu)?;
        let (function, index_type) = (compiled.function, compiled.index_type);

        let outputs = if outputs.is_empty() {
            allocate_outputs(kernel, &entry.outputs, &self.allocator, evaluator, self.options.fill_with_poison)?
        } else {
            for (id, buffer) in kernel.outputs().iter().zip(&outputs) {
                if !kernel.is_input(*id) {
                    evaluator.bind_tensor(*id, buffer.clone());
                }
            }
            outputs
        };

        let intermediate_options = IntermediateOptions {
            pool: &self.zeroed_pool,
            reuse_zeroed_memory: self.options.reuse_zeroed_memory,
            fill_with_poison: self.options.fill_with_poison,
        };
        let mut profile_buffer = None;
        for info in &entry.intermediates {
            let buffer = allocate_intermediate(info, &self.allocator, intermediate_options)?;
            if info.is_profile_buffer {
                profile_buffer = Some(buffer.clone());
            }
            evaluator.bind_tensor(info.tensor, buffer);
        }
        self.profile_buffer = profile_buffer;

        if entry.args.is_built() {
            entry.args.refresh(kernel, evaluator)?;
            self.stats.args_refreshed += 1;
        } else {
            entry.args = ArgumentLayout::compute(kernel, evaluator, index_type)?;
            self.stats.layouts_built += 1;
        }

        if !self.options.execute_kernel || kernel.is_empty() {
            return Ok(outputs);
        }

        let params = entry.launch_params;
        self.ensure_available_dynamic_smem(params.smem())?;
        if self.options.debug_occupancy && tracing::enabled!(tracing::Level::DEBUG) {
            self.log_occupancy(function, &params)?;
        }

        let config = params.to_config()?;
        let cooperative = kernel.summary().has_cooperative_grid_reduction;
        tracing::debug!(
            kernel.name = %self.identity,
            launch.params = %params,
            launch.cooperative = cooperative,
            "launching kernel"
        );
        if cooperative {
            self.validate_cooperative_launch(function, &params)?;
            // SAFETY: the slots describe buffers bound in `evaluator` or returned as outputs; device
            // frees of intermediates dropped after this call are ordered after the launch.
            unsafe { self.driver.launch_cooperative(function, &config, entry.args.pointers_mut())? };
        } else {
            // SAFETY: as above.
            unsafe { self.driver.launch(function, &config, entry.args.pointers_mut())? };
        }
        self.stats.launches += 1;
        Ok(outputs)
    }

    // ========================================================================
    // SHARED MEMORY AND OCCUPANCY
    // ========================================================================

    fn function(&self) -> Result<Function> {
        Ok(self.compiled.as_ref().context(NotCompiledSnafu)?.function)
    }

    fn reset_compiled_properties(&mut self) {
        self.available_dynamic_smem = None;
        self.static_smem = None;
    }

    /// Dynamic shared memory the loaded function may currently use.
    pub fn available_dynamic_smem(&mut self) -> Result<i64> {
        if let Some(bytes) = self.available_dynamic_smem {
            return Ok(bytes);
        }
        let bytes = self.driver.function_attribute(self.function()?, FunctionAttribute::MaxDynamicSharedMemory)?;
        self.available_dynamic_smem = Some(bytes);
        Ok(bytes)
    }

    pub fn static_smem_size(&mut self) -> Result<i64> {
        if let Some(bytes) = self.static_smem {
            return Ok(bytes);
        }
        let bytes = self.driver.function_attribute(self.function()?, FunctionAttribute::StaticSharedMemory)?;
        self.static_smem = Some(bytes);
        Ok(bytes)
    }

    /// Raises the function's dynamic shared memory window to `bytes` when it is smaller.
    /// The window is never lowered.
    pub fn ensure_available_dynamic_smem(&mut self, bytes: i64) -> Result<i64> {
        let available = self.available_dynamic_smem()?;
        if bytes <= available {
            return Ok(available);
        }

        let static_smem = self.static_smem_size()?;
        validate_dynamic_smem(static_smem, bytes, self.device_smem_limit, None)?;
        self.driver.set_max_dynamic_shared_memory(self.function()?, bytes)?;
        tracing::debug!(
            kernel.name = %self.identity,
            launch.smem = bytes,
            smem.previous = available,
            "raised dynamic shared memory"
        );
        self.available_dynamic_smem = Some(bytes);
        Ok(bytes)
    }

    /// Fails when the device cannot keep every block of the grid resident at once.
    pub fn validate_cooperative_launch(&self, function: Function, params: &LaunchParams) -> Result<()> {
        let per_sm = self.driver.max_active_blocks_per_multiprocessor(function, params.n_threads(), params.smem())?;
        let resident = per_sm * self.driver.properties().multiprocessor_count;
        let blocks = params.n_blocks();
        ensure!(blocks <= resident, CooperativeOccupancySnafu { blocks, resident });
        Ok(())
    }

    fn log_occupancy(&self, function: Function, params: &LaunchParams) -> Result<()> {
        let block_size = params.n_threads();
        let blocks_per_sm = self.driver.max_active_blocks_per_multiprocessor(function, block_size, params.smem())?;
        let warp = self.warp_size.max(1);
        let active_threads = blocks_per_sm * block_size;
        let warps_per_sm = active_threads / warp + i64::from(active_threads % warp > 0);
        let max_warps = self.driver.properties().max_threads_per_multiprocessor / warp;
        let occupancy = if max_warps > 0 { warps_per_sm as f64 * 100.0 / max_warps as f64 } else { 0.0 };
        tracing::debug!(
            kernel.name = %self.identity,
            occupancy.blocks_per_sm = blocks_per_sm,
            occupancy.warps_per_sm = warps_per_sm,
            occupancy.percent = %format!("{occupancy:.2}"),
            "occupancy"
        );
        Ok(())
    }

    // ========================================================================
    // HOST-ONLY QUERIES
    // ========================================================================

    /// Output shapes for `args` without compiling or launching anything.
    pub fn infer_output_sizes(&self, args: &KernelArgumentHolder) -> Result<Vec<GlobalBufferInfo>> {
        let kernel = self.kernel.as_ref().context(NotCompiledSnafu)?;
        let evaluator = RuntimeEvaluator::for_inputs(kernel, args)?;
        let index_type = self.index_type().unwrap_or_else(|| args.smallest_index_type());
        output_buffer_infos(kernel, &evaluator, index_type)
    }

    /// Allocates outputs for `args` the way a launch would, without launching.
    pub fn alloc_output_space(&self, args: &KernelArgumentHolder) -> Result<Vec<Buffer>> {
        let kernel = self.kernel.as_ref().context(NotCompiledSnafu)?;
        let mut evaluator = RuntimeEvaluator::for_inputs(kernel, args)?;
        let index_type = self.index_type().unwrap_or_else(|| args.smallest_index_type());
        let infos = output_buffer_infos(kernel, &evaluator, index_type)?;
        allocate_outputs(kernel, &infos, &self.allocator, &mut evaluator, self.options.fill_with_poison)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some() || self.kernel.as_ref().is_some_and(|kernel| kernel.is_expression_evaluated())
    }

    pub fn kernel(&self) -> Option<&Arc<LoweredKernel>> {
        self.kernel.as_ref()
    }

    pub fn compiled(&self) -> Option<&CompiledKernel> {
        self.compiled.as_ref()
    }

    pub fn index_type(&self) -> Option<IndexType> {
        self.compiled.as_ref().map(|compiled| compiled.index_type)
    }

    pub fn identity(&self) -> KernelIdentity {
        self.identity
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn compile_params(&self) -> &CompileParams {
        &self.compile_params
    }

    pub fn entry(&self, cache_id: u64) -> Option<&ExecutorEntry> {
        self.entries.get(&cache_id)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_parameter_cache_disabled(&self) -> bool {
        self.disable_parameter_cache
    }

    pub fn block_size_high_water_mark(&self) -> i64 {
        self.block_size_high_water_mark
    }

    pub fn maxrregcount_high_water_mark(&self) -> Option<u32> {
        self.maxrregcount_high_water_mark
    }

    pub fn zeroed_pool(&self) -> &ZeroedMemoryPool {
        &self.zeroed_pool
    }

    /// Profile scratch buffer of the last launch, when profiling is on.
    pub fn profile_buffer(&self) -> Option<&Buffer> {
        self.profile_buffer.as_ref()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats
    }

    /// Drops every cached entry. The compiled kernel is kept.
    pub fn clear_entries(&mut self) {
        self.entries.clear();
    }
}

fn run_validations(kernel: &LoweredKernel, evaluator: &RuntimeEvaluator) -> Result<()> {
    for validation in kernel.validations() {
        let holds = evaluator.evaluate(&validation.predicate).context(ValidationFailedSnafu {
            message: format!("{} (cannot evaluate {})", validation.message, validation.predicate),
        })?;
        ensure!(holds != 0, ValidationFailedSnafu { message: validation.message.clone() });
    }
    Ok(())
}

/// Outputs of a kernel evaluated entirely on the host. Provided outputs are returned as they are.
fn evaluate_outputs(
    kernel: &LoweredKernel,
    evaluator: &mut RuntimeEvaluator,
    outputs: Vec<Buffer>,
) -> Result<Vec<Buffer>> {
    if !outputs.is_empty() {
        return Ok(outputs);
    }
    kernel.outputs().iter().map(|id| evaluator.evaluate_tensor(kernel, *id)).collect()
}

fn bytes_processed<'a>(buffers: impl IntoIterator<Item = &'a Buffer>) -> usize {
    buffers.into_iter().map(Buffer::nbytes).sum()
}
