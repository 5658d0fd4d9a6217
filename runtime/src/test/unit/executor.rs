use std::sync::Arc;

use kfuse_device::{DeviceProperties, SimDriver};
use kfuse_dtype::IndexType;
use kfuse_ir::{
    AliasInfo, Allocation, DType, Expr, IoRef, KernelBuilder, KernelSummary, MemoryType, ParallelType, TensorDomain,
    ViewOp,
};
use test_case::test_case;

use crate::test::fixtures::*;
use crate::*;

// ============================================================================
// ALLOCATION AND LAUNCH
// ============================================================================

#[test]
fn outputs_are_allocated_contiguous() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("contiguous"), &args);

    let outputs = run(&mut executor, &args).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].sizes(), &[4, 8]);
    assert_eq!(outputs[0].strides(), &[8, 1]);
    assert!(!outputs[0].is_alias_of(&input));

    let launches = driver.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].name, "kernel_point_wise_f1_c0_r0_g0");
    assert_eq!(launches[0].config.grid, [4, 1, 1]);
    assert_eq!(launches[0].config.block, [8, 1, 1]);
    assert_eq!(launches[0].params.len(), 2);
    assert!(!launches[0].cooperative);
}

#[test_case(&[0, 8] ; "empty outer dimension")]
#[test_case(&[4, 0] ; "empty inner dimension")]
fn zero_sized_dimensions_get_unit_strides(sizes: &[i64]) {
    let driver = sim_driver();
    let input = f32_buffer(sizes);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("zero extent"), &args);

    let outputs = run(&mut executor, &args).unwrap();
    assert_eq!(outputs[0].sizes(), sizes);
    assert_eq!(outputs[0].strides(), &[1, 1]);
}

#[test]
fn fresh_outputs_never_alias() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("fresh outputs");
    let t2 = kb.tensor("T2", DType::Float32, TensorDomain::symbolic("T0", 2));
    kb.output(t1);
    kb.output(t2);
    let input = f32_buffer(&[2, 4]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, Arc::new(kb.build().unwrap()), &args);

    let outputs = run(&mut executor, &args).unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(!outputs[0].is_alias_of(&outputs[1]));
    assert!(outputs.iter().all(|output| !output.is_alias_of(&input)));
    assert_eq!(driver.launches()[0].params.len(), 3);
}

#[test]
fn reused_buffers_are_the_aliased_input() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("reuse");
    kb.aliased_output(t1, AliasInfo::reuse(IoRef::Input(0)));
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, Arc::new(kb.build().unwrap()), &args);

    let outputs = run(&mut executor, &args).unwrap();
    assert!(outputs[0].is_alias_of(&input));
    assert_eq!(outputs[0].device_ptr(), input.device_ptr());
    assert_eq!(outputs[0].storage_id(), input.storage_id());
}

#[test]
fn provided_outputs_are_written_in_place() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("provided"), &args);

    let target = f32_buffer(&[4, 8]);
    let outputs = executor.run_fusion(&args, &LaunchParams::new(), CompileParams::default(), vec![target.clone()]);
    let outputs = outputs.unwrap();
    assert!(outputs[0].is_alias_of(&target));
    assert_eq!(executor.stats().launches, 1);
}

#[test]
fn provided_outputs_cannot_be_cached() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let mut executor = compiled(&driver, pointwise_kernel("provided cached"), &args(&[&input]));

    let cached = args(&[&input]).with_cache_id(1);
    let err = executor.run_fusion(&cached, &LaunchParams::new(), CompileParams::default(), vec![input]).unwrap_err();
    assert!(matches!(err, Error::CacheWithPreallocatedOutputs));
}

#[test]
fn provided_output_count_must_match() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("output count"), &args);

    let outputs = vec![f32_buffer(&[4, 8]), f32_buffer(&[4, 8])];
    let err = executor.run_fusion(&args, &LaunchParams::new(), CompileParams::default(), outputs).unwrap_err();
    let Error::OutputCountMismatch { expected, actual } = err else { panic!("unexpected error: {err}") };
    assert_eq!((expected, actual), (1, 2));
}

#[test]
fn arguments_must_live_on_the_executor_device() {
    let input = f32_buffer(&[4, 8]);
    let mut executor = compiled(&sim_driver(), pointwise_kernel("device index"), &args(&[&input]));
    let err = run(&mut executor, &args(&[&input]).with_device_index(1)).unwrap_err();
    let Error::DeviceMismatch { expected, actual } = err else { panic!("unexpected error: {err}") };
    assert_eq!((expected, actual), (0, 1));

    let second = Arc::new(SimDriver::new(DeviceProperties::builder().ordinal(1).build()));
    let mut executor = compiled(&second, pointwise_kernel("device index"), &args(&[&input]));
    run(&mut executor, &args(&[&input]).with_device_index(1)).unwrap();
    assert_eq!(second.launches().len(), 1);
}

#[test]
fn launch_constraints_pin_extents() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("constrained"), &args);

    let constraints = LaunchParams::with([(ParallelType::TIDx, 128)]);
    executor.run_fusion(&args, &constraints, CompileParams::default(), vec![]).unwrap();
    let launch = &driver.launches()[0];
    assert_eq!(launch.config.grid, [4, 1, 1]);
    assert_eq!(launch.config.block, [128, 1, 1]);
}

#[test]
fn dynamic_shared_memory_window_is_raised_at_compile_time() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("dynamic smem");
    kb.output(t1);
    let t2 = kb.tensor("T2", DType::Float32, TensorDomain::from_extents([16_384i64]));
    kb.allocate(Allocation::new(t2, MemoryType::DynamicShared, vec![Expr::constant(16_384)]));
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, Arc::new(kb.build().unwrap()), &args);

    let function = executor.compiled().unwrap().function;
    assert_eq!(driver.max_dynamic_shared_memory(function), Some(65_536));

    run(&mut executor, &args).unwrap();
    assert_eq!(driver.launches()[0].config.shared_mem_bytes, 65_536);
}

#[test]
fn oversized_shared_memory_is_rejected() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("smem limit");
    kb.output(t1);
    let t2 = kb.tensor("T2", DType::Float32, TensorDomain::from_extents([50_000i64]));
    kb.allocate(Allocation::new(t2, MemoryType::DynamicShared, vec![Expr::constant(50_000)]));
    let input = f32_buffer(&[4, 8]);

    let mut executor = executor(&driver);
    let err = executor
        .compile_fusion(
            Arc::new(kb.build().unwrap()),
            &args(&[&input]),
            &LaunchParams::new(),
            CompileParams::default(),
            identity(1),
        )
        .unwrap_err();
    let Error::SharedMemoryLimit { dynamic_smem, limit, .. } = err else { panic!("unexpected error: {err}") };
    assert_eq!(dynamic_smem, 200_000);
    assert_eq!(limit, DeviceProperties::default().max_shared_memory_per_block_optin);
}

#[test]
fn expected_shared_memory_is_checked() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("expected smem");
    kb.output(t1);
    kb.expected_dynamic_smem(1024);
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, Arc::new(kb.build().unwrap()), &args);

    let err = run(&mut executor, &args).unwrap_err();
    let Error::ExpectedSharedMemoryMismatch { expected, actual } = err else { panic!("unexpected error: {err}") };
    assert_eq!((expected, actual), (1024, 0));
}

#[test]
fn skipping_execution_still_plans_buffers() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = FusionExecutor::new(driver.clone(), ExecutorOptions::builder().execute_kernel(false).build());
    let kernel = pointwise_kernel("no execute");
    executor.compile_fusion(kernel, &args, &LaunchParams::new(), CompileParams::default(), identity(1)).unwrap();

    let outputs = run(&mut executor, &args).unwrap();
    assert_eq!(outputs[0].sizes(), &[4, 8]);
    assert_eq!(executor.stats().layouts_built, 1);
    assert_eq!(executor.stats().launches, 0);
    assert!(driver.launches().is_empty());
}

#[test]
fn zeroed_intermediates_come_from_the_pool() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("zeroed pool");
    kb.output(t1);
    let t2 = kb.tensor("T2", DType::Float32, TensorDomain::from_extents([Expr::symbol("T0.size[0]")]));
    let mut semaphore = Allocation::new(t2, MemoryType::Global, vec![Expr::symbol("T0.size[0]")]);
    semaphore.zero_init = true;
    semaphore.resets_to_zero = true;
    kb.allocate(semaphore);
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]).with_cache_id(1);
    let mut executor = compiled(&driver, Arc::new(kb.build().unwrap()), &args);

    run(&mut executor, &args).unwrap();
    run(&mut executor, &args).unwrap();
    assert_eq!(executor.zeroed_pool().len(), 1);
    assert_eq!(executor.zeroed_pool().in_use(), 0);

    let entry = executor.entry(1).unwrap();
    assert_eq!(entry.intermediates.len(), 1);
    assert!(entry.intermediates[0].zero_init);
    assert_eq!(entry.intermediates[0].sizes, vec![4]);
    assert_eq!(driver.launches()[1].params.len(), 3);
}

#[test]
fn profile_buffer_is_tracked_when_profiling() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("profile");
    kb.output(t1);
    let t2 = kb.tensor("T2", DType::Int64, TensorDomain::from_extents([8i64]));
    kb.allocate_global(t2);
    kb.summary(KernelSummary::builder().profile_buffer(t2).build());
    let kernel = Arc::new(kb.build().unwrap());
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);

    let options = ExecutorOptions::builder().kernel_profile(true).build();
    let mut executor = FusionExecutor::new(driver.clone(), options);
    let constraints = LaunchParams::new();
    executor.compile_fusion(kernel.clone(), &args, &constraints, CompileParams::default(), identity(1)).unwrap();
    run(&mut executor, &args).unwrap();
    assert_eq!(executor.profile_buffer().unwrap().sizes(), &[8]);

    let mut quiet = compiled(&driver, kernel, &args);
    run(&mut quiet, &args).unwrap();
    assert!(quiet.profile_buffer().is_none());
}

#[test]
fn host_queries_do_not_launch() {
    let driver = sim_driver();
    let input = f32_buffer(&[3, 5]);
    let args = args(&[&input]);
    let executor = compiled(&driver, pointwise_kernel("host queries"), &args);

    let infos = executor.infer_output_sizes(&args).unwrap();
    assert_eq!(infos[0].sizes, vec![3, 5]);
    assert_eq!(infos[0].strides, vec![5, 1]);
    let outputs = executor.alloc_output_space(&args).unwrap();
    assert_eq!(outputs[0].sizes(), &[3, 5]);
    assert!(driver.launches().is_empty());
}

// ============================================================================
// ENTRY CACHE
// ============================================================================

#[test]
fn same_signature_reuses_the_entry() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]).with_cache_id(1);
    let mut executor = compiled(&driver, pointwise_kernel("entry reuse"), &args);

    run(&mut executor, &args).unwrap();
    run(&mut executor, &args).unwrap();

    let stats = executor.stats();
    assert_eq!(stats.entries_built, 1);
    assert_eq!(stats.layouts_built, 1);
    assert_eq!(stats.args_refreshed, 1);
    assert_eq!(stats.launches, 2);
    assert_eq!(executor.num_entries(), 1);
    assert_eq!(executor.entry(1).unwrap().launch_params.dim(ParallelType::BIDx), 4);
}

#[test]
fn cached_layouts_are_refreshed_in_place() {
    let driver = sim_driver();
    let first = f32_buffer(&[4, 8]);
    let second = f32_buffer(&[5, 8]);
    let mut executor = compiled(&driver, pointwise_kernel("refresh"), &args(&[&first]));

    run(&mut executor, &args(&[&first]).with_cache_id(7)).unwrap();
    run(&mut executor, &args(&[&second]).with_cache_id(7)).unwrap();
    assert_eq!(executor.stats().layouts_built, 1);
    assert_eq!(executor.stats().args_refreshed, 1);

    let slot = executor.entry(7).unwrap().args.slot(0);
    assert_eq!(slot.len(), 24);
    assert_eq!(u64::from_le_bytes(slot[..8].try_into().unwrap()), second.device_ptr());
    assert_eq!(i32::from_le_bytes(slot[8..12].try_into().unwrap()), 5);

    let launches = driver.launches();
    assert_eq!(launches[0].params, launches[1].params);
}

#[test]
fn distinct_signatures_get_distinct_entries() {
    let driver = sim_driver();
    let narrow = f32_buffer(&[4, 8]);
    let wide = f32_buffer(&[2, 16]);
    let mut executor = compiled(&driver, pointwise_kernel("two entries"), &args(&[&narrow]));

    run(&mut executor, &args(&[&narrow]).with_cache_id(1)).unwrap();
    let outputs = run(&mut executor, &args(&[&wide]).with_cache_id(2)).unwrap();
    assert_eq!(outputs[0].sizes(), &[2, 16]);
    assert_eq!(executor.num_entries(), 2);
    assert_eq!(executor.stats().entries_built, 2);

    executor.clear_entries();
    assert_eq!(executor.num_entries(), 0);
    assert!(executor.is_compiled());
}

#[test]
fn uncached_calls_rebuild_every_time() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("uncached"), &args);

    run(&mut executor, &args).unwrap();
    run(&mut executor, &args).unwrap();
    assert_eq!(executor.stats().entries_built, 2);
    assert_eq!(executor.stats().layouts_built, 2);
    assert_eq!(executor.num_entries(), 0);
}

#[test]
fn scalar_dependent_outputs_disable_the_cache() {
    let driver = sim_driver();
    let mut kb = KernelBuilder::new();
    kb.input_tensor("T0", DType::Float32, 1);
    let n = kb.scalar_input("n", DType::Int64);
    let t1 = kb.tensor("T1", DType::Float32, TensorDomain::from_extents([n.clone()]));
    kb.output(t1);
    kb.parallelize(ParallelType::TIDx, n, vec![]);
    kb.body("// scalar extent");
    let kernel = Arc::new(kb.build().unwrap());

    let input = f32_buffer(&[16]);
    let call = |n: i64| {
        let mut args = KernelArgumentHolder::new();
        args.push(&input);
        args.push(n);
        args.with_cache_id(3)
    };
    let mut executor = compiled(&driver, kernel, &call(6));
    assert!(executor.is_parameter_cache_disabled());

    assert_eq!(run(&mut executor, &call(6)).unwrap()[0].sizes(), &[6]);
    assert_eq!(run(&mut executor, &call(10)).unwrap()[0].sizes(), &[10]);
    assert_eq!(executor.num_entries(), 0);
    assert_eq!(executor.stats().entries_built, 2);
}

// ============================================================================
// RECOMPILATION
// ============================================================================

#[test]
fn growing_blocks_recompile_once() {
    let driver = sim_driver();
    let small = f32_buffer(&[4, 8]);
    let large = f32_buffer(&[4, 512]);
    let mut executor = compiled(&driver, pointwise_kernel("block growth"), &args(&[&small]));
    let before = executor.compiled().unwrap().clone();
    assert_eq!(executor.block_size_high_water_mark(), 8);
    assert_eq!(before.max_register_count, Some(255));

    run(&mut executor, &args(&[&large])).unwrap();
    let after = executor.compiled().unwrap().clone();
    assert_eq!(executor.stats().recompilations, 1);
    assert_eq!(executor.block_size_high_water_mark(), 512);
    assert_eq!(after.block_size, Some(512));
    assert_eq!(after.max_register_count, Some(128));
    assert_eq!(after.source, before.source);
    assert_ne!(after.function, before.function);
    assert!(!Arc::ptr_eq(&after.binary, &before.binary));

    run(&mut executor, &args(&[&large])).unwrap();
    run(&mut executor, &args(&[&small])).unwrap();
    assert_eq!(executor.stats().recompilations, 1);
    assert!(driver.launches().iter().all(|launch| launch.function == after.function));
}

#[test]
fn register_budget_changes_recompile() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("register budget"), &args);

    let params = CompileParams { max_register_count: Some(64), ..Default::default() };
    executor.run_fusion(&args, &LaunchParams::new(), params.clone(), vec![]).unwrap();
    executor.run_fusion(&args, &LaunchParams::new(), params, vec![]).unwrap();
    assert_eq!(executor.stats().recompilations, 1);
    assert_eq!(executor.maxrregcount_high_water_mark(), Some(64));
    assert_eq!(executor.compiled().unwrap().max_register_count, Some(64));
}

#[test]
fn compiling_without_arguments_defers_the_block_size() {
    let driver = sim_driver();
    let mut executor = executor(&driver);
    executor
        .compile_fusion(
            pointwise_kernel("deferred"),
            &KernelArgumentHolder::new(),
            &LaunchParams::new(),
            CompileParams::default(),
            identity(1),
        )
        .unwrap();
    assert_eq!(executor.index_type(), Some(IndexType::Int64));
    assert_eq!(executor.block_size_high_water_mark(), 1);

    let input = f32_buffer(&[4, 8]);
    run(&mut executor, &args(&[&input])).unwrap();
    assert_eq!(executor.stats().compilations, 2);
    assert_eq!(executor.stats().recompilations, 1);
    assert_eq!(executor.block_size_high_water_mark(), 8);
}

#[test]
fn compile_fusion_counts_fusions() {
    let driver = sim_driver();
    let before = global_fusion_count();
    let input = f32_buffer(&[4, 8]);
    compiled(&driver, pointwise_kernel("fusion count"), &args(&[&input]));
    assert!(global_fusion_count() > before);
}

// ============================================================================
// COOPERATIVE LAUNCHES
// ============================================================================

fn cooperative_kernel(tag: &str) -> Arc<kfuse_ir::LoweredKernel> {
    let (mut kb, _, t1) = pointwise_builder(tag);
    kb.output(t1);
    kb.summary(KernelSummary::builder().has_cooperative_grid_reduction(true).build());
    Arc::new(kb.build().unwrap())
}

#[test]
fn cooperative_grids_must_stay_resident() {
    let driver = Arc::new(SimDriver::default().with_max_active_blocks(1));
    let input = f32_buffer(&[200, 32]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, cooperative_kernel("cooperative overflow"), &args);

    let err = run(&mut executor, &args).unwrap_err();
    let Error::CooperativeOccupancy { blocks, resident } = err else { panic!("unexpected error: {err}") };
    assert_eq!((blocks, resident), (200, 108));
    assert!(driver.launches().is_empty());
}

#[test]
fn cooperative_kernels_launch_cooperatively() {
    let driver = Arc::new(SimDriver::default().with_max_active_blocks(1));
    let input = f32_buffer(&[100, 32]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, cooperative_kernel("cooperative"), &args);

    run(&mut executor, &args).unwrap();
    assert!(driver.launches()[0].cooperative);
}

// ============================================================================
// ERRORS
// ============================================================================

#[test]
fn running_before_compiling_fails() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let err = run(&mut executor(&driver), &args(&[&input])).unwrap_err();
    assert!(matches!(err, Error::NotCompiled));
}

#[test]
fn requested_index_type_must_match_the_compiled_one() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, pointwise_kernel("index mismatch"), &args);

    let params = CompileParams::with_index_type(IndexType::Int64);
    let err = executor.run_fusion(&args, &LaunchParams::new(), params, vec![]).unwrap_err();
    let Error::IndexTypeMismatch { compiled, requested } = err else { panic!("unexpected error: {err}") };
    assert_eq!((compiled, requested), (IndexType::Int32, IndexType::Int64));
}

#[test]
fn host_validations_run_before_launch() {
    let driver = sim_driver();
    let (mut kb, _, t1) = pointwise_builder("validation");
    kb.output(t1);
    kb.validate(Expr::symbol("T0.size[1]").cmp_eq(8), "inner extent must be 8");
    let kernel = Arc::new(kb.build().unwrap());
    let good = f32_buffer(&[4, 8]);
    let bad = f32_buffer(&[4, 16]);
    let mut executor = compiled(&driver, kernel, &args(&[&good]));

    run(&mut executor, &args(&[&good])).unwrap();
    let err = run(&mut executor, &args(&[&bad])).unwrap_err();
    let Error::ValidationFailed { message } = err else { panic!("unexpected error: {err}") };
    assert_eq!(message, "inner extent must be 8");
}

#[test]
fn inputs_sharing_an_extent_must_agree() {
    let driver = sim_driver();
    let mut kb = KernelBuilder::new();
    kb.input_tensor("T0", DType::Float32, 2);
    let t1 = kb.tensor("T1", DType::Float32, TensorDomain::symbolic("T0", 2));
    kb.input(t1);
    let t2 = kb.tensor("T2", DType::Float32, TensorDomain::symbolic("T0", 2));
    kb.output(t2);
    kb.body("// shared extents");
    let kernel = Arc::new(kb.build().unwrap());

    let lhs = f32_buffer(&[4, 8]);
    let rhs = f32_buffer(&[4, 9]);
    let mut executor = compiled(&driver, kernel, &args(&[&lhs, &lhs]));
    let err = run(&mut executor, &args(&[&lhs, &rhs])).unwrap_err();
    let Error::InputExtentMismatch { tensor, dim, expected, actual } = err else { panic!("unexpected error: {err}") };
    assert_eq!((tensor.as_str(), dim, expected, actual), ("T1", 1, 8, 9));
}

#[test]
fn argument_count_is_checked() {
    let driver = sim_driver();
    let input = f32_buffer(&[4, 8]);
    let mut executor = compiled(&driver, pointwise_kernel("argument count"), &args(&[&input]));
    let err = run(&mut executor, &args(&[&input, &input])).unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 1, actual: 2 }));
}

// ============================================================================
// HOST EVALUATION AND RUNTIME COMPILATION
// ============================================================================

#[test]
fn host_evaluated_kernels_are_never_compiled() {
    let driver = sim_driver();
    let mut kb = KernelBuilder::new();
    let t0 = kb.input_tensor("T0", DType::Float32, 2);
    let domain = TensorDomain::from_extents([Expr::symbol("T0.size[1]"), Expr::symbol("T0.size[0]")]);
    let t1 = kb.view("T1", DType::Float32, domain, ViewOp::Permute { source: t0, dims: vec![1, 0] });
    kb.aliased_output(t1, AliasInfo::evaluate(Some(IoRef::Input(0))));
    let input = f32_buffer(&[4, 8]);
    let args = args(&[&input]);
    let mut executor = compiled(&driver, Arc::new(kb.build().unwrap()), &args);
    assert!(executor.is_compiled());
    assert!(executor.compiled().is_none());

    let outputs = run(&mut executor, &args).unwrap();
    assert_eq!(outputs[0].sizes(), &[8, 4]);
    assert_eq!(outputs[0].strides(), &[1, 8]);
    assert!(outputs[0].is_alias_of(&input));
    assert_eq!(driver.compilations(), 0);
    assert!(driver.launches().is_empty());
}

#[test]
fn runtime_compiled_kernels_launch_over_raw_buffers() {
    let driver = sim_driver();
    let mut executor = executor(&driver);
    executor
        .compile_rtc("__global__ void rtc_copy(Tensor<float, 1> T0) {}", "rtc_copy", false, IndexType::Int32)
        .unwrap();
    assert!(executor.compiled().unwrap().source.contains("typedef int kfuse_index_t;"));

    let buffer = f32_buffer(&[16]);
    let params = LaunchParams::with([(ParallelType::TIDx, 16)]);
    executor.run_rtc(&params, &[buffer], IndexType::Int32).unwrap();

    let launches = driver.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].name, "rtc_copy");
    assert_eq!(launches[0].config.block, [16, 1, 1]);
    assert_eq!(launches[0].params.len(), 1);
}

#[test]
fn runtime_compilation_errors_surface() {
    let driver = sim_driver();
    let err = executor(&driver).compile_rtc("#error not today", "broken", true, IndexType::Int64).unwrap_err();
    assert!(matches!(err, Error::Device { source: kfuse_device::Error::Compilation { .. } }));
}
