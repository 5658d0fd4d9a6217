use std::sync::Arc;

use kfuse_device::{Binary, BinaryKind, DeviceProperties, Driver, SimDriver};
use kfuse_dtype::IndexType;
use kfuse_ir::{Allocation, DType, Expr, KernelSummary, LoweredKernel, MemoryType, ScheduleHeuristic, TensorDomain};
use test_case::test_case;

use crate::compiler::{load_binary, max_registers_for, resolve_index_type, validate_kernel};
use crate::test::fixtures::*;
use crate::*;

/// Arguments holding one broadcast tensor of `elements` logical elements, backed by a single one.
fn holder(elements: Option<i64>) -> KernelArgumentHolder {
    match elements {
        None => KernelArgumentHolder::new(),
        Some(elements) => KernelArgumentHolder::from_values([f32_buffer(&[1]).expand(&[elements]).unwrap()]),
    }
}

#[test_case(None, None, false => Some(IndexType::Int64) ; "no tensors default to int64")]
#[test_case(Some(128), None, false => Some(IndexType::Int32) ; "small tensors pick int32")]
#[test_case(Some(1 << 32), None, false => Some(IndexType::Int64) ; "large tensors need int64")]
#[test_case(Some(128), Some(IndexType::Int64), false => Some(IndexType::Int64) ; "explicit int64 wins")]
#[test_case(Some(1 << 32), Some(IndexType::Int32), false => None ; "explicit int32 too narrow")]
#[test_case(None, None, true => Some(IndexType::Int32) ; "bulk copies force int32")]
#[test_case(Some(128), Some(IndexType::Int64), true => None ; "bulk copies reject explicit int64")]
#[test_case(Some(1 << 32), None, true => None ; "bulk copies cannot address large tensors")]
fn index_type_resolution(elements: Option<i64>, requested: Option<IndexType>, bulk_copy: bool) -> Option<IndexType> {
    resolve_index_type(requested, &holder(elements), bulk_copy).ok()
}

#[test]
fn index_type_conflicts_explain_themselves() {
    let err = resolve_index_type(Some(IndexType::Int32), &holder(Some(1 << 32)), false).unwrap_err();
    let Error::IndexTypeConflict { reason } = err else { panic!("unexpected error: {err}") };
    assert!(reason.contains("int64 is required"));
}

#[test_case(1 => 255 ; "single thread")]
#[test_case(96 => 255 ; "clamped to the hardware maximum")]
#[test_case(512 => 128 ; "half block")]
#[test_case(768 => 80 ; "rounded down to the allocation granularity")]
#[test_case(1000 => 64 ; "rounded up to whole warps")]
#[test_case(1024 => 64 ; "full block")]
fn register_budget(block_size: i64) -> u32 {
    max_registers_for(block_size, &DeviceProperties::default())
}

#[test]
fn kernel_names_carry_the_identity() {
    let identity = KernelIdentity {
        heuristic: ScheduleHeuristic::PointWise,
        fusion_id: 1,
        concrete_id: 2,
        runtime_id: 3,
        group_id: 4,
    };
    assert_eq!(identity.kernel_name(), "kernel_point_wise_f1_c2_r3_g4");
}

fn kernel_with(allocation: impl FnOnce(kfuse_ir::TensorId) -> Allocation, summary: KernelSummary) -> LoweredKernel {
    let (mut kb, _, t1) = pointwise_builder("validate");
    kb.output(t1);
    let t2 = kb.tensor("T2", DType::Float32, TensorDomain::from_extents([Expr::symbol("T0.size[0]")]));
    kb.allocate(allocation(t2));
    kb.summary(summary);
    kb.build().unwrap()
}

#[test]
fn kernels_need_a_capable_device() {
    let summary = KernelSummary::builder().min_device_version((9, 0)).min_device_version_reason("bulk copies".into());
    let kernel = kernel_with(|t2| Allocation::new(t2, MemoryType::Global, vec![Expr::constant(4)]), summary.build());
    let err = validate_kernel(&kernel, &DeviceProperties::default(), IndexType::Int32).unwrap_err();
    let Error::DeviceCapability { required, actual, reason } = err else { panic!("unexpected error: {err}") };
    assert_eq!((required, actual, reason.as_str()), ((9, 0), (8, 0), "bulk copies"));
}

#[test]
fn static_shared_memory_is_bounded() {
    let allocate = |t2| Allocation::new(t2, MemoryType::StaticShared, vec![Expr::constant(16_384)]);
    let kernel = kernel_with(allocate, KernelSummary::default());
    let err = validate_kernel(&kernel, &DeviceProperties::default(), IndexType::Int32).unwrap_err();
    let Error::StaticSharedMemory { required, limit } = err else { panic!("unexpected error: {err}") };
    assert_eq!((required, limit), (65_536, 49_152));
}

#[test]
fn dynamically_sized_local_memory_is_rejected() {
    let allocate = |t2| Allocation::new(t2, MemoryType::Local, vec![Expr::symbol("T0.size[0]")]);
    let kernel = kernel_with(allocate, KernelSummary::default());
    let err = validate_kernel(&kernel, &DeviceProperties::default(), IndexType::Int32).unwrap_err();
    let Error::DynamicLocalMemory { buffers } = err else { panic!("unexpected error: {err}") };
    assert_eq!(buffers, "T2");
}

#[test]
fn constant_local_memory_is_fine() {
    let allocate = |t2| Allocation::new(t2, MemoryType::Local, vec![Expr::constant(8)]);
    let kernel = kernel_with(allocate, KernelSummary::default());
    validate_kernel(&kernel, &DeviceProperties::default(), IndexType::Int32).unwrap();
}

#[test]
fn binaries_are_checked_against_the_device() {
    let driver: Arc<dyn Driver> = Arc::new(SimDriver::default());
    let binary = Binary { kind: BinaryKind::Cubin, image: b"// newer".to_vec(), arch: (9, 0) };
    let err = load_binary(driver.as_ref(), &binary, "kernel1").unwrap_err();
    assert!(matches!(err, Error::DeviceCapability { required: (9, 0), actual: (8, 0), .. }));

    let binary = Binary { arch: (7, 5), ..binary };
    load_binary(driver.as_ref(), &binary, "kernel1").unwrap();
}
