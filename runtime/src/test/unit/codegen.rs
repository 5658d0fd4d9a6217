use std::path::PathBuf;
use std::sync::Arc;

use kfuse_dtype::IndexType;
use kfuse_ir::{DType, KernelBuilder, KernelSummary, TensorDomain};
use test_case::test_case;

use crate::codegen::{MAGIC_ZERO_MARKER, dump_source, external_source, kernel_code, structured_code};
use crate::test::fixtures::*;
use crate::*;

fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("kfuse-{name}-{}", std::process::id()))
}

#[test_case(IndexType::Int32, "typedef int kfuse_index_t;" ; "int32")]
#[test_case(IndexType::Int64, "typedef int64_t kfuse_index_t;" ; "int64")]
fn structured_code_declares_the_index_type(index_type: IndexType, typedef: &str) {
    let code = structured_code("__global__ void k() {}", index_type, true);
    assert!(code.contains(typedef));
    assert!(code.contains("struct Tensor"));
    assert!(code.trim_end().ends_with('}'));
    assert!(code.find(typedef).unwrap() < code.find("__global__ void k()").unwrap());
}

#[test_case(true ; "enabled")]
#[test_case(false ; "disabled")]
fn magic_zero_helper_follows_the_flag(magic_zero: bool) {
    let code = structured_code("__global__ void k() {}", IndexType::Int32, magic_zero);
    assert_eq!(code.contains(MAGIC_ZERO_MARKER), magic_zero);
    assert_eq!(code.contains("KFUSE_UPDATE_MAGIC_ZERO"), magic_zero);
}

/// Source and the magic-zero setting the executor compiled it with.
fn compiled_source(tag: &str, summary: KernelSummary, params: CompileParams) -> (String, bool) {
    let (mut kb, _, t1) = pointwise_builder(tag);
    kb.output(t1);
    kb.summary(summary);
    let kernel = Arc::new(kb.build().unwrap());
    let input = f32_buffer(&[2, 4]);
    let mut executor = executor(&sim_driver());
    executor.compile_fusion(kernel, &args(&[&input]), &LaunchParams::new(), params, identity(3)).unwrap();
    (executor.compiled().unwrap().source.clone(), executor.compile_params().enable_magic_zero)
}

#[test]
fn generated_sources_carry_magic_zero_by_default() {
    assert!(CompileParams::default().enable_magic_zero);
    let params = CompileParams::default();
    let (source, magic_zero) = compiled_source("magic zero default", KernelSummary::default(), params);
    assert!(source.contains(MAGIC_ZERO_MARKER));
    assert!(magic_zero);
}

#[test]
fn magic_zero_can_be_turned_off() {
    let params = CompileParams { enable_magic_zero: false, ..Default::default() };
    let (source, _) = compiled_source("magic zero off", KernelSummary::default(), params);
    assert!(!source.contains(MAGIC_ZERO_MARKER));
}

#[test]
fn bulk_copies_drop_magic_zero() {
    let summary = KernelSummary::builder().has_bulk_copy(true).build();
    let (source, magic_zero) = compiled_source("magic zero bulk copy", summary, CompileParams::default());
    assert!(!source.contains(MAGIC_ZERO_MARKER));
    assert!(!magic_zero);
}

#[test]
fn kernel_signature_follows_the_parameters() {
    let mut kb = KernelBuilder::new();
    kb.input_tensor("T0", DType::Float32, 2);
    kb.scalar_input("T0.size[0]", DType::Int64);
    let t1 = kb.tensor("T1", DType::Float64, TensorDomain::symbolic("T0", 1));
    kb.output(t1);
    kb.body("T1[0] = T0[0];");
    let kernel = kb.build().unwrap();

    let code = kernel_code(&kernel, "kernel1");
    assert!(code.contains("__global__ void kernel1(Tensor<float, 2> T0, int64_t T0_size_0_, Tensor<double, 1> T1) {"));
    assert!(code.contains("  T1[0] = T0[0];"));
}

#[test]
fn external_sources_are_picked_by_fusion_count() {
    let dir = scratch_dir("external");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("first.cu");
    std::fs::write(&path, "__global__ void replaced() {}").unwrap();
    let paths = vec![path];

    assert_eq!(external_source(&paths, 1).unwrap().as_deref(), Some("__global__ void replaced() {}"));
    assert_eq!(external_source(&paths, 2).unwrap(), None);
    assert_eq!(external_source(&paths, 0).unwrap(), None);
    assert_eq!(external_source(&[], 1).unwrap(), None);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_external_sources_fail() {
    let paths = vec![scratch_dir("missing").join("absent.cu")];
    let err = external_source(&paths, 1).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn dumped_sources_land_in_the_directory() {
    let dir = scratch_dir("dump");
    let path = dump_source(&dir, "kernel1", "// source").unwrap();
    assert_eq!(path, dir.join("kernel1.cu"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "// source");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn compiled_sources_are_dumped_when_configured() {
    let dir = scratch_dir("compile-dump");
    let driver = sim_driver();
    let mut executor = FusionExecutor::new(driver, ExecutorOptions::builder().dump_source_dir(dir.clone()).build());
    let input = f32_buffer(&[2, 2]);
    let kernel = pointwise_kernel("dumped");
    let args = args(&[&input]);
    executor.compile_fusion(kernel, &args, &LaunchParams::new(), CompileParams::default(), identity(9)).unwrap();

    let name = executor.compiled().unwrap().name.clone();
    let dumped = std::fs::read_to_string(dir.join(format!("{name}.cu"))).unwrap();
    assert_eq!(dumped, executor.compiled().unwrap().source);
    std::fs::remove_dir_all(&dir).unwrap();
}
