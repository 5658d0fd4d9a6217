//! Error types for the fusion executor.

use kfuse_dtype::{DType, IndexType};
use kfuse_ir::ParallelType;
use snafu::Snafu;

/// Result type for executor operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Driver, allocation or view failure, surfaced as reported.
    #[snafu(display("{source}"))]
    Device { source: kfuse_device::Error },

    #[snafu(display("malformed kernel: {source}"))]
    Ir { source: kfuse_ir::Error },

    #[snafu(display("{path}: {source}"))]
    Io { path: String, source: std::io::Error },

    #[snafu(display("index type conflict: {reason}"))]
    IndexTypeConflict { reason: String },

    #[snafu(display("kernel was compiled with {compiled} indexing but {requested} was requested"))]
    IndexTypeMismatch { compiled: IndexType, requested: IndexType },

    #[snafu(display(
        "kernel requires compute capability {}.{} ({reason}) but the device is {}.{}",
        required.0, required.1, actual.0, actual.1
    ))]
    DeviceCapability { required: (u32, u32), actual: (u32, u32), reason: String },

    #[snafu(display("unsupported kernel: {reason}"))]
    UnsupportedKernel { reason: String },

    #[snafu(display("dynamically sized local memory is not supported: {buffers}"))]
    DynamicLocalMemory { buffers: String },

    #[snafu(display("static shared memory of {required} bytes exceeds the {limit} byte limit"))]
    StaticSharedMemory { required: i64, limit: i64 },

    #[snafu(display(
        "shared memory of {static_smem} static + {dynamic_smem} dynamic bytes exceeds the device limit of {limit}"
    ))]
    SharedMemoryLimit { static_smem: i64, dynamic_smem: i64, limit: i64 },

    #[snafu(display("kernel expects {expected} bytes of dynamic shared memory but launch computed {actual}"))]
    ExpectedSharedMemoryMismatch { expected: i64, actual: i64 },

    #[snafu(display("cooperative launch of {blocks} blocks exceeds the {resident} blocks the device keeps resident"))]
    CooperativeOccupancy { blocks: i64, resident: i64 },

    #[snafu(display("{what} of {value} does not fit a launch configuration"))]
    LaunchExtentOverflow { what: String, value: i64 },

    #[snafu(display("expected {expected} outputs, got {actual}"))]
    OutputCountMismatch { expected: usize, actual: usize },

    #[snafu(display("arguments are on device {actual}, the executor runs on device {expected}"))]
    DeviceMismatch { expected: usize, actual: usize },

    #[snafu(display("pre-allocated outputs cannot be combined with a cache id"))]
    CacheWithPreallocatedOutputs,

    #[snafu(display("expected {expected} arguments, got {actual}"))]
    ArgumentCount { expected: usize, actual: usize },

    #[snafu(display("argument {position} should be a {expected}"))]
    ArgumentKind { position: usize, expected: &'static str },

    #[snafu(display("{tensor} dimension {dim} must be {expected}, got {actual}"))]
    InputExtentMismatch { tensor: String, dim: usize, expected: i64, actual: i64 },

    #[snafu(display("cannot evaluate extent {extent} of {tensor}"))]
    UnresolvedExtent { tensor: String, extent: String },

    #[snafu(display("cannot infer launch extent of {ptype} from {extent}"))]
    UnresolvedLaunchExtent { ptype: ParallelType, extent: String },

    #[snafu(display("cannot evaluate {tensor} on the host: {reason}"))]
    TensorEvaluation { tensor: String, reason: String },

    #[snafu(display("validation failed: {message}"))]
    ValidationFailed { message: String },

    #[snafu(display("allocation domain of {tensor} cannot be mapped to its logical domain: {reason}"))]
    AllocationReplay { tensor: String, reason: String },

    #[snafu(display("output {output} breaks its aliasing contract: {reason}"))]
    AliasViolation { output: usize, reason: String },

    #[snafu(display("kernel parameter {parameter}: {reason}"))]
    ArgumentLayout { parameter: usize, reason: String },

    #[snafu(display("scalar {name} of type {dtype} cannot be passed to a kernel"))]
    UnsupportedScalar { name: String, dtype: DType },

    #[snafu(display("no kernel has been compiled"))]
    NotCompiled,

    #[snafu(display("corrupt executor record: {reason}"))]
    CorruptCache { reason: String },

    #[snafu(display("executor record has {field} = {actual}, expected {expected}"))]
    IdentityMismatch { field: &'static str, expected: String, actual: String },
}

impl From<kfuse_device::Error> for Error {
    fn from(source: kfuse_device::Error) -> Self {
        Self::Device { source }
    }
}

impl From<kfuse_ir::Error> for Error {
    fn from(source: kfuse_ir::Error) -> Self {
        Self::Ir { source }
    }
}
