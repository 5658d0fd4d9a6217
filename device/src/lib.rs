//! Device seam for the fusion executor.
//!
//! - [`driver`] - compile/load/launch interface and device properties
//! - [`sim`] - host-backed driver used for tests and dry runs
//! - [`allocator`] / [`buffer`] / [`layout`] - device memory and strided views over it
//! - [`pool`] - zero-initialized scratch memory reused across launches

pub mod allocator;
pub mod buffer;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod driver;
pub mod error;
pub mod layout;
pub mod pool;
pub mod sim;


pub use allocator::{Allocator, BufferOptions, HostAllocator, RawBuffer};
#[cfg(feature = "cuda")]
pub use allocator::CudaAllocator;
pub use buffer::{Buffer, Storage};
#[cfg(feature = "cuda")]
pub use cuda::CudaDriver;
pub use driver::{
    Binary, BinaryKind, CompileOptions, DeviceProperties, Driver, Function, FunctionAttribute, LaunchConfig,
};
pub use error::{Error, Result};
pub use layout::{Dims, Layout, contiguous_strides};
pub use pool::ZeroedMemoryPool;
pub use sim::{LaunchRecord, SimDriver};
