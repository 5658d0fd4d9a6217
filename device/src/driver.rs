//! Seam between the executor and a GPU driver.
//!
//! A [`Driver`] compiles device source, loads the result and launches it. Function handles
//! are plain ids so executors can hold them without borrowing the driver.

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use crate::allocator::Allocator;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct DeviceProperties {
    #[builder(default = "simulated".to_string())]
    pub name: String,
    /// Index of the device among those visible to the process.
    #[builder(default)]
    pub ordinal: usize,
    #[builder(default = (8, 0))]
    pub compute_capability: (u32, u32),
    #[builder(default = 108)]
    pub multiprocessor_count: i64,
    #[builder(default = 1024)]
    pub max_threads_per_block: i64,
    #[builder(default = 2048)]
    pub max_threads_per_multiprocessor: i64,
    #[builder(default = 32)]
    pub warp_size: i64,
    /// Shared memory a single block may use after opting in, static plus dynamic.
    #[builder(default = 166_912)]
    pub max_shared_memory_per_block_optin: i64,
    #[builder(default = 48 * 1024)]
    pub max_static_shared_memory: i64,
    #[builder(default = 65_536)]
    pub registers_per_block: i64,
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CompileOptions {
    pub arch: (u32, u32),
    pub max_register_count: Option<u32>,
    pub flags: Vec<String>,
}

impl CompileOptions {
    /// Command line handed to the runtime compiler.
    pub fn to_args(&self) -> Vec<String> {
        let (major, minor) = self.arch;
        let mut args = vec![
            format!("--gpu-architecture=compute_{major}{minor}"),
            "--std=c++17".to_string(),
            "-default-device".to_string(),
            "-DNDEBUG".to_string(),
        ];
        if let Some(regs) = self.max_register_count {
            args.push(format!("--maxrregcount={regs}"));
        }
        args.extend(self.flags.iter().cloned());
        args
    }
}

impl fmt::Display for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::FromRepr, strum::Display)]
#[repr(u8)]
pub enum BinaryKind {
    Ptx = 0,
    Cubin = 1,
}

/// Compiled device code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub kind: BinaryKind,
    pub image: Vec<u8>,
    /// Capability the image was built for.
    pub arch: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Function(pub u64);

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionAttribute {
    MaxThreadsPerBlock,
    StaticSharedMemory,
    LocalMemory,
    NumRegisters,
    MaxDynamicSharedMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaunchConfig {
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    pub fn threads_per_block(&self) -> i64 {
        self.block.iter().map(|dim| *dim as i64).product()
    }

    pub fn blocks(&self) -> i64 {
        self.grid.iter().map(|dim| *dim as i64).product()
    }
}

pub trait Driver: Send + Sync + fmt::Debug {
    /// Distinguishes drivers sharing one compiled-artifact cache.
    fn name(&self) -> &str;

    fn properties(&self) -> &DeviceProperties;

    fn allocator(&self) -> Arc<dyn Allocator>;

    fn compile(&self, source: &str, name: &str, options: &CompileOptions) -> Result<Binary>;

    fn load(&self, binary: &Binary, name: &str) -> Result<Function>;

    fn function_attribute(&self, function: Function, attribute: FunctionAttribute) -> Result<i64>;

    fn set_max_dynamic_shared_memory(&self, function: Function, bytes: i64) -> Result<()>;

    fn max_active_blocks_per_multiprocessor(
        &self,
        function: Function,
        block_size: i64,
        dynamic_smem: i64,
    ) -> Result<i64>;

    /// # Safety
    ///
    /// Every pointer in `params` must point to a live argument matching the kernel signature,
    /// and every device address inside those arguments must stay valid until the launch completes.
    unsafe fn launch(&self, function: Function, config: &LaunchConfig, params: &mut [*mut c_void]) -> Result<()>;

    /// Launch where all blocks must be resident at once.
    ///
    /// # Safety
    ///
    /// Same contract as [`Driver::launch`].
    unsafe fn launch_cooperative(
        &self,
        function: Function,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> Result<()>;

    fn synchronize(&self) -> Result<()>;
}
