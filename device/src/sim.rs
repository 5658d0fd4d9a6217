//! In-process driver that records launches instead of running them.
//!
//! Memory lives on the host. Compilation only checks for `#error` directives, which makes
//! compile failures reproducible in tests.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;

use parking_lot::Mutex;
use snafu::{OptionExt, ensure};

use crate::allocator::{Allocator, HostAllocator};
use crate::driver::*;
use crate::error::*;

/// Default dynamic shared memory window before a kernel opts into more.
const DEFAULT_DYNAMIC_SMEM: i64 = 48 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub function: Function,
    pub name: String,
    pub config: LaunchConfig,
    pub cooperative: bool,
    /// Addresses of the argument slots handed to the launch.
    pub params: Vec<usize>,
}

#[derive(Debug)]
struct SimFunction {
    name: String,
    max_dynamic_smem: i64,
}

#[derive(Debug, Default)]
struct SimState {
    next_function: u64,
    functions: HashMap<u64, SimFunction>,
    compilations: usize,
    launches: Vec<LaunchRecord>,
}

#[derive(Debug)]
pub struct SimDriver {
    properties: DeviceProperties,
    allocator: Arc<dyn Allocator>,
    static_smem: i64,
    registers: i64,
    max_active_blocks: Option<i64>,
    state: Mutex<SimState>,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new(DeviceProperties::default())
    }
}

impl SimDriver {
    pub fn new(properties: DeviceProperties) -> Self {
        Self {
            properties,
            allocator: Arc::new(HostAllocator),
            static_smem: 0,
            registers: 32,
            max_active_blocks: None,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Static shared memory every loaded function reports.
    pub fn with_static_shared_memory(mut self, bytes: i64) -> Self {
        self.static_smem = bytes;
        self
    }

    /// Fixes the occupancy query result instead of deriving it from thread counts.
    pub fn with_max_active_blocks(mut self, blocks: i64) -> Self {
        self.max_active_blocks = Some(blocks);
        self
    }

    pub fn compilations(&self) -> usize {
        self.state.lock().compilations
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    pub fn loaded_functions(&self) -> usize {
        self.state.lock().functions.len()
    }

    pub fn max_dynamic_shared_memory(&self, function: Function) -> Option<i64> {
        self.state.lock().functions.get(&function.0).map(|f| f.max_dynamic_smem)
    }

    fn record_launch(
        &self,
        function: Function,
        config: &LaunchConfig,
        params: &[*mut c_void],
        cooperative: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let loaded = state.functions.get(&function.0).context(UnknownFunctionSnafu { handle: function.0 })?;
        let name = loaded.name.clone();

        let threads = config.threads_per_block();
        ensure!(
            threads <= self.properties.max_threads_per_block,
            LaunchSnafu { name: name.clone(), reason: format!("{threads} threads per block exceeds the device limit") }
        );
        let smem = config.shared_mem_bytes as i64;
        ensure!(
            smem <= loaded.max_dynamic_smem,
            LaunchSnafu {
                name: name.clone(),
                reason: format!(
                    "{smem} bytes of dynamic shared memory exceed the {} configured",
                    loaded.max_dynamic_smem
                ),
            }
        );

        state.launches.push(LaunchRecord {
            function,
            name,
            config: *config,
            cooperative,
            params: params.iter().map(|param| *param as usize).collect(),
        });
        Ok(())
    }
}

impl Driver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn allocator(&self) -> Arc<dyn Allocator> {
        Arc::clone(&self.allocator)
    }

    fn compile(&self, source: &str, name: &str, options: &CompileOptions) -> Result<Binary> {
        let errors: Vec<&str> = source.lines().filter(|line| line.trim_start().starts_with("#error")).collect();
        ensure!(errors.is_empty(), CompilationSnafu { name, log: errors.join("\n") });

        self.state.lock().compilations += 1;
        let image = format!("// {options}\n{source}").into_bytes();
        Ok(Binary { kind: BinaryKind::Ptx, image, arch: options.arch })
    }

    fn load(&self, binary: &Binary, name: &str) -> Result<Function> {
        let (major, minor) = binary.arch;
        ensure!(
            binary.arch <= self.properties.compute_capability,
            LaunchSnafu { name, reason: format!("no kernel image for this device, built for sm_{major}{minor}") }
        );

        let mut state = self.state.lock();
        state.next_function += 1;
        let handle = state.next_function;
        let max_dynamic_smem = DEFAULT_DYNAMIC_SMEM - self.static_smem;
        state.functions.insert(handle, SimFunction { name: name.to_string(), max_dynamic_smem });
        Ok(Function(handle))
    }

    fn function_attribute(&self, function: Function, attribute: FunctionAttribute) -> Result<i64> {
        let state = self.state.lock();
        let loaded = state.functions.get(&function.0).context(UnknownFunctionSnafu { handle: function.0 })?;
        Ok(match attribute {
            FunctionAttribute::MaxThreadsPerBlock => self.properties.max_threads_per_block,
            FunctionAttribute::StaticSharedMemory => self.static_smem,
            FunctionAttribute::LocalMemory => 0,
            FunctionAttribute::NumRegisters => self.registers,
            FunctionAttribute::MaxDynamicSharedMemory => loaded.max_dynamic_smem,
        })
    }

    fn set_max_dynamic_shared_memory(&self, function: Function, bytes: i64) -> Result<()> {
        let limit = self.properties.max_shared_memory_per_block_optin - self.static_smem;
        ensure!(bytes <= limit, AttributeLimitSnafu { attribute: "max dynamic shared memory", value: bytes, limit });

        let mut state = self.state.lock();
        let loaded = state.functions.get_mut(&function.0).context(UnknownFunctionSnafu { handle: function.0 })?;
        loaded.max_dynamic_smem = bytes;
        Ok(())
    }

    fn max_active_blocks_per_multiprocessor(
        &self,
        function: Function,
        block_size: i64,
        dynamic_smem: i64,
    ) -> Result<i64> {
        ensure!(self.state.lock().functions.contains_key(&function.0), UnknownFunctionSnafu { handle: function.0 });
        if let Some(blocks) = self.max_active_blocks {
            return Ok(blocks);
        }

        let warp = self.properties.warp_size;
        let threads = (block_size.max(1) + warp - 1) / warp * warp;
        let by_threads = self.properties.max_threads_per_multiprocessor / threads;
        let smem = dynamic_smem + self.static_smem;
        let by_smem = if smem > 0 { self.properties.max_shared_memory_per_block_optin / smem } else { by_threads };
        Ok(by_threads.min(by_smem))
    }

    unsafe fn launch(&self, function: Function, config: &LaunchConfig, params: &mut [*mut c_void]) -> Result<()> {
        self.record_launch(function, config, params, false)
    }

    unsafe fn launch_cooperative(
        &self,
        function: Function,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> Result<()> {
        let per_sm = self.max_active_blocks_per_multiprocessor(
            function,
            config.threads_per_block(),
            config.shared_mem_bytes as i64,
        )?;
        let resident = per_sm * self.properties.multiprocessor_count;
        let blocks = config.blocks();
        ensure!(
            blocks <= resident,
            LaunchSnafu {
                name: function.to_string(),
                reason: format!("cooperative grid of {blocks} blocks exceeds {resident} resident blocks"),
            }
        );
        self.record_launch(function, config, params, true)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
