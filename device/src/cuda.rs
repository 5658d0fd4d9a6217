//! CUDA driver backed by NVRTC and the driver API.

use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::sync::Arc;

use cudarc::driver::sys::{CUdevice_attribute, CUfunction, CUfunction_attribute, CUmodule};
use cudarc::driver::{CudaContext, result};
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt};

use crate::allocator::{Allocator, CudaAllocator};
use crate::driver::*;
use crate::error::*;

#[derive(Debug, Clone, Copy)]
struct Loaded {
    module: CUmodule,
    function: CUfunction,
}

// Raw handles are only used while the owning context is alive.
unsafe impl Send for Loaded {}

#[derive(Debug)]
pub struct CudaDriver {
    context: Arc<CudaContext>,
    properties: DeviceProperties,
    allocator: Arc<dyn Allocator>,
    functions: Mutex<HashMap<u64, Loaded>>,
    next_function: Mutex<u64>,
}

impl CudaDriver {
    pub fn new(ordinal: usize) -> Result<Self> {
        let context = CudaContext::new(ordinal).context(CudaSnafu)?;
        let attribute = |attr: CUdevice_attribute| context.attribute(attr).map(i64::from).context(CudaSnafu);

        let properties = DeviceProperties {
            name: context.name().context(CudaSnafu)?,
            ordinal,
            compute_capability: (
                attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)? as u32,
                attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)? as u32,
            ),
            multiprocessor_count: attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)?,
            max_threads_per_block: attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?,
            max_threads_per_multiprocessor: attribute(
                CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_MULTIPROCESSOR,
            )?,
            warp_size: attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_WARP_SIZE)?,
            max_shared_memory_per_block_optin: attribute(
                CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK_OPTIN,
            )?,
            max_static_shared_memory: 48 * 1024,
            registers_per_block: attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_REGISTERS_PER_BLOCK)?,
        };
        tracing::debug!(
            device.name = %properties.name,
            device.sm = ?properties.compute_capability,
            "cuda driver ready"
        );

        let allocator: Arc<dyn Allocator> = Arc::new(CudaAllocator::new(Arc::clone(&context)));
        Ok(Self {
            context,
            properties,
            allocator,
            functions: Mutex::new(HashMap::new()),
            next_function: Mutex::new(0),
        })
    }

    fn loaded(&self, function: Function) -> Result<Loaded> {
        self.functions.lock().get(&function.0).copied().context(UnknownFunctionSnafu { handle: function.0 })
    }
}

impl Driver for CudaDriver {
    fn name(&self) -> &str {
        "cuda"
    }

    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn allocator(&self) -> Arc<dyn Allocator> {
        Arc::clone(&self.allocator)
    }

    fn compile(&self, source: &str, name: &str, options: &CompileOptions) -> Result<Binary> {
        let nvrtc_options = cudarc::nvrtc::CompileOptions { options: options.to_args(), ..Default::default() };
        let ptx = cudarc::nvrtc::compile_ptx_with_opts(source, nvrtc_options)
            .map_err(|err| Error::Compilation { name: name.to_string(), log: err.to_string() })?;
        Ok(Binary { kind: BinaryKind::Ptx, image: ptx.to_src().into_bytes(), arch: options.arch })
    }

    fn load(&self, binary: &Binary, name: &str) -> Result<Function> {
        self.context.bind_to_thread().context(CudaSnafu)?;
        let mut image = binary.image.clone();
        image.push(0);
        let symbol =
            CString::new(name).map_err(|err| Error::Launch { name: name.to_string(), reason: err.to_string() })?;

        let loaded = unsafe {
            let module = result::module::load_data(image.as_ptr() as *const c_void).context(CudaSnafu)?;
            let function = result::module::get_function(module, symbol).context(CudaSnafu)?;
            Loaded { module, function }
        };

        let mut next = self.next_function.lock();
        *next += 1;
        self.functions.lock().insert(*next, loaded);
        Ok(Function(*next))
    }

    fn function_attribute(&self, function: Function, attribute: FunctionAttribute) -> Result<i64> {
        let loaded = self.loaded(function)?;
        let attribute = match attribute {
            FunctionAttribute::MaxThreadsPerBlock => CUfunction_attribute::CU_FUNC_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
            FunctionAttribute::StaticSharedMemory => CUfunction_attribute::CU_FUNC_ATTRIBUTE_SHARED_SIZE_BYTES,
            FunctionAttribute::LocalMemory => CUfunction_attribute::CU_FUNC_ATTRIBUTE_LOCAL_SIZE_BYTES,
            FunctionAttribute::NumRegisters => CUfunction_attribute::CU_FUNC_ATTRIBUTE_NUM_REGS,
            FunctionAttribute::MaxDynamicSharedMemory => {
                CUfunction_attribute::CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES
            }
        };
        let value = unsafe { result::function::get_function_attribute(loaded.function, attribute) }.context(CudaSnafu)?;
        Ok(value as i64)
    }

    fn set_max_dynamic_shared_memory(&self, function: Function, bytes: i64) -> Result<()> {
        let loaded = self.loaded(function)?;
        unsafe {
            result::function::set_function_attribute(
                loaded.function,
                CUfunction_attribute::CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES,
                bytes as i32,
            )
        }
        .context(CudaSnafu)
    }

    fn max_active_blocks_per_multiprocessor(
        &self,
        function: Function,
        block_size: i64,
        dynamic_smem: i64,
    ) -> Result<i64> {
        let loaded = self.loaded(function)?;
        let blocks = unsafe {
            result::occupancy::max_active_block_per_multiprocessor(
                loaded.function,
                block_size as i32,
                dynamic_smem as usize,
            )
        }
        .context(CudaSnafu)?;
        Ok(blocks as i64)
    }

    unsafe fn launch(&self, function: Function, config: &LaunchConfig, params: &mut [*mut c_void]) -> Result<()> {
        let loaded = self.loaded(function)?;
        let stream = self.context.default_stream();
        let grid = (config.grid[0], config.grid[1], config.grid[2]);
        let block = (config.block[0], config.block[1], config.block[2]);
        let smem = config.shared_mem_bytes;
        unsafe { result::launch_kernel(loaded.function, grid, block, smem, stream.cu_stream(), params) }
            .context(CudaSnafu)
    }

    unsafe fn launch_cooperative(
        &self,
        function: Function,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> Result<()> {
        let loaded = self.loaded(function)?;
        let stream = self.context.default_stream();
        let grid = (config.grid[0], config.grid[1], config.grid[2]);
        let block = (config.block[0], config.block[1], config.block[2]);
        unsafe {
            result::launch_cooperative_kernel(
                loaded.function,
                grid,
                block,
                config.shared_mem_bytes,
                stream.cu_stream(),
                params,
            )
        }
        .context(CudaSnafu)
    }

    fn synchronize(&self) -> Result<()> {
        self.context.default_stream().synchronize().context(CudaSnafu)
    }
}

impl Drop for CudaDriver {
    fn drop(&mut self) {
        for loaded in self.functions.get_mut().values() {
            if let Err(err) = unsafe { result::module::unload(loaded.module) } {
                tracing::warn!(error = %err, "failed to unload module");
            }
        }
    }
}
