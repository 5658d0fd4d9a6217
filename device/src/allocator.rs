#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
use cudarc::driver::{CudaContext, CudaSlice, DevicePtr};
use parking_lot::Mutex;
#[cfg(feature = "cuda")]
use snafu::ResultExt;

#[cfg(feature = "cuda")]
use crate::error::CudaSnafu;
use crate::error::Result;

/// Opaque handle to device memory.
#[derive(Debug)]
pub enum RawBuffer {
    /// Host memory standing in for device memory.
    Host { data: Mutex<Box<[u8]>> },
    #[cfg(feature = "cuda")]
    Cuda { data: Mutex<CudaSlice<u8>>, device: Arc<CudaContext> },
}

impl RawBuffer {
    /// Size of the allocation in bytes.
    pub fn size(&self) -> usize {
        match self {
            RawBuffer::Host { data } => data.lock().len(),
            #[cfg(feature = "cuda")]
            RawBuffer::Cuda { data, .. } => data.lock().len(),
        }
    }

    /// Address the kernel sees for byte 0 of this allocation.
    pub fn device_ptr(&self) -> u64 {
        match self {
            RawBuffer::Host { data } => data.lock().as_ptr() as u64,
            #[cfg(feature = "cuda")]
            RawBuffer::Cuda { data, device } => {
                let stream = device.default_stream();
                let slice = data.lock();
                let (ptr, _record) = slice.device_ptr(&stream);
                ptr
            }
        }
    }

    /// Overwrites `bytes` starting at byte `offset`.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        match self {
            RawBuffer::Host { data } => {
                data.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
            #[cfg(feature = "cuda")]
            RawBuffer::Cuda { data, device } => {
                let mut slice = data.lock();
                let mut view = slice.slice_mut(offset..offset + bytes.len());
                device.default_stream().memcpy_htod(bytes, &mut view).context(CudaSnafu)
            }
        }
    }

    /// Reads `out.len()` bytes starting at byte `offset`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        match self {
            RawBuffer::Host { data } => {
                out.copy_from_slice(&data.lock()[offset..offset + out.len()]);
                Ok(())
            }
            #[cfg(feature = "cuda")]
            RawBuffer::Cuda { data, device } => {
                let slice = data.lock();
                let view = slice.slice(offset..offset + out.len());
                let stream = device.default_stream();
                stream.memcpy_dtoh(&view, out).context(CudaSnafu)?;
                stream.synchronize().context(CudaSnafu)
            }
        }
    }

    /// Tiles `pattern` over the whole allocation.
    pub fn fill(&self, pattern: &[u8]) -> Result<()> {
        match self {
            RawBuffer::Host { data } => {
                for chunk in data.lock().chunks_mut(pattern.len()) {
                    chunk.copy_from_slice(&pattern[..chunk.len()]);
                }
                Ok(())
            }
            #[cfg(feature = "cuda")]
            RawBuffer::Cuda { .. } => {
                let tiled: Vec<u8> = pattern.iter().copied().cycle().take(self.size()).collect();
                self.write(0, &tiled)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BufferOptions {
    pub zero_init: bool,
}

pub trait Allocator: Send + Sync + std::fmt::Debug {
    fn alloc(&self, size: usize, options: &BufferOptions) -> Result<RawBuffer>;
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &str;
}

/// Host memory allocator backing the simulated device.
#[derive(Debug, Clone, Default)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn alloc(&self, size: usize, _options: &BufferOptions) -> Result<RawBuffer> {
        let data = vec![0u8; size].into_boxed_slice();
        Ok(RawBuffer::Host { data: Mutex::new(data) })
    }

    fn name(&self) -> &str {
        "HOST"
    }
}

#[cfg(feature = "cuda")]
#[derive(Debug, Clone)]
pub struct CudaAllocator {
    device: Arc<CudaContext>,
}

#[cfg(feature = "cuda")]
impl CudaAllocator {
    pub fn new(device: Arc<CudaContext>) -> Self {
        Self { device }
    }
}

#[cfg(feature = "cuda")]
impl Allocator for CudaAllocator {
    fn alloc(&self, size: usize, options: &BufferOptions) -> Result<RawBuffer> {
        // Zero-byte device allocations are rejected by the driver.
        let size = size.max(1);
        let stream = self.device.default_stream();
        let data = if options.zero_init { stream.alloc_zeros::<u8>(size) } else { unsafe { stream.alloc::<u8>(size) } }
            .context(CudaSnafu)?;

        Ok(RawBuffer::Cuda { data: Mutex::new(data), device: Arc::clone(&self.device) })
    }

    fn synchronize(&self) -> Result<()> {
        self.device.default_stream().synchronize().context(CudaSnafu)
    }

    fn name(&self) -> &str {
        "CUDA"
    }
}
