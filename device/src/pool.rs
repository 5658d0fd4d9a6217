//! Zero-initialized scratch memory reused across launches.
//!
//! Kernels that restore their scratch buffers to zero before exiting can share one pool:
//! blocks handed out during a launch become available again after
//! [`ZeroedMemoryPool::release_all`].

use std::sync::Arc;

use kfuse_dtype::DType;
use parking_lot::Mutex;

use crate::allocator::{Allocator, BufferOptions};
use crate::buffer::{Buffer, Storage};
use crate::error::Result;
use crate::layout::Layout;

#[derive(Debug)]
struct Block {
    storage: Arc<Storage>,
    in_use: bool,
}

#[derive(Debug)]
pub struct ZeroedMemoryPool {
    allocator: Arc<dyn Allocator>,
    blocks: Mutex<Vec<Block>>,
}

impl ZeroedMemoryPool {
    pub fn new(allocator: Arc<dyn Allocator>) -> Self {
        Self { allocator, blocks: Mutex::new(Vec::new()) }
    }

    /// Contiguous zeroed buffer of `sizes`, carved from a free block when one is large enough.
    pub fn acquire(&self, dtype: DType, sizes: &[i64]) -> Result<Buffer> {
        let layout = Layout::contiguous(sizes);
        let bytes = layout.storage_extent().max(0) as usize * dtype.bytes();

        let mut blocks = self.blocks.lock();
        let reusable = blocks
            .iter_mut()
            .filter(|block| !block.in_use && block.storage.bytes() >= bytes)
            .min_by_key(|block| block.storage.bytes());
        let storage = match reusable {
            Some(block) => {
                block.in_use = true;
                Arc::clone(&block.storage)
            }
            None => {
                let storage = Storage::allocate(&self.allocator, bytes, &BufferOptions { zero_init: true })?;
                tracing::trace!(bytes, "zeroed pool grew");
                blocks.push(Block { storage: Arc::clone(&storage), in_use: true });
                storage
            }
        };
        Buffer::from_storage(storage, dtype, layout, 0)
    }

    /// Marks every block free. Callers guarantee the blocks were left zeroed.
    pub fn release_all(&self) {
        self.blocks.lock().iter_mut().for_each(|block| block.in_use = false);
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_use(&self) -> usize {
        self.blocks.lock().iter().filter(|block| block.in_use).count()
    }
}
