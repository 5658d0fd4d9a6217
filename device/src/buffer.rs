use std::sync::Arc;

use kfuse_dtype::DType;
use kfuse_dtype::ext::HasDType;
use snafu::ensure;

use crate::allocator::{Allocator, BufferOptions, RawBuffer};
use crate::error::*;
use crate::layout::{Dims, Layout};

/// Backing allocation shared by every view of it.
#[derive(Debug)]
pub struct Storage {
    raw: RawBuffer,
    allocator: Arc<dyn Allocator>,
}

impl Storage {
    pub fn allocate(allocator: &Arc<dyn Allocator>, bytes: usize, options: &BufferOptions) -> Result<Arc<Self>> {
        let raw = allocator.alloc(bytes, options)?;
        Ok(Arc::new(Self { raw, allocator: Arc::clone(allocator) }))
    }

    pub fn raw(&self) -> &RawBuffer {
        &self.raw
    }

    pub fn bytes(&self) -> usize {
        self.raw.size()
    }

    pub fn allocator(&self) -> &dyn Allocator {
        &*self.allocator
    }
}

/// Strided tensor view over shared device storage.
///
/// Cloning and every view operation share the storage, so aliasing is observable through
/// [`Buffer::is_alias_of`].
#[derive(Debug, Clone)]
pub struct Buffer {
    storage: Arc<Storage>,
    layout: Layout,
    /// Element offset of index zero inside the storage.
    offset: i64,
    dtype: DType,
}

impl Buffer {
    /// Allocates storage for exactly the elements `sizes`/`strides` can address.
    pub fn empty_strided(
        allocator: &Arc<dyn Allocator>,
        dtype: DType,
        sizes: &[i64],
        strides: &[i64],
        options: BufferOptions,
    ) -> Result<Self> {
        let layout = Layout::new(sizes, strides);
        let bytes = layout.storage_extent() as usize * dtype.bytes();
        let storage = Storage::allocate(allocator, bytes, &options)?;
        Ok(Self { storage, layout, offset: 0, dtype })
    }

    pub fn empty(allocator: &Arc<dyn Allocator>, dtype: DType, sizes: &[i64]) -> Result<Self> {
        let layout = Layout::contiguous(sizes);
        Self::empty_strided(allocator, dtype, sizes, &layout.strides, BufferOptions::default())
    }

    pub fn zeros(allocator: &Arc<dyn Allocator>, dtype: DType, sizes: &[i64]) -> Result<Self> {
        let layout = Layout::contiguous(sizes);
        Self::empty_strided(allocator, dtype, sizes, &layout.strides, BufferOptions { zero_init: true })
    }

    /// Contiguous buffer holding `values`.
    pub fn from_slice<T: HasDType>(allocator: &Arc<dyn Allocator>, values: &[T], sizes: &[i64]) -> Result<Self> {
        let numel: i64 = sizes.iter().product();
        ensure!(numel as usize == values.len(), SizeMismatchSnafu { expected: numel as usize, actual: values.len() });

        let buffer = Self::empty(allocator, T::DTYPE, sizes)?;
        let mut bytes = Vec::with_capacity(values.len() * T::DTYPE.bytes());
        values.iter().for_each(|value| value.to_le(&mut bytes));
        buffer.storage.raw.write(0, &bytes)?;
        Ok(buffer)
    }

    /// View sharing `storage`, checked to stay inside it.
    pub fn from_storage(storage: Arc<Storage>, dtype: DType, layout: Layout, offset: i64) -> Result<Self> {
        let buffer = Self { storage, layout, offset, dtype };
        buffer.check_bounds()?;
        Ok(buffer)
    }

    fn check_bounds(&self) -> Result<()> {
        let storage = (self.storage.bytes() / self.dtype.bytes().max(1)) as i64;
        let empty = self.layout.sizes.contains(&0);
        let in_bounds = empty || (self.offset >= 0 && self.offset + self.layout.storage_extent() <= storage);
        ensure!(
            in_bounds,
            InvalidViewSnafu {
                sizes: self.layout.sizes.to_vec(),
                strides: self.layout.strides.to_vec(),
                offset: self.offset,
                storage,
            }
        );
        Ok(())
    }

    fn with_layout(&self, layout: Layout) -> Self {
        Self { storage: Arc::clone(&self.storage), layout, offset: self.offset, dtype: self.dtype }
    }

    pub fn as_strided(&self, sizes: &[i64], strides: &[i64], offset: i64) -> Result<Self> {
        let layout = Layout::new(sizes, strides);
        Self::from_storage(Arc::clone(&self.storage), self.dtype, layout, offset)
    }

    /// Reshape without copying. Fails when the strides cannot express `sizes`.
    pub fn view(&self, sizes: &[i64]) -> Result<Self> {
        Ok(self.with_layout(self.layout.view(sizes)?))
    }

    pub fn permute(&self, dims: &[usize]) -> Result<Self> {
        Ok(self.with_layout(self.layout.permute(dims)?))
    }

    pub fn expand(&self, sizes: &[i64]) -> Result<Self> {
        Ok(self.with_layout(self.layout.expand(sizes)?))
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn sizes(&self) -> &[i64] {
        &self.layout.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.layout.strides
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn numel(&self) -> i64 {
        self.layout.numel()
    }

    pub fn storage_offset(&self) -> i64 {
        self.offset
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn storage_bytes(&self) -> usize {
        self.storage.bytes()
    }

    /// Identity of the backing allocation.
    pub fn storage_id(&self) -> usize {
        Arc::as_ptr(&self.storage) as usize
    }

    pub fn is_alias_of(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Address of element zero as seen by kernels.
    pub fn device_ptr(&self) -> u64 {
        self.storage.raw.device_ptr() + (self.offset as u64) * self.dtype.bytes() as u64
    }

    /// Bytes of the tensor itself, ignoring padding in the storage.
    pub fn nbytes(&self) -> usize {
        self.numel() as usize * self.dtype.bytes()
    }

    pub fn synchronize(&self) -> Result<()> {
        self.storage.allocator.synchronize()
    }

    /// Fills the whole storage with the dtype's poison pattern.
    pub fn fill_poison(&self) -> Result<()> {
        self.storage.raw.fill(&self.dtype.poison())
    }

    pub fn fill_zero(&self) -> Result<()> {
        self.storage.raw.fill(&[0])
    }

    /// Overwrites the whole storage with `src`.
    pub fn copyin(&self, src: &[u8]) -> Result<()> {
        let expected = self.storage.bytes();
        ensure!(expected == src.len(), SizeMismatchSnafu { expected, actual: src.len() });
        self.storage.raw.write(0, src)
    }

    /// Copies the whole storage out.
    pub fn copyout(&self, dst: &mut [u8]) -> Result<()> {
        let expected = self.storage.bytes();
        ensure!(expected == dst.len(), SizeMismatchSnafu { expected, actual: dst.len() });
        self.storage.raw.read(0, dst)
    }

    /// Gathers the elements in logical row-major order.
    pub fn to_vec<T: HasDType>(&self) -> Result<Vec<T>> {
        let width = self.dtype.bytes();
        ensure!(T::DTYPE.bytes() == width, SizeMismatchSnafu { expected: width, actual: T::DTYPE.bytes() });

        let mut raw = vec![0u8; self.storage.bytes()];
        self.storage.raw.read(0, &mut raw)?;

        let numel = self.numel().max(0) as usize;
        let mut out = Vec::with_capacity(numel);
        let mut index: Dims = Dims::from_elem(0, self.rank());
        for _ in 0..numel {
            let element: i64 = self.offset + index.iter().zip(&self.layout.strides).map(|(i, s)| i * s).sum::<i64>();
            let start = element as usize * width;
            out.push(T::from_le(&raw[start..start + width]));
            for dim in (0..self.rank()).rev() {
                index[dim] += 1;
                if index[dim] < self.layout.sizes[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }
        Ok(out)
    }
}
