//! Native kernel argument layout.
//!
//! Every kernel parameter gets one fixed-size byte slot. Tensor slots hold the
//! `Tensor<T, N>` struct of the generated code: data pointer, `N` logical sizes and `N` strides,
//! all at the kernel's index width. Slot sizes depend only on parameter ranks, types and the
//! index width, so a layout is computed once per cached entry and only its contents are refreshed.

use std::ffi::c_void;

use kfuse_device::Buffer;
use kfuse_dtype::{DType, IndexType};
use kfuse_ir::{KernelValue, LoweredKernel};
use snafu::{OptionExt, ensure};

use crate::arguments::ScalarValue;
use crate::error::*;
use crate::evaluator::RuntimeEvaluator;

const POINTER_BYTES: usize = std::mem::size_of::<u64>();

/// Pointer to an argument slot, as handed to the driver.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
struct SlotPtr(*mut c_void);

// SAFETY: SlotPtr points into a boxed slot owned by the same ArgumentLayout, which moves
// together with it and is only written through `&mut ArgumentLayout`.
unsafe impl Send for SlotPtr {}
unsafe impl Sync for SlotPtr {}

/// Bytes of a tensor argument of `rank` dimensions, padded to pointer alignment.
pub fn tensor_slot_size(rank: usize, index_type: IndexType) -> usize {
    let bytes = POINTER_BYTES + 2 * rank * index_type.bytes();
    bytes.div_ceil(POINTER_BYTES) * POINTER_BYTES
}

fn scalar_slot_size(name: &str, dtype: DType, index_type: IndexType) -> Result<usize> {
    ensure!(
        dtype.is_bool() || dtype.is_int() || matches!(dtype, DType::Float32 | DType::Float64 | DType::Index),
        UnsupportedScalarSnafu { name, dtype }
    );
    Ok(dtype.size_with(index_type))
}

fn write_index(out: &mut [u8], values: &[i64], index_type: IndexType) {
    match index_type {
        IndexType::Int64 => {
            for (chunk, value) in out.chunks_exact_mut(8).zip(values) {
                chunk.copy_from_slice(&value.to_le_bytes());
            }
        }
        IndexType::Int32 => {
            for (chunk, value) in out.chunks_exact_mut(4).zip(values) {
                chunk.copy_from_slice(&(*value as i32).to_le_bytes());
            }
        }
    }
}

fn write_tensor(slot: &mut [u8], buffer: &Buffer, index_type: IndexType) {
    let width = index_type.bytes();
    let rank = buffer.rank();
    slot[..POINTER_BYTES].copy_from_slice(&buffer.device_ptr().to_le_bytes());
    let sizes_end = POINTER_BYTES + rank * width;
    write_index(&mut slot[POINTER_BYTES..sizes_end], buffer.sizes(), index_type);
    write_index(&mut slot[sizes_end..sizes_end + rank * width], buffer.strides(), index_type);
}

fn write_scalar(slot: &mut [u8], dtype: DType, value: ScalarValue, index_type: IndexType) {
    let int = || value.as_i64().unwrap_or(value.as_f64() as i64);
    match dtype.resolve_index(index_type) {
        DType::Bool => slot[0] = (int() != 0) as u8,
        DType::Float32 => slot.copy_from_slice(&(value.as_f64() as f32).to_le_bytes()),
        DType::Float64 => slot.copy_from_slice(&value.as_f64().to_le_bytes()),
        _ => {
            let bytes = int().to_le_bytes();
            slot.copy_from_slice(&bytes[..slot.len()]);
        }
    }
}

/// One byte slot per kernel parameter, plus the pointer array passed to launches.
#[derive(Debug, Default)]
pub struct ArgumentLayout {
    index_type: Option<IndexType>,
    slots: Vec<Box<[u8]>>,
    pointers: Vec<SlotPtr>,
}

impl ArgumentLayout {
    /// Sizes the slots for `kernel` and fills them from `evaluator`.
    pub fn compute(kernel: &LoweredKernel, evaluator: &RuntimeEvaluator, index_type: IndexType) -> Result<Self> {
        let slots = kernel
            .parameters()
            .iter()
            .map(|param| {
                let size = match param {
                    KernelValue::Tensor(id) => tensor_slot_size(kernel.tensor(*id).domain.rank(), index_type),
                    KernelValue::Scalar { name, dtype } => scalar_slot_size(name, *dtype, index_type)?,
                };
                Ok(vec![0u8; size].into_boxed_slice())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut layout = Self { index_type: Some(index_type), slots, pointers: Vec::new() };
        layout.pointers = layout.slots.iter_mut().map(|slot| SlotPtr(slot.as_mut_ptr().cast())).collect();
        tracing::debug!(args.count = layout.len(), args.bytes = layout.total_bytes(), "argument layout built");

        layout.refresh(kernel, evaluator)?;
        Ok(layout)
    }

    /// Rewrites slot contents for the values currently bound in `evaluator`. Slot sizes never change.
    pub fn refresh(&mut self, kernel: &LoweredKernel, evaluator: &RuntimeEvaluator) -> Result<()> {
        let index_type = self.index_type.context(NotCompiledSnafu)?;
        let params = kernel.parameters();
        ensure!(
            params.len() == self.slots.len(),
            ArgumentLayoutSnafu {
                parameter: self.slots.len().min(params.len()),
                reason: format!("layout has {} slots for {} parameters", self.slots.len(), params.len()),
            }
        );

        for (parameter, (param, slot)) in params.iter().zip(self.slots.iter_mut()).enumerate() {
            match param {
                KernelValue::Tensor(id) => {
                    let tv = kernel.tensor(*id);
                    let buffer = evaluator.tensor(*id).context(ArgumentLayoutSnafu {
                        parameter,
                        reason: format!("{} is not bound", tv.name),
                    })?;
                    ensure!(
                        tensor_slot_size(buffer.rank(), index_type) == slot.len(),
                        ArgumentLayoutSnafu {
                            parameter,
                            reason: format!("{} has rank {}, expected {}", tv.name, buffer.rank(), tv.domain.rank()),
                        }
                    );
                    write_tensor(slot, buffer, index_type);
                }
                KernelValue::Scalar { name, dtype } => {
                    let value = evaluator
                        .scalar_value(name)
                        .context(ArgumentLayoutSnafu { parameter, reason: format!("scalar {name} is not bound") })?;
                    write_scalar(slot, *dtype, value, index_type);
                }
            }
        }
        Ok(())
    }

    /// Layout for raw tensor arguments, in order, with no kernel description behind them.
    pub fn for_buffers(buffers: &[Buffer], index_type: IndexType) -> Self {
        let mut slots: Vec<Box<[u8]>> = buffers
            .iter()
            .map(|buffer| {
                let mut slot = vec![0u8; tensor_slot_size(buffer.rank(), index_type)].into_boxed_slice();
                write_tensor(&mut slot, buffer, index_type);
                slot
            })
            .collect();
        let pointers = slots.iter_mut().map(|slot| SlotPtr(slot.as_mut_ptr().cast())).collect();
        Self { index_type: Some(index_type), slots, pointers }
    }

    /// Whether slot sizes have been computed. A built layout may still be empty.
    pub fn is_built(&self) -> bool {
        self.index_type.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn index_type(&self) -> Option<IndexType> {
        self.index_type
    }

    pub fn slot(&self, index: usize) -> &[u8] {
        &self.slots[index]
    }

    pub fn slot_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().map(|slot| slot.len())
    }

    pub fn total_bytes(&self) -> usize {
        self.slot_sizes().sum()
    }

    /// Pointer array in the form driver launches take.
    pub fn pointers_mut(&mut self) -> &mut [*mut c_void] {
        // SAFETY: SlotPtr is repr(transparent) over *mut c_void.
        unsafe { std::slice::from_raw_parts_mut(self.pointers.as_mut_ptr().cast(), self.pointers.len()) }
    }
}
