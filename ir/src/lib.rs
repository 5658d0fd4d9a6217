//! Lowered kernel description consumed by the fusion executor.
//!
//! # Module Organization
//!
//! - [`expr`] - Symbolic integer expressions over input extents and launch dimensions
//! - [`evaluator`] - Binding symbols to values and evaluating expressions
//! - [`domain`] - Iteration domains with split/merge history
//! - [`kernel`] - Tensors, allocations, parameters and the kernel summary
//! - [`builder`] - Assembling a [`LoweredKernel`]
//! - [`types`] - Parallel types, memory spaces and aliasing vocabulary

pub mod builder;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod kernel;
pub mod types;


pub use builder::KernelBuilder;
pub use domain::{IterDomain, IterId, IterType, TensorDomain, Transform};
pub use error::{Error, Result};
pub use evaluator::ExpressionEvaluator;
pub use expr::{BinaryOp, Expr};
pub use kernel::{
    Allocation, KernelSummary, KernelValue, LoweredKernel, ParallelDimension, TensorId, TensorView, Validation, ViewOp,
};
pub use types::{AliasInfo, AllocationType, IoRef, MemoryType, ParallelType, ScheduleHeuristic};

pub use kfuse_dtype::{DType, IndexType};
