//! Fusion execution for kfuse kernels.
//!
//! Takes a [`LoweredKernel`](kfuse_ir::LoweredKernel), compiles it through a
//! [`Driver`](kfuse_device::Driver) and launches it for concrete arguments.
//!
//! # Module Organization
//!
//! - [`executor`] - [`FusionExecutor`]: compilation, per-signature caching and launch
//! - [`compiler`] - index width selection, pre-compile checks, binary loading
//! - [`codegen`] - device source assembly and external source overrides
//! - [`launch`] - launch extents and shared memory sizing
//! - [`allocation`] / [`replay`] - output and intermediate sizing and allocation
//! - [`marshal`] - kernel argument slots
//! - [`persist`] - saving and restoring an executor
//! - [`kernel_cache`] - process-wide compiled binary deduplication
//!
//! # Caching
//!
//! Two caches cooperate. Each executor keeps one [`ExecutorEntry`] per caller-provided
//! shape signature (launch parameters, buffer shapes, argument layout). Compiled binaries
//! are shared between all executors through [`kernel_cache`], keyed by source and compile
//! options, so recompiling an identical variant only reloads it.

pub mod allocation;
pub mod arguments;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod kernel_cache;
pub mod launch;
pub mod launch_params;
pub mod marshal;
pub mod persist;
pub mod replay;


pub use allocation::GlobalBufferInfo;
pub use arguments::{ArgValue, KernelArgumentHolder, ScalarValue};
pub use compiler::{CompiledKernel, KernelIdentity};
pub use config::{CompileParams, ExecutorOptions};
pub use error::*;
pub use evaluator::RuntimeEvaluator;
pub use executor::{ExecutorEntry, ExecutorStats, FusionExecutor, global_fusion_count};
pub use launch_params::LaunchParams;
pub use marshal::ArgumentLayout;
