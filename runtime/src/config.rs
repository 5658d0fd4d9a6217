//! Executor configuration.
//!
//! Provides typed configuration with bon builders and environment variable fallbacks.

use std::path::PathBuf;

use bon::bon;
use kfuse_dtype::IndexType;

// ============================================================================
// EXECUTOR OPTIONS
// ============================================================================

/// Behavior switches shared by every launch of one executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Fill freshly allocated outputs and intermediates with a poison pattern.
    pub fill_with_poison: bool,
    /// Serve zero-initialized intermediates from a pool reused across launches.
    pub reuse_zeroed_memory: bool,
    /// Launch kernels. When off, buffers are still planned and arguments still marshalled.
    pub execute_kernel: bool,
    /// Allocate the kernel's profile buffer.
    pub kernel_profile: bool,
    /// Query occupancy before each launch and log it.
    pub debug_occupancy: bool,
    /// Hand-written sources replacing generated ones, picked by global fusion count.
    pub external_sources: Vec<PathBuf>,
    /// Directory receiving every compiled source.
    pub dump_source_dir: Option<PathBuf>,
}

#[bon]
impl ExecutorOptions {
    #[builder]
    pub fn builder(
        #[builder(default = false)] fill_with_poison: bool,
        #[builder(default = false)] reuse_zeroed_memory: bool,
        #[builder(default = true)] execute_kernel: bool,
        #[builder(default = false)] kernel_profile: bool,
        #[builder(default = false)] debug_occupancy: bool,
        #[builder(default)] external_sources: Vec<PathBuf>,
        dump_source_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            fill_with_poison,
            reuse_zeroed_memory,
            execute_kernel,
            kernel_profile,
            debug_occupancy,
            external_sources,
            dump_source_dir,
        }
    }

    /// Create options from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KFUSE_FILL_POISON` - Poison new allocations if set
    /// * `KFUSE_REUSE_ZEROED_MEMORY` - Pool zero-initialized intermediates if set
    /// * `KFUSE_NO_EXECUTE` - Skip kernel launches if set
    /// * `KFUSE_KERNEL_PROFILE` - Allocate kernel profile buffers if set
    /// * `KFUSE_DEBUG_OCCUPANCY` - Log occupancy before launches if set
    /// * `KFUSE_EXTERNAL_SRC` - Comma-separated list of replacement source files
    /// * `KFUSE_DUMP_DIR` - Directory receiving compiled sources
    pub fn from_env() -> Self {
        let external_sources = std::env::var("KFUSE_EXTERNAL_SRC")
            .map(|list| list.split(',').map(str::trim).filter(|path| !path.is_empty()).map(PathBuf::from).collect())
            .unwrap_or_default();

        Self {
            fill_with_poison: std::env::var("KFUSE_FILL_POISON").is_ok(),
            reuse_zeroed_memory: std::env::var("KFUSE_REUSE_ZEROED_MEMORY").is_ok(),
            execute_kernel: std::env::var("KFUSE_NO_EXECUTE").is_err(),
            kernel_profile: std::env::var("KFUSE_KERNEL_PROFILE").is_ok(),
            debug_occupancy: std::env::var("KFUSE_DEBUG_OCCUPANCY").is_ok(),
            external_sources,
            dump_source_dir: std::env::var("KFUSE_DUMP_DIR").ok().map(PathBuf::from),
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

// ============================================================================
// COMPILE PARAMETERS
// ============================================================================

/// Per-call compilation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileParams {
    /// Forced index width. `None` picks the narrowest width the arguments allow.
    pub index_type: Option<IndexType>,
    /// Register budget per thread. A change triggers recompilation.
    pub max_register_count: Option<u32>,
    /// Emits the magic-zero helper in generated code. Bulk copies turn it off.
    pub enable_magic_zero: bool,
}

impl Default for CompileParams {
    fn default() -> Self {
        Self { index_type: None, max_register_count: None, enable_magic_zero: true }
    }
}

impl CompileParams {
    pub fn with_index_type(index_type: IndexType) -> Self {
        Self { index_type: Some(index_type), ..Default::default() }
    }
}
