use std::fmt;

use kfuse_device::LaunchConfig;
use kfuse_ir::ParallelType;
use snafu::OptionExt;
use strum::{EnumCount, IntoEnumIterator};

use crate::error::*;

/// Grid and block extents plus dynamic shared memory for one launch.
///
/// Unset extents launch as 1. Also used by callers to constrain specific extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaunchParams {
    dims: [Option<i64>; ParallelType::COUNT],
    smem: i64,
}

impl LaunchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constraint set pinning the given extents.
    pub fn with(bindings: impl IntoIterator<Item = (ParallelType, i64)>) -> Self {
        let mut params = Self::new();
        for (ptype, value) in bindings {
            params.bind(ptype, value);
        }
        params
    }

    pub fn bind(&mut self, ptype: ParallelType, value: i64) {
        self.dims[ptype.index()] = Some(value);
    }

    pub fn get(&self, ptype: ParallelType) -> Option<i64> {
        self.dims[ptype.index()]
    }

    pub fn has_dim(&self, ptype: ParallelType) -> bool {
        self.get(ptype).is_some()
    }

    /// Extent used at launch time.
    pub fn dim(&self, ptype: ParallelType) -> i64 {
        self.get(ptype).unwrap_or(1)
    }

    pub fn bound(&self) -> impl Iterator<Item = (ParallelType, i64)> + '_ {
        ParallelType::iter().filter_map(|ptype| self.get(ptype).map(|value| (ptype, value)))
    }

    pub fn n_threads(&self) -> i64 {
        self.dim(ParallelType::TIDx) * self.dim(ParallelType::TIDy) * self.dim(ParallelType::TIDz)
    }

    pub fn n_blocks(&self) -> i64 {
        self.dim(ParallelType::BIDx) * self.dim(ParallelType::BIDy) * self.dim(ParallelType::BIDz)
    }

    pub fn smem(&self) -> i64 {
        self.smem
    }

    pub fn set_smem(&mut self, bytes: i64) {
        self.smem = bytes;
    }

    /// Driver launch configuration. Fails when an extent does not fit the driver's 32-bit fields.
    pub fn to_config(&self) -> Result<LaunchConfig> {
        let dim = |ptype: ParallelType| {
            let value = self.dim(ptype);
            u32::try_from(value).ok().context(LaunchExtentOverflowSnafu { what: ptype.to_string(), value })
        };
        let shared_mem_bytes = u32::try_from(self.smem)
            .ok()
            .context(LaunchExtentOverflowSnafu { what: "dynamic shared memory", value: self.smem })?;
        Ok(LaunchConfig {
            grid: [dim(ParallelType::BIDx)?, dim(ParallelType::BIDy)?, dim(ParallelType::BIDz)?],
            block: [dim(ParallelType::TIDx)?, dim(ParallelType::TIDy)?, dim(ParallelType::TIDz)?],
            shared_mem_bytes,
        })
    }
}

impl fmt::Display for LaunchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ParallelType::*;
        write!(
            f,
            "grid({}, {}, {}) block({}, {}, {}) smem {}",
            self.dim(BIDx),
            self.dim(BIDy),
            self.dim(BIDz),
            self.dim(TIDx),
            self.dim(TIDy),
            self.dim(TIDz),
            self.smem
        )
    }
}
