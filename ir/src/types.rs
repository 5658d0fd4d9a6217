//! Small vocabulary types shared by the lowered kernel description.

/// Hardware launch dimension a loop can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ParallelType {
    BIDx = 0,
    BIDy = 1,
    BIDz = 2,
    TIDx = 3,
    TIDy = 4,
    TIDz = 5,
}

impl ParallelType {
    pub const fn index(&self) -> usize {
        *self as usize
    }

    pub const fn is_block_dim(&self) -> bool {
        matches!(self, Self::TIDx | Self::TIDy | Self::TIDz)
    }

    pub const fn is_grid_dim(&self) -> bool {
        matches!(self, Self::BIDx | Self::BIDy | Self::BIDz)
    }

    /// Name of the launch extent in device code.
    pub const fn extent_name(&self) -> &'static str {
        match self {
            Self::BIDx => "gridDim.x",
            Self::BIDy => "gridDim.y",
            Self::BIDz => "gridDim.z",
            Self::TIDx => "blockDim.x",
            Self::TIDy => "blockDim.y",
            Self::TIDz => "blockDim.z",
        }
    }
}

/// Memory space of a kernel allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryType {
    Local,
    StaticShared,
    DynamicShared,
    Global,
}

/// How an output buffer comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(strum::FromRepr, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AllocationType {
    /// Freshly allocated device memory.
    #[default]
    New = 0,
    /// The output is the aliased fusion input or output itself.
    ReuseBuffer = 1,
    /// The output is computed on the host as a view of existing tensors.
    Evaluate = 2,
}

/// Position of a fusion input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IoRef {
    Input(usize),
    Output(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AliasInfo {
    pub kind: AllocationType,
    pub aliased_io: Option<IoRef>,
}

impl AliasInfo {
    pub const NEW: Self = Self { kind: AllocationType::New, aliased_io: None };

    pub const fn reuse(io: IoRef) -> Self {
        Self { kind: AllocationType::ReuseBuffer, aliased_io: Some(io) }
    }

    pub const fn evaluate(io: Option<IoRef>) -> Self {
        Self { kind: AllocationType::Evaluate, aliased_io: io }
    }
}

/// Scheduler that produced a kernel. Part of the kernel identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(strum::EnumCount, strum::EnumIter, strum::FromRepr, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ScheduleHeuristic {
    #[default]
    None = 0,
    NoOp = 1,
    PointWise = 2,
    Reduction = 3,
    InnerPersistent = 4,
    OuterPersistent = 5,
    InnerOuterPersistent = 6,
    Transpose = 7,
    Matmul = 8,
    ExprEval = 9,
}
