//! Lowered kernel: everything the executor needs to compile, size and launch a fusion.

use std::sync::Arc;

use kfuse_dtype::DType;

use crate::{AliasInfo, AllocationType, Expr, MemoryType, ParallelType, TensorDomain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u32);

impl TensorId {
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Host-evaluable definition of a tensor as a view of another tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOp {
    /// Same storage, same layout.
    Alias { source: TensorId },
    /// Same storage viewed with this tensor's logical extents.
    Reshape { source: TensorId },
    Permute { source: TensorId, dims: Vec<usize> },
}

impl ViewOp {
    pub fn source(&self) -> TensorId {
        match self {
            Self::Alias { source } | Self::Reshape { source } | Self::Permute { source, .. } => *source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorView {
    pub name: String,
    pub dtype: DType,
    pub domain: TensorDomain,
    pub definition: Option<ViewOp>,
}

impl TensorView {
    pub fn new(name: impl Into<String>, dtype: DType, domain: TensorDomain) -> Self {
        Self { name: name.into(), dtype, domain, definition: None }
    }
}

/// A buffer the kernel needs in some memory space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub buffer: TensorId,
    pub memory: MemoryType,
    pub shape: Vec<Expr>,
    /// Byte offset inside the dynamic shared memory region.
    pub address: Option<Expr>,
    /// Index of an earlier allocation whose memory this one reuses.
    pub alias: Option<usize>,
    pub zero_init: bool,
    /// The kernel restores the buffer to zero before exiting.
    pub resets_to_zero: bool,
}

impl Allocation {
    pub fn new(buffer: TensorId, memory: MemoryType, shape: Vec<Expr>) -> Self {
        Self { buffer, memory, shape, address: None, alias: None, zero_init: false, resets_to_zero: false }
    }

    /// Number of elements.
    pub fn size(&self) -> Expr {
        Expr::product(self.shape.iter().cloned())
    }

    pub fn has_constant_size(&self) -> bool {
        self.shape.iter().all(Expr::is_const)
    }
}

/// Fusion input or kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelValue {
    Tensor(TensorId),
    Scalar { name: Arc<str>, dtype: DType },
}

/// Launch extent of one parallel type, plus every loop extent bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelDimension {
    pub ptype: ParallelType,
    pub extent: Expr,
    pub bindings: Vec<Expr>,
}

/// Host-side check run once per input signature before the first launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub predicate: Expr,
    pub message: String,
}

/// Properties of the generated code the executor branches on.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct KernelSummary {
    #[builder(default)]
    pub has_block_reductions: bool,
    #[builder(default)]
    pub has_grid_reductions: bool,
    #[builder(default)]
    pub has_block_broadcasts: bool,
    #[builder(default)]
    pub has_grid_broadcasts: bool,
    #[builder(default)]
    pub has_block_welford: bool,
    #[builder(default)]
    pub has_grid_welford: bool,
    #[builder(default)]
    pub has_iter_grouped_reductions: bool,
    #[builder(default = 1)]
    pub num_grouped_iterations: i64,
    /// Widest element type held in shared memory by reductions and broadcasts.
    pub largest_smem_dtype: Option<DType>,
    /// Shared memory needed by outer-grouped grid welford, in bytes.
    pub outer_grouped_grid_welford_smem: Option<i64>,
    #[builder(default)]
    pub has_cooperative_grid_reduction: bool,
    /// Uses bulk tensor copies, which only address memory with 32-bit indices.
    #[builder(default)]
    pub has_bulk_copy: bool,
    #[builder(default = (7, 0))]
    pub min_device_version: (u32, u32),
    #[builder(default)]
    pub min_device_version_reason: String,
    pub profile_buffer: Option<TensorId>,
}

impl Default for KernelSummary {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl KernelSummary {
    pub fn has_block_or_grid_sync(&self) -> bool {
        self.has_block_reductions || self.has_grid_reductions || self.has_block_broadcasts || self.has_grid_broadcasts
    }

    pub fn has_welford(&self) -> bool {
        self.has_block_welford || self.has_grid_welford
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredKernel {
    pub(crate) tensors: Vec<TensorView>,
    pub(crate) inputs: Vec<KernelValue>,
    pub(crate) outputs: Vec<TensorId>,
    pub(crate) output_aliases: Vec<AliasInfo>,
    pub(crate) parameters: Vec<KernelValue>,
    pub(crate) allocations: Vec<Allocation>,
    pub(crate) parallel_dimensions: Vec<ParallelDimension>,
    pub(crate) validations: Vec<Validation>,
    pub(crate) expected_dynamic_smem: Option<i64>,
    pub(crate) summary: KernelSummary,
    pub(crate) body: String,
}

impl LoweredKernel {
    pub fn tensor(&self, id: TensorId) -> &TensorView {
        &self.tensors[id.index()]
    }

    pub fn tensors(&self) -> &[TensorView] {
        &self.tensors
    }

    pub fn inputs(&self) -> &[KernelValue] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn output_alias(&self, index: usize) -> AliasInfo {
        self.output_aliases[index]
    }

    pub fn output_aliases(&self) -> &[AliasInfo] {
        &self.output_aliases
    }

    pub fn parameters(&self) -> &[KernelValue] {
        &self.parameters
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn parallel_dimensions(&self) -> &[ParallelDimension] {
        &self.parallel_dimensions
    }

    pub fn validations(&self) -> &[Validation] {
        &self.validations
    }

    pub fn expected_dynamic_smem(&self) -> Option<i64> {
        self.expected_dynamic_smem
    }

    pub fn summary(&self) -> &KernelSummary {
        &self.summary
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// A kernel without a body only exists for its host-side outputs and is never launched.
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }

    /// Every output is produced on the host, so nothing needs to be compiled.
    pub fn is_expression_evaluated(&self) -> bool {
        !self.output_aliases.is_empty()
            && self.output_aliases.iter().all(|alias| alias.kind == AllocationType::Evaluate)
    }

    pub fn input_position(&self, id: TensorId) -> Option<usize> {
        self.inputs.iter().position(|input| *input == KernelValue::Tensor(id))
    }

    pub fn output_position(&self, id: TensorId) -> Option<usize> {
        self.outputs.iter().position(|output| *output == id)
    }

    pub fn is_input(&self, id: TensorId) -> bool {
        self.input_position(id).is_some()
    }

    pub fn is_output(&self, id: TensorId) -> bool {
        self.output_position(id).is_some()
    }

    /// Global allocations that are neither fusion inputs nor outputs.
    pub fn intermediate_allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations
            .iter()
            .filter(|alloc| alloc.memory == MemoryType::Global)
            .filter(|alloc| !self.is_output(alloc.buffer) && !self.is_input(alloc.buffer))
    }

    pub fn allocations_in(&self, memory: MemoryType) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter().filter(move |alloc| alloc.memory == memory)
    }

    /// Local allocations whose size is only known at run time.
    pub fn dynamic_local_allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations_in(MemoryType::Local).filter(|alloc| !alloc.has_constant_size())
    }

    /// Whether some output extent reads a scalar fusion input, making output sizes
    /// unsafe to cache per input shape.
    pub fn output_extents_depend_on_scalar_inputs(&self) -> bool {
        let scalar_inputs: Vec<&str> = self
            .inputs
            .iter()
            .filter_map(|input| match input {
                KernelValue::Scalar { name, .. } => Some(&**name),
                KernelValue::Tensor(_) => None,
            })
            .collect();
        if scalar_inputs.is_empty() {
            return false;
        }

        self.outputs.iter().any(|output| {
            let domain = &self.tensor(*output).domain;
            domain.maybe_allocation().iter().map(|id| domain.id(*id)).any(|id| {
                !(id.is_reduction() || id.is_stride() || id.is_device_dim())
                    && id.maybe_expanded_extent().symbols().iter().any(|symbol| scalar_inputs.contains(&&**symbol))
            })
        })
    }
}
