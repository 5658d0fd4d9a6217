use std::sync::Arc;

use kfuse_dtype::DType;
use snafu::ensure;

use crate::error::*;
use crate::{
    AliasInfo, AllocationType, Allocation, Expr, IoRef, KernelSummary, KernelValue, LoweredKernel, MemoryType,
    ParallelDimension, ParallelType, TensorDomain, TensorId, TensorView, Validation, ViewOp,
};

/// Incrementally assembles a [`LoweredKernel`].
///
/// Kernel parameters are derived on [`build`](Self::build): fusion inputs, then outputs
/// written by the kernel, then global intermediates.
#[derive(Debug, Default)]
pub struct KernelBuilder {
    tensors: Vec<TensorView>,
    inputs: Vec<KernelValue>,
    outputs: Vec<TensorId>,
    output_aliases: Vec<AliasInfo>,
    allocations: Vec<Allocation>,
    parallel_dimensions: Vec<ParallelDimension>,
    validations: Vec<Validation>,
    expected_dynamic_smem: Option<i64>,
    summary: KernelSummary,
    body: String,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tensor(&mut self, name: impl Into<String>, dtype: DType, domain: TensorDomain) -> TensorId {
        self.tensors.push(TensorView::new(name, dtype, domain));
        TensorId(self.tensors.len() as u32 - 1)
    }

    /// Tensor defined on the host as a view of `op.source()`.
    pub fn view(&mut self, name: impl Into<String>, dtype: DType, domain: TensorDomain, op: ViewOp) -> TensorId {
        let id = self.tensor(name, dtype, domain);
        self.tensors[id.index()].definition = Some(op);
        id
    }

    /// Registers a rank-`rank` tensor input with symbolic extents `{name}.size[i]`.
    pub fn input_tensor(&mut self, name: &str, dtype: DType, rank: usize) -> TensorId {
        let id = self.tensor(name, dtype, TensorDomain::symbolic(name, rank));
        self.inputs.push(KernelValue::Tensor(id));
        id
    }

    pub fn input(&mut self, id: TensorId) {
        self.inputs.push(KernelValue::Tensor(id));
    }

    /// Registers a scalar input and returns the symbol it binds.
    pub fn scalar_input(&mut self, name: &str, dtype: DType) -> Expr {
        let name: Arc<str> = name.into();
        self.inputs.push(KernelValue::Scalar { name: name.clone(), dtype });
        Expr::Symbol(name)
    }

    pub fn output(&mut self, id: TensorId) {
        self.aliased_output(id, AliasInfo::NEW);
    }

    pub fn aliased_output(&mut self, id: TensorId, alias: AliasInfo) {
        self.outputs.push(id);
        self.output_aliases.push(alias);
    }

    pub fn allocate(&mut self, allocation: Allocation) -> usize {
        self.allocations.push(allocation);
        self.allocations.len() - 1
    }

    /// Global allocation over the logical extents of `id`.
    pub fn allocate_global(&mut self, id: TensorId) -> usize {
        let domain = &self.tensors[id.index()].domain;
        let shape = domain.no_reductions(domain.logical()).map(|dim| domain.id(dim).extent.clone()).collect();
        self.allocate(Allocation::new(id, MemoryType::Global, shape))
    }

    pub fn parallelize(&mut self, ptype: ParallelType, extent: impl Into<Expr>, bindings: Vec<Expr>) {
        self.parallel_dimensions.push(ParallelDimension { ptype, extent: extent.into(), bindings });
    }

    pub fn validate(&mut self, predicate: Expr, message: impl Into<String>) {
        self.validations.push(Validation { predicate, message: message.into() });
    }

    pub fn expected_dynamic_smem(&mut self, bytes: i64) {
        self.expected_dynamic_smem = Some(bytes);
    }

    pub fn summary(&mut self, summary: KernelSummary) {
        self.summary = summary;
    }

    pub fn body(&mut self, code: impl Into<String>) {
        self.body = code.into();
    }

    pub fn build(self) -> Result<LoweredKernel> {
        ensure!(!self.outputs.is_empty(), NoOutputsSnafu);

        let known = |id: TensorId| id.index() < self.tensors.len();
        for id in self.inputs.iter().filter_map(tensor_of).chain(self.outputs.iter().copied()) {
            ensure!(known(id), UnknownTensorSnafu { id });
        }
        for tensor in &self.tensors {
            if let Some(op) = &tensor.definition {
                ensure!(known(op.source()), UnknownTensorSnafu { id: op.source() });
            }
            let domain = &tensor.domain;
            let bad_expand = domain
                .logical()
                .iter()
                .map(|id| domain.id(*id))
                .any(|id| id.has_expanded_extent() && !id.is_broadcast());
            ensure!(!bad_expand, ExpandedNonBroadcastSnafu { name: tensor.name.clone() });
        }
        for (output, alias) in self.output_aliases.iter().enumerate() {
            if let Some(io) = alias.aliased_io {
                let exists = match io {
                    IoRef::Input(index) => index < self.inputs.len(),
                    IoRef::Output(index) => index < self.outputs.len() && index != output,
                };
                ensure!(exists, DanglingAliasSnafu { output, io });
            }
        }
        for (index, allocation) in self.allocations.iter().enumerate() {
            ensure!(known(allocation.buffer), UnknownTensorSnafu { id: allocation.buffer });
            if let Some(target) = allocation.alias {
                ensure!(target < index, InvalidAllocationAliasSnafu { index, target });
            }
        }

        let mut parameters = self.inputs.clone();
        for (output, alias) in self.outputs.iter().zip(&self.output_aliases) {
            if alias.kind != AllocationType::Evaluate {
                parameters.push(KernelValue::Tensor(*output));
            }
        }
        let mut kernel = LoweredKernel {
            tensors: self.tensors,
            inputs: self.inputs,
            outputs: self.outputs,
            output_aliases: self.output_aliases,
            parameters: Vec::new(),
            allocations: self.allocations,
            parallel_dimensions: self.parallel_dimensions,
            validations: self.validations,
            expected_dynamic_smem: self.expected_dynamic_smem,
            summary: self.summary,
            body: self.body,
        };
        parameters.extend(kernel.intermediate_allocations().map(|alloc| KernelValue::Tensor(alloc.buffer)));
        kernel.parameters = parameters;
        Ok(kernel)
    }
}

fn tensor_of(value: &KernelValue) -> Option<TensorId> {
    match value {
        KernelValue::Tensor(id) => Some(*id),
        KernelValue::Scalar { .. } => None,
    }
}
