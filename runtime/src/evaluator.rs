//! Host-side evaluation of extents and view-defined tensors.

use std::collections::HashMap;
use std::sync::Arc;

use kfuse_device::Buffer;
use kfuse_ir::{ExpressionEvaluator, Expr, KernelValue, LoweredKernel, ParallelType, TensorId, ViewOp};
use snafu::{OptionExt, ensure};

use crate::arguments::{ArgValue, KernelArgumentHolder, ScalarValue};
use crate::error::*;

/// Values known while preparing one launch: scalar symbols, launch extents and host tensors.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEvaluator {
    scalars: ExpressionEvaluator,
    scalar_values: HashMap<Arc<str>, ScalarValue>,
    tensors: HashMap<TensorId, Buffer>,
}

impl RuntimeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator with every fusion input bound: tensor extents, scalar values and the tensors
    /// themselves.
    pub fn for_inputs(kernel: &LoweredKernel, args: &KernelArgumentHolder) -> Result<Self> {
        let mut evaluator = Self::new();
        evaluator.bind_inputs(kernel, args)?;
        Ok(evaluator)
    }

    pub fn bind_inputs(&mut self, kernel: &LoweredKernel, args: &KernelArgumentHolder) -> Result<()> {
        ensure!(
            args.len() == kernel.inputs().len(),
            ArgumentCountSnafu { expected: kernel.inputs().len(), actual: args.len() }
        );

        for (position, (input, arg)) in kernel.inputs().iter().zip(args).enumerate() {
            match (input, arg) {
                (KernelValue::Tensor(id), ArgValue::Tensor(buffer)) => self.bind_input_tensor(kernel, *id, buffer)?,
                (KernelValue::Scalar { name, .. }, ArgValue::Scalar(value)) => {
                    if let Some(int) = value.as_i64() {
                        self.scalars.bind(name.clone(), int);
                    }
                    self.scalar_values.insert(name.clone(), *value);
                }
                (KernelValue::Tensor(_), _) => return ArgumentKindSnafu { position, expected: "tensor" }.fail(),
                (KernelValue::Scalar { .. }, _) => return ArgumentKindSnafu { position, expected: "scalar" }.fail(),
            }
        }
        Ok(())
    }

    fn bind_input_tensor(&mut self, kernel: &LoweredKernel, id: TensorId, buffer: &Buffer) -> Result<()> {
        let tv = kernel.tensor(id);
        let domain = &tv.domain;
        let dims: Vec<_> = domain.no_reductions(domain.logical()).collect();
        ensure!(
            dims.len() == buffer.rank(),
            TensorEvaluationSnafu {
                tensor: tv.name.clone(),
                reason: format!("expected rank {}, got {}", dims.len(), buffer.rank()),
            }
        );

        for (dim, (iter, size)) in dims.iter().zip(buffer.sizes()).enumerate() {
            let extent = domain.id(*iter).maybe_expanded_extent();
            if let Some(expected) = self.scalars.evaluate(extent) {
                ensure!(
                    expected == *size,
                    InputExtentMismatchSnafu { tensor: tv.name.clone(), dim, expected, actual: *size }
                );
            } else {
                // Composite extents that are not known yet are left unbound.
                self.scalars.bind_expr(extent, *size);
            }
        }
        self.tensors.insert(id, buffer.clone());
        Ok(())
    }

    pub fn scalars(&self) -> &ExpressionEvaluator {
        &self.scalars
    }

    pub fn scalar_value(&self, name: &str) -> Option<ScalarValue> {
        self.scalar_values.get(name).copied()
    }

    pub fn bind_parallel(&mut self, ptype: ParallelType, value: i64) {
        self.scalars.bind_parallel(ptype, value);
    }

    pub fn evaluate(&self, expr: &Expr) -> Option<i64> {
        self.scalars.evaluate(expr)
    }

    pub fn bind_tensor(&mut self, id: TensorId, buffer: Buffer) {
        self.tensors.insert(id, buffer);
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Buffer> {
        self.tensors.get(&id)
    }

    /// Concrete logical extents of `id`, reductions excluded, expanded broadcasts at full size.
    pub fn logical_sizes(&self, kernel: &LoweredKernel, id: TensorId) -> Result<Vec<i64>> {
        let tv = kernel.tensor(id);
        let domain = &tv.domain;
        domain
            .no_reductions(domain.logical())
            .map(|iter| {
                let extent = domain.id(iter).maybe_expanded_extent();
                self.evaluate(extent)
                    .context(UnresolvedExtentSnafu { tensor: tv.name.clone(), extent: extent.to_string() })
            })
            .collect()
    }

    /// Produces `id` on the host by following its view definitions back to bound tensors.
    ///
    /// Results are bound, so evaluating the same tensor again returns the same view.
    pub fn evaluate_tensor(&mut self, kernel: &LoweredKernel, id: TensorId) -> Result<Buffer> {
        if let Some(buffer) = self.tensors.get(&id) {
            return Ok(buffer.clone());
        }

        let tv = kernel.tensor(id);
        let definition = tv.definition.as_ref().context(TensorEvaluationSnafu {
            tensor: tv.name.clone(),
            reason: "it is only produced on the device",
        })?;
        let source = self.evaluate_tensor(kernel, definition.source())?;
        let view = match definition {
            ViewOp::Alias { .. } => Ok(source),
            ViewOp::Reshape { .. } => source.view(&self.logical_sizes(kernel, id)?),
            ViewOp::Permute { dims, .. } => source.permute(dims),
        };
        let buffer =
            view.map_err(|source| Error::TensorEvaluation { tensor: tv.name.clone(), reason: source.to_string() })?;

        self.tensors.insert(id, buffer.clone());
        Ok(buffer)
    }
}
