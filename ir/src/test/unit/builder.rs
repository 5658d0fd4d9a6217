use crate::*;

#[test]
fn parameters_are_inputs_outputs_then_intermediates() {
    let mut kb = KernelBuilder::new();
    let t0 = kb.input_tensor("T0", DType::Float32, 2);
    let n = kb.scalar_input("n", DType::Int64);
    let t1 = kb.tensor("T1", DType::Float32, TensorDomain::symbolic("T0", 2));
    let t2 = kb.tensor("T2", DType::Float32, TensorDomain::from_extents([n]));
    kb.output(t1);
    kb.allocate_global(t2);
    let kernel = kb.build().unwrap();

    let params: Vec<_> = kernel
        .parameters()
        .iter()
        .map(|param| match param {
            KernelValue::Tensor(id) => kernel.tensor(*id).name.clone(),
            KernelValue::Scalar { name, .. } => name.to_string(),
        })
        .collect();
    assert_eq!(params, ["T0", "n", "T1", "T2"]);
    assert_eq!(kernel.intermediate_allocations().count(), 1);
    assert!(kernel.is_input(t0));
}

#[test]
fn evaluated_outputs_are_not_parameters() {
    let mut kb = KernelBuilder::new();
    let t0 = kb.input_tensor("T0", DType::Float32, 1);
    let t1 = kb.view("T1", DType::Float32, TensorDomain::symbolic("T0", 1), ViewOp::Alias { source: t0 });
    kb.aliased_output(t1, AliasInfo::evaluate(Some(IoRef::Input(0))));
    let kernel = kb.build().unwrap();
    assert!(kernel.is_expression_evaluated());
    assert_eq!(kernel.parameters().len(), 1);
}

#[test]
fn rejects_dangling_alias() {
    let mut kb = KernelBuilder::new();
    let t0 = kb.input_tensor("T0", DType::Float32, 1);
    kb.aliased_output(t0, AliasInfo::reuse(IoRef::Input(3)));
    assert!(matches!(kb.build(), Err(Error::DanglingAlias { output: 0, .. })));
}

#[test]
fn rejects_empty_output_list() {
    let mut kb = KernelBuilder::new();
    kb.input_tensor("T0", DType::Float32, 1);
    assert_eq!(kb.build(), Err(Error::NoOutputs));
}

#[test]
fn detects_output_extents_depending_on_scalar_inputs() {
    let mut kb = KernelBuilder::new();
    kb.input_tensor("T0", DType::Float32, 1);
    let n = kb.scalar_input("n", DType::Int64);
    let t1 = kb.tensor("T1", DType::Float32, TensorDomain::from_extents([n * 2i64]));
    kb.output(t1);
    assert!(kb.build().unwrap().output_extents_depend_on_scalar_inputs());

    let mut kb = KernelBuilder::new();
    kb.input_tensor("T0", DType::Float32, 1);
    kb.scalar_input("n", DType::Int64);
    let t1 = kb.tensor("T1", DType::Float32, TensorDomain::symbolic("T0", 1));
    kb.output(t1);
    assert!(!kb.build().unwrap().output_extents_depend_on_scalar_inputs());
}
