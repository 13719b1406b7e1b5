use std::sync::Arc;

use anyhow::{anyhow, Result};
use infer_bridge::{
    build_registry, BridgeConfig, BridgeError, GraphEngine, KernelFactory, ModelBuilder, OpKernel,
    OpRegistry, Session, TensorInfo, TensorSlice, MODEL_BUFFER_CAPACITY,
};

use crate::common;

/// Multiplies its single input by a constant taken from the node params.
struct ScaleKernel {
    factor: f32,
}

impl OpKernel for ScaleKernel {
    fn prepare(&self, inputs: &[&TensorInfo], output: &TensorInfo) -> Result<()> {
        match inputs {
            [input] if input.shape == output.shape => Ok(()),
            _ => Err(anyhow!("Scale expects one input shaped like its output")),
        }
    }

    fn eval(&self, inputs: &[TensorSlice<'_>], output: &mut [f32], _: &[usize]) -> Result<()> {
        for (out, value) in output.iter_mut().zip(inputs[0].data) {
            *out = value * self.factor;
        }
        Ok(())
    }
}

struct FailingKernel;

impl OpKernel for FailingKernel {
    fn prepare(&self, _: &[&TensorInfo], _: &TensorInfo) -> Result<()> {
        Ok(())
    }

    fn eval(&self, _: &[TensorSlice<'_>], _: &mut [f32], _: &[usize]) -> Result<()> {
        Err(anyhow!("device lost"))
    }
}

fn scale_factory() -> KernelFactory {
    Arc::new(|params: &[i32]| match params {
        [factor] => Ok(Box::new(ScaleKernel {
            factor: *factor as f32,
        }) as Box<dyn OpKernel>),
        _ => Err(anyhow!("Scale expects one parameter")),
    })
}

fn failing_factory() -> KernelFactory {
    Arc::new(|_: &[i32]| Ok(Box::new(FailingKernel) as Box<dyn OpKernel>))
}

fn session_with(registry: OpRegistry) -> Session<GraphEngine> {
    Session::with_registry(
        GraphEngine::default(),
        registry,
        MODEL_BUFFER_CAPACITY,
        BridgeConfig::default(),
    )
}

fn single_op_model(opcode: &str, params: &[i32], dims: &[usize]) -> Result<Vec<u8>> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", dims);
    let y = builder.output("y", dims);
    builder.operator(opcode, &[x], &[y], params);
    builder.finish()
}

#[test]
fn default_registry_exposes_the_transpose_convolution() -> Result<()> {
    let registry = build_registry()?;
    assert!(registry.contains(common::CUSTOM_OP));
    assert!(registry.is_custom(common::CUSTOM_OP));
    assert_eq!(registry.custom_names(), vec![common::CUSTOM_OP]);
    Ok(())
}

#[test]
fn custom_op_name_is_resolved_by_exact_match() -> Result<()> {
    let mut session = common::session()?;
    let model = common::encoder_decoder_model(1, 8, 8, 3, 2, "RELU")?;
    session.load_bytes(&model)?;

    let mut registry = OpRegistry::builtin();
    registry.add_custom("convolution2dtransposebias", failing_factory())?;
    let mut session = session_with(registry);
    let err = session.load_bytes(&model).unwrap_err();
    assert!(matches!(err, BridgeError::BuildFailed(_)), "{}", err);
    Ok(())
}

#[test]
fn externally_registered_kernel_runs() -> Result<()> {
    let mut registry = OpRegistry::builtin();
    registry.add_custom("Scale", scale_factory())?;
    let mut session = session_with(registry);

    session.load_bytes(&single_op_model("Scale", &[3], &[1, 1, 2, 2])?)?;
    let generation = session.generation().expect("ready");
    session.input_mut(generation)?.copy_from_slice(&[1.0, -2.0, 0.5, 4.0]);
    session.invoke()?;
    assert_eq!(session.output(generation)?, &[3.0, -6.0, 1.5, 12.0]);
    Ok(())
}

#[test]
fn duplicate_registration_is_rejected() -> Result<()> {
    let mut registry = build_registry()?;
    assert!(registry.add_custom(common::CUSTOM_OP, scale_factory()).is_err());
    assert!(registry.add_custom("RELU", scale_factory()).is_err());
    registry.add_custom("Scale", scale_factory())?;
    assert!(registry.add_custom("Scale", scale_factory()).is_err());
    assert_eq!(registry.custom_names(), vec![common::CUSTOM_OP, "Scale"]);
    Ok(())
}

#[test]
fn kernel_failure_surfaces_as_execution_failure() -> Result<()> {
    let mut registry = OpRegistry::builtin();
    registry.add_custom("Explode", failing_factory())?;
    let mut session = session_with(registry);

    session.load_bytes(&single_op_model("Explode", &[], &[1, 2, 2, 1])?)?;
    let err = session.invoke().unwrap_err();
    match err {
        BridgeError::ExecutionFailed(message) => assert!(message.contains("device lost"), "{}", message),
        other => panic!("expected execution failure, got {}", other),
    }
    assert!(session.is_ready());
    assert_eq!(session.stats().invocations, 0);
    Ok(())
}

#[test]
fn bad_custom_params_fail_the_build() -> Result<()> {
    let mut registry = OpRegistry::builtin();
    registry.add_custom("Scale", scale_factory())?;
    let mut session = session_with(registry);
    let err = session
        .load_bytes(&single_op_model("Scale", &[1, 2], &[1, 1, 1, 1])?)
        .unwrap_err();
    assert!(matches!(err, BridgeError::BuildFailed(_)), "{}", err);
    assert!(!session.is_ready());
    Ok(())
}
