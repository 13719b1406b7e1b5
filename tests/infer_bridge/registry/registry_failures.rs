use anyhow::Result;
use infer_bridge::{
    BridgeConfig, BridgeError, ElementType, GraphEngine, ModelBuilder, OpRegistry, Session,
    SessionState, MODEL_BUFFER_CAPACITY,
};

use crate::common;

fn assert_rejected_keeps_previous(bytes: &[u8], expect: fn(&BridgeError) -> bool) -> Result<()> {
    let mut session = common::session()?;
    session.load_bytes(&common::relu_model(3, 3, 3)?)?;
    let generation = session.generation();

    let err = session.load_bytes(bytes).unwrap_err();
    assert!(expect(&err), "unexpected error: {}", err);
    assert!(err.is_load_error());
    assert_eq!(err.status_code(), 1);

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.generation(), generation);
    assert_eq!(session.input_shape()?, common::shape(3, 3, 3));
    session.invoke()?;
    Ok(())
}

#[test]
fn unknown_operator_fails_the_build() -> Result<()> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", &[1, 2, 2, 1]);
    let y = builder.output("y", &[1, 2, 2, 1]);
    builder.operator("HARD_SWISH", &[x], &[y], &[]);
    assert_rejected_keeps_previous(&builder.finish()?, |err| {
        matches!(err, BridgeError::BuildFailed(message) if message.contains("HARD_SWISH"))
    })
}

#[test]
fn missing_custom_op_fails_the_build() -> Result<()> {
    let mut session = Session::with_registry(
        GraphEngine::default(),
        OpRegistry::builtin(),
        MODEL_BUFFER_CAPACITY,
        BridgeConfig::default(),
    );
    let err = session
        .load_bytes(&common::encoder_decoder_model(2, 8, 8, 3, 2, "RELU")?)
        .unwrap_err();
    match err {
        BridgeError::BuildFailed(message) => {
            assert!(message.contains(common::CUSTOM_OP), "{}", message)
        }
        other => panic!("expected build failure, got {}", other),
    }
    assert_eq!(session.state(), SessionState::Empty);
    Ok(())
}

#[test]
fn malformed_custom_op_params_fail_the_build() -> Result<()> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", &[1, 2, 2, 4]);
    let w = builder.constant("w", &[2, 2, 2, 4], &[0.1; 32]);
    let b = builder.constant("b", &[2], &[0.0; 2]);
    let y = builder.output("y", &[1, 4, 4, 2]);
    builder.operator(common::CUSTOM_OP, &[x, w, b], &[y], &[2, 2]);
    assert_rejected_keeps_previous(&builder.finish()?, |err| {
        matches!(err, BridgeError::BuildFailed(_))
    })
}

#[test]
fn integer_activation_fails_allocation() -> Result<()> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", &[1, 2, 2, 1]);
    let mid = builder.tensor_typed("mid", &[1, 2, 2, 1], ElementType::I32);
    let y = builder.output("y", &[1, 2, 2, 1]);
    builder.operator("RELU", &[x], &[mid], &[]);
    builder.operator("RELU", &[mid], &[y], &[]);
    assert_rejected_keeps_previous(&builder.finish()?, |err| {
        matches!(err, BridgeError::AllocationFailed(_))
    })
}

#[test]
fn mismatched_kernel_shapes_fail_allocation() -> Result<()> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", &[1, 2, 2, 3]);
    let bias = builder.constant("bias", &[5], &[1.0; 5]);
    let y = builder.output("y", &[1, 2, 2, 3]);
    builder.operator("ADD", &[x, bias], &[y], &[]);
    assert_rejected_keeps_previous(&builder.finish()?, |err| {
        matches!(err, BridgeError::AllocationFailed(_))
    })
}

#[test]
fn arena_limit_fails_allocation() -> Result<()> {
    let config = BridgeConfig {
        max_arena_bytes: 1024,
        ..BridgeConfig::default()
    };
    let mut session = Session::from_config(config)?;
    session.load_bytes(&common::relu_model(8, 8, 1)?)?;
    let err = session.load_bytes(&common::relu_model(64, 64, 3)?).unwrap_err();
    assert!(matches!(err, BridgeError::AllocationFailed(_)), "{}", err);
    assert_eq!(session.input_shape()?, common::shape(8, 8, 1));
    Ok(())
}

#[test]
fn two_outputs_are_unsupported() -> Result<()> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", &[1, 2, 2, 1]);
    let a = builder.output("a", &[1, 2, 2, 1]);
    let b = builder.output("b", &[1, 2, 2, 1]);
    builder.operator("RELU", &[x], &[a], &[]);
    builder.operator("LOGISTIC", &[x], &[b], &[]);
    assert_rejected_keeps_previous(&builder.finish()?, |err| {
        matches!(err, BridgeError::UnsupportedGraph(_))
    })
}

#[test]
fn non_rank_four_input_is_unsupported() -> Result<()> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", &[4, 3]);
    let y = builder.output("y", &[4, 3]);
    builder.operator("RELU", &[x], &[y], &[]);
    assert_rejected_keeps_previous(&builder.finish()?, |err| {
        matches!(err, BridgeError::UnsupportedGraph(_))
    })
}

#[test]
fn empty_session_stays_empty_after_failures() -> Result<()> {
    let mut session = common::session()?;
    let mut builder = ModelBuilder::new();
    let x = builder.input("x", &[1, 1, 1, 1]);
    let y = builder.output("y", &[1, 1, 1, 1]);
    builder.operator("NOT_AN_OP", &[x], &[y], &[]);
    assert!(session.load_bytes(&builder.finish()?).is_err());
    assert!(session.load_bytes(&[]).is_err());
    assert_eq!(session.state(), SessionState::Empty);
    assert!(matches!(session.invoke(), Err(BridgeError::NotReady)));
    Ok(())
}
