use anyhow::Result;
use infer_bridge::{BridgeError, SessionState, MODEL_BUFFER_CAPACITY};

use crate::common;

#[test]
fn load_reports_declared_shapes() -> Result<()> {
    let cases = [(1, 1, 1), (144, 256, 3), (96, 160, 3), (17, 5, 2)];
    for (height, width, channels) in cases {
        let mut session = common::session()?;
        session.load_bytes(&common::relu_model(height, width, channels)?)?;
        assert_eq!(session.input_height()?, height);
        assert_eq!(session.input_width()?, width);
        assert_eq!(session.input_channels()?, channels);
        assert_eq!(session.output_height()?, height);
        assert_eq!(session.output_width()?, width);
        assert_eq!(session.output_channels()?, channels);
    }
    Ok(())
}

#[test]
fn buffer_capacity_matches_constant() -> Result<()> {
    let session = common::session()?;
    assert_eq!(session.buffer_capacity(), MODEL_BUFFER_CAPACITY);
    Ok(())
}

#[test]
fn host_writes_through_buffer_pointer() -> Result<()> {
    let mut session = common::session()?;
    let model = common::relu_model(4, 4, 3)?;
    let dst = session.buffer_ptr();
    // Mirrors a host copying into the exported region.
    unsafe { std::ptr::copy_nonoverlapping(model.as_ptr(), dst, model.len()) };
    session.load(model.len())?;
    assert_eq!(session.input_shape()?, common::shape(4, 4, 3));
    Ok(())
}

#[test]
fn overflow_is_rejected_and_keeps_ready_state() -> Result<()> {
    let mut session = common::session()?;
    session.load_bytes(&common::relu_model(8, 8, 3)?)?;
    let generation = session.generation();

    let err = session.load(MODEL_BUFFER_CAPACITY + 1).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::BufferOverflow {
            declared,
            capacity: MODEL_BUFFER_CAPACITY,
        } if declared == MODEL_BUFFER_CAPACITY + 1
    ));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.generation(), generation);
    assert_eq!(session.input_height()?, 8);
    session.invoke()?;
    Ok(())
}

#[test]
fn overflow_on_empty_session_stays_empty() -> Result<()> {
    let mut session = common::session()?;
    assert!(session.load(usize::MAX).is_err());
    assert_eq!(session.state(), SessionState::Empty);
    Ok(())
}

#[test]
fn random_bytes_never_load() -> Result<()> {
    let mut session = common::session()?;
    for (seed, len) in [(1u64, 0usize), (2, 3), (3, 55), (4, 56), (5, 1024), (6, 65_536)] {
        let bytes = common::random_bytes(seed, len);
        let err = session.load_bytes(&bytes).unwrap_err();
        assert!(
            matches!(err, BridgeError::ParseFailed(_) | BridgeError::BuildFailed(_)),
            "unexpected error for {} random bytes: {}",
            len,
            err
        );
        assert_eq!(session.state(), SessionState::Empty);
    }
    Ok(())
}

#[test]
fn truncated_model_fails_and_previous_model_survives() -> Result<()> {
    let mut session = common::session()?;
    session.load_bytes(&common::relu_model(2, 2, 3)?)?;
    let before = session.generation();

    let replacement = common::scenario_model()?;
    for len in [replacement.len() / 2, replacement.len() - 1] {
        let err = session.load_bytes(&replacement[..len]).unwrap_err();
        assert!(matches!(err, BridgeError::ParseFailed(_)), "{}", err);
    }
    assert_eq!(session.generation(), before);
    assert_eq!(session.input_shape()?, common::shape(2, 2, 3));
    session.invoke()?;
    Ok(())
}

#[test]
fn reload_reflects_only_the_new_model() -> Result<()> {
    let mut session = common::session()?;
    session.load_bytes(&common::relu_model(32, 48, 3)?)?;
    session.load_bytes(&common::segmentation_model(96, 160)?)?;
    assert_eq!(session.input_shape()?, common::shape(96, 160, 3));
    assert_eq!(session.output_shape()?, common::shape(96, 160, 2));
    let summary = session.summary().expect("summary after load");
    assert_eq!(summary.operators, 3);
    assert_eq!(summary.input, common::shape(96, 160, 3));
    Ok(())
}

#[test]
fn summary_serializes_to_json() -> Result<()> {
    let mut session = common::session()?;
    let model = common::relu_model(3, 4, 1)?;
    session.load_bytes(&model)?;
    let summary = serde_json::to_value(session.summary().expect("summary"))?;
    assert_eq!(summary["generation"], 1);
    assert_eq!(summary["model_bytes"], model.len());
    assert_eq!(summary["input"]["width"], 4);
    assert_eq!(summary["operators"], 1);
    Ok(())
}

#[test]
fn overflowing_constant_shape_is_a_parse_failure() -> Result<()> {
    let mut builder = infer_bridge::ModelBuilder::new();
    let c = builder.constant("c", &[1, 1, 1], &[0.5]);
    let x = builder.input("x", &[1, 1, 1, 1]);
    let y = builder.output("y", &[1, 1, 1, 1]);
    builder.operator("ADD", &[x, c], &[y], &[]);
    let mut bytes = builder.finish()?;

    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[24..32]);
    // Dims of tensor "c" follow its padded name, dtype and rank.
    let dims_at = u64::from_le_bytes(raw) as usize + 16;
    for axis in 0..3 {
        let at = dims_at + axis * 8;
        bytes[at..at + 8].copy_from_slice(&(1u64 << 40).to_le_bytes());
    }

    let mut session = common::session()?;
    session.load_bytes(&common::relu_model(2, 2, 1)?)?;
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        session.load_bytes(&bytes)
    }));
    let err = match result {
        Ok(outcome) => outcome.unwrap_err(),
        Err(_) => panic!("loader panicked on an oversized shape"),
    };
    assert!(matches!(err, BridgeError::ParseFailed(_)), "{}", err);
    assert_eq!(session.input_shape()?, common::shape(2, 2, 1));
    Ok(())
}
