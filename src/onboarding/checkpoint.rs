//! Checkpoint codec: turns [`WorkflowState`] into the opaque blob stored in
//! the session row and back.
//!
//! Stateless: both directions are plain functions, so nothing is shared
//! between calls for different threads.

use serde::{Deserialize, Serialize};

use super::state::WorkflowState;
use crate::error::CheckpointError;

/// Envelope version written by this build.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Oldest envelope version this build can still read.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    state: &'a WorkflowState,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    version: u32,
    state: serde_json::Value,
}

/// Encode engine state as a versioned JSON checkpoint.
pub fn serialize(state: &WorkflowState) -> Result<String, CheckpointError> {
    serde_json::to_string(&EnvelopeRef {
        version: CHECKPOINT_VERSION,
        state,
    })
    .map_err(|e| CheckpointError::Encode(e.to_string()))
}

/// Decode a checkpoint. Anything this build cannot interpret exactly is an
/// `IncompatibleCheckpoint` error.
pub fn deserialize(data: &str) -> Result<WorkflowState, CheckpointError> {
    let envelope: Envelope =
        serde_json::from_str(data).map_err(|e| CheckpointError::IncompatibleCheckpoint {
            reason: format!("malformed envelope: {e}"),
        })?;

    if !(MIN_SUPPORTED_VERSION..=CHECKPOINT_VERSION).contains(&envelope.version) {
        return Err(CheckpointError::IncompatibleCheckpoint {
            reason: format!(
                "version {} is outside the supported range {}..={}",
                envelope.version, MIN_SUPPORTED_VERSION, CHECKPOINT_VERSION
            ),
        });
    }

    serde_json::from_value(envelope.state).map_err(|e| CheckpointError::IncompatibleCheckpoint {
        reason: format!("state does not match version {}: {e}", envelope.version),
    })
}
