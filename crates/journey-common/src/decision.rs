use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::Artifact;
use crate::ids::ArtifactId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Modify,
    Reject,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionKind::Approve => "approve",
            DecisionKind::Modify => "modify",
            DecisionKind::Reject => "reject",
        };
        f.write_str(s)
    }
}

/// Replacement of an artifact emitted earlier in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amendment {
    pub artifact_id: ArtifactId,
    pub artifact: Artifact,
}

/// A validated decision on a pending checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointDecision {
    Approve,
    Modify { amendments: Vec<Amendment> },
    Reject { reason: String },
}

impl CheckpointDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            CheckpointDecision::Approve => DecisionKind::Approve,
            CheckpointDecision::Modify { .. } => DecisionKind::Modify,
            CheckpointDecision::Reject { .. } => DecisionKind::Reject,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("A {0} decision requires data")]
    MissingData(DecisionKind),

    #[error("A modify decision must carry at least one amendment")]
    NoAmendments,

    #[error("A reject decision must carry a non-empty reason")]
    EmptyReason,

    #[error("Invalid {decision} data: {source}")]
    InvalidData {
        decision: DecisionKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Wire shape of a checkpoint decision: `{checkpointId, decision, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub checkpoint_id: String,
    pub decision: DecisionKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct ModifyData {
    amendments: Vec<Amendment>,
}

#[derive(Deserialize)]
struct RejectData {
    reason: String,
}

impl DecisionRequest {
    pub fn approve(checkpoint_id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            decision: DecisionKind::Approve,
            data: serde_json::Value::Null,
        }
    }

    pub fn reject(checkpoint_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            decision: DecisionKind::Reject,
            data: serde_json::json!({ "reason": reason.into() }),
        }
    }

    pub fn modify(checkpoint_id: impl Into<String>, amendments: Vec<Amendment>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            decision: DecisionKind::Modify,
            data: serde_json::json!({ "amendments": amendments }),
        }
    }

    /// Checks that the request carries the data its decision needs.
    pub fn decision(&self) -> Result<CheckpointDecision, DecisionError> {
        match self.decision {
            DecisionKind::Approve => Ok(CheckpointDecision::Approve),
            DecisionKind::Modify => {
                if self.data.is_null() {
                    return Err(DecisionError::MissingData(DecisionKind::Modify));
                }
                let data: ModifyData = serde_json::from_value(self.data.clone()).map_err(
                    |source| DecisionError::InvalidData {
                        decision: DecisionKind::Modify,
                        source,
                    },
                )?;
                if data.amendments.is_empty() {
                    return Err(DecisionError::NoAmendments);
                }
                Ok(CheckpointDecision::Modify {
                    amendments: data.amendments,
                })
            }
            DecisionKind::Reject => {
                let reason = match &self.data {
                    serde_json::Value::Null => {
                        return Err(DecisionError::MissingData(DecisionKind::Reject));
                    }
                    serde_json::Value::String(reason) => reason.clone(),
                    other => {
                        let data: RejectData = serde_json::from_value(other.clone()).map_err(
                            |source| DecisionError::InvalidData {
                                decision: DecisionKind::Reject,
                                source,
                            },
                        )?;
                        data.reason
                    }
                };
                if reason.trim().is_empty() {
                    return Err(DecisionError::EmptyReason);
                }
                Ok(CheckpointDecision::Reject { reason })
            }
        }
    }
}
