use serde::{Deserialize, Serialize};

/// Caller input for one `advance` call: free text plus optional structured
/// context (for example the item the learner selected in the UI).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl UserInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: serde_json::Value::Null,
        }
    }

    /// Input handed to phases entered later within the same `advance` call.
    pub fn continuation() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.message.trim().is_empty() && self.context.is_null()
    }
}
