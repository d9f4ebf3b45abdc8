use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Learning mode a session runs in. Each mode maps to one agent definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Research,
    Understand,
    Build,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Research, Mode::Understand, Mode::Build];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Research => "research",
            Mode::Understand => "understand",
            Mode::Build => "build",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown mode '{0}' (expected research, understand or build)")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Ok(Mode::Research),
            "understand" => Ok(Mode::Understand),
            "build" => Ok(Mode::Build),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Design brief confirmed by the learner before a session starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyBrief {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learner_context: Option<String>,
}

impl JourneyBrief {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str_is_case_insensitive() {
        assert_eq!("Research".parse::<Mode>().unwrap(), Mode::Research);
        assert_eq!(" build ".parse::<Mode>().unwrap(), Mode::Build);
        assert_eq!(
            "explore".parse::<Mode>(),
            Err(UnknownMode("explore".to_string()))
        );
    }

    #[test]
    fn test_brief_omits_empty_optionals() {
        let json = serde_json::to_value(JourneyBrief::new("Why is the sky blue?")).unwrap();
        assert_eq!(json, serde_json::json!({"question": "Why is the sky blue?"}));
    }
}
