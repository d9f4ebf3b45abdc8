//! Signal parsing from producer text.

use std::sync::LazyLock;

use journey_common::Artifact;
use regex::Regex;

use super::{NamedSignal, TextSignals};

static ARTIFACT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<artifact>\s*(.*?)\s*</artifact>").unwrap());

static MILESTONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<milestone>\s*([A-Za-z0-9_]+)\s*</milestone>").unwrap());

static FLAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<flag\s+name\s*=\s*"([A-Za-z0-9_]+)"\s*(?:/>|>(.*?)</flag>)"#).unwrap()
});

pub struct SignalParser {
    verbose: bool,
}

impl SignalParser {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn parse(&self, text: &str) -> TextSignals {
        let mut signals = TextSignals::default();

        for cap in ARTIFACT_REGEX.captures_iter(text) {
            let Some(body) = cap.get(1).map(|m| m.as_str().trim()) else {
                continue;
            };
            if body.is_empty() {
                continue;
            }
            match serde_json::from_str::<Artifact>(body) {
                Ok(artifact) => {
                    if self.verbose {
                        tracing::debug!(kind = %artifact.kind(), "signal: artifact");
                    }
                    signals.artifacts.push(artifact);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed artifact payload");
                    signals.malformed.push(e.to_string());
                }
            }
        }

        for cap in MILESTONE_REGEX.captures_iter(text) {
            if let Some(name) = cap.get(1) {
                if self.verbose {
                    tracing::debug!(name = name.as_str(), "signal: milestone");
                }
                signals.milestones.push(NamedSignal::new(name.as_str(), None));
            }
        }

        for cap in FLAG_REGEX.captures_iter(text) {
            if let Some(name) = cap.get(1) {
                let detail = cap
                    .get(2)
                    .map(|m| m.as_str().trim())
                    .filter(|d| !d.is_empty());
                if self.verbose {
                    tracing::debug!(name = name.as_str(), "signal: flag");
                }
                signals.flags.push(NamedSignal::new(name.as_str(), detail));
            }
        }

        let stripped = ARTIFACT_REGEX.replace_all(text, "");
        let stripped = MILESTONE_REGEX.replace_all(&stripped, "");
        let stripped = FLAG_REGEX.replace_all(&stripped, "");
        signals.narrative = stripped.trim().to_string();

        signals
    }
}

/// Convenience function to extract signals without creating a parser.
pub fn extract_signals(text: &str) -> TextSignals {
    SignalParser::new(false).parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_common::{ArtifactKind, Priority};

    #[test]
    fn test_extracts_artifact_json() {
        let text = r#"Here is the first question.
<artifact>
{"kind": "question", "question": "Why do tides happen twice a day?", "priority": "high"}
</artifact>
More to come."#;
        let signals = extract_signals(text);
        assert_eq!(signals.artifacts.len(), 1);
        assert_eq!(
            signals.artifacts[0],
            Artifact::Question {
                question: "Why do tides happen twice a day?".to_string(),
                category: None,
                priority: Priority::High,
            }
        );
        assert_eq!(signals.narrative, "Here is the first question.\n\nMore to come.");
    }

    #[test]
    fn test_extracts_milestones_and_flags() {
        let text = r#"<milestone>decompose_complete</milestone>
<flag name="new_category_discovered">economic history</flag>
<flag name="synthesis_requires_more_answers"/>"#;
        let signals = extract_signals(text);
        assert_eq!(
            signals.milestones,
            vec![NamedSignal::new("decompose_complete", None)]
        );
        assert_eq!(
            signals.flags,
            vec![
                NamedSignal::new("new_category_discovered", Some("economic history")),
                NamedSignal::new("synthesis_requires_more_answers", None),
            ]
        );
        assert!(signals.narrative.is_empty());
    }

    #[test]
    fn test_malformed_artifact_is_skipped() {
        let text = r#"<artifact>{"kind": "question"}</artifact><artifact>{"kind":"category","name":"physics"}</artifact>"#;
        let signals = extract_signals(text);
        assert_eq!(signals.artifacts.len(), 1);
        assert_eq!(signals.artifacts[0].kind(), ArtifactKind::Category);
        assert_eq!(signals.malformed.len(), 1);
    }

    #[test]
    fn test_plain_text_has_no_signals() {
        let signals = extract_signals("Thinking about the question...");
        assert!(signals.is_empty());
        assert_eq!(signals.narrative, "Thinking about the question...");
    }
}
