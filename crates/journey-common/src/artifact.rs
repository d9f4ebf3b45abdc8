//! Closed set of artifacts agents can emit.
//!
//! Artifacts are tagged by `kind` on the wire. The set is fixed at compile
//! time so that phase tool scopes can be checked when an agent registers.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    // Research
    Category {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        insight_question: Option<String>,
    },
    Question {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default)]
        priority: Priority,
    },
    Answer {
        question: String,
        answer: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sources: Vec<String>,
    },
    CategoryInsight {
        category: String,
        insight: String,
    },
    KeyInsight {
        title: String,
        description: String,
    },
    AdjacentQuestion {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        discovered_from: Option<String>,
    },

    // Understand
    LearningObjective {
        statement: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },
    Assumption {
        assumption: String,
    },
    Concept {
        name: String,
        definition: String,
    },
    MentalModel {
        name: String,
        description: String,
    },
    FacetAssessment {
        facet: String,
        status: String,
        #[serde(default)]
        evidence: String,
    },

    // Build
    Anchor {
        description: String,
        #[serde(default)]
        strength: u8,
    },
    GroundingConcept {
        name: String,
        #[serde(default)]
        anchors: Vec<String>,
    },
    Construct {
        name: String,
        description: String,
    },
    Decision {
        choice: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alternative: Option<String>,
        rationale: String,
    },
    Capability {
        capability: String,
        #[serde(default)]
        enabled_by: Vec<String>,
    },

    Note {
        title: String,
        body: String,
    },
}

/// Discriminant of [`Artifact`], used to scope which artifacts a phase may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Category,
    Question,
    Answer,
    CategoryInsight,
    KeyInsight,
    AdjacentQuestion,
    LearningObjective,
    Assumption,
    Concept,
    MentalModel,
    FacetAssessment,
    Anchor,
    GroundingConcept,
    Construct,
    Decision,
    Capability,
    Note,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Category => "category",
            ArtifactKind::Question => "question",
            ArtifactKind::Answer => "answer",
            ArtifactKind::CategoryInsight => "category_insight",
            ArtifactKind::KeyInsight => "key_insight",
            ArtifactKind::AdjacentQuestion => "adjacent_question",
            ArtifactKind::LearningObjective => "learning_objective",
            ArtifactKind::Assumption => "assumption",
            ArtifactKind::Concept => "concept",
            ArtifactKind::MentalModel => "mental_model",
            ArtifactKind::FacetAssessment => "facet_assessment",
            ArtifactKind::Anchor => "anchor",
            ArtifactKind::GroundingConcept => "grounding_concept",
            ArtifactKind::Construct => "construct",
            ArtifactKind::Decision => "decision",
            ArtifactKind::Capability => "capability",
            ArtifactKind::Note => "note",
        }
    }

    /// Example payload shown to work producers for this kind.
    pub fn example(&self) -> &'static str {
        match self {
            ArtifactKind::Category => r#"{"kind":"category","name":"..."}"#,
            ArtifactKind::Question => {
                r#"{"kind":"question","question":"...","category":"...","priority":"high"}"#
            }
            ArtifactKind::Answer => r#"{"kind":"answer","question":"...","answer":"..."}"#,
            ArtifactKind::CategoryInsight => {
                r#"{"kind":"category_insight","category":"...","insight":"..."}"#
            }
            ArtifactKind::KeyInsight => {
                r#"{"kind":"key_insight","title":"...","description":"..."}"#
            }
            ArtifactKind::AdjacentQuestion => {
                r#"{"kind":"adjacent_question","question":"...","discovered_from":"..."}"#
            }
            ArtifactKind::LearningObjective => {
                r#"{"kind":"learning_objective","statement":"...","frame":"..."}"#
            }
            ArtifactKind::Assumption => r#"{"kind":"assumption","assumption":"..."}"#,
            ArtifactKind::Concept => r#"{"kind":"concept","name":"...","definition":"..."}"#,
            ArtifactKind::MentalModel => {
                r#"{"kind":"mental_model","name":"...","description":"..."}"#
            }
            ArtifactKind::FacetAssessment => {
                r#"{"kind":"facet_assessment","facet":"...","status":"...","evidence":"..."}"#
            }
            ArtifactKind::Anchor => r#"{"kind":"anchor","description":"...","strength":3}"#,
            ArtifactKind::GroundingConcept => {
                r#"{"kind":"grounding_concept","name":"...","anchors":["..."]}"#
            }
            ArtifactKind::Construct => {
                r#"{"kind":"construct","name":"...","description":"..."}"#
            }
            ArtifactKind::Decision => {
                r#"{"kind":"decision","choice":"...","alternative":"...","rationale":"..."}"#
            }
            ArtifactKind::Capability => {
                r#"{"kind":"capability","capability":"...","enabled_by":["..."]}"#
            }
            ArtifactKind::Note => r#"{"kind":"note","title":"...","body":"..."}"#,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Category { .. } => ArtifactKind::Category,
            Artifact::Question { .. } => ArtifactKind::Question,
            Artifact::Answer { .. } => ArtifactKind::Answer,
            Artifact::CategoryInsight { .. } => ArtifactKind::CategoryInsight,
            Artifact::KeyInsight { .. } => ArtifactKind::KeyInsight,
            Artifact::AdjacentQuestion { .. } => ArtifactKind::AdjacentQuestion,
            Artifact::LearningObjective { .. } => ArtifactKind::LearningObjective,
            Artifact::Assumption { .. } => ArtifactKind::Assumption,
            Artifact::Concept { .. } => ArtifactKind::Concept,
            Artifact::MentalModel { .. } => ArtifactKind::MentalModel,
            Artifact::FacetAssessment { .. } => ArtifactKind::FacetAssessment,
            Artifact::Anchor { .. } => ArtifactKind::Anchor,
            Artifact::GroundingConcept { .. } => ArtifactKind::GroundingConcept,
            Artifact::Construct { .. } => ArtifactKind::Construct,
            Artifact::Decision { .. } => ArtifactKind::Decision,
            Artifact::Capability { .. } => ArtifactKind::Capability,
            Artifact::Note { .. } => ArtifactKind::Note,
        }
    }

    /// One-line description used in re-entry prompts and CLI output.
    pub fn summary(&self) -> String {
        match self {
            Artifact::Category { name, .. } => name.clone(),
            Artifact::Question {
                question, priority, ..
            } => format!("{} ({:?})", question, priority),
            Artifact::Answer { question, .. } => format!("answered: {}", question),
            Artifact::CategoryInsight { category, insight } => {
                format!("{}: {}", category, truncate(insight, 80))
            }
            Artifact::KeyInsight { title, .. } => title.clone(),
            Artifact::AdjacentQuestion { question, .. } => question.clone(),
            Artifact::LearningObjective { statement, .. } => statement.clone(),
            Artifact::Assumption { assumption } => assumption.clone(),
            Artifact::Concept { name, .. } => name.clone(),
            Artifact::MentalModel { name, .. } => name.clone(),
            Artifact::FacetAssessment { facet, status, .. } => format!("{}: {}", facet, status),
            Artifact::Anchor { description, .. } => truncate(description, 80),
            Artifact::GroundingConcept { name, .. } => name.clone(),
            Artifact::Construct { name, .. } => name.clone(),
            Artifact::Decision { choice, .. } => choice.clone(),
            Artifact::Capability { capability, .. } => capability.clone(),
            Artifact::Note { title, .. } => title.clone(),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_wire_format_is_kind_tagged() {
        let artifact = Artifact::Question {
            question: "How do tides work?".to_string(),
            category: None,
            priority: Priority::High,
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["kind"], "question");
        assert_eq!(json["priority"], "high");
        assert!(json.get("category").is_none());
    }

    #[test]
    fn test_examples_parse_as_their_kind() {
        let kinds = [
            ArtifactKind::Category,
            ArtifactKind::Question,
            ArtifactKind::Answer,
            ArtifactKind::LearningObjective,
            ArtifactKind::FacetAssessment,
            ArtifactKind::Anchor,
            ArtifactKind::Decision,
            ArtifactKind::Note,
        ];
        for kind in kinds {
            let parsed: Artifact = serde_json::from_str(kind.example()).unwrap();
            assert_eq!(parsed.kind(), kind);
        }
    }

    #[test]
    fn test_summary_truncates_long_text() {
        let artifact = Artifact::Anchor {
            description: "x".repeat(200),
            strength: 2,
        };
        let summary = artifact.summary();
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 83);
    }
}
