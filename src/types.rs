use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prerequisite edge kinds. Only `Required` participates in mastery gating;
/// `Helpful` and `Related` are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Required,
    Helpful,
    Related,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Helpful => "helpful",
            Self::Related => "related",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "required" => Self::Required,
            "helpful" => Self::Helpful,
            _ => Self::Related,
        }
    }
}

/// Which builder inference pass produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeSource {
    Hierarchy,
    Similarity,
    CrossDomain,
}

impl EdgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hierarchy => "hierarchy",
            Self::Similarity => "similarity",
            Self::CrossDomain => "cross_domain",
        }
    }
}

/// A concept from the course catalog. Immutable during a quiz session;
/// `depth` is derived by the graph builder and not authoritative before a
/// build has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub id: String,
    pub name: String,
    pub knowledge_area: String,
    /// Scalar difficulty estimate in [0, 1].
    pub difficulty: f64,
    /// Minimum hop distance from any root concept.
    #[serde(default)]
    pub depth: u32,
    /// Hierarchical section reference such as "3.2.1", when the corpus
    /// carries one. Drives hierarchy inference in the builder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Ordered (concept, prerequisite) pair with strength and kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteEdge {
    pub concept_id: String,
    pub prerequisite_id: String,
    /// Strength in [0, 1]. Cycle repair removes the weakest edge first.
    pub strength: f64,
    pub kind: RelationshipKind,
    pub source: EdgeSource,
}

/// Prior Beta parameters used when a belief is created lazily.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeliefPrior {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BeliefPrior {
    fn default() -> Self {
        // Uninformative Beta(1, 1).
        Self { alpha: 1.0, beta: 1.0 }
    }
}

/// Per (user, concept) Beta-distributed mastery belief. Mutated only by the
/// Bayesian update engine; reset restores the prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeliefState {
    pub user_id: String,
    pub concept_id: String,
    pub alpha: f64,
    pub beta: f64,
    pub response_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_at: Option<DateTime<Utc>>,
}

impl BeliefState {
    pub fn new(user_id: impl Into<String>, concept_id: impl Into<String>, prior: BeliefPrior) -> Self {
        Self {
            user_id: user_id.into(),
            concept_id: concept_id.into(),
            alpha: prior.alpha,
            beta: prior.beta,
            response_count: 0,
            last_response_at: None,
        }
    }

    /// Mastery probability: alpha / (alpha + beta).
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Confidence grows with accumulated evidence: (a + b) / (a + b + 2).
    pub fn confidence(&self) -> f64 {
        let n = self.alpha + self.beta;
        n / (n + 2.0)
    }

    pub fn status(&self, mastery_threshold: f64, confidence_threshold: f64, gap_threshold: f64) -> BeliefStatus {
        if self.confidence() < confidence_threshold {
            return BeliefStatus::Uncertain;
        }
        let mean = self.mean();
        if mean >= mastery_threshold {
            BeliefStatus::Mastered
        } else if mean < gap_threshold {
            BeliefStatus::Gap
        } else {
            BeliefStatus::Borderline
        }
    }

    /// Explicit reset back to the prior. The only sanctioned way to discard
    /// accumulated evidence.
    pub fn reset(&mut self, prior: BeliefPrior) {
        self.alpha = prior.alpha;
        self.beta = prior.beta;
        self.response_count = 0;
        self.last_response_at = None;
    }
}

/// Classification of a belief against the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeliefStatus {
    Mastered,
    Gap,
    Borderline,
    Uncertain,
}

impl BeliefStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mastered => "mastered",
            Self::Gap => "gap",
            Self::Borderline => "borderline",
            Self::Uncertain => "uncertain",
        }
    }
}

/// (concept, relevance) mapping on a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptWeight {
    pub concept_id: String,
    pub relevance: f64,
}

/// A candidate question with its IRT-like measurement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub knowledge_area: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    /// Concepts this question tests. Every concept is updated independently.
    pub concepts: Vec<ConceptWeight>,
    /// Informational only to this engine.
    pub discrimination: f64,
    /// P(incorrect | mastered), in [0, 1].
    pub slip: f64,
    /// P(correct | not mastered), in [0, 1].
    pub guess: f64,
}

impl Question {
    pub fn concept_ids(&self) -> impl Iterator<Item = &str> {
        self.concepts.iter().map(|c| c.concept_id.as_str())
    }
}

/// A past response used by the recency filter. The caller supplies these;
/// the selector performs no I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub question_id: String,
    pub answered_at: DateTime<Utc>,
}

/// At most one per (user, concept); recording is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockEvent {
    pub id: String,
    pub user_id: String,
    pub concept_id: String,
    /// The prerequisite whose update tipped the gate, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    pub unlocked_at: DateTime<Utc>,
}

/// Closed set of selection strategies (exhaustively matched in the policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum SelectionStrategy {
    #[default]
    MaxInfoGain,
    MaxUncertainty,
    PrerequisiteFirst,
    Balanced,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxInfoGain => "max_info_gain",
            Self::MaxUncertainty => "max_uncertainty",
            Self::PrerequisiteFirst => "prerequisite_first",
            Self::Balanced => "balanced",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "max_uncertainty" => Self::MaxUncertainty,
            "prerequisite_first" => Self::PrerequisiteFirst,
            "balanced" => Self::Balanced,
            _ => Self::MaxInfoGain,
        }
    }
}
