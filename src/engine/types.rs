#![allow(dead_code)]

use serde::{Deserialize, Serialize};

/// Five-level learner zone chain. Transitions move a single step at a time;
/// the estimator never skips levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum ZpdLevel {
    Beginner,
    Elementary,
    #[default]
    Intermediate,
    Advanced,
    Expert,
}

impl ZpdLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Elementary => "elementary",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "beginner" => Self::Beginner,
            "elementary" => Self::Elementary,
            "advanced" => Self::Advanced,
            "expert" => Self::Expert,
            _ => Self::Intermediate,
        }
    }

    pub fn promote(&self) -> Self {
        match self {
            Self::Beginner => Self::Elementary,
            Self::Elementary => Self::Intermediate,
            Self::Intermediate => Self::Advanced,
            _ => Self::Expert,
        }
    }

    pub fn demote(&self) -> Self {
        match self {
            Self::Expert => Self::Advanced,
            Self::Advanced => Self::Intermediate,
            Self::Intermediate => Self::Elementary,
            _ => Self::Beginner,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Beginner => 0,
            Self::Elementary => 1,
            Self::Intermediate => 2,
            Self::Advanced => 3,
            Self::Expert => 4,
        }
    }

    /// Normalized difficulty band [low, high] where material sits within or
    /// just above the learner's zone.
    pub fn difficulty_band(&self) -> (f64, f64) {
        match self {
            Self::Beginner => (0.0, 0.3),
            Self::Elementary => (0.15, 0.45),
            Self::Intermediate => (0.3, 0.6),
            Self::Advanced => (0.5, 0.8),
            Self::Expert => (0.7, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum ExplanationStyle {
    Detailed,
    #[default]
    Balanced,
    Concise,
}

impl ExplanationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detailed => "detailed",
            Self::Balanced => "balanced",
            Self::Concise => "concise",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "detailed" => Self::Detailed,
            "concise" => Self::Concise,
            _ => Self::Balanced,
        }
    }
}

/// Six ordered cognitive-demand levels a query can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum BloomLevel {
    Remember,
    #[default]
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl BloomLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remember => "remember",
            Self::Understand => "understand",
            Self::Apply => "apply",
            Self::Analyze => "analyze",
            Self::Evaluate => "evaluate",
            Self::Create => "create",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "remember" => Self::Remember,
            "apply" => Self::Apply,
            "analyze" => Self::Analyze,
            "evaluate" => Self::Evaluate,
            "create" => Self::Create,
            _ => Self::Understand,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Remember => 0,
            Self::Understand => 1,
            Self::Apply => 2,
            Self::Analyze => 3,
            Self::Evaluate => 4,
            Self::Create => 5,
        }
    }

    /// Answer-shaping instruction attached to the generation payload.
    pub fn answer_shape(&self) -> &'static str {
        match self {
            Self::Remember => "Give a short definitional answer with one concrete example.",
            Self::Understand => "Explain the concept in plain language, then restate the key idea.",
            Self::Apply => "Show how the concept is used step by step on a worked example.",
            Self::Analyze => "Break the problem into parts and compare how they relate.",
            Self::Evaluate => "Weigh the alternatives and justify a recommendation.",
            Self::Create => "Propose alternative approaches and sketch how to combine them.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Passage,
    KnowledgeCard,
    QaPair,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passage => "passage",
            Self::KnowledgeCard => "knowledge_card",
            Self::QaPair => "qa_pair",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    DirectQaMatch,
    HybridKbRag,
    InsufficientGrounding,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectQaMatch => "direct_qa_match",
            Self::HybridKbRag => "hybrid_kb_rag",
            Self::InsufficientGrounding => "insufficient_grounding",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "direct_qa_match" => Self::DirectQaMatch,
            "insufficient_grounding" => Self::InsufficientGrounding,
            _ => Self::HybridKbRag,
        }
    }
}

/// A retrievable unit produced per query. Transient: persisted only inside
/// the interaction record's score breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentCandidate {
    pub content_id: String,
    pub source_type: SourceType,
    pub text: String,
    /// Base relevance in [0,1]; clamped at construction.
    pub relevance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    /// Normalized difficulty of the unit, when the source labels it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
}

impl ContentCandidate {
    pub fn new(
        content_id: impl Into<String>,
        source_type: SourceType,
        text: impl Into<String>,
        relevance: f64,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            source_type,
            text: text.into(),
            relevance: relevance.clamp(0.0, 1.0),
            topic_id: None,
            difficulty: None,
        }
    }

    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: f64) -> Self {
        self.difficulty = Some(difficulty.clamp(0.0, 1.0));
        self
    }
}

/// A candidate after CACS blending, with the full per-component breakdown
/// retained for auditability and the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: ContentCandidate,
    pub base_score: f64,
    pub personal_score: f64,
    pub global_score: f64,
    pub context_score: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZpdAssessment {
    pub current_level: ZpdLevel,
    pub recommended_level: ZpdLevel,
    pub success_rate: f64,
    pub sufficient_data: bool,
}

impl Default for ZpdAssessment {
    fn default() -> Self {
        Self {
            current_level: ZpdLevel::Intermediate,
            recommended_level: ZpdLevel::Intermediate,
            success_rate: 0.0,
            sufficient_data: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloomAssessment {
    pub level: BloomLevel,
    pub confidence: f64,
    pub matched_levels: Vec<BloomLevel>,
}

impl Default for BloomAssessment {
    fn default() -> Self {
        Self {
            level: BloomLevel::Understand,
            confidence: 0.5,
            matched_levels: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveLoad {
    pub intrinsic: f64,
    pub extraneous: f64,
    pub germane: f64,
    pub total: f64,
    pub needs_simplification: bool,
}

/// One outcome-bearing prior interaction, consumed by the ZPD estimator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSample {
    pub passed: bool,
    /// Normalized difficulty the learner attempted, 0.5 when unlabeled.
    pub difficulty: f64,
}

/// Durable per-(learner, course-session) state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    pub learner_id: String,
    pub session_id: String,
    /// Rolling mean comprehension, 0-5.
    pub avg_comprehension: f64,
    /// Rolling mean satisfaction, 0-5. Populated only by multi-dimensional
    /// feedback; never copied from comprehension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_satisfaction: Option<f64>,
    pub interaction_count: i64,
    pub feedback_count: i64,
    pub strong_topics: Vec<String>,
    pub weak_topics: Vec<String>,
    pub zpd_level: ZpdLevel,
    pub explanation_style: ExplanationStyle,
    /// Optimistic-concurrency counter; bumped on every committed write.
    pub revision: i64,
    pub updated_at_ms: i64,
}

impl LearnerProfile {
    /// Mid-level defaults used when a learner is seen for the first time.
    pub fn synthesize(learner_id: &str, session_id: &str) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            session_id: session_id.to_string(),
            avg_comprehension: 2.5,
            avg_satisfaction: None,
            interaction_count: 0,
            feedback_count: 0,
            strong_topics: vec![],
            weak_topics: vec![],
            zpd_level: ZpdLevel::Intermediate,
            explanation_style: ExplanationStyle::Balanced,
            revision: 0,
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PedagogicalContext {
    pub zpd: ZpdAssessment,
    pub bloom: BloomAssessment,
    pub cognitive_load: CognitiveLoad,
}

impl Default for PedagogicalContext {
    fn default() -> Self {
        Self {
            zpd: ZpdAssessment::default(),
            bloom: BloomAssessment::default(),
            cognitive_load: CognitiveLoad::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizationFactors {
    pub understanding_level: f64,
    pub difficulty_level: ZpdLevel,
    pub explanation_style: ExplanationStyle,
}

/// Per-request component switches, resolved once (session override > global
/// flag > hard default) and passed down the pipeline as data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentActivation {
    pub cacs: bool,
    pub zpd: bool,
    pub bloom: bool,
    pub cognitive_load: bool,
    pub personalization: bool,
}

impl Default for ComponentActivation {
    fn default() -> Self {
        Self {
            cacs: true,
            zpd: true,
            bloom: true,
            cognitive_load: true,
            personalization: true,
        }
    }
}

/// Feedback arrives in one of two shapes; the union is resolved once at the
/// ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackPayload {
    Quick {
        emoji: String,
    },
    Dimensional {
        /// 1-5 each.
        understanding: f64,
        relevance: f64,
        clarity: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    LoadingProfile,
    Analyzing,
    Retrieving,
    Scoring,
    Generating,
    Recording,
    Rejected,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadingProfile => "loading_profile",
            Self::Analyzing => "analyzing",
            Self::Retrieving => "retrieving",
            Self::Scoring => "scoring",
            Self::Generating => "generating",
            Self::Recording => "recording",
            Self::Rejected => "rejected",
        }
    }
}

/// One adaptive-query request as the engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub learner_id: String,
    pub session_id: String,
    pub query: String,
    /// Caller-supplied pre-fetched context, passed through to the
    /// generation payload alongside the retrieved material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Request to rewrite a caller-supplied draft answer for one learner.
/// Runs the analyzers but skips retrieval entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizeRequest {
    pub learner_id: String,
    pub session_id: String,
    pub query: String,
    pub draft: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedDraft {
    pub personalized_answer: String,
    pub factors: PersonalizationFactors,
    pub pedagogy: PedagogicalContext,
    /// True when generation failed and the draft came back unchanged.
    pub personalization_failed: bool,
}

/// Append-only record of one pipeline run, including the full score
/// breakdown for auditability. Feedback fields are filled in later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub interaction_id: String,
    pub learner_id: String,
    pub session_id: String,
    pub query: String,
    pub answer: String,
    pub strategy: RetrievalStrategy,
    pub sources: Vec<ScoredCandidate>,
    pub pedagogy: PedagogicalContext,
    pub factors: PersonalizationFactors,
    pub components_active: ComponentActivation,
    pub personalization_failed: bool,
    pub rejected: bool,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_passed: Option<bool>,
    pub uncertainty_flag: bool,
    pub created_at_ms: i64,
}

/// Usage statistics for one curated QA pair: how often its stored answer
/// was served directly, and how learners rated those answers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaUsage {
    pub times_matched: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rating: Option<f64>,
    pub rating_count: i64,
}

/// Acknowledgement returned for a feedback submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAck {
    pub interaction_id: String,
    pub normalized_score: f64,
    /// True when an identical submission was already applied; the call
    /// changed nothing.
    pub replayed: bool,
    pub profile_revision: i64,
}

/// Final result of one adaptive-query pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveAnswer {
    pub interaction_id: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_answer: Option<String>,
    pub strategy: RetrievalStrategy,
    pub sources: Vec<ScoredCandidate>,
    pub pedagogy: PedagogicalContext,
    pub factors: PersonalizationFactors,
    pub components_active: ComponentActivation,
    pub personalization_failed: bool,
    pub rejected: bool,
    pub latency_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zpd_level_single_step_chain() {
        assert_eq!(ZpdLevel::Beginner.promote(), ZpdLevel::Elementary);
        assert_eq!(ZpdLevel::Expert.promote(), ZpdLevel::Expert);
        assert_eq!(ZpdLevel::Beginner.demote(), ZpdLevel::Beginner);
        assert_eq!(ZpdLevel::Expert.demote(), ZpdLevel::Advanced);
    }

    #[test]
    fn bloom_order_matches_rank() {
        assert!(BloomLevel::Remember < BloomLevel::Create);
        assert_eq!(BloomLevel::Create.rank(), 5);
    }

    #[test]
    fn candidate_relevance_clamped() {
        let c = ContentCandidate::new("c1", SourceType::Passage, "t", 1.7);
        assert_eq!(c.relevance, 1.0);
        let c = ContentCandidate::new("c2", SourceType::Passage, "t", -0.2);
        assert_eq!(c.relevance, 0.0);
    }

    #[test]
    fn synthesized_profile_is_mid_level() {
        let p = LearnerProfile::synthesize("l1", "s1");
        assert_eq!(p.zpd_level, ZpdLevel::Intermediate);
        assert!((p.avg_comprehension - 2.5).abs() < f64::EPSILON);
        assert!(p.avg_satisfaction.is_none());
    }

    #[test]
    fn feedback_payload_tagged_roundtrip() {
        let quick: FeedbackPayload =
            serde_json::from_str(r#"{"kind":"quick","emoji":"👍"}"#).unwrap();
        assert!(matches!(quick, FeedbackPayload::Quick { .. }));

        let dim: FeedbackPayload = serde_json::from_str(
            r#"{"kind":"dimensional","understanding":4,"relevance":5,"clarity":3}"#,
        )
        .unwrap();
        assert!(matches!(dim, FeedbackPayload::Dimensional { .. }));
    }
}
