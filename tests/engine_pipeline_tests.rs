//! End-to-end tests for the adaptive-query pipeline: retrieval strategy
//! selection, degradation paths, feedback ingestion, and the ZPD loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tutor_backend_rust::engine::config::{ComponentFlags, EngineConfig};
use tutor_backend_rust::engine::orchestrator::AnswerGenerator;
use tutor_backend_rust::engine::prompt::{GenerationRequest, INSUFFICIENT_GROUNDING_ANSWER};
use tutor_backend_rust::engine::retrieval::{ContentSource, QaMatch};
use tutor_backend_rust::engine::types::{
    BloomLevel, ContentCandidate, ExplanationStyle, FeedbackPayload, PersonalizeRequest,
    QueryRequest, RetrievalStrategy, SourceType, ZpdLevel,
};
use tutor_backend_rust::engine::{EngineError, PersonalizationEngine};

#[derive(Default)]
struct StubSource {
    qa: Vec<QaMatch>,
    passages: Vec<ContentCandidate>,
    knowledge: Vec<ContentCandidate>,
    fail_passages: bool,
    fail_knowledge: bool,
}

#[async_trait]
impl ContentSource for StubSource {
    async fn search_qa(&self, _query: &str, top_k: usize) -> Result<Vec<QaMatch>, EngineError> {
        Ok(self.qa.iter().take(top_k).cloned().collect())
    }

    async fn search_passages(
        &self,
        _query: &str,
        top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError> {
        if self.fail_passages {
            return Err(EngineError::Source("passage channel down".into()));
        }
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }

    async fn search_knowledge(
        &self,
        _query: &str,
        top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError> {
        if self.fail_knowledge {
            return Err(EngineError::Source("knowledge channel down".into()));
        }
        Ok(self.knowledge.iter().take(top_k).cloned().collect())
    }
}

enum StubGenerator {
    Fixed(&'static str),
    Failing,
    Slow(u64),
}

/// Keeps every prompt it is handed so tests can inspect what the engine
/// actually sent.
#[derive(Default)]
struct RecordingGenerator {
    prompts: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        self.prompts.lock().unwrap().push(request.user.clone());
        Ok("Recorded answer.".to_string())
    }
}

#[async_trait]
impl AnswerGenerator for StubGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, EngineError> {
        match self {
            Self::Fixed(answer) => Ok(answer.to_string()),
            Self::Failing => Err(EngineError::Generation("provider unavailable".into())),
            Self::Slow(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok("too late".to_string())
            }
        }
    }
}

fn passage(id: &str, text: &str, relevance: f64, difficulty: f64) -> ContentCandidate {
    ContentCandidate::new(id, SourceType::Passage, text, relevance).with_difficulty(difficulty)
}

fn knowledge_card(id: &str, text: &str, relevance: f64) -> ContentCandidate {
    ContentCandidate::new(id, SourceType::KnowledgeCard, text, relevance)
}

fn grounded_source() -> StubSource {
    StubSource {
        passages: vec![
            passage(
                "p1",
                "Photosynthesis converts light energy into chemical energy.",
                0.85,
                0.5,
            ),
            passage(
                "p2",
                "Chloroplasts host the photosynthesis reactions.",
                0.70,
                0.5,
            ),
        ],
        knowledge: vec![knowledge_card(
            "k1",
            "Photosynthesis: process plants use to produce glucose.",
            0.75,
        )],
        ..Default::default()
    }
}

fn engine_with(source: StubSource, generator: StubGenerator) -> PersonalizationEngine {
    PersonalizationEngine::new(
        EngineConfig::default(),
        Arc::new(source),
        Arc::new(generator),
        None,
    )
}

fn query(learner: &str) -> QueryRequest {
    QueryRequest {
        learner_id: learner.to_string(),
        session_id: "session-1".to_string(),
        query: "What is photosynthesis?".to_string(),
        context: None,
    }
}

#[tokio::test]
async fn direct_qa_match_short_circuits_generation() {
    let source = StubSource {
        qa: vec![QaMatch {
            candidate: ContentCandidate::new(
                "qa1",
                SourceType::QaPair,
                "Photosynthesis is how plants turn light into sugar.",
                0.95,
            ),
            similarity: 0.95,
        }],
        ..Default::default()
    };
    // A failing generator proves the QA path never calls it.
    let engine = engine_with(source, StubGenerator::Failing);

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert_eq!(answer.strategy, RetrievalStrategy::DirectQaMatch);
    assert_eq!(
        answer.answer,
        "Photosynthesis is how plants turn light into sugar."
    );
    assert_eq!(answer.sources.len(), 1);
    assert!(!answer.rejected);
    assert!(!answer.personalization_failed);
}

#[tokio::test]
async fn hybrid_query_returns_generated_answer_with_sources() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Grounded answer."));

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert_eq!(answer.strategy, RetrievalStrategy::HybridKbRag);
    assert_eq!(answer.answer, "Grounded answer.");
    assert!(!answer.sources.is_empty());
    assert!(answer.draft_answer.is_none());
    assert!(!answer.rejected);
    for source in &answer.sources {
        assert!((0.0..=1.0).contains(&source.base_score));
        assert!((0.0..=1.0).contains(&source.final_score));
    }
    let scores: Vec<f64> = answer.sources.iter().map(|s| s.final_score).collect();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[tokio::test]
async fn no_grounding_rejects_with_fixed_answer() {
    let engine = engine_with(StubSource::default(), StubGenerator::Fixed("unused"));

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert!(answer.rejected);
    assert_eq!(answer.strategy, RetrievalStrategy::InsufficientGrounding);
    assert_eq!(answer.answer, INSUFFICIENT_GROUNDING_ANSWER);
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn weak_grounding_below_floor_rejects() {
    let source = StubSource {
        passages: vec![passage("p1", "unrelated material entirely", 0.30, 0.5)],
        ..Default::default()
    };
    let engine = engine_with(source, StubGenerator::Fixed("unused"));

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert!(answer.rejected);
    assert_eq!(answer.strategy, RetrievalStrategy::InsufficientGrounding);
}

#[tokio::test]
async fn generator_failure_falls_back_to_extractive_answer() {
    let engine = engine_with(grounded_source(), StubGenerator::Failing);

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert_eq!(answer.strategy, RetrievalStrategy::HybridKbRag);
    assert!(answer.answer.starts_with("From the course material:"));
    assert!(answer.draft_answer.is_some());
    assert!(answer.personalization_failed);
    assert!(!answer.rejected);
}

#[tokio::test]
async fn generation_timeout_falls_back_to_extractive_answer() {
    let mut config = EngineConfig::default();
    config.generation.timeout_ms = 20;
    let engine = PersonalizationEngine::new(
        config,
        Arc::new(grounded_source()),
        Arc::new(StubGenerator::Slow(500)),
        None,
    );

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert!(answer.answer.starts_with("From the course material:"));
    assert!(answer.personalization_failed);
}

#[tokio::test]
async fn one_failed_channel_degrades_to_the_other() {
    let source = StubSource {
        knowledge: vec![knowledge_card(
            "k1",
            "Photosynthesis summary card with enough relevance.",
            0.80,
        )],
        fail_passages: true,
        ..Default::default()
    };
    let engine = engine_with(source, StubGenerator::Fixed("Answer from cards."));

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert_eq!(answer.strategy, RetrievalStrategy::HybridKbRag);
    assert!(answer
        .sources
        .iter()
        .all(|s| s.candidate.source_type == SourceType::KnowledgeCard));
}

#[tokio::test]
async fn both_channels_failing_degrades_to_rejection() {
    let source = StubSource {
        fail_passages: true,
        fail_knowledge: true,
        ..Default::default()
    };
    let engine = engine_with(source, StubGenerator::Fixed("unused"));

    let answer = engine.process_query(query("learner-1")).await.unwrap();

    assert!(answer.rejected);
    assert_eq!(answer.strategy, RetrievalStrategy::InsufficientGrounding);
    assert_eq!(answer.answer, INSUFFICIENT_GROUNDING_ANSWER);
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn empty_query_is_rejected_as_invalid() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("unused"));

    let err = engine
        .process_query(QueryRequest {
            learner_id: "learner-1".to_string(),
            session_id: "session-1".to_string(),
            query: "   ".to_string(),
            context: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Invalid(_)));
}

#[tokio::test]
async fn caller_context_reaches_the_generator() {
    let generator = Arc::new(RecordingGenerator::default());
    let engine = PersonalizationEngine::new(
        EngineConfig::default(),
        Arc::new(grounded_source()),
        generator.clone(),
        None,
    );

    let mut request = query("learner-9");
    request.context = Some("Yesterday's lecture covered chloroplast structure.".to_string());
    engine.process_query(request).await.unwrap();

    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts
        .iter()
        .any(|p| p.contains("Yesterday's lecture covered chloroplast structure.")));
}

#[tokio::test]
async fn personalize_rewrites_a_supplied_draft() {
    let engine = engine_with(StubSource::default(), StubGenerator::Fixed("Simpler answer."));

    let result = engine
        .personalize(PersonalizeRequest {
            learner_id: "learner-1".to_string(),
            session_id: "session-1".to_string(),
            query: "What is photosynthesis?".to_string(),
            draft: "Photosynthesis is the light-driven carbon fixation pathway.".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(result.personalized_answer, "Simpler answer.");
    assert!(!result.personalization_failed);
}

#[tokio::test]
async fn personalize_returns_draft_unchanged_when_generation_fails() {
    let engine = engine_with(StubSource::default(), StubGenerator::Failing);
    let draft = "Photosynthesis is the light-driven carbon fixation pathway.";

    let result = engine
        .personalize(PersonalizeRequest {
            learner_id: "learner-1".to_string(),
            session_id: "session-1".to_string(),
            query: "What is photosynthesis?".to_string(),
            draft: draft.to_string(),
        })
        .await
        .unwrap();

    assert_eq!(result.personalized_answer, draft);
    assert!(result.personalization_failed);
}

#[tokio::test]
async fn feedback_updates_profile_and_replays_are_no_ops() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));

    let answer = engine.process_query(query("learner-2")).await.unwrap();
    let payload = FeedbackPayload::Quick {
        emoji: "👍".to_string(),
    };

    let ack = engine
        .process_feedback(&answer.interaction_id, &payload)
        .await
        .unwrap();
    assert!(!ack.replayed);
    assert!((ack.normalized_score - 1.0).abs() < 1e-9);

    let profile = engine
        .get_profile("learner-2", "session-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.feedback_count, 1);
    let revision_after_first = profile.revision;

    let replay = engine
        .process_feedback(&answer.interaction_id, &payload)
        .await
        .unwrap();
    assert!(replay.replayed);

    let profile = engine
        .get_profile("learner-2", "session-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.feedback_count, 1);
    assert_eq!(profile.revision, revision_after_first);
}

#[tokio::test]
async fn dimensional_feedback_below_midpoint_fails_the_outcome() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));

    let answer = engine.process_query(query("learner-3")).await.unwrap();
    let ack = engine
        .process_feedback(
            &answer.interaction_id,
            &FeedbackPayload::Dimensional {
                understanding: 2.0,
                relevance: 2.0,
                clarity: 2.0,
            },
        )
        .await
        .unwrap();

    // 2/5 averages to 0.4, under the 0.6 pass bar.
    assert!((ack.normalized_score - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn feedback_for_unknown_interaction_is_invalid() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("unused"));

    let err = engine
        .process_feedback(
            "no-such-interaction",
            &FeedbackPayload::Quick {
                emoji: "👍".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Invalid(_)));
}

#[tokio::test]
async fn unknown_emoji_is_invalid() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));
    let answer = engine.process_query(query("learner-4")).await.unwrap();

    let err = engine
        .process_feedback(
            &answer.interaction_id,
            &FeedbackPayload::Quick {
                emoji: "🤖".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Invalid(_)));
}

#[tokio::test]
async fn sustained_success_promotes_one_zpd_level() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));
    let payload = FeedbackPayload::Quick {
        emoji: "👍".to_string(),
    };

    for _ in 0..3 {
        let answer = engine.process_query(query("learner-5")).await.unwrap();
        engine
            .process_feedback(&answer.interaction_id, &payload)
            .await
            .unwrap();
    }

    // The next query sees three passed outcomes at difficulty 0.5 and
    // recommends a single-step promotion from the Intermediate start.
    engine.process_query(query("learner-5")).await.unwrap();

    let profile = engine
        .get_profile("learner-5", "session-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.zpd_level, ZpdLevel::Advanced);
}

#[tokio::test]
async fn repeated_failure_demotes_one_zpd_level() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));
    let payload = FeedbackPayload::Quick {
        emoji: "👎".to_string(),
    };

    for _ in 0..3 {
        let answer = engine.process_query(query("learner-6")).await.unwrap();
        engine
            .process_feedback(&answer.interaction_id, &payload)
            .await
            .unwrap();
    }
    engine.process_query(query("learner-6")).await.unwrap();

    let profile = engine
        .get_profile("learner-6", "session-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.zpd_level, ZpdLevel::Elementary);
}

#[tokio::test]
async fn failed_feedback_marks_the_shown_topic_weak() {
    let source = StubSource {
        passages: vec![ContentCandidate::new(
            "p1",
            SourceType::Passage,
            "Lenses refract light toward a focal point.",
            0.85,
        )
        .with_topic("optics")
        .with_difficulty(0.5)],
        ..Default::default()
    };
    let engine = engine_with(source, StubGenerator::Fixed("Answer."));

    let answer = engine.process_query(query("learner-11")).await.unwrap();
    engine
        .process_feedback(
            &answer.interaction_id,
            &FeedbackPayload::Quick {
                emoji: "👎".to_string(),
            },
        )
        .await
        .unwrap();

    let profile = engine
        .get_profile("learner-11", "session-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.weak_topics, vec!["optics".to_string()]);
    assert!(profile.strong_topics.is_empty());
}

#[tokio::test]
async fn direct_matches_accumulate_usage_stats() {
    let source = StubSource {
        qa: vec![QaMatch {
            candidate: ContentCandidate::new(
                "qa1",
                SourceType::QaPair,
                "Photosynthesis is how plants turn light into sugar.",
                0.95,
            ),
            similarity: 0.95,
        }],
        ..Default::default()
    };
    let engine = engine_with(source, StubGenerator::Failing);

    let first = engine.process_query(query("learner-10")).await.unwrap();
    engine.process_query(query("learner-10")).await.unwrap();

    let usage = engine.qa_usage("qa1").await.unwrap();
    assert_eq!(usage.times_matched, 2);
    assert!(usage.avg_rating.is_none());

    engine
        .process_feedback(
            &first.interaction_id,
            &FeedbackPayload::Quick {
                emoji: "👍".to_string(),
            },
        )
        .await
        .unwrap();

    let usage = engine.qa_usage("qa1").await.unwrap();
    assert_eq!(usage.rating_count, 1);
    assert!((usage.avg_rating.unwrap() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn struggling_learner_gets_demoted_and_concise_answers() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));
    let payload = FeedbackPayload::Quick {
        emoji: "👎".to_string(),
    };

    for _ in 0..3 {
        let answer = engine.process_query(query("learner-12")).await.unwrap();
        engine
            .process_feedback(&answer.interaction_id, &payload)
            .await
            .unwrap();
    }
    // The fourth query applies the first demotion and also ends in failure.
    let answer = engine.process_query(query("learner-12")).await.unwrap();
    engine
        .process_feedback(&answer.interaction_id, &payload)
        .await
        .unwrap();

    let answer = engine.process_query(query("learner-12")).await.unwrap();

    assert_eq!(answer.factors.difficulty_level, ZpdLevel::Beginner);
    assert_eq!(answer.factors.explanation_style, ExplanationStyle::Concise);
    assert_eq!(answer.pedagogy.bloom.level, BloomLevel::Remember);
    assert!(!answer.pedagogy.cognitive_load.needs_simplification);
}

#[tokio::test]
async fn disabled_cacs_scores_components_neutral() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));
    engine
        .set_global_flags(ComponentFlags {
            cacs_enabled: false,
            ..Default::default()
        })
        .await
        .unwrap();

    let answer = engine.process_query(query("learner-7")).await.unwrap();

    assert!(!answer.components_active.cacs);
    for source in &answer.sources {
        assert!((source.personal_score - 0.5).abs() < 1e-9);
        assert!((source.global_score - 0.5).abs() < 1e-9);
        assert!((source.context_score - 0.5).abs() < 1e-9);
        assert!((source.final_score - source.base_score).abs() < 1e-9);
    }
}

#[tokio::test]
async fn session_override_disables_a_globally_enabled_component() {
    let engine = engine_with(grounded_source(), StubGenerator::Fixed("Answer."));
    engine
        .set_session_overrides(
            "session-1",
            serde_json::from_value(serde_json::json!({ "zpdEnabled": false })).unwrap(),
        )
        .await
        .unwrap();

    let answer = engine.process_query(query("learner-8")).await.unwrap();

    assert!(!answer.components_active.zpd);
    assert!(answer.components_active.bloom);
}
