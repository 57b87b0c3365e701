use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::config::{ComponentFlags, ConfigDelta, EngineConfig, FlagOverrides};
use super::persistence::EnginePersistence;
use super::prompt::{self, GenerationRequest, INSUFFICIENT_GROUNDING_ANSWER};
use super::retrieval::{self, ContentSource, Retrieval};
use super::types::*;
use super::{bloom, cognitive_load, feedback, scoring, zpd, EngineError};
use crate::db::operations::GlobalScoreSample;
use crate::db::DatabaseProxy;

/// Seam to the text generator. The engine owns the prompt and the timeout;
/// implementations only transport the request.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError>;
}

const PROFILE_COMMIT_RETRIES: usize = 3;

/// The personalization engine. Holds the tunable config behind a lock so
/// the optimizer and the flags API can adjust it at runtime, and keeps
/// per-learner state in memory with optional Postgres persistence behind it.
/// Without persistence (tests, degraded mode) the in-memory maps are the
/// source of truth.
pub struct PersonalizationEngine {
    config: Arc<RwLock<EngineConfig>>,
    content: Arc<dyn ContentSource>,
    generator: Arc<dyn AnswerGenerator>,
    persistence: Option<Arc<EnginePersistence>>,
    profiles: RwLock<HashMap<(String, String), LearnerProfile>>,
    interactions: RwLock<HashMap<String, InteractionRecord>>,
    outcomes: RwLock<HashMap<(String, String), Vec<OutcomeSample>>>,
    feedback_keys: RwLock<HashSet<String>>,
    session_overrides: RwLock<HashMap<String, FlagOverrides>>,
    global_scores: RwLock<HashMap<String, (f64, i64)>>,
    qa_stats: RwLock<HashMap<String, QaUsage>>,
}

impl PersonalizationEngine {
    pub fn new(
        config: EngineConfig,
        content: Arc<dyn ContentSource>,
        generator: Arc<dyn AnswerGenerator>,
        db_proxy: Option<Arc<DatabaseProxy>>,
    ) -> Self {
        let persistence = db_proxy.map(|proxy| Arc::new(EnginePersistence::new(proxy)));
        Self {
            config: Arc::new(RwLock::new(config)),
            content,
            generator,
            persistence,
            profiles: RwLock::new(HashMap::new()),
            interactions: RwLock::new(HashMap::new()),
            outcomes: RwLock::new(HashMap::new()),
            feedback_keys: RwLock::new(HashSet::new()),
            session_overrides: RwLock::new(HashMap::new()),
            global_scores: RwLock::new(HashMap::new()),
            qa_stats: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Re-reads env config and layers any persisted global flags on top.
    pub async fn reload_config(&self) -> Result<(), EngineError> {
        let mut new_config = EngineConfig::from_env();
        if let Some(ref persistence) = self.persistence {
            match persistence.load_global_flags().await {
                Ok(Some(flags)) => new_config.flags = flags,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "failed to load component flags from db");
                }
            }
        }
        *self.config.write().await = new_config;
        tracing::info!("engine config reloaded");
        Ok(())
    }

    /// Applies an accepted optimizer proposal. Rejects deltas that would
    /// leave the config invalid.
    pub async fn apply_config_delta(&self, delta: &ConfigDelta) -> Result<EngineConfig, EngineError> {
        let mut config = self.config.write().await;
        let next = delta
            .apply_to(&config)
            .ok_or_else(|| EngineError::Invalid("proposal leaves config invalid".into()))?;
        *config = next.clone();
        tracing::info!("engine config updated from accepted proposal");
        Ok(next)
    }

    pub async fn set_global_flags(&self, flags: ComponentFlags) -> Result<(), EngineError> {
        self.config.write().await.flags = flags;
        if let Some(ref persistence) = self.persistence {
            persistence.save_global_flags(&flags).await?;
        }
        tracing::info!("component flags updated at runtime");
        Ok(())
    }

    pub async fn set_session_overrides(
        &self,
        session_id: &str,
        overrides: FlagOverrides,
    ) -> Result<(), EngineError> {
        if overrides.is_empty() {
            self.session_overrides.write().await.remove(session_id);
        } else {
            self.session_overrides
                .write()
                .await
                .insert(session_id.to_string(), overrides);
        }
        if let Some(ref persistence) = self.persistence {
            persistence.save_session_overrides(session_id, &overrides).await?;
        }
        Ok(())
    }

    /// Resolved switches for a session: session override > global flag.
    pub async fn resolve_activation(&self, session_id: &str) -> ComponentActivation {
        let flags = self.config.read().await.flags;
        if let Some(overrides) = self.session_overrides.read().await.get(session_id) {
            return overrides.resolve(flags);
        }
        if let Some(ref persistence) = self.persistence {
            match persistence.load_session_overrides(session_id).await {
                Ok(Some(overrides)) => {
                    self.session_overrides
                        .write()
                        .await
                        .insert(session_id.to_string(), overrides);
                    return overrides.resolve(flags);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, session_id, "flag override load failed, using globals");
                }
            }
        }
        FlagOverrides::default().resolve(flags)
    }

    pub async fn get_profile(
        &self,
        learner_id: &str,
        session_id: &str,
    ) -> Result<Option<LearnerProfile>, EngineError> {
        let key = (learner_id.to_string(), session_id.to_string());
        if let Some(profile) = self.profiles.read().await.get(&key) {
            return Ok(Some(profile.clone()));
        }
        if let Some(ref persistence) = self.persistence {
            if let Some(profile) = persistence.load_profile(learner_id, session_id).await? {
                self.profiles.write().await.insert(key, profile.clone());
                return Ok(Some(profile));
            }
        }
        Ok(None)
    }

    /// Runs the full adaptive-query pipeline for one request.
    pub async fn process_query(&self, request: QueryRequest) -> Result<AdaptiveAnswer, EngineError> {
        if request.query.trim().is_empty() {
            return Err(EngineError::Invalid("query must not be empty".into()));
        }
        let started = Instant::now();
        let config = self.config.read().await.clone();
        let activation = self.resolve_activation(&request.session_id).await;

        // Stage: loading profile. A load failure degrades to synthesized
        // defaults rather than failing the query.
        let (profile, mut personalization_failed) = match self
            .get_profile(&request.learner_id, &request.session_id)
            .await
        {
            Ok(Some(profile)) => (profile, false),
            Ok(None) => (
                LearnerProfile::synthesize(&request.learner_id, &request.session_id),
                false,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "profile load failed, using defaults");
                (
                    LearnerProfile::synthesize(&request.learner_id, &request.session_id),
                    true,
                )
            }
        };

        // Stage: analyzing. Outcome history and the query classifier are
        // independent.
        let (outcome_history, bloom_assessment) = tokio::join!(
            self.recent_outcomes(&request.learner_id, &request.session_id, config.zpd.window_size),
            async {
                if activation.bloom {
                    bloom::classify(&request.query)
                } else {
                    BloomAssessment::default()
                }
            },
        );

        let zpd_assessment = if activation.zpd {
            match outcome_history {
                Ok(history) => zpd::assess(profile.zpd_level, &history, &config.zpd),
                Err(err) => {
                    tracing::warn!(error = %err, "outcome history unavailable, holding level");
                    ZpdAssessment {
                        current_level: profile.zpd_level,
                        recommended_level: profile.zpd_level,
                        success_rate: 0.0,
                        sufficient_data: false,
                    }
                }
            }
        } else {
            ZpdAssessment {
                current_level: profile.zpd_level,
                recommended_level: profile.zpd_level,
                success_rate: 0.0,
                sufficient_data: false,
            }
        };

        // Stage: retrieving.
        let retrieval_outcome =
            retrieval::retrieve(self.content.as_ref(), &request.query, &config.retrieval).await?;

        // Load is measured on the material the learner will read, so it can
        // only be estimated once retrieval has produced that material.
        let load = if activation.cognitive_load {
            match &retrieval_outcome {
                Retrieval::Direct { candidate, .. } => {
                    cognitive_load::estimate(&candidate.text, &config.cognitive_load)
                }
                Retrieval::Hybrid { candidates } => {
                    let context = candidates
                        .iter()
                        .map(|c| c.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    cognitive_load::estimate(&context, &config.cognitive_load)
                }
                Retrieval::Insufficient { .. } => CognitiveLoad::default(),
            }
        } else {
            CognitiveLoad::default()
        };

        let pedagogy = PedagogicalContext {
            zpd: zpd_assessment.clone(),
            bloom: bloom_assessment,
            cognitive_load: load,
        };

        let factors = if activation.personalization {
            PersonalizationFactors {
                understanding_level: (profile.avg_comprehension / 5.0).clamp(0.0, 1.0),
                difficulty_level: zpd_assessment.recommended_level,
                explanation_style: profile.explanation_style,
            }
        } else {
            PersonalizationFactors {
                understanding_level: 0.5,
                difficulty_level: ZpdLevel::Intermediate,
                explanation_style: ExplanationStyle::Balanced,
            }
        };

        let (answer, draft_answer, strategy, sources, rejected) = match retrieval_outcome {
            Retrieval::Direct { candidate, similarity } => {
                self.record_qa_match(&candidate.content_id).await;
                let answer = candidate.text.clone();
                let source = ScoredCandidate {
                    base_score: similarity.clamp(0.0, 1.0),
                    personal_score: 0.5,
                    global_score: 0.5,
                    context_score: 0.5,
                    final_score: similarity.clamp(0.0, 1.0),
                    candidate,
                };
                (answer, None, RetrievalStrategy::DirectQaMatch, vec![source], false)
            }
            Retrieval::Insufficient { max_relevance } => {
                tracing::info!(
                    max_relevance,
                    learner_id = %request.learner_id,
                    "query rejected for insufficient grounding"
                );
                (
                    INSUFFICIENT_GROUNDING_ANSWER.to_string(),
                    None,
                    RetrievalStrategy::InsufficientGrounding,
                    vec![],
                    true,
                )
            }
            Retrieval::Hybrid { candidates } => {
                // Stage: scoring.
                let ids: Vec<String> =
                    candidates.iter().map(|c| c.content_id.clone()).collect();
                let globals = self.load_global_scores(&ids).await;
                let mut scored = scoring::score_candidates(
                    candidates,
                    &profile,
                    &pedagogy,
                    &globals,
                    &config.weights,
                    activation.cacs,
                );
                scored.truncate(config.generation.grounding_top_n);

                // Stage: generating.
                let gen_request = prompt::build_request(
                    &request.query,
                    request.context.as_deref(),
                    &scored,
                    &pedagogy,
                    &factors,
                    &config.generation,
                );
                let (answer, draft) = self
                    .generate_with_timeout(&gen_request, &scored, &config, &mut personalization_failed)
                    .await;
                (answer, draft, RetrievalStrategy::HybridKbRag, scored, false)
            }
        };

        // Stage: recording.
        let record = InteractionRecord {
            interaction_id: uuid::Uuid::new_v4().to_string(),
            learner_id: request.learner_id.clone(),
            session_id: request.session_id.clone(),
            query: request.query.clone(),
            answer,
            strategy,
            sources,
            pedagogy,
            factors,
            components_active: activation,
            personalization_failed,
            rejected,
            latency_ms: started.elapsed().as_millis() as i64,
            feedback_score: None,
            feedback_passed: None,
            uncertainty_flag: false,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.record_interaction(&record, &zpd_assessment, activation).await;

        tracing::info!(
            interaction_id = %record.interaction_id,
            learner_id = %request.learner_id,
            strategy = strategy.as_str(),
            latency_ms = record.latency_ms,
            "adaptive query processed"
        );

        Ok(AdaptiveAnswer {
            interaction_id: record.interaction_id.clone(),
            answer: record.answer.clone(),
            draft_answer,
            strategy,
            sources: record.sources.clone(),
            pedagogy: record.pedagogy.clone(),
            factors: record.factors.clone(),
            components_active: activation,
            personalization_failed,
            rejected,
            latency_ms: record.latency_ms,
        })
    }

    /// Rewrites a caller-supplied draft to the learner's level. Runs the
    /// same analyzers as the query pipeline but no retrieval; generation
    /// failure returns the draft unchanged.
    pub async fn personalize(
        &self,
        request: PersonalizeRequest,
    ) -> Result<PersonalizedDraft, EngineError> {
        if request.query.trim().is_empty() || request.draft.trim().is_empty() {
            return Err(EngineError::Invalid("query and draft must not be empty".into()));
        }
        let config = self.config.read().await.clone();
        let activation = self.resolve_activation(&request.session_id).await;

        let (profile, mut personalization_failed) = match self
            .get_profile(&request.learner_id, &request.session_id)
            .await
        {
            Ok(Some(profile)) => (profile, false),
            Ok(None) => (
                LearnerProfile::synthesize(&request.learner_id, &request.session_id),
                false,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "profile load failed, using defaults");
                (
                    LearnerProfile::synthesize(&request.learner_id, &request.session_id),
                    true,
                )
            }
        };

        let (outcome_history, bloom_assessment) = tokio::join!(
            self.recent_outcomes(&request.learner_id, &request.session_id, config.zpd.window_size),
            async {
                if activation.bloom {
                    bloom::classify(&request.query)
                } else {
                    BloomAssessment::default()
                }
            },
        );

        // The draft is the material the learner will read; measure load on it.
        let load = if activation.cognitive_load {
            cognitive_load::estimate(&request.draft, &config.cognitive_load)
        } else {
            CognitiveLoad::default()
        };

        let zpd_assessment = if activation.zpd {
            match outcome_history {
                Ok(history) => zpd::assess(profile.zpd_level, &history, &config.zpd),
                Err(err) => {
                    tracing::warn!(error = %err, "outcome history unavailable, holding level");
                    ZpdAssessment {
                        current_level: profile.zpd_level,
                        recommended_level: profile.zpd_level,
                        success_rate: 0.0,
                        sufficient_data: false,
                    }
                }
            }
        } else {
            ZpdAssessment {
                current_level: profile.zpd_level,
                recommended_level: profile.zpd_level,
                success_rate: 0.0,
                sufficient_data: false,
            }
        };

        let pedagogy = PedagogicalContext {
            zpd: zpd_assessment,
            bloom: bloom_assessment,
            cognitive_load: load,
        };

        let factors = if activation.personalization {
            PersonalizationFactors {
                understanding_level: (profile.avg_comprehension / 5.0).clamp(0.0, 1.0),
                difficulty_level: pedagogy.zpd.recommended_level,
                explanation_style: profile.explanation_style,
            }
        } else {
            PersonalizationFactors {
                understanding_level: 0.5,
                difficulty_level: ZpdLevel::Intermediate,
                explanation_style: ExplanationStyle::Balanced,
            }
        };

        let gen_request = prompt::build_rewrite_request(
            &request.query,
            &request.draft,
            &pedagogy,
            &factors,
            &config.generation,
        );

        let timeout = Duration::from_millis(config.generation.timeout_ms);
        let personalized_answer =
            match tokio::time::timeout(timeout, self.generator.generate(&gen_request)).await {
                Ok(Ok(answer)) => answer,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "draft rewrite failed, returning draft as-is");
                    personalization_failed = true;
                    request.draft.clone()
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = config.generation.timeout_ms,
                        "draft rewrite timed out, returning draft as-is"
                    );
                    personalization_failed = true;
                    request.draft.clone()
                }
            };

        Ok(PersonalizedDraft {
            personalized_answer,
            factors,
            pedagogy,
            personalization_failed,
        })
    }

    /// Generation with the configured hard timeout. On failure or timeout
    /// the answer degrades to the top candidate's text so the learner still
    /// gets grounded material.
    async fn generate_with_timeout(
        &self,
        gen_request: &GenerationRequest,
        scored: &[ScoredCandidate],
        config: &EngineConfig,
        personalization_failed: &mut bool,
    ) -> (String, Option<String>) {
        let timeout = Duration::from_millis(config.generation.timeout_ms);
        match tokio::time::timeout(timeout, self.generator.generate(gen_request)).await {
            Ok(Ok(answer)) => (answer, None),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "generation failed, returning extractive fallback");
                *personalization_failed = true;
                let fallback = extractive_fallback(scored);
                (fallback.clone(), Some(fallback))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = config.generation.timeout_ms,
                    "generation timed out, returning extractive fallback"
                );
                *personalization_failed = true;
                let fallback = extractive_fallback(scored);
                (fallback.clone(), Some(fallback))
            }
        }
    }

    /// Persists the interaction and commits the profile move. Storage
    /// failures are logged, not surfaced; the learner already has an answer.
    async fn record_interaction(
        &self,
        record: &InteractionRecord,
        zpd_assessment: &ZpdAssessment,
        activation: ComponentActivation,
    ) {
        self.interactions
            .write()
            .await
            .insert(record.interaction_id.clone(), record.clone());
        if let Some(ref persistence) = self.persistence {
            if let Err(err) = persistence.insert_interaction(record).await {
                tracing::warn!(error = %err, "failed to persist interaction record");
            }
        }

        let apply_level = activation.zpd && zpd_assessment.sufficient_data;
        let next_level = zpd_assessment.recommended_level;
        let result = self
            .commit_profile(&record.learner_id, &record.session_id, |current| {
                let mut next = current.clone();
                next.interaction_count += 1;
                if apply_level {
                    next.zpd_level = next_level;
                }
                next.revision += 1;
                next.updated_at_ms = chrono::Utc::now().timestamp_millis();
                next
            })
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to commit profile after interaction");
        }
    }

    /// Attaches feedback to an interaction. Identical replays are no-ops.
    pub async fn process_feedback(
        &self,
        interaction_id: &str,
        payload: &FeedbackPayload,
    ) -> Result<FeedbackAck, EngineError> {
        let resolved = feedback::resolve(payload)?;
        let key = feedback::idempotency_key(interaction_id, payload);

        if self.feedback_key_seen(&key).await? {
            let profile_revision = self
                .interaction_profile_revision(interaction_id)
                .await
                .unwrap_or(0);
            return Ok(FeedbackAck {
                interaction_id: interaction_id.to_string(),
                normalized_score: resolved.normalized,
                replayed: true,
                profile_revision,
            });
        }

        let interaction = self
            .load_interaction(interaction_id)
            .await?
            .ok_or_else(|| EngineError::Invalid(format!("unknown interaction: {interaction_id}")))?;

        let mut topics: Vec<String> = interaction
            .sources
            .iter()
            .filter_map(|s| s.candidate.topic_id.clone())
            .collect();
        topics.sort();
        topics.dedup();

        let committed = self
            .commit_profile(&interaction.learner_id, &interaction.session_id, |current| {
                feedback::apply_to_profile(current, &resolved, &topics)
            })
            .await?;

        // Outcome sample for the level estimator: difficulty attempted is
        // the mean labeled difficulty of the grounding set.
        let difficulty = mean_source_difficulty(&interaction.sources);
        self.push_outcome(
            &interaction.learner_id,
            &interaction.session_id,
            OutcomeSample {
                passed: resolved.passed,
                difficulty,
            },
        )
        .await;

        self.bump_global_scores(&interaction.sources, resolved.normalized, resolved.passed)
            .await;

        if interaction.strategy == RetrievalStrategy::DirectQaMatch {
            if let Some(source) = interaction.sources.first() {
                self.record_qa_rating(&source.candidate.content_id, resolved.normalized)
                    .await;
            }
        }

        {
            let mut interactions = self.interactions.write().await;
            if let Some(stored) = interactions.get_mut(interaction_id) {
                stored.feedback_score = Some(resolved.normalized);
                stored.feedback_passed = Some(resolved.passed);
            }
        }
        if let Some(ref persistence) = self.persistence {
            let payload_json = serde_json::to_value(payload)
                .map_err(|e| EngineError::Invalid(e.to_string()))?;
            if let Err(err) = persistence
                .attach_feedback(interaction_id, resolved.normalized, resolved.passed, &payload_json)
                .await
            {
                tracing::warn!(error = %err, "failed to persist feedback on interaction");
            }
            if let Err(err) = persistence.record_feedback_key(&key, interaction_id).await {
                tracing::warn!(error = %err, "failed to persist feedback idempotency key");
            }
        }
        self.feedback_keys.write().await.insert(key);

        tracing::info!(
            interaction_id,
            normalized = resolved.normalized,
            passed = resolved.passed,
            "feedback applied"
        );

        Ok(FeedbackAck {
            interaction_id: interaction_id.to_string(),
            normalized_score: resolved.normalized,
            replayed: false,
            profile_revision: committed.revision,
        })
    }

    /// Read-modify-write with revision compare, retried a bounded number of
    /// times before giving up with a conflict error.
    async fn commit_profile<F>(
        &self,
        learner_id: &str,
        session_id: &str,
        mutate: F,
    ) -> Result<LearnerProfile, EngineError>
    where
        F: Fn(&LearnerProfile) -> LearnerProfile,
    {
        let key = (learner_id.to_string(), session_id.to_string());
        for attempt in 0..PROFILE_COMMIT_RETRIES {
            let current = self
                .get_profile(learner_id, session_id)
                .await?
                .unwrap_or_else(|| LearnerProfile::synthesize(learner_id, session_id));
            let next = mutate(&current);

            if let Some(ref persistence) = self.persistence {
                match persistence.save_profile(&next, current.revision).await {
                    Ok(true) => {
                        self.profiles.write().await.insert(key, next.clone());
                        return Ok(next);
                    }
                    Ok(false) => {
                        tracing::debug!(attempt, learner_id, "profile revision conflict, retrying");
                        // Drop the stale cache entry so the retry reloads.
                        self.profiles.write().await.remove(&key);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let mut profiles = self.profiles.write().await;
            let stored_revision = profiles.get(&key).map(|p| p.revision).unwrap_or(0);
            if stored_revision == current.revision {
                profiles.insert(key, next.clone());
                return Ok(next);
            }
        }
        Err(EngineError::Conflict(format!(
            "profile {learner_id}/{session_id} kept changing underneath the update"
        )))
    }

    async fn recent_outcomes(
        &self,
        learner_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<OutcomeSample>, EngineError> {
        if let Some(ref persistence) = self.persistence {
            return persistence.recent_outcomes(learner_id, session_id, limit).await;
        }
        let key = (learner_id.to_string(), session_id.to_string());
        Ok(self
            .outcomes
            .read()
            .await
            .get(&key)
            .map(|v| v.iter().rev().take(limit).rev().copied().collect())
            .unwrap_or_default())
    }

    async fn push_outcome(&self, learner_id: &str, session_id: &str, sample: OutcomeSample) {
        let key = (learner_id.to_string(), session_id.to_string());
        self.outcomes.write().await.entry(key).or_default().push(sample);
    }

    async fn load_interaction(
        &self,
        interaction_id: &str,
    ) -> Result<Option<InteractionRecord>, EngineError> {
        if let Some(record) = self.interactions.read().await.get(interaction_id) {
            return Ok(Some(record.clone()));
        }
        if let Some(ref persistence) = self.persistence {
            return persistence.get_interaction(interaction_id).await;
        }
        Ok(None)
    }

    async fn interaction_profile_revision(&self, interaction_id: &str) -> Option<i64> {
        let interaction = self.load_interaction(interaction_id).await.ok()??;
        self.get_profile(&interaction.learner_id, &interaction.session_id)
            .await
            .ok()?
            .map(|p| p.revision)
    }

    async fn feedback_key_seen(&self, key: &str) -> Result<bool, EngineError> {
        if self.feedback_keys.read().await.contains(key) {
            return Ok(true);
        }
        if let Some(ref persistence) = self.persistence {
            return persistence.feedback_key_seen(key).await;
        }
        Ok(false)
    }

    /// Global quality scores for a candidate set. Lookup failures degrade
    /// to the neutral default rather than failing the query.
    async fn load_global_scores(&self, ids: &[String]) -> HashMap<String, f64> {
        if let Some(ref persistence) = self.persistence {
            match persistence.global_scores(ids).await {
                Ok(map) => return map,
                Err(err) => {
                    tracing::warn!(error = %err, "global score lookup failed, using neutral");
                    return HashMap::new();
                }
            }
        }
        let scores = self.global_scores.read().await;
        ids.iter()
            .filter_map(|id| scores.get(id).map(|(mean, _)| (id.clone(), *mean)))
            .collect()
    }

    /// Folds one feedback sample into the population aggregate of every
    /// candidate the learner was shown, not just the one used.
    async fn bump_global_scores(&self, sources: &[ScoredCandidate], sample: f64, passed: bool) {
        {
            let mut scores = self.global_scores.write().await;
            for source in sources {
                let entry = scores
                    .entry(source.candidate.content_id.clone())
                    .or_insert((0.5, 0));
                entry.0 = feedback::incremental_mean(entry.0, entry.1, sample).clamp(0.0, 1.0);
                entry.1 += 1;
            }
        }
        if let Some(ref persistence) = self.persistence {
            let samples: Vec<GlobalScoreSample> = sources
                .iter()
                .map(|s| GlobalScoreSample {
                    content_id: s.candidate.content_id.clone(),
                    personal_fit: s.personal_score,
                })
                .collect();
            if let Err(err) = persistence.bump_global_scores(&samples, sample, passed).await {
                tracing::warn!(error = %err, "failed to persist global score update");
            }
        }
    }

    /// Counts one direct-match serve of a stored QA answer.
    async fn record_qa_match(&self, qa_id: &str) {
        self.qa_stats
            .write()
            .await
            .entry(qa_id.to_string())
            .or_default()
            .times_matched += 1;
        if let Some(ref persistence) = self.persistence {
            if let Err(err) = persistence.bump_qa_usage(qa_id).await {
                tracing::warn!(error = %err, qa_id, "failed to persist qa usage bump");
            }
        }
    }

    /// Folds a learner rating into a directly-served QA pair's average.
    async fn record_qa_rating(&self, qa_id: &str, rating: f64) {
        {
            let mut stats = self.qa_stats.write().await;
            let entry = stats.entry(qa_id.to_string()).or_default();
            let prev = entry.avg_rating.unwrap_or(rating);
            entry.avg_rating =
                Some(feedback::incremental_mean(prev, entry.rating_count, rating).clamp(0.0, 1.0));
            entry.rating_count += 1;
        }
        if let Some(ref persistence) = self.persistence {
            if let Err(err) = persistence.record_qa_rating(qa_id, rating).await {
                tracing::warn!(error = %err, qa_id, "failed to persist qa rating");
            }
        }
    }

    pub async fn qa_usage(&self, qa_id: &str) -> Option<QaUsage> {
        self.qa_stats.read().await.get(qa_id).copied()
    }
}

fn extractive_fallback(scored: &[ScoredCandidate]) -> String {
    match scored.first() {
        Some(top) => format!("From the course material: {}", top.candidate.text.trim()),
        None => INSUFFICIENT_GROUNDING_ANSWER.to_string(),
    }
}

fn mean_source_difficulty(sources: &[ScoredCandidate]) -> f64 {
    let labeled: Vec<f64> = sources.iter().filter_map(|s| s.candidate.difficulty).collect();
    if labeled.is_empty() {
        0.5
    } else {
        labeled.iter().sum::<f64>() / labeled.len() as f64
    }
}
