use std::collections::HashMap;
use std::sync::Arc;

use super::config::{ComponentFlags, FlagOverrides};
use super::types::{
    ComponentActivation, ExplanationStyle, InteractionRecord, LearnerProfile, OutcomeSample,
    PedagogicalContext, PersonalizationFactors, RetrievalStrategy, ZpdLevel,
};
use super::EngineError;
use crate::db::operations::{self, InteractionRow, LearnerProfileRow};
use crate::db::DatabaseProxy;

fn storage_err(err: sqlx::Error) -> EngineError {
    EngineError::Storage(err.to_string())
}

/// Maps engine state to and from Postgres rows. All methods are thin; the
/// engine owns retries and degradation decisions.
pub struct EnginePersistence {
    db_proxy: Arc<DatabaseProxy>,
}

impl EnginePersistence {
    pub fn new(db_proxy: Arc<DatabaseProxy>) -> Self {
        Self { db_proxy }
    }

    pub fn proxy(&self) -> &Arc<DatabaseProxy> {
        &self.db_proxy
    }

    pub async fn load_profile(
        &self,
        learner_id: &str,
        session_id: &str,
    ) -> Result<Option<LearnerProfile>, EngineError> {
        let row = operations::get_learner_profile(&self.db_proxy, learner_id, session_id)
            .await
            .map_err(storage_err)?;
        Ok(row.map(profile_from_row))
    }

    pub async fn save_profile(
        &self,
        profile: &LearnerProfile,
        expected_revision: i64,
    ) -> Result<bool, EngineError> {
        let row = profile_to_row(profile);
        operations::save_learner_profile(&self.db_proxy, &row, expected_revision)
            .await
            .map_err(storage_err)
    }

    pub async fn insert_interaction(&self, record: &InteractionRecord) -> Result<(), EngineError> {
        let row = interaction_to_row(record)?;
        operations::insert_interaction(&self.db_proxy, &row)
            .await
            .map_err(storage_err)
    }

    pub async fn get_interaction(
        &self,
        interaction_id: &str,
    ) -> Result<Option<InteractionRecord>, EngineError> {
        let row = operations::get_interaction(&self.db_proxy, interaction_id)
            .await
            .map_err(storage_err)?;
        row.map(interaction_from_row).transpose()
    }

    pub async fn attach_feedback(
        &self,
        interaction_id: &str,
        score: f64,
        passed: bool,
        payload: &serde_json::Value,
    ) -> Result<(), EngineError> {
        operations::attach_feedback(&self.db_proxy, interaction_id, score, passed, payload)
            .await
            .map_err(storage_err)
    }

    pub async fn recent_outcomes(
        &self,
        learner_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<OutcomeSample>, EngineError> {
        let rows = operations::recent_outcome_rows(&self.db_proxy, learner_id, session_id, limit as i64)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|r| OutcomeSample {
                passed: r.passed,
                difficulty: r.difficulty,
            })
            .collect())
    }

    pub async fn feedback_key_seen(&self, key: &str) -> Result<bool, EngineError> {
        operations::feedback_key_seen(&self.db_proxy, key)
            .await
            .map_err(storage_err)
    }

    pub async fn record_feedback_key(
        &self,
        key: &str,
        interaction_id: &str,
    ) -> Result<(), EngineError> {
        operations::record_feedback_key(&self.db_proxy, key, interaction_id)
            .await
            .map_err(storage_err)
    }

    pub async fn global_scores(
        &self,
        content_ids: &[String],
    ) -> Result<HashMap<String, f64>, EngineError> {
        let pairs = operations::get_global_scores(&self.db_proxy, content_ids)
            .await
            .map_err(storage_err)?;
        Ok(pairs.into_iter().collect())
    }

    pub async fn bump_global_scores(
        &self,
        samples: &[operations::GlobalScoreSample],
        score: f64,
        passed: bool,
    ) -> Result<(), EngineError> {
        operations::bump_global_scores(&self.db_proxy, samples, score, passed)
            .await
            .map_err(storage_err)
    }

    pub async fn bump_qa_usage(&self, qa_id: &str) -> Result<(), EngineError> {
        operations::bump_qa_usage(&self.db_proxy, qa_id)
            .await
            .map_err(storage_err)
    }

    pub async fn record_qa_rating(&self, qa_id: &str, rating: f64) -> Result<(), EngineError> {
        operations::record_qa_rating(&self.db_proxy, qa_id, rating)
            .await
            .map_err(storage_err)
    }

    pub async fn load_global_flags(&self) -> Result<Option<ComponentFlags>, EngineError> {
        let value = operations::get_global_flags(&self.db_proxy)
            .await
            .map_err(storage_err)?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    pub async fn save_global_flags(&self, flags: &ComponentFlags) -> Result<(), EngineError> {
        let value = serde_json::to_value(flags).map_err(|e| EngineError::Storage(e.to_string()))?;
        operations::set_global_flags(&self.db_proxy, &value)
            .await
            .map_err(storage_err)
    }

    pub async fn load_session_overrides(
        &self,
        session_id: &str,
    ) -> Result<Option<FlagOverrides>, EngineError> {
        let value = operations::get_session_flags(&self.db_proxy, session_id)
            .await
            .map_err(storage_err)?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    pub async fn save_session_overrides(
        &self,
        session_id: &str,
        overrides: &FlagOverrides,
    ) -> Result<(), EngineError> {
        let value =
            serde_json::to_value(overrides).map_err(|e| EngineError::Storage(e.to_string()))?;
        operations::set_session_flags(&self.db_proxy, session_id, &value)
            .await
            .map_err(storage_err)
    }
}

fn profile_from_row(row: LearnerProfileRow) -> LearnerProfile {
    LearnerProfile {
        learner_id: row.learner_id,
        session_id: row.session_id,
        avg_comprehension: row.avg_comprehension,
        avg_satisfaction: row.avg_satisfaction,
        interaction_count: row.interaction_count,
        feedback_count: row.feedback_count,
        strong_topics: row.strong_topics,
        weak_topics: row.weak_topics,
        zpd_level: ZpdLevel::parse(&row.zpd_level),
        explanation_style: ExplanationStyle::parse(&row.explanation_style),
        revision: row.revision,
        updated_at_ms: row.updated_at_ms,
    }
}

fn profile_to_row(profile: &LearnerProfile) -> LearnerProfileRow {
    LearnerProfileRow {
        learner_id: profile.learner_id.clone(),
        session_id: profile.session_id.clone(),
        avg_comprehension: profile.avg_comprehension,
        avg_satisfaction: profile.avg_satisfaction,
        interaction_count: profile.interaction_count,
        feedback_count: profile.feedback_count,
        strong_topics: profile.strong_topics.clone(),
        weak_topics: profile.weak_topics.clone(),
        zpd_level: profile.zpd_level.as_str().to_string(),
        explanation_style: profile.explanation_style.as_str().to_string(),
        revision: profile.revision,
        updated_at_ms: profile.updated_at_ms,
    }
}

fn interaction_to_row(record: &InteractionRecord) -> Result<InteractionRow, EngineError> {
    let labeled: Vec<f64> = record
        .sources
        .iter()
        .filter_map(|s| s.candidate.difficulty)
        .collect();
    let attempted_difficulty = if labeled.is_empty() {
        0.5
    } else {
        labeled.iter().sum::<f64>() / labeled.len() as f64
    };
    Ok(InteractionRow {
        id: record.interaction_id.clone(),
        learner_id: record.learner_id.clone(),
        session_id: record.session_id.clone(),
        query: record.query.clone(),
        answer: record.answer.clone(),
        strategy: record.strategy.as_str().to_string(),
        sources: serde_json::to_value(&record.sources)
            .map_err(|e| EngineError::Storage(e.to_string()))?,
        pedagogy: serde_json::to_value(&record.pedagogy)
            .map_err(|e| EngineError::Storage(e.to_string()))?,
        factors: serde_json::to_value(&record.factors)
            .map_err(|e| EngineError::Storage(e.to_string()))?,
        components_active: serde_json::to_value(record.components_active)
            .map_err(|e| EngineError::Storage(e.to_string()))?,
        personalization_failed: record.personalization_failed,
        rejected: record.rejected,
        latency_ms: record.latency_ms,
        attempted_difficulty,
        feedback_score: record.feedback_score,
        feedback_passed: record.feedback_passed,
        uncertainty_flag: record.uncertainty_flag,
        created_at_ms: record.created_at_ms,
    })
}

fn interaction_from_row(row: InteractionRow) -> Result<InteractionRecord, EngineError> {
    let sources = serde_json::from_value(row.sources).unwrap_or_default();
    let pedagogy: PedagogicalContext =
        serde_json::from_value(row.pedagogy).unwrap_or_default();
    let factors: PersonalizationFactors = serde_json::from_value(row.factors).unwrap_or(
        PersonalizationFactors {
            understanding_level: 0.5,
            difficulty_level: ZpdLevel::Intermediate,
            explanation_style: ExplanationStyle::Balanced,
        },
    );
    let components_active: ComponentActivation =
        serde_json::from_value(row.components_active).unwrap_or_default();
    Ok(InteractionRecord {
        interaction_id: row.id,
        learner_id: row.learner_id,
        session_id: row.session_id,
        query: row.query,
        answer: row.answer,
        strategy: RetrievalStrategy::parse(&row.strategy),
        sources,
        pedagogy,
        factors,
        components_active,
        personalization_failed: row.personalization_failed,
        rejected: row.rejected,
        latency_ms: row.latency_ms,
        feedback_score: row.feedback_score,
        feedback_passed: row.feedback_passed,
        uncertainty_flag: row.uncertainty_flag,
        created_at_ms: row.created_at_ms,
    })
}
