use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::db::operations::{insert_proposal, recent_proposal_exists, ConfigProposalRow};
use crate::db::DatabaseProxy;
use crate::engine::config::{CacsWeights, ConfigDelta, EngineConfig};
use crate::engine::PersonalizationEngine;
use crate::services::trend_analysis::{analyze_feedback_trend, FeedbackTrend, TrendDirection};

static OPTIMIZER_RUNNING: AtomicBool = AtomicBool::new(false);

const PROPOSAL_COOLDOWN_HOURS: i64 = 24;
const UNCERTAINTY_BATCH: i64 = 50;

// Retrieval-confidence cutoffs for flagging an unreviewed interaction.
const UNCERTAIN_MAX_SCORE: f64 = 0.55;
const UNCERTAIN_MARGIN: f64 = 0.05;
const UNCERTAIN_VARIANCE: f64 = 0.04;

/// Rejection share of all traffic above which retrieval looks too strict.
const HIGH_REJECTION_RATE: f64 = 0.25;

const MIN_SIMILARITY_FLOOR: f64 = 0.25;
const WEIGHT_STEP: f64 = 0.05;

/// Daily optimization pass: reads the feedback trend, flags uncertain
/// interactions for review, and files a bounded config proposal when the
/// trend warrants one. Proposals are never applied here; an operator
/// accepts them through the API.
pub async fn run_optimizer_cycle(
    db: Arc<DatabaseProxy>,
    engine: Arc<PersonalizationEngine>,
) -> Result<(), super::WorkerError> {
    if OPTIMIZER_RUNNING.swap(true, Ordering::SeqCst) {
        warn!("optimizer cycle already running, skipping");
        return Ok(());
    }
    let result = run_cycle_inner(db, engine).await;
    OPTIMIZER_RUNNING.store(false, Ordering::SeqCst);
    result
}

async fn run_cycle_inner(
    db: Arc<DatabaseProxy>,
    engine: Arc<PersonalizationEngine>,
) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    info!("Starting optimizer cycle");

    // Cooldown survives restarts; one proposal per day at most.
    if recent_proposal_exists(&db, PROPOSAL_COOLDOWN_HOURS).await? {
        debug!("proposal filed within cooldown window, skipping");
        return Ok(());
    }

    // Interactions with no feedback are the ones worth soliciting; flag
    // those where the stored score breakdown says retrieval was shaky.
    let unreviewed =
        crate::db::operations::unreviewed_interactions(&db, UNCERTAINTY_BATCH).await?;
    let uncertain_ids: Vec<String> = unreviewed
        .into_iter()
        .filter(|(_, sources)| retrieval_uncertain(&final_scores(sources)))
        .map(|(id, _)| id)
        .collect();
    let flagged = crate::db::operations::set_uncertainty_flags(&db, &uncertain_ids).await?;
    if flagged > 0 {
        info!(flagged, "low-confidence interactions flagged for review");
    }

    let trend = analyze_feedback_trend(&db).await?;
    let config = engine.get_config().await;
    let delta = suggest_delta(&trend, &config);

    match delta {
        Some((delta, rationale)) => {
            let proposal = ConfigProposalRow {
                id: uuid::Uuid::new_v4().to_string(),
                delta: serde_json::to_value(&delta).unwrap_or_default(),
                rationale,
                metrics: serde_json::to_value(&trend).unwrap_or_default(),
                status: "pending".to_string(),
                created_at: String::new(),
                decided_at: None,
            };
            insert_proposal(&db, &proposal).await?;
            info!(
                proposal_id = %proposal.id,
                trend = trend.direction.as_str(),
                "config proposal filed"
            );
        }
        None => {
            debug!(trend = trend.direction.as_str(), "no parameter change warranted");
        }
    }

    info!(
        duration_ms = start.elapsed().as_millis() as u64,
        "Optimizer cycle completed"
    );
    Ok(())
}

/// Pulls the composite scores out of a stored sources breakdown.
fn final_scores(sources: &serde_json::Value) -> Vec<f64> {
    sources
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.get("finalScore").and_then(|v| v.as_f64()))
                .collect()
        })
        .unwrap_or_default()
}

/// Whether the scored candidate set looks shaky enough to ask the learner
/// about: a weak best match, a near-tie at the top, or a wide spread.
fn retrieval_uncertain(final_scores: &[f64]) -> bool {
    let Some(&max) = final_scores
        .iter()
        .max_by(|a, b| a.total_cmp(b))
    else {
        return false;
    };
    if max < UNCERTAIN_MAX_SCORE {
        return true;
    }

    let mut sorted = final_scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    if sorted.len() >= 2 && sorted[0] - sorted[1] < UNCERTAIN_MARGIN {
        return true;
    }

    let mean = final_scores.iter().sum::<f64>() / final_scores.len() as f64;
    let variance = final_scores
        .iter()
        .map(|s| (s - mean).powi(2))
        .sum::<f64>()
        / final_scores.len() as f64;
    variance > UNCERTAIN_VARIANCE
}

/// Rule-based suggestion. Only a declining trend produces a proposal;
/// which knob moves depends on where the loss shows up.
fn suggest_delta(trend: &FeedbackTrend, config: &EngineConfig) -> Option<(ConfigDelta, String)> {
    if trend.direction != TrendDirection::Declining {
        return None;
    }

    let short = &trend.short_window;
    let rejection_rate = if short.total_interactions > 0 {
        short.rejected_count as f64 / short.total_interactions as f64
    } else {
        0.0
    };

    if rejection_rate > HIGH_REJECTION_RATE {
        // Many queries never reach generation; retrieval is filtering too
        // aggressively for this corpus.
        let current = config.retrieval.min_similarity;
        let proposed = (current - 0.05).max(MIN_SIMILARITY_FLOOR);
        if (proposed - current).abs() < 1e-9 {
            return None;
        }
        return Some((
            ConfigDelta {
                min_similarity: Some(proposed),
                ..Default::default()
            },
            format!(
                "Feedback declining with {:.0}% of queries rejected for insufficient grounding; \
                 lower the similarity floor from {current:.2} to {proposed:.2}.",
                rejection_rate * 100.0
            ),
        ));
    }

    // Queries get answered but land poorly; lean harder on the signals
    // that adapt to the individual learner.
    let weights = config.weights;
    let proposed = CacsWeights {
        base: (weights.base - WEIGHT_STEP).max(0.10),
        personal: weights.personal + (weights.base - (weights.base - WEIGHT_STEP).max(0.10)),
        global: weights.global,
        context: weights.context,
    };
    if !proposed.is_valid() || weights_similar(&weights, &proposed) {
        return None;
    }
    Some((
        ConfigDelta {
            weights: Some(proposed),
            ..Default::default()
        },
        format!(
            "Feedback declining without elevated rejections; shift {WEIGHT_STEP:.2} of blend \
             weight from base relevance to personal fit."
        ),
    ))
}

fn weights_similar(a: &CacsWeights, b: &CacsWeights) -> bool {
    const EPSILON: f64 = 1e-3;
    (a.base - b.base).abs() < EPSILON
        && (a.personal - b.personal).abs() < EPSILON
        && (a.global - b.global).abs() < EPSILON
        && (a.context - b.context).abs() < EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::WindowStats;

    fn trend(direction: TrendDirection, total: i64, rejected: i64) -> FeedbackTrend {
        let stats = WindowStats {
            avg_feedback_score: Some(0.5),
            feedback_count: 20,
            total_interactions: total,
            rejected_count: rejected,
        };
        FeedbackTrend {
            direction,
            short_window: stats,
            long_window: stats,
            ratio: Some(0.8),
        }
    }

    #[test]
    fn weak_best_match_is_uncertain() {
        assert!(retrieval_uncertain(&[0.5, 0.3]));
    }

    #[test]
    fn near_tie_at_the_top_is_uncertain() {
        assert!(retrieval_uncertain(&[0.70, 0.68, 0.4]));
    }

    #[test]
    fn wide_score_spread_is_uncertain() {
        assert!(retrieval_uncertain(&[0.9, 0.3]));
    }

    #[test]
    fn confident_retrieval_is_not_flagged() {
        assert!(!retrieval_uncertain(&[0.85, 0.70, 0.65]));
        assert!(!retrieval_uncertain(&[]));
    }

    #[test]
    fn scores_parse_from_stored_breakdown() {
        let sources = serde_json::json!([
            {"finalScore": 0.8, "baseScore": 0.7},
            {"finalScore": 0.6}
        ]);
        assert_eq!(final_scores(&sources), vec![0.8, 0.6]);
    }

    #[test]
    fn stable_trend_produces_no_proposal() {
        let out = suggest_delta(&trend(TrendDirection::Stable, 100, 0), &EngineConfig::default());
        assert!(out.is_none());
    }

    #[test]
    fn declining_with_high_rejections_lowers_similarity_floor() {
        let config = EngineConfig::default();
        let (delta, _) =
            suggest_delta(&trend(TrendDirection::Declining, 100, 40), &config).unwrap();
        let proposed = delta.min_similarity.unwrap();
        assert!(proposed < config.retrieval.min_similarity);
        assert!(proposed >= MIN_SIMILARITY_FLOOR);
        assert!(delta.weights.is_none());
    }

    #[test]
    fn declining_without_rejections_shifts_weight_to_personal() {
        let config = EngineConfig::default();
        let (delta, _) =
            suggest_delta(&trend(TrendDirection::Declining, 100, 2), &config).unwrap();
        let weights = delta.weights.unwrap();
        assert!(weights.is_valid());
        assert!(weights.personal > config.weights.personal);
        assert!(weights.base < config.weights.base);
    }

    #[test]
    fn proposed_delta_applies_cleanly() {
        let config = EngineConfig::default();
        let (delta, _) =
            suggest_delta(&trend(TrendDirection::Declining, 100, 40), &config).unwrap();
        assert!(delta.apply_to(&config).is_some());
    }
}
