use sha2::{Digest, Sha256};

use super::types::{ExplanationStyle, FeedbackPayload, LearnerProfile};
use super::EngineError;

/// A feedback payload resolved into the engine's internal scale. Built once
/// at the ingestion boundary; everything downstream consumes this.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedFeedback {
    /// Overall signal in [0,1].
    pub normalized: f64,
    /// Comprehension sample on the profile's 0-5 scale.
    pub comprehension: f64,
    /// Satisfaction sample, 0-5. Only multi-dimensional feedback carries one.
    pub satisfaction: Option<f64>,
    /// Whether this interaction counts as a pass for the level estimator.
    pub passed: bool,
}

/// Normalized score at or above which an interaction counts as passed.
pub const PASS_THRESHOLD: f64 = 0.6;

pub fn resolve(payload: &FeedbackPayload) -> Result<ResolvedFeedback, EngineError> {
    match payload {
        FeedbackPayload::Quick { emoji } => {
            let normalized = emoji_score(emoji)
                .ok_or_else(|| EngineError::Invalid(format!("unknown reaction: {emoji}")))?;
            Ok(ResolvedFeedback {
                normalized,
                comprehension: normalized * 5.0,
                satisfaction: None,
                passed: normalized >= PASS_THRESHOLD,
            })
        }
        FeedbackPayload::Dimensional {
            understanding,
            relevance,
            clarity,
        } => {
            for (name, v) in [
                ("understanding", *understanding),
                ("relevance", *relevance),
                ("clarity", *clarity),
            ] {
                if !(1.0..=5.0).contains(&v) {
                    return Err(EngineError::Invalid(format!(
                        "{name} must be between 1 and 5, got {v}"
                    )));
                }
            }
            let normalized = ((understanding + relevance + clarity) / 3.0 / 5.0).clamp(0.0, 1.0);
            Ok(ResolvedFeedback {
                normalized,
                comprehension: *understanding,
                satisfaction: Some((relevance + clarity) / 2.0),
                passed: normalized >= PASS_THRESHOLD,
            })
        }
    }
}

fn emoji_score(emoji: &str) -> Option<f64> {
    match emoji.trim() {
        "👍" | "up" | "+1" => Some(1.0),
        "😊" => Some(0.75),
        "😐" | "neutral" => Some(0.5),
        "😕" => Some(0.25),
        "👎" | "down" | "-1" => Some(0.0),
        _ => None,
    }
}

/// Streaming mean update. `count` is the number of samples already folded
/// into `mean`.
pub fn incremental_mean(mean: f64, count: i64, sample: f64) -> f64 {
    if count <= 0 {
        return sample;
    }
    mean + (sample - mean) / (count as f64 + 1.0)
}

/// Folds one resolved feedback into a profile copy. `topics` are the topic
/// ids of the material the learner was shown; a pass moves them toward the
/// strong set, a fail toward the weak set. Revision is bumped here; the
/// storage layer compares it against the stored row on commit.
pub fn apply_to_profile(
    profile: &LearnerProfile,
    feedback: &ResolvedFeedback,
    topics: &[String],
) -> LearnerProfile {
    let mut next = profile.clone();
    next.avg_comprehension = incremental_mean(
        profile.avg_comprehension,
        profile.feedback_count,
        feedback.comprehension,
    )
    .clamp(0.0, 5.0);
    if let Some(sat) = feedback.satisfaction {
        next.avg_satisfaction = Some(match profile.avg_satisfaction {
            Some(prev) => incremental_mean(prev, profile.feedback_count, sat).clamp(0.0, 5.0),
            None => sat,
        });
    }

    for topic in topics {
        if feedback.passed {
            next.weak_topics.retain(|t| t != topic);
            if !next.strong_topics.contains(topic) {
                next.strong_topics.push(topic.clone());
            }
        } else {
            next.strong_topics.retain(|t| t != topic);
            if !next.weak_topics.contains(topic) {
                next.weak_topics.push(topic.clone());
            }
        }
    }

    next.explanation_style = style_for(next.avg_comprehension);
    next.feedback_count = profile.feedback_count + 1;
    next.revision = profile.revision + 1;
    next.updated_at_ms = chrono::Utc::now().timestamp_millis();
    next
}

/// Preferred register tracks the comprehension trend: struggling learners
/// get short concrete answers, strong ones get depth.
fn style_for(avg_comprehension: f64) -> ExplanationStyle {
    if avg_comprehension <= 2.5 {
        ExplanationStyle::Concise
    } else if avg_comprehension >= 4.0 {
        ExplanationStyle::Detailed
    } else {
        ExplanationStyle::Balanced
    }
}

/// Replay key for a feedback submission. Identical payloads against the
/// same interaction hash identically, so a retried POST is a no-op.
pub fn idempotency_key(interaction_id: &str, payload: &FeedbackPayload) -> String {
    let body = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(interaction_id.as_bytes());
    hasher.update(b":");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbs_up_is_full_score_pass() {
        let r = resolve(&FeedbackPayload::Quick { emoji: "👍".into() }).unwrap();
        assert!((r.normalized - 1.0).abs() < f64::EPSILON);
        assert!(r.passed);
        assert!(r.satisfaction.is_none());
    }

    #[test]
    fn thumbs_down_fails() {
        let r = resolve(&FeedbackPayload::Quick { emoji: "👎".into() }).unwrap();
        assert!((r.normalized).abs() < f64::EPSILON);
        assert!(!r.passed);
    }

    #[test]
    fn unknown_emoji_rejected() {
        assert!(resolve(&FeedbackPayload::Quick { emoji: "🎉".into() }).is_err());
    }

    #[test]
    fn dimensional_out_of_range_rejected() {
        let r = resolve(&FeedbackPayload::Dimensional {
            understanding: 6.0,
            relevance: 3.0,
            clarity: 3.0,
        });
        assert!(matches!(r, Err(EngineError::Invalid(_))));
    }

    #[test]
    fn dimensional_resolves_all_fields() {
        let r = resolve(&FeedbackPayload::Dimensional {
            understanding: 4.0,
            relevance: 5.0,
            clarity: 3.0,
        })
        .unwrap();
        assert!((r.normalized - 0.8).abs() < 1e-9);
        assert!((r.comprehension - 4.0).abs() < f64::EPSILON);
        assert!((r.satisfaction.unwrap() - 4.0).abs() < f64::EPSILON);
        assert!(r.passed);
    }

    #[test]
    fn incremental_mean_matches_batch_mean() {
        let samples = [3.0, 4.0, 2.0, 5.0, 1.0];
        let mut mean = 0.0;
        for (i, s) in samples.iter().enumerate() {
            mean = incremental_mean(mean, i as i64, *s);
        }
        let batch: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - batch).abs() < 1e-9);
    }

    #[test]
    fn quick_feedback_never_touches_satisfaction() {
        let mut profile = LearnerProfile::synthesize("l", "s");
        profile.feedback_count = 2;
        profile.avg_satisfaction = None;
        let r = resolve(&FeedbackPayload::Quick { emoji: "😊".into() }).unwrap();
        let next = apply_to_profile(&profile, &r, &[]);
        assert!(next.avg_satisfaction.is_none());
        assert_eq!(next.feedback_count, 3);
        assert_eq!(next.revision, profile.revision + 1);
    }

    #[test]
    fn failed_feedback_marks_shown_topics_weak() {
        let profile = LearnerProfile::synthesize("l", "s");
        let r = resolve(&FeedbackPayload::Quick { emoji: "👎".into() }).unwrap();
        let next = apply_to_profile(&profile, &r, &["photosynthesis".to_string()]);
        assert_eq!(next.weak_topics, vec!["photosynthesis".to_string()]);
        assert!(next.strong_topics.is_empty());
    }

    #[test]
    fn passed_feedback_moves_topic_from_weak_to_strong() {
        let mut profile = LearnerProfile::synthesize("l", "s");
        profile.weak_topics = vec!["optics".to_string()];
        let r = resolve(&FeedbackPayload::Quick { emoji: "👍".into() }).unwrap();
        let next = apply_to_profile(&profile, &r, &["optics".to_string()]);
        assert!(next.weak_topics.is_empty());
        assert_eq!(next.strong_topics, vec!["optics".to_string()]);

        // A later fail moves it straight back.
        let r = resolve(&FeedbackPayload::Quick { emoji: "👎".into() }).unwrap();
        let after_fail = apply_to_profile(&next, &r, &["optics".to_string()]);
        assert!(after_fail.strong_topics.is_empty());
        assert_eq!(after_fail.weak_topics, vec!["optics".to_string()]);
    }

    #[test]
    fn explanation_style_follows_comprehension_band() {
        let mut profile = LearnerProfile::synthesize("l", "s");
        profile.feedback_count = 10;

        profile.avg_comprehension = 1.0;
        let low = resolve(&FeedbackPayload::Quick { emoji: "👎".into() }).unwrap();
        assert_eq!(
            apply_to_profile(&profile, &low, &[]).explanation_style,
            ExplanationStyle::Concise
        );

        profile.avg_comprehension = 4.8;
        let high = resolve(&FeedbackPayload::Quick { emoji: "👍".into() }).unwrap();
        assert_eq!(
            apply_to_profile(&profile, &high, &[]).explanation_style,
            ExplanationStyle::Detailed
        );

        profile.avg_comprehension = 3.2;
        let mid = resolve(&FeedbackPayload::Quick { emoji: "😐".into() }).unwrap();
        assert_eq!(
            apply_to_profile(&profile, &mid, &[]).explanation_style,
            ExplanationStyle::Balanced
        );
    }

    #[test]
    fn same_payload_same_key_different_payload_different_key() {
        let a = FeedbackPayload::Quick { emoji: "👍".into() };
        let b = FeedbackPayload::Quick { emoji: "👎".into() };
        assert_eq!(idempotency_key("i1", &a), idempotency_key("i1", &a));
        assert_ne!(idempotency_key("i1", &a), idempotency_key("i1", &b));
        assert_ne!(idempotency_key("i1", &a), idempotency_key("i2", &a));
    }
}
