use std::collections::HashMap;

use super::config::CacsWeights;
use super::types::{
    BloomLevel, ContentCandidate, LearnerProfile, PedagogicalContext, ScoredCandidate, SourceType,
};

/// Neutral component value used whenever a signal has no data behind it.
/// Keeps absent evidence from either boosting or punishing a candidate.
const NEUTRAL: f64 = 0.5;

/// Context-aware composite scoring. Blends four signals per candidate and
/// sorts descending by the result. Every component and the blend are
/// clamped to [0,1]; the full breakdown is retained on each candidate.
///
/// With CACS disabled, ordering falls back to base relevance and the other
/// components are recorded as neutral so downstream consumers still see a
/// complete breakdown.
pub fn score_candidates(
    candidates: Vec<ContentCandidate>,
    profile: &LearnerProfile,
    pedagogy: &PedagogicalContext,
    global_scores: &HashMap<String, f64>,
    weights: &CacsWeights,
    cacs_enabled: bool,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let base = candidate.relevance.clamp(0.0, 1.0);

            if !cacs_enabled {
                return ScoredCandidate {
                    base_score: base,
                    personal_score: NEUTRAL,
                    global_score: NEUTRAL,
                    context_score: NEUTRAL,
                    final_score: base,
                    candidate,
                };
            }

            let personal = personal_fit(&candidate, profile);
            let global = global_scores
                .get(&candidate.content_id)
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(NEUTRAL);
            let context = context_fit(&candidate, pedagogy);

            let blended = (weights.base * base
                + weights.personal * personal
                + weights.global * global
                + weights.context * context)
                .clamp(0.0, 1.0);

            ScoredCandidate {
                base_score: base,
                personal_score: personal,
                global_score: global,
                context_score: context,
                final_score: blended,
                candidate,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

/// Alignment with this learner: topic affinity and difficulty-band fit.
fn personal_fit(candidate: &ContentCandidate, profile: &LearnerProfile) -> f64 {
    let topic = match &candidate.topic_id {
        Some(t) if profile.weak_topics.contains(t) => 0.8,
        Some(t) if profile.strong_topics.contains(t) => 0.4,
        _ => NEUTRAL,
    };

    let band = match candidate.difficulty {
        Some(d) => {
            let (low, high) = profile.zpd_level.difficulty_band();
            if d >= low && d <= high {
                1.0
            } else {
                // Penalize by distance from the band edge.
                let dist = if d < low { low - d } else { d - high };
                (1.0 - dist * 2.0).clamp(0.0, 1.0)
            }
        }
        None => NEUTRAL,
    };

    ((topic + band) / 2.0).clamp(0.0, 1.0)
}

/// Fit to the current pedagogical moment: source type against the query's
/// cognitive level, discounted under high load.
fn context_fit(candidate: &ContentCandidate, pedagogy: &PedagogicalContext) -> f64 {
    let level = pedagogy.bloom.level;
    let type_fit: f64 = match candidate.source_type {
        // Stored QA answers suit recall; passages carry the depth that
        // higher-order queries need.
        SourceType::QaPair if level <= BloomLevel::Understand => 0.9,
        SourceType::QaPair => 0.4,
        SourceType::KnowledgeCard if level <= BloomLevel::Apply => 0.8,
        SourceType::KnowledgeCard => 0.6,
        SourceType::Passage if level >= BloomLevel::Apply => 0.9,
        SourceType::Passage => 0.6,
    };

    let load_discount: f64 = if pedagogy.cognitive_load.needs_simplification {
        // Under overload, long passages cost more than compact cards.
        match candidate.source_type {
            SourceType::Passage => 0.8,
            _ => 1.0,
        }
    } else {
        1.0
    };

    (type_fit * load_discount).clamp(0.0, 1.0)
}
