//! Property-based tests for the pure scoring and assessment functions:
//! score bounds under arbitrary inputs, mean-update equivalence, and the
//! single-step ZPD guarantee.

use std::collections::HashMap;

use proptest::prelude::*;

use tutor_backend_rust::engine::bloom;
use tutor_backend_rust::engine::config::{CacsWeights, ZpdParams};
use tutor_backend_rust::engine::feedback::incremental_mean;
use tutor_backend_rust::engine::scoring::score_candidates;
use tutor_backend_rust::engine::types::{
    ContentCandidate, LearnerProfile, OutcomeSample, PedagogicalContext, SourceType, ZpdLevel,
};
use tutor_backend_rust::engine::zpd;

fn arb_unit() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_source_type() -> impl Strategy<Value = SourceType> {
    prop_oneof![
        Just(SourceType::Passage),
        Just(SourceType::KnowledgeCard),
        Just(SourceType::QaPair),
    ]
}

fn arb_candidate() -> impl Strategy<Value = ContentCandidate> {
    (
        "[a-z]{1,8}",
        arb_source_type(),
        arb_unit(),
        proptest::option::of(arb_unit()),
        proptest::option::of("[a-z]{1,6}"),
    )
        .prop_map(|(id, source_type, relevance, difficulty, topic)| {
            let mut candidate =
                ContentCandidate::new(id, source_type, "candidate text", relevance);
            if let Some(d) = difficulty {
                candidate = candidate.with_difficulty(d);
            }
            if let Some(t) = topic {
                candidate = candidate.with_topic(t);
            }
            candidate
        })
}

fn arb_weights() -> impl Strategy<Value = CacsWeights> {
    // Three cut points in [0,1] induce four non-negative weights summing to 1.
    (arb_unit(), arb_unit(), arb_unit()).prop_map(|(a, b, c)| {
        let mut cuts = [a, b, c];
        cuts.sort_by(|x, y| x.partial_cmp(y).unwrap());
        CacsWeights {
            base: cuts[0],
            personal: cuts[1] - cuts[0],
            global: cuts[2] - cuts[1],
            context: 1.0 - cuts[2],
        }
    })
}

fn arb_zpd_level() -> impl Strategy<Value = ZpdLevel> {
    prop_oneof![
        Just(ZpdLevel::Beginner),
        Just(ZpdLevel::Elementary),
        Just(ZpdLevel::Intermediate),
        Just(ZpdLevel::Advanced),
        Just(ZpdLevel::Expert),
    ]
}

fn arb_outcomes() -> impl Strategy<Value = Vec<OutcomeSample>> {
    proptest::collection::vec(
        (any::<bool>(), arb_unit()).prop_map(|(passed, difficulty)| OutcomeSample {
            passed,
            difficulty,
        }),
        0..30,
    )
}

proptest! {
    #[test]
    fn final_scores_stay_in_unit_range(
        candidates in proptest::collection::vec(arb_candidate(), 0..12),
        weights in arb_weights(),
        cacs_enabled in any::<bool>(),
        comprehension in 1.0f64..=5.0f64,
    ) {
        let mut profile = LearnerProfile::synthesize("learner", "session");
        profile.avg_comprehension = comprehension;
        let pedagogy = PedagogicalContext::default();

        let scored = score_candidates(
            candidates,
            &profile,
            &pedagogy,
            &HashMap::new(),
            &weights,
            cacs_enabled,
        );

        for entry in &scored {
            prop_assert!((0.0..=1.0).contains(&entry.base_score));
            prop_assert!((0.0..=1.0).contains(&entry.personal_score));
            prop_assert!((0.0..=1.0).contains(&entry.global_score));
            prop_assert!((0.0..=1.0).contains(&entry.context_score));
            prop_assert!((0.0..=1.0 + 1e-9).contains(&entry.final_score));
        }
        let finals: Vec<f64> = scored.iter().map(|s| s.final_score).collect();
        prop_assert!(finals.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn disabled_cacs_reduces_to_base_relevance(
        candidates in proptest::collection::vec(arb_candidate(), 0..12),
        weights in arb_weights(),
    ) {
        let profile = LearnerProfile::synthesize("learner", "session");
        let scored = score_candidates(
            candidates,
            &profile,
            &PedagogicalContext::default(),
            &HashMap::new(),
            &weights,
            false,
        );

        for entry in &scored {
            prop_assert!((entry.final_score - entry.base_score).abs() < 1e-12);
            prop_assert!((entry.personal_score - 0.5).abs() < 1e-12);
            prop_assert!((entry.global_score - 0.5).abs() < 1e-12);
            prop_assert!((entry.context_score - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn incremental_mean_matches_batch_mean(samples in proptest::collection::vec(arb_unit(), 1..50)) {
        let mut running = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            running = incremental_mean(running, i as i64, *sample);
        }
        let batch = samples.iter().sum::<f64>() / samples.len() as f64;
        prop_assert!((running - batch).abs() < 1e-9);
    }

    #[test]
    fn zpd_recommendation_moves_at_most_one_step(
        current in arb_zpd_level(),
        outcomes in arb_outcomes(),
    ) {
        let assessment = zpd::assess(current, &outcomes, &ZpdParams::default());
        let distance =
            (assessment.recommended_level.rank() as i32 - current.rank() as i32).abs();
        prop_assert!(distance <= 1);
    }

    #[test]
    fn sparse_outcomes_never_move_the_level(
        current in arb_zpd_level(),
        outcomes in proptest::collection::vec(
            (any::<bool>(), arb_unit()).prop_map(|(passed, difficulty)| OutcomeSample { passed, difficulty }),
            0..3,
        ),
    ) {
        let assessment = zpd::assess(current, &outcomes, &ZpdParams::default());
        prop_assert_eq!(assessment.recommended_level, current);
        prop_assert!(!assessment.sufficient_data);
    }

    #[test]
    fn bloom_confidence_is_bounded(query in "\\PC{0,60}") {
        let assessment = bloom::classify(&query);
        prop_assert!((0.0..=1.0).contains(&assessment.confidence));
    }

    #[test]
    fn candidate_relevance_is_clamped(relevance in -2.0f64..=3.0f64) {
        let candidate = ContentCandidate::new("c", SourceType::Passage, "text", relevance);
        prop_assert!((0.0..=1.0).contains(&candidate.relevance));
    }
}
