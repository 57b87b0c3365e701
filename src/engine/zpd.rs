use super::config::ZpdParams;
use super::types::{OutcomeSample, ZpdAssessment, ZpdLevel};

/// Estimates where in the five-level chain a learner currently sits, from
/// the most recent outcome-bearing interactions.
///
/// Promotion additionally requires the attempted material to have been at
/// or above the middle of the current level's band, so a learner cannot be
/// promoted off the back of easy wins.
pub fn assess(current: ZpdLevel, outcomes: &[OutcomeSample], params: &ZpdParams) -> ZpdAssessment {
    let window: Vec<OutcomeSample> = outcomes
        .iter()
        .rev()
        .take(params.window_size)
        .copied()
        .collect();

    if window.len() < params.min_outcomes {
        return ZpdAssessment {
            current_level: current,
            recommended_level: current,
            success_rate: 0.0,
            sufficient_data: false,
        };
    }

    let passed = window.iter().filter(|o| o.passed).count();
    let success_rate = passed as f64 / window.len() as f64;

    let (band_low, band_high) = current.difficulty_band();
    let band_mid = (band_low + band_high) / 2.0;
    let avg_difficulty =
        window.iter().map(|o| o.difficulty).sum::<f64>() / window.len() as f64;

    let recommended = if success_rate > params.promote_threshold && avg_difficulty >= band_mid {
        current.promote()
    } else if success_rate < params.demote_threshold {
        current.demote()
    } else {
        current
    };

    ZpdAssessment {
        current_level: current,
        recommended_level: recommended,
        success_rate,
        sufficient_data: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(spec: &[(bool, f64)]) -> Vec<OutcomeSample> {
        spec.iter()
            .map(|&(passed, difficulty)| OutcomeSample { passed, difficulty })
            .collect()
    }

    #[test]
    fn too_few_outcomes_holds_level() {
        let params = ZpdParams::default();
        let out = assess(
            ZpdLevel::Intermediate,
            &samples(&[(true, 0.5), (true, 0.5)]),
            &params,
        );
        assert!(!out.sufficient_data);
        assert_eq!(out.recommended_level, ZpdLevel::Intermediate);
    }

    #[test]
    fn high_success_on_hard_material_promotes_one_step() {
        let params = ZpdParams::default();
        let out = assess(
            ZpdLevel::Intermediate,
            &samples(&[(true, 0.55), (true, 0.6), (true, 0.5), (true, 0.55), (false, 0.5)]),
            &params,
        );
        assert!(out.success_rate > 0.80);
        assert_eq!(out.recommended_level, ZpdLevel::Advanced);
    }

    #[test]
    fn high_success_on_easy_material_does_not_promote() {
        let params = ZpdParams::default();
        let out = assess(
            ZpdLevel::Intermediate,
            &samples(&[(true, 0.1), (true, 0.1), (true, 0.2), (true, 0.15)]),
            &params,
        );
        assert_eq!(out.recommended_level, ZpdLevel::Intermediate);
    }

    #[test]
    fn low_success_demotes_one_step() {
        let params = ZpdParams::default();
        let out = assess(
            ZpdLevel::Advanced,
            &samples(&[(false, 0.6), (false, 0.7), (true, 0.6), (false, 0.65)]),
            &params,
        );
        assert_eq!(out.recommended_level, ZpdLevel::Intermediate);
    }

    #[test]
    fn demote_saturates_at_beginner() {
        let params = ZpdParams::default();
        let out = assess(
            ZpdLevel::Beginner,
            &samples(&[(false, 0.2), (false, 0.1), (false, 0.2)]),
            &params,
        );
        assert_eq!(out.recommended_level, ZpdLevel::Beginner);
    }

    #[test]
    fn window_uses_most_recent_outcomes() {
        let params = ZpdParams {
            window_size: 3,
            min_outcomes: 3,
            ..Default::default()
        };
        // Old failures fall outside the window of 3.
        let history = samples(&[
            (false, 0.5),
            (false, 0.5),
            (true, 0.55),
            (true, 0.55),
            (true, 0.6),
        ]);
        let out = assess(ZpdLevel::Intermediate, &history, &params);
        assert!((out.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(out.recommended_level, ZpdLevel::Advanced);
    }
}
