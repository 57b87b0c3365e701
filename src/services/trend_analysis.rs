use serde::Serialize;

use crate::db::operations::{feedback_window_stats, WindowStats};
use crate::db::DatabaseProxy;

pub const SHORT_WINDOW_DAYS: i64 = 7;
pub const LONG_WINDOW_DAYS: i64 = 30;

/// Short-window average strictly above this fraction of the long-window
/// average counts as improving; strictly below the lower bound, declining.
/// Landing exactly on a bound is stable.
const IMPROVING_RATIO: f64 = 1.10;
const DECLINING_RATIO: f64 = 0.90;

/// Minimum feedback in the short window before a trend is trusted.
const MIN_SHORT_SAMPLES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
    /// Not enough recent feedback to say anything.
    Unknown,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackTrend {
    pub direction: TrendDirection,
    pub short_window: WindowStats,
    pub long_window: WindowStats,
    pub ratio: Option<f64>,
}

/// Compares the recent feedback window against the long baseline.
pub async fn analyze_feedback_trend(proxy: &DatabaseProxy) -> Result<FeedbackTrend, sqlx::Error> {
    let short_window = feedback_window_stats(proxy, SHORT_WINDOW_DAYS).await?;
    let long_window = feedback_window_stats(proxy, LONG_WINDOW_DAYS).await?;

    let (direction, ratio) = classify(&short_window, &long_window);

    Ok(FeedbackTrend {
        direction,
        short_window,
        long_window,
        ratio,
    })
}

fn classify(short: &WindowStats, long: &WindowStats) -> (TrendDirection, Option<f64>) {
    let (Some(short_avg), Some(long_avg)) = (short.avg_feedback_score, long.avg_feedback_score)
    else {
        return (TrendDirection::Unknown, None);
    };
    if short.feedback_count < MIN_SHORT_SAMPLES || long_avg <= 0.0 {
        return (TrendDirection::Unknown, None);
    }

    let ratio = short_avg / long_avg;
    let direction = if ratio > IMPROVING_RATIO {
        TrendDirection::Improving
    } else if ratio < DECLINING_RATIO {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };
    (direction, Some(ratio))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(avg: Option<f64>, count: i64) -> WindowStats {
        WindowStats {
            avg_feedback_score: avg,
            feedback_count: count,
            total_interactions: count * 2,
            rejected_count: 0,
        }
    }

    #[test]
    fn ratio_above_upper_bound_is_improving() {
        let (direction, ratio) = classify(&stats(Some(0.8), 20), &stats(Some(0.6), 100));
        assert_eq!(direction, TrendDirection::Improving);
        assert!(ratio.unwrap() > 1.10);
    }

    #[test]
    fn ratio_below_lower_bound_is_declining() {
        let (direction, _) = classify(&stats(Some(0.5), 20), &stats(Some(0.7), 100));
        assert_eq!(direction, TrendDirection::Declining);
    }

    #[test]
    fn near_parity_is_stable() {
        let (direction, _) = classify(&stats(Some(0.62), 20), &stats(Some(0.6), 100));
        assert_eq!(direction, TrendDirection::Stable);
    }

    #[test]
    fn exactly_on_a_bound_is_stable() {
        // 0.55/0.5 and 0.45/0.5 divide exactly to the bound values.
        let (direction, ratio) = classify(&stats(Some(0.55), 20), &stats(Some(0.5), 100));
        assert_eq!(direction, TrendDirection::Stable);
        assert!((ratio.unwrap() - 1.10).abs() < 1e-12);

        let (direction, ratio) = classify(&stats(Some(0.45), 20), &stats(Some(0.5), 100));
        assert_eq!(direction, TrendDirection::Stable);
        assert!((ratio.unwrap() - 0.90).abs() < 1e-12);
    }

    #[test]
    fn sparse_short_window_is_unknown() {
        let (direction, ratio) = classify(&stats(Some(0.9), 3), &stats(Some(0.6), 100));
        assert_eq!(direction, TrendDirection::Unknown);
        assert!(ratio.is_none());
    }
}
