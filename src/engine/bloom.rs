use super::types::{BloomAssessment, BloomLevel};

/// Lexical cue sets per cognitive level, English and Chinese. Matching is
/// case-insensitive substring over the raw query.
const REMEMBER_CUES: &[&str] = &[
    "what is", "define", "list", "name", "when did", "who", "recall", "state",
    "是什么", "定义", "列出", "列举", "什么时候", "谁",
];

const UNDERSTAND_CUES: &[&str] = &[
    "explain", "describe", "summarize", "why does", "why is", "interpret",
    "in your own words", "paraphrase", "解释", "描述", "总结", "为什么", "说明",
];

const APPLY_CUES: &[&str] = &[
    "how do i", "how to", "use", "apply", "solve", "calculate", "demonstrate",
    "implement", "怎么做", "如何", "使用", "应用", "计算", "求解",
];

const ANALYZE_CUES: &[&str] = &[
    "compare", "contrast", "difference between", "analyze", "break down",
    "what causes", "relationship between", "比较", "对比", "区别", "分析", "原因",
];

const EVALUATE_CUES: &[&str] = &[
    "which is better", "evaluate", "judge", "justify", "should i", "is it worth",
    "critique", "assess", "评价", "评估", "判断", "哪个更好", "是否值得",
];

const CREATE_CUES: &[&str] = &[
    "design", "create", "propose", "come up with", "build a", "invent",
    "what if", "alternative", "设计", "创造", "提出", "构建", "如果", "方案",
];

fn cues_for(level: BloomLevel) -> &'static [&'static str] {
    match level {
        BloomLevel::Remember => REMEMBER_CUES,
        BloomLevel::Understand => UNDERSTAND_CUES,
        BloomLevel::Apply => APPLY_CUES,
        BloomLevel::Analyze => ANALYZE_CUES,
        BloomLevel::Evaluate => EVALUATE_CUES,
        BloomLevel::Create => CREATE_CUES,
    }
}

const ALL_LEVELS: [BloomLevel; 6] = [
    BloomLevel::Remember,
    BloomLevel::Understand,
    BloomLevel::Apply,
    BloomLevel::Analyze,
    BloomLevel::Evaluate,
    BloomLevel::Create,
];

/// Classifies a query's cognitive demand. When cues from several levels
/// match, the highest level wins; a query with no matches defaults to
/// Understand.
pub fn classify(query: &str) -> BloomAssessment {
    let lowered = query.to_lowercase();

    let mut matched: Vec<(BloomLevel, usize)> = Vec::new();
    for level in ALL_LEVELS {
        let hits = cues_for(level)
            .iter()
            .filter(|cue| lowered.contains(&cue.to_lowercase()))
            .count();
        if hits > 0 {
            matched.push((level, hits));
        }
    }

    if matched.is_empty() {
        return BloomAssessment {
            level: BloomLevel::Understand,
            confidence: 0.5,
            matched_levels: vec![],
        };
    }

    let top = matched.iter().map(|(l, _)| *l).max().unwrap_or(BloomLevel::Understand);
    let top_hits = matched
        .iter()
        .find(|(l, _)| *l == top)
        .map(|(_, h)| *h)
        .unwrap_or(1);
    let total_hits: usize = matched.iter().map(|(_, h)| *h).sum();

    // More of the winning level's cues relative to all matches means a
    // sharper signal. A lone matched level is floored at 0.5; competing
    // levels can dilute confidence below that.
    let mut confidence = (top_hits as f64 / total_hits as f64).clamp(0.0, 1.0);
    if matched.len() == 1 {
        confidence = confidence.max(0.5);
    }

    BloomAssessment {
        level: top,
        confidence,
        matched_levels: matched.into_iter().map(|(l, _)| l).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitional_query_is_remember() {
        let out = classify("What is photosynthesis?");
        assert_eq!(out.level, BloomLevel::Remember);
        assert!(out.confidence >= 0.5);
    }

    #[test]
    fn highest_matched_level_wins() {
        // "explain" (understand) and "compare" (analyze) both match.
        let out = classify("Explain and compare mitosis and meiosis");
        assert_eq!(out.level, BloomLevel::Analyze);
        assert!(out.matched_levels.contains(&BloomLevel::Understand));
    }

    #[test]
    fn chinese_cues_match() {
        let out = classify("比较一下牛顿第一定律和第二定律");
        assert_eq!(out.level, BloomLevel::Analyze);
    }

    #[test]
    fn no_cues_defaults_to_understand() {
        let out = classify("photosynthesis chloroplast light");
        assert_eq!(out.level, BloomLevel::Understand);
        assert!((out.confidence - 0.5).abs() < f64::EPSILON);
        assert!(out.matched_levels.is_empty());
    }

    #[test]
    fn confidence_bounded() {
        let out = classify("design and create a proposal, what if we invent an alternative");
        assert_eq!(out.level, BloomLevel::Create);
        assert!(out.confidence <= 1.0 && out.confidence >= 0.0);
    }

    #[test]
    fn lone_matched_level_keeps_floor() {
        let out = classify("What is photosynthesis?");
        assert_eq!(out.matched_levels.len(), 1);
        assert!(out.confidence >= 0.5);
    }

    #[test]
    fn competing_levels_dilute_confidence() {
        // Two remember cues against one analyze cue; analyze still wins
        // but on a third of the matched cues.
        let out = classify("Define and list the factors, then compare them");
        assert_eq!(out.level, BloomLevel::Analyze);
        assert!(out.matched_levels.len() > 1);
        assert!((out.confidence - 1.0 / 3.0).abs() < 1e-9);
        assert!(out.confidence < 0.5);
    }
}
