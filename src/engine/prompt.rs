use super::config::GenerationParams;
use super::types::{
    ExplanationStyle, PedagogicalContext, PersonalizationFactors, ScoredCandidate, ZpdLevel,
};

/// Everything the generator needs for one call. The engine builds this;
/// the provider only transports it.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Message returned verbatim when grounding is insufficient. Fixed text so
/// clients can rely on it; never produced by the generator.
pub const INSUFFICIENT_GROUNDING_ANSWER: &str =
    "I don't have enough course material to answer that reliably. \
     Try rephrasing the question, or ask about a topic covered in this course.";

/// Builds the generation request from the pedagogical context and the
/// scored grounding set. Only candidate text that survived scoring goes
/// into the context block, plus any context the caller pre-fetched; the
/// model is told to stay inside it.
pub fn build_request(
    query: &str,
    extra_context: Option<&str>,
    sources: &[ScoredCandidate],
    pedagogy: &PedagogicalContext,
    factors: &PersonalizationFactors,
    params: &GenerationParams,
) -> GenerationRequest {
    let mut system = String::with_capacity(1024);
    system.push_str("You are a course tutor. Answer strictly from the provided course material; if the material does not cover something, say so instead of guessing.\n");

    system.push_str(level_guidance(factors.difficulty_level));
    system.push('\n');
    system.push_str(pedagogy.bloom.level.answer_shape());
    system.push('\n');
    system.push_str(style_guidance(factors.explanation_style));
    system.push('\n');

    if pedagogy.cognitive_load.needs_simplification {
        system.push_str(
            "The learner is likely overloaded right now: answer only the core of the question, \
             use short sentences, and skip tangents and caveats.\n",
        );
    }

    let mut user = String::with_capacity(2048);
    user.push_str("Course material:\n");
    for (i, s) in sources.iter().enumerate() {
        user.push_str(&format!("[{}] {}\n", i + 1, s.candidate.text.trim()));
    }
    if let Some(context) = extra_context.map(str::trim).filter(|c| !c.is_empty()) {
        user.push_str("\nAdditional context from the caller:\n");
        user.push_str(context);
        user.push('\n');
    }
    user.push_str("\nQuestion: ");
    user.push_str(query.trim());

    GenerationRequest {
        system,
        user,
        max_tokens: effective_max_tokens(params, pedagogy),
        temperature: params.temperature,
    }
}

/// Builds the request for rewriting a caller-supplied draft. No grounding
/// block here; the draft is the material and only its register changes.
pub fn build_rewrite_request(
    query: &str,
    draft: &str,
    pedagogy: &PedagogicalContext,
    factors: &PersonalizationFactors,
    params: &GenerationParams,
) -> GenerationRequest {
    let mut system = String::with_capacity(1024);
    system.push_str(
        "You are a course tutor. Rewrite the draft answer for this learner without adding \
         facts that are not in the draft and without dropping any of its content.\n",
    );

    system.push_str(level_guidance(factors.difficulty_level));
    system.push('\n');
    system.push_str(pedagogy.bloom.level.answer_shape());
    system.push('\n');
    system.push_str(style_guidance(factors.explanation_style));
    system.push('\n');

    if pedagogy.cognitive_load.needs_simplification {
        system.push_str(
            "The learner is likely overloaded right now: answer only the core of the question, \
             use short sentences, and skip tangents and caveats.\n",
        );
    }

    let mut user = String::with_capacity(1024);
    user.push_str("Question: ");
    user.push_str(query.trim());
    user.push_str("\n\nDraft answer:\n");
    user.push_str(draft.trim());

    GenerationRequest {
        system,
        user,
        max_tokens: effective_max_tokens(params, pedagogy),
        temperature: params.temperature,
    }
}

fn level_guidance(level: ZpdLevel) -> &'static str {
    match level {
        ZpdLevel::Beginner => {
            "The learner is a beginner: avoid jargon, define every term you use, and lean on everyday analogies."
        }
        ZpdLevel::Elementary => {
            "The learner knows the basics: keep terminology light and anchor new ideas to familiar ones."
        }
        ZpdLevel::Intermediate => {
            "The learner is comfortable with the fundamentals: standard terminology is fine, but explain non-obvious steps."
        }
        ZpdLevel::Advanced => {
            "The learner is advanced: be precise and technical, and do not re-explain fundamentals."
        }
        ZpdLevel::Expert => {
            "The learner is near-expert: be terse and rigorous, and point out edge cases and open questions."
        }
    }
}

fn style_guidance(style: ExplanationStyle) -> &'static str {
    match style {
        ExplanationStyle::Detailed => {
            "Prefer thorough explanations with worked examples over brevity."
        }
        ExplanationStyle::Balanced => "Balance clarity and brevity.",
        ExplanationStyle::Concise => "Be as brief as a correct answer allows.",
    }
}

fn effective_max_tokens(params: &GenerationParams, pedagogy: &PedagogicalContext) -> u32 {
    if pedagogy.cognitive_load.needs_simplification {
        (params.max_tokens / 2).max(256)
    } else {
        params.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{
        BloomLevel, ContentCandidate, ScoredCandidate, SourceType,
    };

    fn scored(text: &str) -> ScoredCandidate {
        ScoredCandidate {
            candidate: ContentCandidate::new("c1", SourceType::Passage, text, 0.8),
            base_score: 0.8,
            personal_score: 0.5,
            global_score: 0.5,
            context_score: 0.5,
            final_score: 0.7,
        }
    }

    fn factors(level: ZpdLevel, style: ExplanationStyle) -> PersonalizationFactors {
        PersonalizationFactors {
            understanding_level: 0.5,
            difficulty_level: level,
            explanation_style: style,
        }
    }

    #[test]
    fn request_embeds_sources_and_query() {
        let req = build_request(
            "What is osmosis?",
            None,
            &[scored("Osmosis is the diffusion of water.")],
            &PedagogicalContext::default(),
            &factors(ZpdLevel::Intermediate, ExplanationStyle::Balanced),
            &GenerationParams::default(),
        );
        assert!(req.user.contains("Osmosis is the diffusion of water."));
        assert!(req.user.contains("What is osmosis?"));
        assert!(!req.user.contains("Additional context"));
    }

    #[test]
    fn caller_context_lands_in_the_payload() {
        let req = build_request(
            "What is osmosis?",
            Some("The lecture covered diffusion yesterday."),
            &[scored("Osmosis is the diffusion of water.")],
            &PedagogicalContext::default(),
            &factors(ZpdLevel::Intermediate, ExplanationStyle::Balanced),
            &GenerationParams::default(),
        );
        assert!(req.user.contains("The lecture covered diffusion yesterday."));
    }

    #[test]
    fn beginner_request_forbids_jargon() {
        let req = build_request(
            "q",
            None,
            &[scored("t")],
            &PedagogicalContext::default(),
            &factors(ZpdLevel::Beginner, ExplanationStyle::Detailed),
            &GenerationParams::default(),
        );
        assert!(req.system.contains("avoid jargon"));
    }

    #[test]
    fn overload_halves_token_budget_and_asks_for_brevity() {
        let mut pedagogy = PedagogicalContext::default();
        pedagogy.cognitive_load.needs_simplification = true;
        pedagogy.bloom.level = BloomLevel::Understand;
        let params = GenerationParams::default();
        let req = build_request(
            "q",
            None,
            &[scored("t")],
            &pedagogy,
            &factors(ZpdLevel::Intermediate, ExplanationStyle::Balanced),
            &params,
        );
        assert_eq!(req.max_tokens, params.max_tokens / 2);
        assert!(req.system.contains("overloaded"));
    }
}
