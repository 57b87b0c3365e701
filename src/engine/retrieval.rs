use async_trait::async_trait;

use super::config::RetrievalParams;
use super::types::ContentCandidate;
use super::EngineError;

/// A QA-bank hit: the stored answer packaged as a candidate, plus the raw
/// question similarity that produced it.
#[derive(Debug, Clone)]
pub struct QaMatch {
    pub candidate: ContentCandidate,
    pub similarity: f64,
}

/// Seam to the content stores. The engine never talks to Postgres or an
/// embedding service directly; tests substitute an in-memory source.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Nearest stored question-answer pairs by question similarity.
    async fn search_qa(&self, query: &str, top_k: usize) -> Result<Vec<QaMatch>, EngineError>;

    /// Course passages by embedding similarity.
    async fn search_passages(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError>;

    /// Curated knowledge entries (cards, summaries) for the query's topic.
    async fn search_knowledge(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError>;
}

/// Outcome of one retrieval pass.
#[derive(Debug, Clone)]
pub enum Retrieval {
    /// A stored QA pair matched closely enough to answer directly.
    Direct {
        candidate: ContentCandidate,
        similarity: f64,
    },
    /// Fused passage + knowledge candidates, reranked, best first.
    Hybrid { candidates: Vec<ContentCandidate> },
    /// Nothing relevant enough to ground an answer on.
    Insufficient { max_relevance: f64 },
}

/// Runs the hybrid retrieval flow: QA short-circuit first, then the passage
/// and knowledge channels in parallel, then fusion and reranking.
///
/// A single failing channel degrades to the other channel's results; both
/// channels failing degrades to the insufficient-grounding outcome.
pub async fn retrieve(
    source: &dyn ContentSource,
    query: &str,
    params: &RetrievalParams,
) -> Result<Retrieval, EngineError> {
    let qa_hits = match source.search_qa(query, 1).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "qa channel failed, continuing without direct match");
            vec![]
        }
    };
    if let Some(best) = qa_hits.first() {
        if best.similarity >= params.direct_match_threshold {
            return Ok(Retrieval::Direct {
                candidate: best.candidate.clone(),
                similarity: best.similarity,
            });
        }
    }

    let (passages, knowledge) = tokio::join!(
        source.search_passages(query, params.passage_top_k),
        source.search_knowledge(query, params.knowledge_top_k),
    );

    let (passages, knowledge) = match (passages, knowledge) {
        (Ok(p), Ok(k)) => (p, k),
        (Ok(p), Err(e)) => {
            tracing::warn!(error = %e, "knowledge channel failed, passages only");
            (p, vec![])
        }
        (Err(e), Ok(k)) => {
            tracing::warn!(error = %e, "passage channel failed, knowledge only");
            (vec![], k)
        }
        (Err(p_err), Err(k_err)) => {
            tracing::warn!(
                passage_error = %p_err,
                knowledge_error = %k_err,
                "both retrieval channels failed, treating as insufficient grounding"
            );
            (vec![], vec![])
        }
    };

    let mut candidates = fuse(passages, knowledge);

    // The grounding floor applies to base relevance, before the reranker
    // overwrites it: lexical overlap must not rescue a weak match or sink
    // an adequate one.
    let max_relevance = candidates
        .iter()
        .map(|c| c.relevance)
        .fold(0.0_f64, f64::max);
    if candidates.is_empty() || max_relevance < params.min_similarity {
        return Ok(Retrieval::Insufficient { max_relevance });
    }

    for c in &mut candidates {
        c.relevance = rerank_relevance(query, c);
    }
    candidates.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(Retrieval::Hybrid { candidates })
}

/// Merges the two channels, deduplicating by content id. On collision the
/// higher channel relevance wins.
fn fuse(passages: Vec<ContentCandidate>, knowledge: Vec<ContentCandidate>) -> Vec<ContentCandidate> {
    let mut merged: Vec<ContentCandidate> = Vec::with_capacity(passages.len() + knowledge.len());
    for candidate in passages.into_iter().chain(knowledge) {
        match merged
            .iter_mut()
            .find(|c| c.content_id == candidate.content_id)
        {
            Some(existing) => {
                if candidate.relevance > existing.relevance {
                    *existing = candidate;
                }
            }
            None => merged.push(candidate),
        }
    }
    merged
}

/// Pairwise reranking: blends the channel's similarity with lexical query
/// coverage. Cheap stand-in for a cross-encoder; same contract (replaces
/// relevance, stays in [0,1]).
fn rerank_relevance(query: &str, candidate: &ContentCandidate) -> f64 {
    let overlap = token_coverage(query, &candidate.text);
    (0.6 * candidate.relevance + 0.4 * overlap).clamp(0.0, 1.0)
}

/// Share of query tokens that appear in the candidate text. CJK text has no
/// whitespace word boundaries, so those segments fall back to characters.
fn token_coverage(query: &str, text: &str) -> f64 {
    let q_tokens = tokenize(query);
    if q_tokens.is_empty() {
        return 0.0;
    }
    let t_tokens = tokenize(text);
    let hits = q_tokens.iter().filter(|t| t_tokens.contains(*t)).count();
    hits as f64 / q_tokens.len() as f64
}

fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in s.split(|ch: char| !ch.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        if raw.chars().any(|ch| (ch as u32) >= 0x3400) {
            tokens.extend(raw.chars().map(|ch| ch.to_string()));
        } else if raw.len() > 2 {
            tokens.push(raw.to_lowercase());
        }
    }
    tokens
}
