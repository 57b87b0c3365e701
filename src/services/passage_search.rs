use std::sync::Arc;

use async_trait::async_trait;

use crate::db::operations;
use crate::db::DatabaseProxy;
use crate::engine::retrieval::{ContentSource, QaMatch};
use crate::engine::types::{ContentCandidate, SourceType};
use crate::engine::EngineError;
use crate::services::embedding_provider::EmbeddingProvider;

/// Content source over the course corpus tables. Query embeddings come
/// from the embedding provider; similarity ranking runs in-process over
/// the stored vectors.
pub struct CorpusSearch {
    db_proxy: Arc<DatabaseProxy>,
    embeddings: Arc<EmbeddingProvider>,
}

impl CorpusSearch {
    pub fn new(db_proxy: Arc<DatabaseProxy>, embeddings: Arc<EmbeddingProvider>) -> Self {
        Self { db_proxy, embeddings }
    }

    async fn query_vector(&self, query: &str) -> Result<Vec<f64>, EngineError> {
        let vector = self
            .embeddings
            .embed_one(query)
            .await
            .map_err(|e| EngineError::Source(format!("query embedding failed: {e}")))?;
        Ok(vector.into_iter().map(f64::from).collect())
    }
}

#[async_trait]
impl ContentSource for CorpusSearch {
    async fn search_qa(&self, query: &str, top_k: usize) -> Result<Vec<QaMatch>, EngineError> {
        let query_vec = self.query_vector(query).await?;
        let rows = operations::list_qa_pairs(&self.db_proxy)
            .await
            .map_err(|e| EngineError::Source(e.to_string()))?;

        let mut matches: Vec<QaMatch> = rows
            .into_iter()
            .filter_map(|row| {
                let embedding = row.question_embedding.as_ref()?;
                let similarity = cosine_similarity(&query_vec, embedding)?;
                let mut candidate =
                    ContentCandidate::new(row.id, SourceType::QaPair, row.answer, similarity);
                if let Some(topic) = row.topic_id {
                    candidate = candidate.with_topic(topic);
                }
                if let Some(difficulty) = row.difficulty {
                    candidate = candidate.with_difficulty(difficulty);
                }
                Some(QaMatch { candidate, similarity })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn search_passages(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError> {
        let query_vec = self.query_vector(query).await?;
        let rows = operations::list_passages(&self.db_proxy)
            .await
            .map_err(|e| EngineError::Source(e.to_string()))?;

        let mut candidates: Vec<ContentCandidate> = rows
            .into_iter()
            .filter_map(|row| {
                let embedding = row.embedding.as_ref()?;
                let similarity = cosine_similarity(&query_vec, embedding)?;
                let mut candidate =
                    ContentCandidate::new(row.id, SourceType::Passage, row.content, similarity);
                if let Some(topic) = row.topic_id {
                    candidate = candidate.with_topic(topic);
                }
                if let Some(difficulty) = row.difficulty {
                    candidate = candidate.with_difficulty(difficulty);
                }
                Some(candidate)
            })
            .collect();

        sort_by_relevance(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn search_knowledge(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError> {
        let query_vec = self.query_vector(query).await?;
        let rows = operations::list_knowledge_entries(&self.db_proxy)
            .await
            .map_err(|e| EngineError::Source(e.to_string()))?;

        let mut candidates: Vec<ContentCandidate> = rows
            .into_iter()
            .filter_map(|row| {
                let embedding = row.embedding.as_ref()?;
                let similarity = cosine_similarity(&query_vec, embedding)?;
                let text = format!("{}: {}", row.title, row.content);
                let mut candidate =
                    ContentCandidate::new(row.id, SourceType::KnowledgeCard, text, similarity);
                if let Some(topic) = row.topic_id {
                    candidate = candidate.with_topic(topic);
                }
                if let Some(difficulty) = row.difficulty {
                    candidate = candidate.with_difficulty(difficulty);
                }
                Some(candidate)
            })
            .collect();

        sort_by_relevance(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

/// Stand-in content source for database-less deployments. Every query
/// comes back empty, so the engine answers with its insufficient-grounding
/// reply instead of failing.
pub struct EmptyCorpus;

#[async_trait]
impl ContentSource for EmptyCorpus {
    async fn search_qa(&self, _query: &str, _top_k: usize) -> Result<Vec<QaMatch>, EngineError> {
        Ok(Vec::new())
    }

    async fn search_passages(
        &self,
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError> {
        Ok(Vec::new())
    }

    async fn search_knowledge(
        &self,
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<ContentCandidate>, EngineError> {
        Ok(Vec::new())
    }
}

fn sort_by_relevance(candidates: &mut [ContentCandidate]) {
    candidates.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Cosine similarity mapped onto [0,1]. Returns None for mismatched or
/// zero-magnitude vectors so those rows drop out of ranking.
fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    Some(((cosine + 1.0) / 2.0).clamp(0.0, 1.0))
}
