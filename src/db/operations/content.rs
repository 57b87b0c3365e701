use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaPairRow {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub question_embedding: Option<Vec<f64>>,
    pub topic_id: Option<String>,
    pub difficulty: Option<f64>,
    pub times_matched: i64,
    pub avg_rating: Option<f64>,
    pub rating_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassageRow {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f64>>,
    pub topic_id: Option<String>,
    pub difficulty: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntryRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub embedding: Option<Vec<f64>>,
    pub topic_id: Option<String>,
    pub difficulty: Option<f64>,
}

// Corpus scans are bounded; similarity ranking happens in-process over the
// JSONB embeddings.
const CORPUS_SCAN_LIMIT: i64 = 2000;

pub async fn list_qa_pairs(proxy: &DatabaseProxy) -> Result<Vec<QaPairRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "qa_pairs" ORDER BY "createdAt" DESC LIMIT $1"#,
    )
    .bind(CORPUS_SCAN_LIMIT)
    .fetch_all(proxy.pool())
    .await?;
    rows.iter()
        .map(|r| {
            Ok(QaPairRow {
                id: r.try_get("id")?,
                question: r.try_get("question")?,
                answer: r.try_get("answer")?,
                question_embedding: embedding_column(r, "questionEmbedding")?,
                topic_id: r.try_get("topicId")?,
                difficulty: r.try_get("difficulty")?,
                times_matched: r.try_get("timesMatched")?,
                avg_rating: r.try_get("avgRating")?,
                rating_count: r.try_get("ratingCount")?,
            })
        })
        .collect()
}

pub async fn list_passages(proxy: &DatabaseProxy) -> Result<Vec<PassageRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "passages" ORDER BY "createdAt" DESC LIMIT $1"#,
    )
    .bind(CORPUS_SCAN_LIMIT)
    .fetch_all(proxy.pool())
    .await?;
    rows.iter()
        .map(|r| {
            Ok(PassageRow {
                id: r.try_get("id")?,
                content: r.try_get("content")?,
                embedding: embedding_column(r, "embedding")?,
                topic_id: r.try_get("topicId")?,
                difficulty: r.try_get("difficulty")?,
            })
        })
        .collect()
}

pub async fn list_knowledge_entries(
    proxy: &DatabaseProxy,
) -> Result<Vec<KnowledgeEntryRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "knowledge_entries" ORDER BY "createdAt" DESC LIMIT $1"#,
    )
    .bind(CORPUS_SCAN_LIMIT)
    .fetch_all(proxy.pool())
    .await?;
    rows.iter()
        .map(|r| {
            Ok(KnowledgeEntryRow {
                id: r.try_get("id")?,
                title: r.try_get("title")?,
                content: r.try_get("content")?,
                embedding: embedding_column(r, "embedding")?,
                topic_id: r.try_get("topicId")?,
                difficulty: r.try_get("difficulty")?,
            })
        })
        .collect()
}

pub async fn get_global_scores(
    proxy: &DatabaseProxy,
    content_ids: &[String],
) -> Result<Vec<(String, f64)>, sqlx::Error> {
    if content_ids.is_empty() {
        return Ok(vec![]);
    }
    let rows = sqlx::query(
        r#"
        SELECT "contentId", "score" FROM "global_document_scores"
        WHERE "contentId" = ANY($1)
        "#,
    )
    .bind(content_ids)
    .fetch_all(proxy.pool())
    .await?;
    rows.iter()
        .map(|r| Ok((r.try_get("contentId")?, r.try_get("score")?)))
        .collect()
}

/// One shown candidate's contribution to the population aggregate.
#[derive(Debug, Clone)]
pub struct GlobalScoreSample {
    pub content_id: String,
    /// The personal-fit score the candidate carried when it was shown.
    pub personal_fit: f64,
}

/// Folds one feedback sample into each shown document's aggregate: running
/// score mean, pass/fail tallies, and the running mean of personal fit.
pub async fn bump_global_scores(
    proxy: &DatabaseProxy,
    samples: &[GlobalScoreSample],
    score: f64,
    passed: bool,
) -> Result<(), sqlx::Error> {
    for sample in samples {
        sqlx::query(
            r#"
            INSERT INTO "global_document_scores"
                ("contentId", "score", "sampleCount", "positiveCount", "negativeCount",
                 "avgPersonalFit", "updatedAt")
            VALUES ($1, $2, 1, $4, $5, $3, NOW())
            ON CONFLICT ("contentId") DO UPDATE SET
                "score" = LEAST(1.0, GREATEST(0.0,
                    "global_document_scores"."score" +
                    ($2 - "global_document_scores"."score") /
                    ("global_document_scores"."sampleCount" + 1)
                )),
                "avgPersonalFit" =
                    "global_document_scores"."avgPersonalFit" +
                    ($3 - "global_document_scores"."avgPersonalFit") /
                    ("global_document_scores"."sampleCount" + 1),
                "sampleCount" = "global_document_scores"."sampleCount" + 1,
                "positiveCount" = "global_document_scores"."positiveCount" + $4,
                "negativeCount" = "global_document_scores"."negativeCount" + $5,
                "updatedAt" = NOW()
            "#,
        )
        .bind(&sample.content_id)
        .bind(score)
        .bind(sample.personal_fit)
        .bind(if passed { 1i64 } else { 0 })
        .bind(if passed { 0i64 } else { 1 })
        .execute(proxy.pool())
        .await?;
    }
    Ok(())
}

/// Counts one direct-match serve of a stored QA answer.
pub async fn bump_qa_usage(proxy: &DatabaseProxy, qa_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "qa_pairs" SET "timesMatched" = "timesMatched" + 1 WHERE "id" = $1"#,
    )
    .bind(qa_id)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Folds a learner rating into a QA pair's running average.
pub async fn record_qa_rating(
    proxy: &DatabaseProxy,
    qa_id: &str,
    rating: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE "qa_pairs" SET
            "avgRating" = COALESCE("avgRating", $2) +
                ($2 - COALESCE("avgRating", $2)) / ("ratingCount" + 1),
            "ratingCount" = "ratingCount" + 1
        WHERE "id" = $1
        "#,
    )
    .bind(qa_id)
    .bind(rating)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

fn embedding_column(
    row: &sqlx::postgres::PgRow,
    column: &str,
) -> Result<Option<Vec<f64>>, sqlx::Error> {
    let value: Option<serde_json::Value> = row.try_get(column)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}
