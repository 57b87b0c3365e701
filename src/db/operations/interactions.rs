use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRow {
    pub id: String,
    pub learner_id: String,
    pub session_id: String,
    pub query: String,
    pub answer: String,
    pub strategy: String,
    pub sources: serde_json::Value,
    pub pedagogy: serde_json::Value,
    pub factors: serde_json::Value,
    pub components_active: serde_json::Value,
    pub personalization_failed: bool,
    pub rejected: bool,
    pub latency_ms: i64,
    pub attempted_difficulty: f64,
    pub feedback_score: Option<f64>,
    pub feedback_passed: Option<bool>,
    pub uncertainty_flag: bool,
    pub created_at_ms: i64,
}

/// One outcome-bearing interaction, oldest first when fetched via
/// `recent_outcome_rows`.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeRow {
    pub passed: bool,
    pub difficulty: f64,
}

/// Aggregates over a trailing window, for the optimizer's trend check.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub avg_feedback_score: Option<f64>,
    pub feedback_count: i64,
    pub total_interactions: i64,
    pub rejected_count: i64,
}

pub async fn insert_interaction(
    proxy: &DatabaseProxy,
    row: &InteractionRow,
) -> Result<(), sqlx::Error> {
    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        INSERT INTO "interactions" (
            "id", "learnerId", "sessionId", "query", "answer", "strategy",
            "sources", "pedagogy", "factors", "componentsActive",
            "personalizationFailed", "rejected", "latencyMs",
            "attemptedDifficulty", "uncertaintyFlag", "createdAt"
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(&row.id)
    .bind(&row.learner_id)
    .bind(&row.session_id)
    .bind(&row.query)
    .bind(&row.answer)
    .bind(&row.strategy)
    .bind(&row.sources)
    .bind(&row.pedagogy)
    .bind(&row.factors)
    .bind(&row.components_active)
    .bind(row.personalization_failed)
    .bind(row.rejected)
    .bind(row.latency_ms)
    .bind(row.attempted_difficulty)
    .bind(row.uncertainty_flag)
    .bind(now)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn get_interaction(
    proxy: &DatabaseProxy,
    id: &str,
) -> Result<Option<InteractionRow>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "interactions" WHERE "id" = $1"#)
        .bind(id)
        .fetch_optional(proxy.pool())
        .await?;
    row.map(|r| map_interaction(&r)).transpose()
}

pub async fn attach_feedback(
    proxy: &DatabaseProxy,
    id: &str,
    score: f64,
    passed: bool,
    payload: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE "interactions" SET
            "feedbackScore" = $2,
            "feedbackPassed" = $3,
            "feedbackPayload" = $4
        WHERE "id" = $1
        "#,
    )
    .bind(id)
    .bind(score)
    .bind(passed)
    .bind(payload)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// Most recent outcome-bearing interactions for one learner session,
/// returned oldest first.
pub async fn recent_outcome_rows(
    proxy: &DatabaseProxy,
    learner_id: &str,
    session_id: &str,
    limit: i64,
) -> Result<Vec<OutcomeRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "feedbackPassed", "attemptedDifficulty" FROM "interactions"
        WHERE "learnerId" = $1 AND "sessionId" = $2 AND "feedbackPassed" IS NOT NULL
        ORDER BY "createdAt" DESC
        LIMIT $3
        "#,
    )
    .bind(learner_id)
    .bind(session_id)
    .bind(limit)
    .fetch_all(proxy.pool())
    .await?;

    let mut outcomes: Vec<OutcomeRow> = rows
        .iter()
        .map(|r| {
            Ok(OutcomeRow {
                passed: r.try_get::<Option<bool>, _>("feedbackPassed")?.unwrap_or(false),
                difficulty: r.try_get("attemptedDifficulty")?,
            })
        })
        .collect::<Result<_, sqlx::Error>>()?;
    outcomes.reverse();
    Ok(outcomes)
}

pub async fn feedback_window_stats(
    proxy: &DatabaseProxy,
    window_days: i64,
) -> Result<WindowStats, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            AVG("feedbackScore") AS "avgScore",
            COUNT("feedbackScore") AS "feedbackCount",
            COUNT(*) AS "total",
            COUNT(*) FILTER (WHERE "rejected") AS "rejectedCount"
        FROM "interactions"
        WHERE "createdAt" >= NOW() - ($1 * INTERVAL '1 day')
        "#,
    )
    .bind(window_days as f64)
    .fetch_one(proxy.pool())
    .await?;

    Ok(WindowStats {
        avg_feedback_score: row.try_get("avgScore")?,
        feedback_count: row.try_get("feedbackCount")?,
        total_interactions: row.try_get("total")?,
        rejected_count: row.try_get("rejectedCount")?,
    })
}

/// Recent interactions that never got feedback and are not yet flagged.
/// Returns id plus the stored sources breakdown, newest first.
pub async fn unreviewed_interactions(
    proxy: &DatabaseProxy,
    limit: i64,
) -> Result<Vec<(String, serde_json::Value)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "id", "sources" FROM "interactions"
        WHERE NOT "uncertaintyFlag" AND "feedbackScore" IS NULL AND NOT "rejected"
        ORDER BY "createdAt" DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(proxy.pool())
    .await?;
    rows.iter()
        .map(|r| Ok((r.try_get("id")?, r.try_get("sources")?)))
        .collect()
}

/// Marks the given interactions as needing explicit feedback. Returns how
/// many rows were newly flagged.
pub async fn set_uncertainty_flags(
    proxy: &DatabaseProxy,
    ids: &[String],
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        r#"
        UPDATE "interactions" SET "uncertaintyFlag" = TRUE
        WHERE "id" = ANY($1) AND NOT "uncertaintyFlag"
        "#,
    )
    .bind(ids)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected())
}

pub async fn feedback_key_seen(proxy: &DatabaseProxy, key: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(r#"SELECT 1 AS "one" FROM "feedback_events" WHERE "key" = $1"#)
        .bind(key)
        .fetch_optional(proxy.pool())
        .await?;
    Ok(row.is_some())
}

pub async fn record_feedback_key(
    proxy: &DatabaseProxy,
    key: &str,
    interaction_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "feedback_events" ("key", "interactionId")
        VALUES ($1, $2)
        ON CONFLICT ("key") DO NOTHING
        "#,
    )
    .bind(key)
    .bind(interaction_id)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

fn map_interaction(row: &sqlx::postgres::PgRow) -> Result<InteractionRow, sqlx::Error> {
    let created_at: chrono::NaiveDateTime = row.try_get("createdAt")?;
    Ok(InteractionRow {
        id: row.try_get("id")?,
        learner_id: row.try_get("learnerId")?,
        session_id: row.try_get("sessionId")?,
        query: row.try_get("query")?,
        answer: row.try_get("answer")?,
        strategy: row.try_get("strategy")?,
        sources: row.try_get("sources")?,
        pedagogy: row.try_get("pedagogy")?,
        factors: row.try_get("factors")?,
        components_active: row.try_get("componentsActive")?,
        personalization_failed: row.try_get("personalizationFailed")?,
        rejected: row.try_get("rejected")?,
        latency_ms: row.try_get("latencyMs")?,
        attempted_difficulty: row.try_get("attemptedDifficulty")?,
        feedback_score: row.try_get("feedbackScore")?,
        feedback_passed: row.try_get("feedbackPassed")?,
        uncertainty_flag: row.try_get("uncertaintyFlag")?,
        created_at_ms: created_at.and_utc().timestamp_millis(),
    })
}
