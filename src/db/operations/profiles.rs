use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfileRow {
    pub learner_id: String,
    pub session_id: String,
    pub avg_comprehension: f64,
    pub avg_satisfaction: Option<f64>,
    pub interaction_count: i64,
    pub feedback_count: i64,
    pub strong_topics: Vec<String>,
    pub weak_topics: Vec<String>,
    pub zpd_level: String,
    pub explanation_style: String,
    pub revision: i64,
    pub updated_at_ms: i64,
}

pub async fn get_learner_profile(
    proxy: &DatabaseProxy,
    learner_id: &str,
    session_id: &str,
) -> Result<Option<LearnerProfileRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT * FROM "learner_profiles"
        WHERE "learnerId" = $1 AND "sessionId" = $2
        "#,
    )
    .bind(learner_id)
    .bind(session_id)
    .fetch_optional(proxy.pool())
    .await?;
    row.map(|r| map_profile(&r)).transpose()
}

/// Compare-and-set write. Inserts when the caller saw no row (expected
/// revision 0); otherwise updates only if the stored revision still matches.
/// Returns false on a lost race so the caller can reload and retry.
pub async fn save_learner_profile(
    proxy: &DatabaseProxy,
    profile: &LearnerProfileRow,
    expected_revision: i64,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now().naive_utc();
    let strong = serde_json::to_value(&profile.strong_topics).unwrap_or_default();
    let weak = serde_json::to_value(&profile.weak_topics).unwrap_or_default();

    if expected_revision == 0 {
        let inserted = sqlx::query(
            r#"
            INSERT INTO "learner_profiles" (
                "learnerId", "sessionId", "avgComprehension", "avgSatisfaction",
                "interactionCount", "feedbackCount", "strongTopics", "weakTopics",
                "zpdLevel", "explanationStyle", "revision", "updatedAt"
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT ("learnerId", "sessionId") DO NOTHING
            "#,
        )
        .bind(&profile.learner_id)
        .bind(&profile.session_id)
        .bind(profile.avg_comprehension)
        .bind(profile.avg_satisfaction)
        .bind(profile.interaction_count)
        .bind(profile.feedback_count)
        .bind(&strong)
        .bind(&weak)
        .bind(&profile.zpd_level)
        .bind(&profile.explanation_style)
        .bind(profile.revision)
        .bind(now)
        .execute(proxy.pool())
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok(true);
        }
        // A row appeared since the caller loaded; fall through and let the
        // revision guard decide.
    }

    let updated = sqlx::query(
        r#"
        UPDATE "learner_profiles" SET
            "avgComprehension" = $3,
            "avgSatisfaction" = $4,
            "interactionCount" = $5,
            "feedbackCount" = $6,
            "strongTopics" = $7,
            "weakTopics" = $8,
            "zpdLevel" = $9,
            "explanationStyle" = $10,
            "revision" = $11,
            "updatedAt" = $12
        WHERE "learnerId" = $1 AND "sessionId" = $2 AND "revision" = $13
        "#,
    )
    .bind(&profile.learner_id)
    .bind(&profile.session_id)
    .bind(profile.avg_comprehension)
    .bind(profile.avg_satisfaction)
    .bind(profile.interaction_count)
    .bind(profile.feedback_count)
    .bind(&strong)
    .bind(&weak)
    .bind(&profile.zpd_level)
    .bind(&profile.explanation_style)
    .bind(profile.revision)
    .bind(now)
    .bind(expected_revision)
    .execute(proxy.pool())
    .await?;

    Ok(updated.rows_affected() == 1)
}

fn map_profile(row: &sqlx::postgres::PgRow) -> Result<LearnerProfileRow, sqlx::Error> {
    let strong: serde_json::Value = row.try_get("strongTopics")?;
    let weak: serde_json::Value = row.try_get("weakTopics")?;
    let updated_at: chrono::NaiveDateTime = row.try_get("updatedAt")?;
    Ok(LearnerProfileRow {
        learner_id: row.try_get("learnerId")?,
        session_id: row.try_get("sessionId")?,
        avg_comprehension: row.try_get("avgComprehension")?,
        avg_satisfaction: row.try_get("avgSatisfaction")?,
        interaction_count: row.try_get("interactionCount")?,
        feedback_count: row.try_get("feedbackCount")?,
        strong_topics: serde_json::from_value(strong).unwrap_or_default(),
        weak_topics: serde_json::from_value(weak).unwrap_or_default(),
        zpd_level: row.try_get("zpdLevel")?,
        explanation_style: row.try_get("explanationStyle")?,
        revision: row.try_get("revision")?,
        updated_at_ms: updated_at.and_utc().timestamp_millis(),
    })
}
