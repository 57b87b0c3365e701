use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigProposalRow {
    pub id: String,
    pub delta: serde_json::Value,
    pub rationale: String,
    pub metrics: serde_json::Value,
    pub status: String,
    pub created_at: String,
    pub decided_at: Option<String>,
}

pub async fn insert_proposal(
    proxy: &DatabaseProxy,
    row: &ConfigProposalRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "config_proposals" ("id", "delta", "rationale", "metrics", "status", "createdAt")
        VALUES ($1, $2, $3, $4, $5, NOW())
        "#,
    )
    .bind(&row.id)
    .bind(&row.delta)
    .bind(&row.rationale)
    .bind(&row.metrics)
    .bind(&row.status)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn list_proposals(
    proxy: &DatabaseProxy,
    status: Option<&str>,
) -> Result<Vec<ConfigProposalRow>, sqlx::Error> {
    let rows = match status {
        Some(status) => {
            sqlx::query(
                r#"
                SELECT * FROM "config_proposals"
                WHERE "status" = $1
                ORDER BY "createdAt" DESC
                LIMIT 100
                "#,
            )
            .bind(status)
            .fetch_all(proxy.pool())
            .await?
        }
        None => {
            sqlx::query(r#"SELECT * FROM "config_proposals" ORDER BY "createdAt" DESC LIMIT 100"#)
                .fetch_all(proxy.pool())
                .await?
        }
    };
    rows.iter().map(map_proposal).collect()
}

pub async fn get_proposal(
    proxy: &DatabaseProxy,
    id: &str,
) -> Result<Option<ConfigProposalRow>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "config_proposals" WHERE "id" = $1"#)
        .bind(id)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_proposal).transpose()
}

/// Moves a pending proposal to a terminal status. Returns false when the
/// proposal was already decided.
pub async fn decide_proposal(
    proxy: &DatabaseProxy,
    id: &str,
    status: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE "config_proposals" SET "status" = $2, "decidedAt" = NOW()
        WHERE "id" = $1 AND "status" = 'pending'
        "#,
    )
    .bind(id)
    .bind(status)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Whether any proposal was created inside the trailing window. The
/// optimizer uses this as its single-flight guard across restarts.
pub async fn recent_proposal_exists(
    proxy: &DatabaseProxy,
    window_hours: i64,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT 1 AS "one" FROM "config_proposals"
        WHERE "createdAt" >= NOW() - ($1 * INTERVAL '1 hour')
        LIMIT 1
        "#,
    )
    .bind(window_hours as f64)
    .fetch_optional(proxy.pool())
    .await?;
    Ok(row.is_some())
}

fn map_proposal(row: &sqlx::postgres::PgRow) -> Result<ConfigProposalRow, sqlx::Error> {
    let created_at: chrono::NaiveDateTime = row.try_get("createdAt")?;
    let decided_at: Option<chrono::NaiveDateTime> = row.try_get("decidedAt")?;
    Ok(ConfigProposalRow {
        id: row.try_get("id")?,
        delta: row.try_get("delta")?,
        rationale: row.try_get("rationale")?,
        metrics: row.try_get("metrics")?,
        status: row.try_get("status")?,
        created_at: created_at.and_utc().to_rfc3339(),
        decided_at: decided_at.map(|d| d.and_utc().to_rfc3339()),
    })
}
