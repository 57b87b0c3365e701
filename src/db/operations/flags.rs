use sqlx::Row;

use crate::db::DatabaseProxy;

const GLOBAL_SCOPE: &str = "global";

fn session_scope(session_id: &str) -> String {
    format!("session:{session_id}")
}

pub async fn get_flags_json(
    proxy: &DatabaseProxy,
    scope: &str,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT "flags" FROM "component_flags" WHERE "scope" = $1"#)
        .bind(scope)
        .fetch_optional(proxy.pool())
        .await?;
    row.map(|r| r.try_get("flags")).transpose()
}

pub async fn upsert_flags_json(
    proxy: &DatabaseProxy,
    scope: &str,
    flags: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "component_flags" ("scope", "flags", "updatedAt")
        VALUES ($1, $2, NOW())
        ON CONFLICT ("scope") DO UPDATE SET
            "flags" = EXCLUDED."flags",
            "updatedAt" = EXCLUDED."updatedAt"
        "#,
    )
    .bind(scope)
    .bind(flags)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn get_global_flags(
    proxy: &DatabaseProxy,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    get_flags_json(proxy, GLOBAL_SCOPE).await
}

pub async fn set_global_flags(
    proxy: &DatabaseProxy,
    flags: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    upsert_flags_json(proxy, GLOBAL_SCOPE, flags).await
}

pub async fn get_session_flags(
    proxy: &DatabaseProxy,
    session_id: &str,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    get_flags_json(proxy, &session_scope(session_id)).await
}

pub async fn set_session_flags(
    proxy: &DatabaseProxy,
    session_id: &str,
    flags: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    upsert_flags_json(proxy, &session_scope(session_id), flags).await
}
