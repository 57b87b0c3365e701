use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS "_migrations" (
            "id" SERIAL PRIMARY KEY,
            "name" TEXT NOT NULL UNIQUE,
            "applied_at" TIMESTAMP NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    let applied: Vec<String> =
        sqlx::query_scalar(r#"SELECT "name" FROM "_migrations" ORDER BY "id""#)
            .fetch_all(pool)
            .await?;

    let migrations = [(
        "001_init_schema",
        include_str!("../../sql/001_init_schema.sql"),
    )];

    for (name, sql) in migrations {
        if applied.iter().any(|m| m == name) {
            continue;
        }
        tracing::info!(migration = name, "applying migration");
        // Statements are separated by a marker line so the file can hold
        // multi-statement DDL without a full SQL parser.
        for statement in sql.split("\n--;;\n") {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(pool).await?;
        }
        sqlx::query(r#"INSERT INTO "_migrations" ("name") VALUES ($1)"#)
            .bind(name)
            .execute(pool)
            .await?;
    }

    tracing::info!("Database migrations complete");
    Ok(())
}
