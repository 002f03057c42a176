use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Subscriptions: one row per monitored (handle, tenant) pair. The cursor
    // is the id of the newest post already delivered; NULL before the first
    // successful check.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            handle TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            cursor TEXT,
            last_checked_at TEXT,
            added_by TEXT NOT NULL DEFAULT 'system',
            added_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (handle, tenant_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create subscriptions table")?;

    // Posts keyed by (tenant, post id) so re-inserting the same post is a
    // no-op rather than an error or a duplicate.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            post_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            handle TEXT NOT NULL,
            text TEXT NOT NULL,
            link TEXT NOT NULL,
            posted_at TEXT NOT NULL,
            notified_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (tenant_id, post_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_posts_tenant_posted
        ON posts (tenant_id, posted_at DESC)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts index")?;

    Ok(())
}
