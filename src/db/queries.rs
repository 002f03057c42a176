use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{NewPost, NewSubscription, StoredPost, Subscription};

// ========== Subscriptions ==========

/// Get all active subscriptions, oldest first.
pub async fn list_subscriptions(pool: &SqlitePool) -> Result<Vec<Subscription>> {
    sqlx::query_as("SELECT * FROM subscriptions ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to list subscriptions")
}

/// Get all subscriptions for one tenant.
pub async fn list_subscriptions_for_tenant(
    pool: &SqlitePool,
    tenant_id: &str,
) -> Result<Vec<Subscription>> {
    sqlx::query_as("SELECT * FROM subscriptions WHERE tenant_id = ? ORDER BY id")
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .context("Failed to list subscriptions for tenant")
}

/// Get a subscription by id.
pub async fn get_subscription(pool: &SqlitePool, id: i64) -> Result<Option<Subscription>> {
    sqlx::query_as("SELECT * FROM subscriptions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch subscription")
}

/// Get a subscription by its unique (handle, tenant) pair.
pub async fn get_subscription_by_handle(
    pool: &SqlitePool,
    handle: &str,
    tenant_id: &str,
) -> Result<Option<Subscription>> {
    sqlx::query_as("SELECT * FROM subscriptions WHERE handle = ? AND tenant_id = ?")
        .bind(handle)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch subscription by handle")
}

/// Create a subscription, returning its id.
pub async fn create_subscription(pool: &SqlitePool, sub: &NewSubscription) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO subscriptions (handle, tenant_id, cursor, added_by, last_checked_at)
        VALUES (?, ?, ?, ?, datetime('now'))
        ",
    )
    .bind(&sub.handle)
    .bind(&sub.tenant_id)
    .bind(&sub.cursor)
    .bind(&sub.added_by)
    .execute(pool)
    .await
    .context("Failed to create subscription")?;

    Ok(result.last_insert_rowid())
}

/// Delete a subscription. Returns false when no such row existed.
pub async fn delete_subscription(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete subscription")?;

    Ok(result.rows_affected() > 0)
}

/// Advance the cursor and check time together after a successful poll.
pub async fn advance_subscription_cursor(
    pool: &SqlitePool,
    id: i64,
    cursor: &str,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE subscriptions
        SET cursor = ?, last_checked_at = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(cursor)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to advance subscription cursor")?;

    Ok(())
}

/// Record a check attempt without touching the cursor.
pub async fn touch_subscription(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE subscriptions SET last_checked_at = datetime('now') WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update subscription check time")?;

    Ok(())
}

// ========== Posts ==========

/// Insert a post, ignoring duplicates on (tenant, post id).
///
/// Returns true when a row was actually inserted.
pub async fn insert_post(pool: &SqlitePool, post: &NewPost) -> Result<bool> {
    let result = sqlx::query(
        r"
        INSERT OR IGNORE INTO posts (post_id, tenant_id, handle, text, link, posted_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&post.post_id)
    .bind(&post.tenant_id)
    .bind(&post.handle)
    .bind(&post.text)
    .bind(&post.link)
    .bind(&post.posted_at)
    .execute(pool)
    .await
    .context("Failed to insert post")?;

    Ok(result.rows_affected() > 0)
}

/// Get a stored post by its (tenant, post id) key.
pub async fn get_post(
    pool: &SqlitePool,
    tenant_id: &str,
    post_id: &str,
) -> Result<Option<StoredPost>> {
    sqlx::query_as("SELECT * FROM posts WHERE tenant_id = ? AND post_id = ?")
        .bind(tenant_id)
        .bind(post_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Get recent posts for a tenant, newest first.
pub async fn get_recent_posts(
    pool: &SqlitePool,
    tenant_id: &str,
    limit: i64,
) -> Result<Vec<StoredPost>> {
    sqlx::query_as(
        r"
        SELECT * FROM posts
        WHERE tenant_id = ?
        ORDER BY posted_at DESC
        LIMIT ?
        ",
    )
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch recent posts")
}

/// Count posts stored for a tenant.
pub async fn count_posts(pool: &SqlitePool, tenant_id: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE tenant_id = ?")
        .bind(tenant_id)
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;

    Ok(row.0)
}
