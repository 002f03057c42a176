use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::db::{
    create_subscription, delete_subscription, get_recent_posts, get_subscription_by_handle,
    list_subscriptions_for_tenant, NewSubscription,
};
use crate::monitor::{self, compare_ids};

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/cron/check", get(cron_check))
        .route("/api/accounts", post(add_account).get(list_accounts))
        .route("/api/accounts/:id", delete(remove_account))
        .route("/api/posts", get(recent_posts))
}

async fn health() -> &'static str {
    "ok"
}

// ========== Scheduled trigger ==========

/// Run one batch check over all subscriptions.
///
/// Requires the cron bearer secret. Per-account failures only raise the
/// error count in the summary; only a run-level fault is a 500. A trigger
/// that arrives while a batch is already in flight is turned away with a
/// 409 rather than queued, keeping at most one run active per process.
async fn cron_check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !is_authorized(&headers, &state.config.cron_secret) {
        warn!("Unauthorized cron trigger attempt");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" })))
            .into_response();
    }

    match state.runner.try_run().await {
        Some(Ok(summary)) => Json(json!({ "success": true, "results": summary })).into_response(),
        Some(Err(e)) => {
            tracing::error!("Batch check failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to check subscriptions" })),
            )
                .into_response()
        }
        None => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "A batch check is already running" })),
        )
            .into_response(),
    }
}

fn is_authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {secret}"))
}

// ========== Account management ==========

#[derive(Debug, Deserialize)]
pub struct AddAccountRequest {
    pub handle: String,
    pub tenant_id: String,
    pub added_by: Option<String>,
}

async fn add_account(
    State(state): State<AppState>,
    Json(req): Json<AddAccountRequest>,
) -> Response {
    // Accept "@Handle " and the like; stored handles are bare and lowercase.
    let handle = req.handle.trim().trim_start_matches('@').to_lowercase();

    if handle.is_empty() || req.tenant_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "handle and tenant_id are required" })),
        )
            .into_response();
    }

    match get_subscription_by_handle(state.db.pool(), &handle, &req.tenant_id).await {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "error": "Already monitoring this account" })),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to check for existing subscription: {e:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Database error" })),
            )
                .into_response();
        }
    }

    // Best-effort verification fetch: seed the cursor from the newest post so
    // monitoring starts from "now". A failure here does not block creation.
    let cursor = match monitor::poll(&state.fetcher, &handle, None).await {
        Ok(posts) => {
            info!(handle, count = posts.len(), "Verified account");
            posts
                .iter()
                .map(|p| p.id.as_str())
                .max_by(|a, b| compare_ids(a, b))
                .map(ToString::to_string)
        }
        Err(e) => {
            warn!(handle, "Could not verify account, adding anyway: {e}");
            None
        }
    };

    let subscription = NewSubscription {
        handle: handle.clone(),
        tenant_id: req.tenant_id,
        cursor,
        added_by: req.added_by.unwrap_or_else(|| "system".to_string()),
    };

    match create_subscription(state.db.pool(), &subscription).await {
        Ok(id) => {
            info!(handle, id, "Now monitoring account");
            Json(json!({ "success": true, "account_id": id, "handle": handle })).into_response()
        }
        // A concurrent request for the same (handle, tenant) can slip past
        // the duplicate check above; the UNIQUE constraint catches it here.
        Err(e) if is_unique_violation(&e) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Already monitoring this account" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to create subscription: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to add account" })),
            )
                .into_response()
        }
    }
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(sqlx::Error::as_database_error)
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

async fn remove_account(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match delete_subscription(state.db.pool(), id).await {
        Ok(true) => {
            info!(id, "Removed account monitoring");
            Json(json!({ "success": true })).into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Account not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to delete subscription: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to remove account" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: String,
}

async fn list_accounts(
    State(state): State<AppState>,
    Query(params): Query<TenantQuery>,
) -> Response {
    match list_subscriptions_for_tenant(state.db.pool(), &params.tenant_id).await {
        Ok(accounts) => Json(json!({ "accounts": accounts })).into_response(),
        Err(e) => {
            tracing::error!("Failed to list subscriptions: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to get accounts" })),
            )
                .into_response()
        }
    }
}

// ========== Posts ==========

#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    pub tenant_id: String,
    pub limit: Option<i64>,
}

async fn recent_posts(State(state): State<AppState>, Query(params): Query<PostsQuery>) -> Response {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    match get_recent_posts(state.db.pool(), &params.tenant_id, limit).await {
        Ok(posts) => Json(json!({ "posts": posts })).into_response(),
        Err(e) => {
            tracing::error!("Failed to fetch posts: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to get posts" })),
            )
                .into_response()
        }
    }
}
