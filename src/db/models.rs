use serde::{Deserialize, Serialize};

/// A monitored account subscription.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub handle: String,
    pub tenant_id: String,
    /// Id of the newest post already delivered; `None` before the first
    /// successful check.
    pub cursor: Option<String>,
    pub last_checked_at: Option<String>,
    pub added_by: String,
    pub added_at: String,
}

/// A post recorded for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredPost {
    pub post_id: String,
    pub tenant_id: String,
    pub handle: String,
    pub text: String,
    pub link: String,
    pub posted_at: String,
    pub notified_at: String,
}

/// Data for creating a new subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub handle: String,
    pub tenant_id: String,
    pub cursor: Option<String>,
    pub added_by: String,
}

/// Data for recording a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub post_id: String,
    pub tenant_id: String,
    pub handle: String,
    pub text: String,
    pub link: String,
    pub posted_at: String,
}
