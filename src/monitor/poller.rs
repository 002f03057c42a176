//! Incremental polling and batch orchestration.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::fetcher::{FeedFetcher, FetchError, PostRecord};
use super::normalize::compare_ids;
use crate::db::{
    advance_subscription_cursor, insert_post, list_subscriptions, touch_subscription, Database,
    NewPost, Subscription,
};

/// Fetch an account's feed and reduce it to posts newer than the cursor.
///
/// Without a cursor the full fetched sequence is returned in the feed's
/// native order (first-ever check; also used to verify a handle is
/// reachable). With a cursor, posts are filtered to ids strictly greater
/// than it and sorted ascending, so the last element carries the maximum
/// id of the batch. Mutates no persisted state.
///
/// # Errors
///
/// Propagates [`FetchError`] from the fetcher.
pub async fn poll(
    fetcher: &FeedFetcher,
    handle: &str,
    cursor: Option<&str>,
) -> Result<Vec<PostRecord>, FetchError> {
    let mut posts = fetcher.fetch(handle).await?;

    let Some(cursor) = cursor else {
        return Ok(posts);
    };

    posts.retain(|p| compare_ids(&p.id, cursor) == Ordering::Greater);
    // Ascending order is load-bearing: the caller advances the cursor to the
    // last element's id, which must be the maximum of the batch.
    posts.sort_by(|a, b| compare_ids(&a.id, &b.id));

    Ok(posts)
}

/// Outcome of one batch run over all subscriptions.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub checked: usize,
    pub new_posts: usize,
    pub errors: usize,
}

/// Check every subscription once, isolating per-account failures.
///
/// A failed subscription raises the error count and gets its check time
/// updated, but never aborts the run. Subscriptions not yet started when the
/// deadline passes are skipped until the next run.
///
/// # Errors
///
/// Returns an error only for a run-level fault, i.e. when the subscription
/// list itself cannot be read.
pub async fn check_all(
    fetcher: &FeedFetcher,
    db: &Database,
    deadline: Duration,
) -> Result<BatchSummary> {
    let subscriptions = list_subscriptions(db.pool())
        .await
        .context("Failed to list subscriptions")?;

    let cutoff = Instant::now() + deadline;
    let mut summary = BatchSummary::default();

    for subscription in subscriptions {
        if Instant::now() >= cutoff {
            warn!(
                handle = %subscription.handle,
                "Batch deadline reached, skipping remaining subscriptions"
            );
            break;
        }

        summary.checked += 1;

        match check_one(fetcher, db, &subscription).await {
            Ok(new_posts) => summary.new_posts += new_posts,
            Err(e) => {
                error!(handle = %subscription.handle, "Subscription check failed: {e:#}");
                summary.errors += 1;
                if let Err(touch_err) = touch_subscription(db.pool(), subscription.id).await {
                    error!(
                        handle = %subscription.handle,
                        "Failed to record check time: {touch_err:#}"
                    );
                }
            }
        }
    }

    info!(
        checked = summary.checked,
        new_posts = summary.new_posts,
        errors = summary.errors,
        "Batch check complete"
    );

    Ok(summary)
}

/// Poll one subscription, persist its new posts, then advance the cursor.
///
/// The cursor moves only after every post is stored, and only to the
/// maximum returned id; a poll with no new posts leaves it untouched.
async fn check_one(
    fetcher: &FeedFetcher,
    db: &Database,
    subscription: &Subscription,
) -> Result<usize> {
    let new_posts = poll(fetcher, &subscription.handle, subscription.cursor.as_deref()).await?;

    if new_posts.is_empty() {
        debug!(handle = %subscription.handle, "No new posts");
        touch_subscription(db.pool(), subscription.id).await?;
        return Ok(0);
    }

    for post in &new_posts {
        let record = NewPost {
            post_id: post.id.clone(),
            tenant_id: subscription.tenant_id.clone(),
            handle: post.author.clone(),
            text: post.text.clone(),
            link: post.link.clone(),
            posted_at: post.timestamp.to_rfc3339(),
        };
        insert_post(db.pool(), &record).await?;
    }

    // On a first check (no cursor) posts arrive in native feed order, so the
    // maximum id is computed rather than assumed to be last.
    let newest = new_posts
        .iter()
        .map(|p| p.id.as_str())
        .max_by(|a, b| compare_ids(a, b))
        .unwrap_or_default();

    advance_subscription_cursor(db.pool(), subscription.id, newest).await?;

    info!(
        handle = %subscription.handle,
        count = new_posts.len(),
        cursor = newest,
        "Recorded new posts"
    );

    Ok(new_posts.len())
}

/// Serializes batch runs across triggers.
///
/// The scheduled loop and the cron endpoint both run batches against the
/// same subscriptions. Two overlapping runs can read the same cursor, fetch
/// different feed snapshots, and write their maxima in either order, so the
/// later, staler write would move the cursor backward. One runner per
/// process holds the lock for the duration of a run; a second trigger is
/// turned away instead of queued.
pub struct BatchRunner {
    fetcher: Arc<FeedFetcher>,
    db: Database,
    deadline: Duration,
    running: Mutex<()>,
}

impl BatchRunner {
    #[must_use]
    pub fn new(fetcher: Arc<FeedFetcher>, db: Database, deadline: Duration) -> Self {
        Self {
            fetcher,
            db,
            deadline,
            running: Mutex::new(()),
        }
    }

    /// Run one batch, or return `None` when a run is already in flight.
    pub async fn try_run(&self) -> Option<Result<BatchSummary>> {
        let Ok(_guard) = self.running.try_lock() else {
            return None;
        };
        Some(check_all(&self.fetcher, &self.db, self.deadline).await)
    }
}

/// Run batch checks forever on the configured interval.
pub async fn check_loop(runner: Arc<BatchRunner>, interval: Duration) {
    loop {
        match runner.try_run().await {
            Some(Ok(summary)) if summary.new_posts > 0 => {
                info!(new_posts = summary.new_posts, "Scheduled check found new posts");
            }
            Some(Ok(_)) => debug!("Scheduled check found nothing new"),
            Some(Err(e)) => error!("Scheduled check failed: {e:#}"),
            None => debug!("Batch already in flight, skipping scheduled run"),
        }

        tokio::time::sleep(interval).await;
    }
}
