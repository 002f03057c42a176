//! Mirror failover and feed parsing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::normalize::{clean_text, extract_status_id};
use crate::config::Config;

/// A single post extracted from an account's feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    /// Numeric-string identifier, unique per account and increasing with
    /// creation time.
    pub id: String,
    pub text: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Canonical public URL reconstructed from author and id.
    pub link: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("all {attempts} feed sources failed for @{handle}")]
    AllSourcesExhausted { handle: String, attempts: usize },
}

/// Fetches an account's feed through an ordered list of mirror endpoints.
///
/// Mirrors are tried round-robin: the rotating index is owned by this
/// instance and advanced atomically, so load spreads across mirrors between
/// calls and each failover attempt within a call hits a distinct source.
pub struct FeedFetcher {
    client: reqwest::Client,
    mirrors: Vec<String>,
    next_mirror: AtomicUsize,
    backoff: Duration,
}

impl FeedFetcher {
    /// Build a fetcher from the configured mirror list.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(concat!("feed-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            mirrors: config.mirror_urls.clone(),
            next_mirror: AtomicUsize::new(0),
            backoff: config.failover_backoff,
        })
    }

    fn next_mirror(&self) -> &str {
        let index = self.next_mirror.fetch_add(1, Ordering::Relaxed);
        &self.mirrors[index % self.mirrors.len()]
    }

    /// Fetch and parse the feed for a handle, failing over across mirrors.
    ///
    /// Tries up to one attempt per configured mirror with a fixed backoff
    /// between attempts. An empty feed is a valid result; only exhausting
    /// every mirror is an error.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::AllSourcesExhausted`] when every mirror failed.
    pub async fn fetch(&self, handle: &str) -> Result<Vec<PostRecord>, FetchError> {
        let attempts = self.mirrors.len();

        for attempt in 1..=attempts {
            let mirror = self.next_mirror();
            match self.fetch_from(mirror, handle).await {
                Ok(posts) => {
                    debug!(handle, mirror, count = posts.len(), "Fetched feed");
                    return Ok(posts);
                }
                Err(e) => {
                    warn!(handle, mirror, attempt, "Feed source failed: {e:#}");
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(FetchError::AllSourcesExhausted {
            handle: handle.to_string(),
            attempts,
        })
    }

    async fn fetch_from(&self, mirror: &str, handle: &str) -> Result<Vec<PostRecord>> {
        let url = format!("{mirror}/{handle}/rss");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch feed")?;

        if !response.status().is_success() {
            anyhow::bail!("feed fetch failed with status {}", response.status());
        }

        let body = response.bytes().await.context("Failed to read feed body")?;
        let feed = feed_rs::parser::parse(&body[..]).context("Failed to parse feed")?;

        let fetched_at = Utc::now();
        let posts = feed
            .entries
            .into_iter()
            .filter_map(|entry| entry_to_post(entry, handle, fetched_at))
            .collect();

        Ok(posts)
    }
}

/// Map one feed entry to a post record.
///
/// Entries without an extractable numeric status id in their link are
/// malformed and dropped, not errors.
fn entry_to_post(
    entry: feed_rs::model::Entry,
    handle: &str,
    fetched_at: DateTime<Utc>,
) -> Option<PostRecord> {
    let source_link = entry.links.first().map(|l| l.href.as_str())?;
    let id = extract_status_id(source_link)?;

    let raw_text = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .or_else(|| entry.title.as_ref().map(|t| t.content.clone()))
        .unwrap_or_default();

    Some(PostRecord {
        text: clean_text(&raw_text),
        author: handle.to_string(),
        timestamp: entry.published.unwrap_or(fetched_at),
        link: format!("https://twitter.com/{handle}/status/{id}"),
        id,
    })
}
