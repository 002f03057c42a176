//! Feed Monitor library.
//!
//! A service that watches social accounts through mirror-served RSS feeds,
//! records new posts per subscription, and exposes a small JSON API for
//! managing subscriptions and triggering batch checks.

pub mod config;
pub mod db;
pub mod monitor;
pub mod web;
