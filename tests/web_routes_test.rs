//! Integration tests for the JSON API, including the cron trigger.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use feed_monitor::config::Config;
use feed_monitor::db::{
    count_posts, create_subscription, get_subscription, get_subscription_by_handle,
    list_subscriptions, Database, NewSubscription,
};
use feed_monitor::monitor::{BatchRunner, FeedFetcher};
use feed_monitor::web::{create_app, AppState};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// Build the app against a single mock mirror.
fn test_app(db: Database, mirror: &str) -> Router {
    let config = Config {
        mirror_urls: vec![mirror.to_string()],
        failover_backoff: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(5),
        ..Config::for_testing()
    };
    let fetcher = Arc::new(FeedFetcher::new(&config).expect("Failed to build fetcher"));
    let runner = Arc::new(BatchRunner::new(
        Arc::clone(&fetcher),
        db.clone(),
        config.batch_deadline,
    ));
    create_app(AppState {
        db,
        config: Arc::new(config),
        fetcher,
        runner,
    })
}

fn rss_feed(handle: &str, ids: &[&str]) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<item>
      <title>post {id}</title>
      <link>https://nitter.net/{handle}/status/{id}</link>
      <description>text {id}</description>
    </item>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>{handle} / feed</title>
    {items}
  </channel>
</rss>"#
    )
}

async fn mount_feed(server: &MockServer, handle: &str, ids: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/{handle}/rss")))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(rss_feed(handle, ids), "application/rss+xml"),
        )
        .mount(server)
        .await;
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not valid JSON")
}

fn cron_request(secret: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/cron/check")
        .header("authorization", format!("Bearer {secret}"))
        .body(Body::empty())
        .unwrap()
}

fn add_account_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/accounts")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let (db, _tmp) = setup_db().await;
    let app = test_app(db, "http://127.0.0.1:1");

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cron_requires_bearer_secret() {
    let (db, _tmp) = setup_db().await;
    let app = test_app(db, "http://127.0.0.1:1");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/cron/check")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(cron_request("wrong-secret")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cron_with_no_subscriptions() {
    let (db, _tmp) = setup_db().await;
    let app = test_app(db, "http://127.0.0.1:1");

    let response = app.oneshot(cron_request("test-secret")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["results"]["checked"], 0);
    assert_eq!(body["results"]["new_posts"], 0);
    assert_eq!(body["results"]["errors"], 0);
}

#[tokio::test]
async fn test_cron_isolates_per_account_failures() {
    let (db, _tmp) = setup_db().await;

    let server = MockServer::start().await;
    mount_feed(&server, "good", &["102", "101"]).await;
    Mock::given(method("GET"))
        .and(path("/bad/rss"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let good_id = create_subscription(
        db.pool(),
        &NewSubscription {
            handle: "good".to_string(),
            tenant_id: "t1".to_string(),
            cursor: None,
            added_by: "tester".to_string(),
        },
    )
    .await
    .unwrap();

    let bad_id = create_subscription(
        db.pool(),
        &NewSubscription {
            handle: "bad".to_string(),
            tenant_id: "t1".to_string(),
            cursor: Some("50".to_string()),
            added_by: "tester".to_string(),
        },
    )
    .await
    .unwrap();

    // Creation stamps last_checked_at; clear it so the assertion below can
    // only pass if the failure path itself records the attempt.
    sqlx::query("UPDATE subscriptions SET last_checked_at = NULL WHERE id = ?")
        .bind(bad_id)
        .execute(db.pool())
        .await
        .unwrap();

    let app = test_app(db.clone(), &server.uri());
    let response = app.oneshot(cron_request("test-secret")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["results"]["checked"], 2);
    assert_eq!(body["results"]["new_posts"], 2);
    assert_eq!(body["results"]["errors"], 1);

    // The healthy subscription advanced to the newest fetched id.
    let good = get_subscription(db.pool(), good_id).await.unwrap().unwrap();
    assert_eq!(good.cursor.as_deref(), Some("102"));

    // The failed one kept its cursor but recorded the attempt.
    let bad = get_subscription(db.pool(), bad_id).await.unwrap().unwrap();
    assert_eq!(bad.cursor.as_deref(), Some("50"));
    assert!(
        bad.last_checked_at.is_some(),
        "a failed poll must still update the check time"
    );
}

#[tokio::test]
async fn test_cron_rejects_overlapping_runs() {
    let (db, _tmp) = setup_db().await;

    // A slow feed keeps the first batch in flight while the second trigger
    // arrives; without exclusion both would run and could write cursors in
    // either order.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(rss_feed("slow", &["1"]), "application/rss+xml")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    create_subscription(
        db.pool(),
        &NewSubscription {
            handle: "slow".to_string(),
            tenant_id: "t1".to_string(),
            cursor: None,
            added_by: "tester".to_string(),
        },
    )
    .await
    .unwrap();

    let app = test_app(db, &server.uri());

    let (first, second) = tokio::join!(
        app.clone().oneshot(cron_request("test-secret")),
        app.clone().oneshot(cron_request("test-secret")),
    );

    let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::CONFLICT],
        "exactly one of two concurrent triggers may run a batch"
    );
}

#[tokio::test]
async fn test_cron_cursor_is_monotonic_across_runs() {
    let (db, _tmp) = setup_db().await;

    let server = MockServer::start().await;
    mount_feed(&server, "alice", &["200", "199"]).await;

    let sub_id = create_subscription(
        db.pool(),
        &NewSubscription {
            handle: "alice".to_string(),
            tenant_id: "t1".to_string(),
            cursor: Some("150".to_string()),
            added_by: "tester".to_string(),
        },
    )
    .await
    .unwrap();

    let app = test_app(db.clone(), &server.uri());

    let response = app.clone().oneshot(cron_request("test-secret")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["results"]["new_posts"], 2);

    let sub = get_subscription(db.pool(), sub_id).await.unwrap().unwrap();
    assert_eq!(sub.cursor.as_deref(), Some("200"));

    // Same feed again: nothing is new, the cursor must not move (and
    // certainly not backward), and no duplicate posts appear.
    let response = app.oneshot(cron_request("test-secret")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["results"]["new_posts"], 0);
    assert_eq!(body["results"]["errors"], 0);

    let sub = get_subscription(db.pool(), sub_id).await.unwrap().unwrap();
    assert_eq!(sub.cursor.as_deref(), Some("200"));
    assert_eq!(count_posts(db.pool(), "t1").await.unwrap(), 2);
}

#[tokio::test]
async fn test_add_account_cleans_handle_and_seeds_cursor() {
    let (db, _tmp) = setup_db().await;

    let server = MockServer::start().await;
    mount_feed(&server, "newuser", &["9", "5"]).await;

    let app = test_app(db.clone(), &server.uri());
    let response = app
        .oneshot(add_account_request(serde_json::json!({
            "handle": " @NewUser ",
            "tenant_id": "t1"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["handle"], "newuser");

    let sub = get_subscription_by_handle(db.pool(), "newuser", "t1")
        .await
        .unwrap()
        .expect("subscription missing");
    assert_eq!(sub.cursor.as_deref(), Some("9"));
}

#[tokio::test]
async fn test_add_account_survives_failed_verification() {
    let (db, _tmp) = setup_db().await;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ghost/rss"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let app = test_app(db.clone(), &server.uri());
    let response = app
        .oneshot(add_account_request(serde_json::json!({
            "handle": "ghost",
            "tenant_id": "t1"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sub = get_subscription_by_handle(db.pool(), "ghost", "t1")
        .await
        .unwrap()
        .expect("subscription missing");
    assert!(sub.cursor.is_none(), "unverified account starts without a cursor");
}

#[tokio::test]
async fn test_add_account_rejects_duplicates_and_empty_handles() {
    let (db, _tmp) = setup_db().await;

    let server = MockServer::start().await;
    mount_feed(&server, "alice", &["1"]).await;

    let app = test_app(db, &server.uri());

    let response = app
        .clone()
        .oneshot(add_account_request(serde_json::json!({
            "handle": "alice",
            "tenant_id": "t1"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(add_account_request(serde_json::json!({
            "handle": "@Alice",
            "tenant_id": "t1"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(add_account_request(serde_json::json!({
            "handle": "@ ",
            "tenant_id": "t1"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_add_account_concurrent_duplicates_conflict() {
    let (db, _tmp) = setup_db().await;

    // The verification fetch is slow enough that both requests pass the
    // duplicate pre-check before either inserts; the loser must still get a
    // 409 from the unique constraint, not a 500.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/race/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(rss_feed("race", &["5"]), "application/rss+xml")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let app = test_app(db.clone(), &server.uri());

    let request = || {
        add_account_request(serde_json::json!({
            "handle": "race",
            "tenant_id": "t1"
        }))
    };

    let (first, second) = tokio::join!(
        app.clone().oneshot(request()),
        app.clone().oneshot(request()),
    );

    let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let subscriptions = list_subscriptions(db.pool()).await.unwrap();
    assert_eq!(subscriptions.len(), 1, "only one subscription may be created");
}

#[tokio::test]
async fn test_remove_account() {
    let (db, _tmp) = setup_db().await;

    let id = create_subscription(
        db.pool(),
        &NewSubscription {
            handle: "alice".to_string(),
            tenant_id: "t1".to_string(),
            cursor: None,
            added_by: "tester".to_string(),
        },
    )
    .await
    .unwrap();

    let app = test_app(db, "http://127.0.0.1:1");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/accounts/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/accounts/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recent_posts_endpoint() {
    let (db, _tmp) = setup_db().await;

    let server = MockServer::start().await;
    mount_feed(&server, "alice", &["2", "1"]).await;

    create_subscription(
        db.pool(),
        &NewSubscription {
            handle: "alice".to_string(),
            tenant_id: "t1".to_string(),
            cursor: Some("0".to_string()),
            added_by: "tester".to_string(),
        },
    )
    .await
    .unwrap();

    let app = test_app(db, &server.uri());
    app.clone()
        .oneshot(cron_request("test-secret"))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/posts?tenant_id=t1&limit=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let posts = body["posts"].as_array().expect("posts array");
    assert_eq!(posts.len(), 2);
}
