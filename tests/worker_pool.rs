//! Worker pool behavior: single-flight dedup, queue draining, and shutdown
//! semantics, driven through real refreshes against a mock origin.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gleaner::batch::Job;
use gleaner::config::Config;
use gleaner::fetch::FetchClient;
use gleaner::filter::FilterEngine;
use gleaner::notify::NotifierSet;
use gleaner::pipeline::RefreshPipeline;
use gleaner::pool::WorkerPool;
use gleaner::storage::{Database, Feed};
use gleaner::tracker::FeedStateTracker;

const RSS: &str = "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>\
    <title>T</title><link>https://example.org/</link>\
    <item><guid>g1</guid><title>One</title>\
    <link>https://example.org/g1</link></item>\
    </channel></rss>";

fn build_pipeline(db: &Database) -> Arc<RefreshPipeline> {
    let config = Config::default();
    Arc::new(RefreshPipeline::new(
        db.clone(),
        FetchClient::new(&config),
        FilterEngine::new("", ""),
        FeedStateTracker::new(&config),
        NotifierSet::new(),
    ))
}

async fn mount_feed(server: &MockServer, route: &str, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(RSS)
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Poll until the mock origin has seen at least `n` requests. Requests are
/// recorded at receipt, before any response delay elapses.
async fn wait_for_requests(server: &MockServer, n: usize) {
    for _ in 0..500 {
        if server.received_requests().await.unwrap().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("mock origin never saw {n} requests");
}

#[tokio::test]
async fn test_duplicate_push_refreshes_once() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed.xml", Duration::from_millis(300)).await;

    let db = Database::open(":memory:").await.unwrap();
    let feed_id = db
        .create_feed(&Feed::new(1, 1, &format!("{}/feed.xml", server.uri())))
        .await
        .unwrap();

    let pool = WorkerPool::start(build_pipeline(&db), 4);
    let job = Job { user_id: 1, feed_id };

    // Second push lands while the first is still queued or fetching
    pool.push(job);
    pool.push(job);

    wait_for_requests(&server, 1).await;
    pool.shutdown().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "duplicate job must be dropped at enqueue");
}

#[tokio::test]
async fn test_feed_can_be_refreshed_again_after_completion() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed.xml", Duration::ZERO).await;

    let db = Database::open(":memory:").await.unwrap();
    let feed_id = db
        .create_feed(&Feed::new(1, 1, &format!("{}/feed.xml", server.uri())))
        .await
        .unwrap();

    let pipeline = build_pipeline(&db);
    let job = Job { user_id: 1, feed_id };

    let pool = WorkerPool::start(Arc::clone(&pipeline), 2);
    pool.push(job);
    wait_for_requests(&server, 1).await;
    pool.shutdown().await;

    // Single-flight token released on completion: a fresh pool accepts the
    // same feed again
    let pool = WorkerPool::start(pipeline, 2);
    pool.push(job);
    wait_for_requests(&server, 2).await;
    pool.shutdown().await;
}

#[tokio::test]
async fn test_queue_drains_across_many_feeds_with_few_workers() {
    let server = MockServer::start().await;
    let db = Database::open(":memory:").await.unwrap();

    let mut jobs = Vec::new();
    for i in 0..6 {
        let route = format!("/feed-{i}.xml");
        mount_feed(&server, &route, Duration::ZERO).await;
        let feed_id = db
            .create_feed(&Feed::new(1, 1, &format!("{}{}", server.uri(), route)))
            .await
            .unwrap();
        jobs.push(Job { user_id: 1, feed_id });
    }

    let pool = WorkerPool::start(build_pipeline(&db), 2);
    for job in &jobs {
        pool.push(*job);
    }
    wait_for_requests(&server, 6).await;
    pool.shutdown().await;

    for job in jobs {
        let entries = db.entries_for_feed(job.feed_id).await.unwrap();
        assert_eq!(entries.len(), 1, "feed {} was not refreshed", job.feed_id);
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_in_progress_job() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed.xml", Duration::from_millis(200)).await;

    let db = Database::open(":memory:").await.unwrap();
    let feed_id = db
        .create_feed(&Feed::new(1, 1, &format!("{}/feed.xml", server.uri())))
        .await
        .unwrap();

    let pool = WorkerPool::start(build_pipeline(&db), 1);
    pool.push(Job { user_id: 1, feed_id });

    // Shut down while the worker is blocked on the delayed response
    wait_for_requests(&server, 1).await;
    pool.shutdown().await;

    // The slow refresh must have been carried to completion
    let entries = db.entries_for_feed(feed_id).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_shutdown_drops_queued_jobs_without_touching_state() {
    let server = MockServer::start().await;
    mount_feed(&server, "/slow.xml", Duration::from_millis(300)).await;
    mount_feed(&server, "/queued.xml", Duration::ZERO).await;

    let db = Database::open(":memory:").await.unwrap();
    let slow_id = db
        .create_feed(&Feed::new(1, 1, &format!("{}/slow.xml", server.uri())))
        .await
        .unwrap();
    let queued_id = db
        .create_feed(&Feed::new(1, 1, &format!("{}/queued.xml", server.uri())))
        .await
        .unwrap();

    // One worker: the second job is still queued when shutdown starts
    let pool = WorkerPool::start(build_pipeline(&db), 1);
    pool.push(Job { user_id: 1, feed_id: slow_id });
    wait_for_requests(&server, 1).await;
    pool.push(Job { user_id: 1, feed_id: queued_id });
    pool.shutdown().await;

    let slow = db.feed_by_id(1, slow_id).await.unwrap().unwrap();
    assert!(slow.checked_at.is_some());
    assert_eq!(db.entries_for_feed(slow_id).await.unwrap().len(), 1);

    // The dropped job left no trace, so the next sweep re-selects the feed
    let queued = db.feed_by_id(1, queued_id).await.unwrap().unwrap();
    assert_eq!(queued.checked_at, None);
    assert!(db.entries_for_feed(queued_id).await.unwrap().is_empty());
}
