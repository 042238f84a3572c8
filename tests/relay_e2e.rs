#![cfg(feature = "http")]

//! End-to-end runs: sled store on disk, HTTP sink against a mock collector.

use mockito::{Matcher, Server};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing_log_relay::store::{LogStore, SledLogStore};
use tracing_log_relay::{LogLevel, LogRecord, LogRelay, UploadConfig, UploadReport, UploadStrategy};

async fn sled_store() -> Arc<dyn LogStore> {
    let store = Arc::new(SledLogStore::temporary());
    store.init().await.unwrap();
    store
}

fn config(endpoint: String, strategy: UploadStrategy, batch_size: usize) -> UploadConfig {
    UploadConfig {
        endpoint: Some(endpoint),
        strategy,
        batch_size,
        idle_period: Duration::from_millis(50),
        ..Default::default()
    }
}

async fn wait_until_drained(store: &Arc<dyn LogStore>) {
    timeout(Duration::from_secs(5), async {
        while !store.unuploaded_records().await.unwrap().is_empty() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pending records were not uploaded in time");
}

#[tokio::test]
async fn immediate_upload_marks_record() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_body(Matcher::Regex(r#""title":"user signed in""#.to_string()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = sled_store().await;
    let cfg = config(format!("{}/logs", server.url()), UploadStrategy::Immediate, 10);
    let relay = LogRelay::start(cfg, Some(Arc::clone(&store))).await;

    relay.info("user signed in", BTreeMap::new()).await;

    mock.assert_async().await;
    let all = store.all_records().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].uploaded);
    assert!(store.unuploaded_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn idle_fire_uploads_in_batches() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .with_status(200)
        .expect(3)
        .create_async()
        .await;

    // Seed before starting so the first idle fire sees all five records.
    let store = sled_store().await;
    for i in 0..5 {
        let record = LogRecord::new(LogLevel::Warn, format!("slow query {i}"), BTreeMap::new());
        store.save(&record).await.unwrap();
    }

    let cfg = config(format!("{}/logs", server.url()), UploadStrategy::Idle, 2);
    let relay = LogRelay::start(cfg, Some(Arc::clone(&store))).await;
    wait_until_drained(&store).await;

    mock.assert_async().await;
    let all = store.all_records().await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(|r| r.uploaded));
    relay.shutdown().await;
}

#[tokio::test]
async fn disabled_uploads_never_reach_the_collector() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", Matcher::Any).expect(0).create_async().await;

    let store = sled_store().await;
    let mut cfg = config(format!("{}/logs", server.url()), UploadStrategy::Immediate, 10);
    cfg.upload_logs = false;
    let relay = LogRelay::start(cfg, Some(Arc::clone(&store))).await;

    relay.error("kept locally", BTreeMap::new()).await;
    relay.force_upload().await;
    sleep(Duration::from_millis(150)).await;

    mock.assert_async().await;
    assert_eq!(store.unuploaded_records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failing_collector_keeps_records_until_endpoint_changes() {
    let mut broken = Server::new_async().await;
    let rejected = broken
        .mock("POST", "/logs")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let mut healthy = Server::new_async().await;
    let accepted = healthy
        .mock("POST", "/logs")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = sled_store().await;
    // Long idle period so only forced uploads run.
    let mut cfg = config(format!("{}/logs", broken.url()), UploadStrategy::Idle, 2);
    cfg.idle_period = Duration::from_secs(3600);
    let relay = LogRelay::start(cfg.clone(), Some(Arc::clone(&store))).await;

    for i in 0..4 {
        relay.debug(format!("tick {i}"), BTreeMap::new()).await;
    }

    let report = relay.force_upload().await;
    assert_eq!(report, UploadReport::Failed { batches: 1, uploaded: 0, pending: 4 });
    assert_eq!(store.unuploaded_records().await.unwrap().len(), 4);

    cfg.endpoint = Some(format!("{}/logs", healthy.url()));
    cfg.batch_size = 0;
    relay.reconfigure(cfg);

    let report = relay.force_upload().await;
    assert_eq!(report, UploadReport::Completed { batches: 1, uploaded: 4 });
    assert!(store.unuploaded_records().await.unwrap().is_empty());

    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn expired_records_are_purged_at_start() {
    let store = sled_store().await;
    let now = chrono::Utc::now().timestamp_millis();

    let mut stale = LogRecord::new(LogLevel::Info, "stale", BTreeMap::new());
    stale.timestamp = now - 10 * 86_400_000;
    let fresh = LogRecord::new(LogLevel::Info, "fresh", BTreeMap::new());
    store.save(&stale).await.unwrap();
    store.save(&fresh).await.unwrap();

    let cfg = UploadConfig { upload_logs: false, retention_days: 7, ..Default::default() };
    let _relay = LogRelay::start(cfg, Some(Arc::clone(&store))).await;

    let titles: Vec<String> = store.all_records().await.unwrap().into_iter().map(|r| r.title).collect();
    assert_eq!(titles, vec!["fresh".to_string()]);
}
