use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use tracing_log_relay::noop_sink::NoopSink;
use tracing_log_relay::store::{LogStore, MemoryLogStore};
use tracing_log_relay::{LogRelay, UploadConfig, UploadCoordinator, UploadStrategy};

/// Logs a burst while the host is "busy", then goes quiet and lets the idle
/// signal upload everything in batches.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let store: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());
    let config = UploadConfig {
        endpoint: Some("noop://".to_string()),
        strategy: UploadStrategy::Idle,
        batch_size: 25,
        idle_period: Duration::from_millis(500),
        ..Default::default()
    };
    let coordinator = UploadCoordinator::with_sink(config, Some(Arc::clone(&store)), Arc::new(NoopSink));
    let relay = LogRelay::start_with(coordinator).await;
    let activity = relay.coordinator().activity();

    for i in 0..120 {
        activity.touch();
        let mut data = BTreeMap::new();
        data.insert("step".to_string(), serde_json::json!(i));
        relay.info("working", data).await;
        sleep(Duration::from_millis(10)).await;
    }

    let pending = store.unuploaded_records().await.map(|r| r.len()).unwrap_or(0);
    println!("pending while busy: {}", pending);

    sleep(Duration::from_secs(1)).await;
    let pending = store.unuploaded_records().await.map(|r| r.len()).unwrap_or(0);
    println!("pending after going idle: {}", pending);

    relay.shutdown().await;
}
