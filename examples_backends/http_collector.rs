use std::collections::BTreeMap;
use std::sync::Arc;

use tracing_log_relay::env::{env_or, LOG_RELAY_STORE_PATH_ENV};
use tracing_log_relay::store::{LogStore, SledLogStore};
use tracing_log_relay::{LogRelay, UploadConfig};

/// Relay configured from `LOG_RELAY_*` variables, persisting to sled and
/// posting to `LOG_RELAY_ENDPOINT`.
///
/// LOG_RELAY_ENDPOINT=http://127.0.0.1:8080/logs LOG_RELAY_STRATEGY=immediate \
///     cargo run --example http_collector
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = UploadConfig::from_env();
    let path = env_or(LOG_RELAY_STORE_PATH_ENV, "./log-relay-db");
    let store: Arc<dyn LogStore> = Arc::new(SledLogStore::open(path));

    let relay = LogRelay::start(config, Some(store)).await;

    let mut data = BTreeMap::new();
    data.insert("route".to_string(), serde_json::json!("/checkout"));
    data.insert("latency_ms".to_string(), serde_json::json!(1840));
    relay.warn("slow request", data).await;
    relay.error("payment provider unreachable", BTreeMap::new()).await;

    let report = relay.shutdown().await;
    println!("flush on shutdown: {:?}", report);
}
