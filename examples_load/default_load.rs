use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::error;

use tracing_log_relay::init::init_tracing;
use tracing_log_relay::noop_sink::NoopSink;
use tracing_log_relay::store::{LogStore, SledLogStore};
use tracing_log_relay::{LogRelay, UploadConfig, UploadCoordinator};

#[tokio::main]
async fn main() {
    let store: Arc<dyn LogStore> = Arc::new(SledLogStore::temporary());
    let store = LogRelay::init_store(Some(store)).await;
    let coordinator = UploadCoordinator::with_sink(UploadConfig::default(), store.clone(), Arc::new(NoopSink));
    let relay = LogRelay::start_with(coordinator).await;
    let _forwarder = init_tracing(&relay).expect("set global subscriber");

    let n: u64 = 10_000;
    let start = Instant::now();

    for i in 0..n {
        error!(target: "load", iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: captured {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Give the background task a little time to drain the channel
    sleep(Duration::from_secs(2)).await;

    let report = relay.shutdown().await;
    if let Some(store) = store {
        let stored = store.all_records().await.map(|r| r.len()).unwrap_or(0);
        println!("stored {} records, final flush: {:?}", stored, report);
    }
}
