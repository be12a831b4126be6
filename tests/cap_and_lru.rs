//! When the session cap is reached, the oldest-attached session is evicted
//! to make room for a newly discovered target.

#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use browserfairy::config::EngineConfig;
use browserfairy::correlator::Correlator;
use browserfairy::overview::OverviewBuilder;
use browserfairy::protocol::ProtocolClient;
use browserfairy::registry::TargetRegistry;
use browserfairy::supervisor::Supervisor;
use browserfairy::writer::WriterRegistry;
use serde_json::json;
use support::StubBrowser;

#[tokio::test(start_paused = true)]
async fn second_target_evicts_the_first_once_at_capacity() {
    let browser = StubBrowser::start().await;
    browser.set_response("Target.getTargets", json!({"targetInfos": []}));
    browser.set_response(
        "Performance.getMetrics",
        json!({"metrics": [{"name": "JSHeapUsedSize", "value": 1_000_000.0}]}),
    );
    browser.set_response("Memory.getDOMCounters", json!({"documents": 1, "nodes": 10, "jsEventListeners": 1}));

    let client = ProtocolClient::connect(&browser.url(), Duration::from_secs(2)).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.data_root = dir.path().to_path_buf();
    config.max_sessions = 1;
    config.registry_poll_interval = Duration::from_secs(3600);

    let writers = Arc::new(WriterRegistry::new(dir.path().to_path_buf(), &config));
    let overview = Arc::new(OverviewBuilder::new());
    let correlator = Arc::new(Correlator::new());

    let (registry, events_rx) = TargetRegistry::start(client.clone(), config.registry_poll_interval)
        .await
        .unwrap();
    let supervisor = Supervisor::new(client.clone(), registry, Arc::clone(&writers), Arc::clone(&overview), correlator, &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let run = tokio::spawn(supervisor.run(events_rx, shutdown_rx));

    browser.push_event(
        "Target.targetCreated",
        json!({"targetInfo": {"targetId": "T1", "type": "page", "title": "", "url": "https://first.test/", "attached": false}}),
        None,
    );
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    browser.push_event(
        "Target.targetCreated",
        json!({"targetInfo": {"targetId": "T2", "type": "page", "title": "", "url": "https://second.test/", "attached": false}}),
        None,
    );
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    // Only the surviving session (T2) should still be sampling after this tick.
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    let _ = shutdown_tx.send(());
    run.await.unwrap();

    assert!(
        dir.path().join("second.test").join("memory.jsonl").exists(),
        "surviving session should still be producing records"
    );
    assert!(
        !dir.path().join("first.test").exists(),
        "evicted session should not have produced any records after eviction"
    );
}
