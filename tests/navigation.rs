//! A target navigating to a new host retags subsequent collector records
//! with the new host without tearing down and re-attaching the session.

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
async fn navigation_retags_records_under_the_new_host() {
    let browser = StubBrowser::start().await;
    browser.set_response(
        "Target.getTargets",
        json!({"targetInfos": [{
            "targetId": "T1", "type": "page", "title": "", "url": "https://a.test/", "attached": false,
        }]}),
    );
    browser.set_response(
        "Performance.getMetrics",
        json!({"metrics": [{"name": "JSHeapUsedSize", "value": 1_000_000.0}]}),
    );
    browser.set_response("Memory.getDOMCounters", json!({"documents": 1, "nodes": 10, "jsEventListeners": 1}));

    let client = ProtocolClient::connect(&browser.url(), Duration::from_secs(2)).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.data_root = dir.path().to_path_buf();
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

    // Give the attach handshake a moment to complete before navigating.
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    browser.push_event(
        "Target.targetInfoChanged",
        json!({"targetInfo": {
            "targetId": "T1", "type": "page", "title": "", "url": "https://b.test/", "attached": true,
        }}),
        None,
    );
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    // One memory sampling tick after the navigation should land under b.test.
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    let _ = shutdown_tx.send(());
    run.await.unwrap();

    let new_host_file = dir.path().join("b.test").join("memory.jsonl");
    assert!(new_host_file.exists(), "expected memory records tagged with the post-navigation host");
}
