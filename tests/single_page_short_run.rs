//! A single page target appears, gets attached, and the memory collector
//! produces at least one record before a clean shutdown flushes it to disk.

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
async fn single_page_emits_a_memory_record_then_flushes_on_shutdown() {
    let browser = StubBrowser::start().await;
    browser.set_response(
        "Target.getTargets",
        json!({"targetInfos": [{
            "targetId": "T1", "type": "page", "title": "", "url": "https://example.com/", "attached": false,
        }]}),
    );
    browser.set_response(
        "Performance.getMetrics",
        json!({"metrics": [{"name": "JSHeapUsedSize", "value": 1_000_000.0}]}),
    );
    browser.set_response(
        "Memory.getDOMCounters",
        json!({"documents": 1, "nodes": 50, "jsEventListeners": 5}),
    );

    let client = ProtocolClient::connect(&browser.url(), Duration::from_secs(2)).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.data_root = dir.path().to_path_buf();
    config.registry_poll_interval = Duration::from_secs(3600); // rely on the initial snapshot, not the poll

    let writers = Arc::new(WriterRegistry::new(dir.path().to_path_buf(), &config));
    let overview = Arc::new(OverviewBuilder::new());
    let correlator = Arc::new(Correlator::new());

    let (registry, events_rx) = TargetRegistry::start(client.clone(), config.registry_poll_interval)
        .await
        .unwrap();
    let supervisor = Supervisor::new(client.clone(), registry, Arc::clone(&writers), Arc::clone(&overview), correlator, &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let run = tokio::spawn(supervisor.run(events_rx, shutdown_rx));

    // Let the session attach and let one memory sampling tick (5 s) fire.
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    let _ = shutdown_tx.send(());
    run.await.unwrap();

    let memory_file = dir.path().join("example.com").join("memory.jsonl");
    assert!(memory_file.exists(), "expected a memory.jsonl for example.com");
    let contents = std::fs::read_to_string(memory_file).unwrap();
    assert!(contents.lines().count() >= 1);
    let first: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(first["type"], "memory");
    assert_eq!(first["hostname"], "example.com");
}
