//! A burst of console events that exceeds the configured rate limit results
//! in fewer persisted records than events fired.

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
async fn a_burst_past_the_rate_limit_drops_some_console_records() {
    let browser = StubBrowser::start().await;
    browser.set_response(
        "Target.getTargets",
        json!({"targetInfos": [{
            "targetId": "T1", "type": "page", "title": "", "url": "https://chatty.test/", "attached": false,
        }]}),
    );
    browser.set_response("Target.attachToTarget", json!({"sessionId": "S1"}));

    let client = ProtocolClient::connect(&browser.url(), Duration::from_secs(2)).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.data_root = dir.path().to_path_buf();
    config.console_rate_per_sec = 2;
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
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    const BURST: usize = 20;
    for i in 0..BURST {
        browser.push_event(
            "Runtime.consoleAPICalled",
            json!({"type": "log", "args": [{"type": "string", "value": format!("line {i}")}], "timestamp": 0.0}),
            Some("S1"),
        );
    }
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let _ = shutdown_tx.send(());
    run.await.unwrap();

    let console_file = dir.path().join("chatty.test").join("console.jsonl");
    assert!(console_file.exists());
    let recorded = std::fs::read_to_string(console_file).unwrap().lines().count();
    assert!(
        recorded < BURST,
        "rate limiter with a 2/s budget should have dropped some of a {BURST}-event burst, got {recorded} recorded"
    );
}
