use std::env;
use std::sync::Arc;

use browserfairy::config::{self, EngineConfig};
use browserfairy::correlator::Correlator;
use browserfairy::overview::OverviewBuilder;
use browserfairy::protocol::ProtocolClient;
use browserfairy::registry::TargetRegistry;
use browserfairy::supervisor::Supervisor;
use browserfairy::writer::WriterRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config();

    // The debugger websocket URL is whatever `GET /json/version` on the
    // browser's remote-debugging port reports as `webSocketDebuggerUrl`;
    // this engine is handed that URL directly rather than discovering it,
    // to keep the dependency set aligned with the teacher's stack.
    let endpoint = env::var("BROWSERFAIRY_ENDPOINT")
        .expect("BROWSERFAIRY_ENDPOINT must be set to the browser's webSocketDebuggerUrl");

    info!(endpoint = %endpoint, "connecting to browser debug endpoint");
    let client = ProtocolClient::connect(&endpoint, config.call_timeout)
        .await
        .expect("failed to connect to browser debug endpoint");

    let session_dir = config
        .data_root
        .join(format!("session_{}", chrono::Utc::now().format("%Y-%m-%d_%H%M%S")));
    std::fs::create_dir_all(&session_dir).expect("failed to create session directory");
    info!(dir = %session_dir.display(), "writing session data");

    let writers = Arc::new(WriterRegistry::new(session_dir.clone(), &config));
    let overview = Arc::new(OverviewBuilder::new());
    let correlator = Arc::new(Correlator::new());

    let (registry, events_rx) = TargetRegistry::start(client.clone(), config.registry_poll_interval)
        .await
        .expect("failed to start target registry");

    let supervisor = Supervisor::new(
        client.clone(),
        registry,
        Arc::clone(&writers),
        Arc::clone(&overview),
        correlator,
        &config,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let disconnect_client = client.clone();
    let run = supervisor.run(events_rx, shutdown_rx);
    tokio::select! {
        () = run => {}
        () = disconnect_client.on_disconnect() => {
            info!("browser connection lost");
        }
    }

    let overview = overview.finish(writers.drop_counts());
    let overview_path = session_dir.join("overview.json");
    if let Err(e) = overview.write_to(&overview_path).await {
        tracing::error!(error = %e, "failed to write overview.json");
    }
    info!("shutdown complete");
}

fn load_config() -> EngineConfig {
    match env::var("BROWSERFAIRY_CONFIG") {
        Ok(path) => config::load_config_from_path(std::path::Path::new(&path))
            .expect("failed to load BROWSERFAIRY_CONFIG"),
        Err(_) => EngineConfig::default(),
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
