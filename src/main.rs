use std::sync::Arc;

use tracing::{error, info};

use request_tracker::config::Config;
use request_tracker::middleware::AccessLogger;
use request_tracker::server::{DemoApp, Server};
use request_tracker::{logging, TrackerRuntime, PKG_VERSION};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    logging::init(&config.logging)?;

    info!("Starting request_tracker {}", PKG_VERSION);
    config.log_summary();

    // Downstream handlers block; they run on the blocking pool.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let tracker = Arc::new(TrackerRuntime::from_config(&config)?);
    tracker.register_detailed_logger(AccessLogger::new());

    let server = Server::new(config.server.clone(), Arc::clone(&tracker), DemoApp::new());
    let flusher = tracker.spawn_flusher(config.server.flush_interval, server.shutdown_receiver());

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    server.trigger_shutdown();
    if !server.wait_for_drain(server.drain_timeout()).await {
        info!("Drain timeout reached, exiting anyway");
    }

    // The flusher commits the remaining counters once it sees the shutdown.
    let _ = flusher.await;

    info!("Shutdown complete");
    Ok(())
}
