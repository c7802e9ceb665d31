//! Broadcast Client Application
//!
//! Connects to a broadcast server and plays the stream on the default
//! output device, aligned with the server's wall-clock timeline.

use anyhow::Result;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_broadcast::config::AppConfig;
use lan_audio_broadcast::network::StreamClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = match std::env::args().nth(1) {
        Some(host) => host,
        None => {
            eprintln!("Usage: client <host>");
            std::process::exit(2);
        }
    };

    tracing::info!("Starting broadcast client");

    let config = AppConfig::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut client = StreamClient::new(&host, config);
    client.run(shutdown_rx).await?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
