//! Freight server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use freight_core::config::AppConfig;
use freight_server::{Hooks, NotificationStreams, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Freight - a resumable file upload server
#[derive(Parser, Debug)]
#[command(name = "freightd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "FREIGHT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Attach logging consumers to the enabled notification channels so that
/// emission never stalls on a missing receiver.
fn drain_notifications(streams: NotificationStreams) {
    let drains = [
        ("created", streams.created_uploads),
        ("progress", streams.upload_progress),
        ("complete", streams.complete_uploads),
        ("terminated", streams.terminated_uploads),
    ];

    for (kind, receiver) in drains {
        let Some(mut receiver) = receiver else {
            continue;
        };
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                tracing::info!(
                    kind,
                    id = %event.upload.id,
                    offset = event.upload.offset,
                    "upload event"
                );
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,tower_http=warn")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config: AppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("FREIGHT_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    freight_server::metrics::register_metrics();

    let (state, streams) = freight_server::bootstrap::build_state(config, Hooks::default(), None)
        .await
        .context("failed to initialize storage")?;
    drain_notifications(streams);

    let addr: SocketAddr = state
        .config
        .server
        .bind
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        base_path = %state.config.server.base_path,
        extensions = %state.composer.supported_extensions(),
        "freight server listening"
    );

    let shutdown = state.shutdown.clone();
    let router = create_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining requests");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
