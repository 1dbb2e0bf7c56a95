use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod app;
mod cache;
mod config;
mod domain;
mod http;
mod ingest;
mod messaging;
mod metrics;
mod service;
mod store;
mod utils;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=order_stream=trace
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_stream=debug")),
        )
        .init();

    tracing::info!("Starting order stream service");

    let config = config::AppConfig::from_env()?;
    tracing::debug!(config = ?config, "Configuration loaded");

    app::run(config).await
}
