use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::http::{build_server, AppState};
use crate::ingest::{IngestPipeline, PipelineConfig};
use crate::messaging::{DeadLetterSink, KafkaDeadLetterSink, KafkaOrderSource, MessageSource};
use crate::metrics::Metrics;
use crate::service::OrderService;
use crate::store::{OrderRepository, PostgresOrderRepository};
use crate::utils::RetryConfig;

const WARMUP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Application Lifecycle
// ============================================================================
//
// Startup:  store -> cache -> warm-up -> Kafka clients -> pipeline + HTTP
// Shutdown: cancel pipeline (in-flight message completes) -> stop HTTP ->
//           close source, sink, store -> stop cache sweeper
//
// ============================================================================

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);

    // === 1. Durable store ===
    info!(
        host = %config.database.host,
        database = %config.database.name,
        "Connecting to PostgreSQL"
    );
    let repo = Arc::new(
        PostgresOrderRepository::connect(
            config.database.connect_options()?,
            config.database.max_connections,
        )
        .await
        .context("failed to connect to PostgreSQL")?,
    );

    // === 2. Cache and cache warm-up ===
    let cache = Arc::new(TtlCache::new(config.cache_ttl));
    let service = Arc::new(
        OrderService::new(cache.clone(), repo.clone()).with_metrics(metrics.clone()),
    );

    let warmed = tokio::time::timeout(WARMUP_TIMEOUT, service.warm_cache())
        .await
        .context("cache warm-up timed out")?
        .context("cache warm-up failed")?;
    metrics.set_cache_entries(warmed);

    // === 3. Kafka source and dead-letter sink ===
    let source = Arc::new(
        KafkaOrderSource::new(
            &config.kafka.brokers,
            &config.kafka.group_id,
            &config.kafka.topic,
        )
        .context("failed to create order consumer")?,
    );
    let sink = Arc::new(
        KafkaDeadLetterSink::new(&config.kafka.brokers, &config.kafka.dead_letter_topic)
            .context("failed to create dead letter producer")?
            .with_metrics(metrics.clone()),
    );

    // === 4. Ingestion pipeline ===
    let pipeline = IngestPipeline::new(
        source.clone(),
        sink.clone(),
        service.clone(),
        PipelineConfig {
            message_timeout: config.message_timeout,
            commit_dead_lettered: config.commit_dead_lettered,
            persist_retry: RetryConfig::persist(),
        },
    )
    .with_metrics(metrics.clone());

    let shutdown = CancellationToken::new();
    let mut ingest = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { pipeline.run(shutdown).await }
    });

    // === 5. HTTP ===
    let server = build_server(
        AppState::new(service.clone(), metrics.clone()),
        &config.http_addr,
        config.shutdown_timeout,
    )
    .with_context(|| format!("failed to bind HTTP server on {}", config.http_addr))?;
    let server_handle = server.handle();
    let mut http = actix_web::rt::spawn(server);

    info!(
        http_addr = %config.http_addr,
        topic = %config.kafka.topic,
        cached_orders = warmed,
        "Order service running"
    );

    // === 6. Wait for a signal or an HTTP failure ===
    let http_exited = tokio::select! {
        _ = wait_for_signal() => {
            info!("Shutdown signal received");
            false
        }
        result = &mut http => {
            match result {
                Ok(Ok(())) => warn!("HTTP server stopped"),
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
            true
        }
    };

    // === 7. Graceful shutdown ===
    shutdown.cancel();
    match tokio::time::timeout(config.shutdown_timeout, &mut ingest).await {
        Ok(Ok(stats)) => info!(
            persisted = stats.persisted,
            dead_lettered = stats.dead_lettered,
            "Ingestion stopped"
        ),
        Ok(Err(e)) => error!(error = %e, "Ingestion task failed"),
        Err(_) => {
            warn!("Ingestion did not stop in time, aborting");
            ingest.abort();
        }
    }

    server_handle.stop(true).await;
    if !http_exited {
        if let Err(e) = http.await {
            error!(error = %e, "HTTP server task failed during shutdown");
        }
    }

    if let Err(e) = source.close().await {
        warn!(error = %e, "Failed to close order consumer");
    }
    if let Err(e) = sink.close().await {
        warn!(error = %e, "Failed to flush dead letter producer");
    }
    if let Err(e) = repo.close().await {
        warn!(error = %e, "Failed to close PostgreSQL pool");
    }
    cache.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
