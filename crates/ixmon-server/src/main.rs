mod config;
mod http;

use anyhow::{Context, Result};
use ixmon_client::{DeviceClient, RestDeviceClient};
use ixmon_common::types::Category;
use ixmon_poller::{FleetPoller, PollerMetrics, Scheduler};
use ixmon_sink::{GaugeSink, InfluxSink, SinkWriter, SqliteSink};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ixmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/ixmon.toml".to_string());
    let mut config = config::Config::load(&config_path)
        .with_context(|| format!("loading config from '{config_path}'"))?;
    config.validate()?;

    tracing::info!(
        devices = config.devices.len(),
        ports_interval_secs = config.poller.ports_interval_secs,
        slow_interval_secs = config.poller.slow_interval_secs,
        "ixmon-server starting"
    );

    let fetch_timeout = Duration::from_secs(config.poller.fetch_timeout_secs);
    let client: Arc<dyn DeviceClient> = Arc::new(RestDeviceClient::new(fetch_timeout)?);

    let registry = Registry::new();
    let metrics = Arc::new(PollerMetrics::register(&registry)?);

    let mut sinks: Vec<Arc<dyn SinkWriter>> = Vec::new();
    if config.influx.enabled {
        let influx = InfluxSink::new(
            &config.influx.url,
            &config.influx.token,
            &config.influx.org,
            &config.influx.bucket,
            Duration::from_secs(config.influx.timeout_secs),
        )?;
        // Fail startup on an unreachable database rather than dropping
        // every batch silently.
        influx
            .probe()
            .await
            .with_context(|| format!("influxdb at '{}' is unreachable", config.influx.url))?;
        tracing::info!(url = %config.influx.url, bucket = %config.influx.bucket, "InfluxDB sink ready");
        sinks.push(Arc::new(influx));
    }
    if config.sqlite.enabled {
        let sqlite = SqliteSink::new(std::path::Path::new(&config.sqlite.path))
            .with_context(|| format!("opening sqlite sink at '{}'", config.sqlite.path))?;
        tracing::info!(path = %config.sqlite.path, "SQLite sink ready");
        sinks.push(Arc::new(sqlite));
    }
    if config.metrics.enabled {
        sinks.push(Arc::new(GaugeSink::register(&registry)?));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut scheduler_handles = Vec::new();
    for (category, period_secs) in [
        (Category::Ports, config.poller.ports_interval_secs),
        (Category::Sensors, config.poller.slow_interval_secs),
        (Category::Performance, config.poller.slow_interval_secs),
    ] {
        let poller = FleetPoller::new(
            category,
            config.devices.clone(),
            Arc::clone(&client),
            fetch_timeout,
        );
        let scheduler = Scheduler::new(
            poller,
            sinks.clone(),
            Duration::from_secs(period_secs),
            Arc::clone(&metrics),
        );
        scheduler_handles.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    }

    let http_handle = if config.metrics.enabled {
        let listener = tokio::net::TcpListener::bind(&config.metrics.listen)
            .await
            .with_context(|| format!("binding metrics listener on '{}'", config.metrics.listen))?;
        tracing::info!(listen = %config.metrics.listen, "Serving /metrics and /healthz");
        let app = http::router(registry.clone());
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "Metrics server error");
            }
        }))
    } else {
        None
    };

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    let _ = shutdown_tx.send(true);

    // Schedulers observe the signal between cycles, so each finishes its
    // in-flight cycle before exiting.
    for handle in scheduler_handles {
        let _ = handle.await;
    }
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }
    tracing::info!("Server stopped");

    Ok(())
}
