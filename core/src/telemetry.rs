use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        describe_metrics();

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    Ok(())
}

fn describe_metrics() {
    describe_counter!("ingest_pages_fetched_total", "Catalog pages retrieved from the source API");
    describe_counter!("ingest_records_fetched_total", "Raw instrument records accumulated");
    describe_counter!("ingest_runs_total", "Ingestion runs by outcome");
    describe_counter!("sink_rows_written_total", "Rows persisted per sink");
    describe_histogram!(
        "ingest_run_duration_seconds",
        Unit::Seconds,
        "Wall-clock duration of one ingestion run"
    );
}

pub fn shutdown() {
    tracing::info!("Shutting down telemetry");
}
