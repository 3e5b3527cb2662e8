use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use washlog_ingest::config::Config;
use washlog_ingest::record_store::PgRecordStore;
use washlog_ingest::blob_store::S3BlobStore;
use washlog_ingest::runner;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting washlog ingestion"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Trigger interface: pipeline selector plus an optional object key,
    // supplied by the external webhook/scheduler layer
    let args: Vec<String> = std::env::args().collect();
    let pipeline = args
        .get(1)
        .map(String::as_str)
        .context("Usage: washlog-ingest <kiosk|loader|rtc> [key]")?;
    let key = args.get(2).map(String::as_str);

    let tz = config.site_timezone()?;

    // Initialize components
    let store = PgRecordStore::new(&config.database)
        .await
        .context("Failed to initialize record store")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let blobs = S3BlobStore::new(&config.blob).await;

    match pipeline {
        "kiosk" => {
            let outcome = runner::run_kiosk(&blobs, &store, &config.kiosk, tz, key).await?;
            info!(
                parsed = outcome.rows_parsed,
                upserted = outcome.rows_upserted,
                failed = outcome.rows_failed,
                "Kiosk pipeline finished"
            );
        }
        "loader" => {
            let outcome = runner::run_loader(&blobs, &store, &config.loader, tz).await?;
            info!(
                files = outcome.files_seen,
                inserted = outcome.entries_inserted,
                skipped = outcome.blocks_failed,
                "Loader pipeline finished"
            );
        }
        "rtc" => {
            let key = key.context("The rtc pipeline requires an object key argument")?;
            let outcome = runner::run_rtc(&blobs, &store, &config.rtc, tz, key).await?;
            info!(
                extracted = outcome.events_extracted,
                inserted = outcome.events_inserted,
                quarantined = outcome.quarantined,
                "RTC pipeline finished"
            );
        }
        other => bail!("Unknown pipeline '{other}'; expected kiosk, loader or rtc"),
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}
