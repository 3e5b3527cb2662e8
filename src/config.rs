use anyhow::Context;
use chrono_tz::Tz;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the ingestion service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object storage configuration
    pub blob: BlobConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Kiosk pipeline configuration
    #[serde(default)]
    pub kiosk: KioskConfig,
    /// Loader pipeline configuration
    #[serde(default)]
    pub loader: LoaderConfig,
    /// RTC pipeline configuration
    #[serde(default)]
    pub rtc: RtcConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Site timezone for created_on/created_at audit stamps
    #[serde(default = "default_site_timezone")]
    pub site_timezone: String,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// Bucket holding the vendor log uploads
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Kiosk transaction-log pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KioskConfig {
    /// Prefix the kiosk uploads land under
    #[serde(default = "default_kiosk_prefix")]
    pub prefix: String,
    /// Basename token that identifies a transaction log
    #[serde(default = "default_kiosk_file_match")]
    pub file_match: String,
    /// Site prefix in kiosk filenames, ahead of the location token
    #[serde(default = "default_kiosk_site_prefix")]
    pub site_prefix: String,
    /// Prefix zero-yield files are copied under for manual review
    #[serde(default = "default_kiosk_quarantine_prefix")]
    pub quarantine_prefix: String,
}

/// Tunnel loader-log pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Prefix the loader controller uploads land under; files sit in
    /// date-named folders below it
    #[serde(default = "default_loader_prefix")]
    pub prefix: String,
    /// Location code the dependent super/tunnel updates target
    #[serde(default = "default_loader_location")]
    pub location: String,
    /// Source label written to the heartbeat table after each run
    #[serde(default = "default_heartbeat_source")]
    pub heartbeat_source: String,
    /// When set, fully-processed files are copied here before deletion;
    /// when unset they are deleted in place
    pub archive_prefix: Option<String>,
}

/// RTC interface-log pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RtcConfig {
    /// Prefix the RTC uploads land under
    #[serde(default = "default_rtc_prefix")]
    pub source_prefix: String,
    /// Prefix zero-yield files are copied under for manual review
    #[serde(default = "default_rtc_quarantine_prefix")]
    pub quarantine_prefix: String,
    /// Enable the layered permissive pattern cascade instead of the
    /// single strict pattern
    #[serde(default)]
    pub permissive_fallback: bool,
}

// Default value functions
fn default_service_name() -> String {
    "washlog-ingest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_site_timezone() -> String {
    "US/Central".to_string()
}

fn default_region() -> String {
    "us-east-2".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_kiosk_prefix() -> String {
    "kiosks/".to_string()
}

fn default_kiosk_file_match() -> String {
    "Transaction".to_string()
}

fn default_kiosk_site_prefix() -> String {
    "safariexpresswash".to_string()
}

fn default_kiosk_quarantine_prefix() -> String {
    "kiosks/unparsed/".to_string()
}

fn default_loader_prefix() -> String {
    "loader1".to_string()
}

fn default_loader_location() -> String {
    "FRA".to_string()
}

fn default_heartbeat_source() -> String {
    "loader-ingest".to_string()
}

fn default_rtc_prefix() -> String {
    "rtc/".to_string()
}

fn default_rtc_quarantine_prefix() -> String {
    "rtc/unparsed/".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "washlog-ingest")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/washlog").required(false))
            .add_source(config::File::with_name("/etc/washlog/washlog").required(false))
            // Override with environment variables
            // WASHLOG__BLOB__BUCKET -> blob.bucket
            .add_source(
                config::Environment::with_prefix("WASHLOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get database connection timeout as Duration
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout_secs)
    }

    /// Parse the configured site timezone
    pub fn site_timezone(&self) -> anyhow::Result<Tz> {
        Tz::from_str(&self.service.site_timezone).ok().with_context(|| {
            format!("Invalid site timezone: {}", self.service.site_timezone)
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            site_timezone: default_site_timezone(),
        }
    }
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            prefix: default_kiosk_prefix(),
            file_match: default_kiosk_file_match(),
            site_prefix: default_kiosk_site_prefix(),
            quarantine_prefix: default_kiosk_quarantine_prefix(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            prefix: default_loader_prefix(),
            location: default_loader_location(),
            heartbeat_source: default_heartbeat_source(),
            archive_prefix: None,
        }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            source_prefix: default_rtc_prefix(),
            quarantine_prefix: default_rtc_quarantine_prefix(),
            permissive_fallback: false,
        }
    }
}
