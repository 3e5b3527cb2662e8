//! Washlog ingestion - vendor log reconstruction for car-wash site analytics
//!
//! Three on-site hardware vendors upload semi-structured event logs to
//! object storage; this library reconstructs normalized domain records
//! from them and persists the records idempotently into PostgreSQL:
//!
//! - Kiosk transaction logs fold into wash-transaction sessions
//! - Tunnel loader logs parse as fixed four-line load-event blocks
//! - RTC (Laguna) interface logs yield discrete wash-cycle events
//!
//! All three pipelines share one resilience contract: tolerate malformed
//! input, never duplicate a record, resume where the last run stopped,
//! and keep single-record failures from poisoning the rest of a batch.
//!
//! # Example
//!
//! ```rust,no_run
//! use washlog_ingest::{Config, PgRecordStore, S3BlobStore, runner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = PgRecordStore::new(&config.database).await?;
//!     let blobs = S3BlobStore::new(&config.blob).await;
//!
//!     let tz = config.site_timezone()?;
//!     runner::run_loader(&blobs, &store, &config.loader, tz).await?;
//!     Ok(())
//! }
//! ```

pub mod blob_store;
pub mod config;
pub mod kiosk;
pub mod loader;
pub mod normalize;
pub mod record_store;
pub mod rtc;
pub mod runner;

// Re-export main types
pub use blob_store::{BlobError, BlobStore, ObjectRef, S3BlobStore};
pub use config::{
    BlobConfig, Config, DatabaseConfig, KioskConfig, LoaderConfig, RtcConfig, ServiceConfig,
};
pub use kiosk::{InvoiceKind, UnlimitedType, WashSessionRow, WashType};
pub use loader::{LoaderCursor, LoaderEntry};
pub use record_store::{PgRecordStore, RecordStore};
pub use rtc::{Direction, RtcEvent};
pub use runner::{KioskOutcome, LoaderOutcome, RtcOutcome};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::blob_store::{BlobStore, S3BlobStore};
    pub use crate::config::Config;
    pub use crate::record_store::{PgRecordStore, RecordStore};
    pub use crate::runner::{run_kiosk, run_loader, run_rtc};
}
