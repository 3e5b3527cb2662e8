//! Relational persistence for the reconstructed records.
//!
//! Every write is keyed by a record's natural key (`bill`, `wash_id`) so
//! re-runs are idempotent: wash sessions upsert with latest-write-wins,
//! loader entries insert only when absent, RTC events are screened by an
//! existence check. Each statement group commits independently; a
//! record's insert and its dependent updates are deliberately separate
//! failure domains.

use crate::config::DatabaseConfig;
use crate::kiosk::WashSessionRow;
use crate::loader::{LoaderCursor, LoaderEntry};
use crate::rtc::RtcEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Store capability shared by the three pipelines
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert one wash session by `bill`; on conflict the latest write wins
    async fn upsert_wash_session(&self, row: &WashSessionRow) -> Result<()>;

    /// The most recently persisted loader record, by date then time
    async fn latest_loader_entry(&self) -> Result<Option<LoaderCursor>>;

    /// Whether a loader record with this bill already exists
    async fn loader_entry_exists(&self, bill: i64) -> Result<bool>;

    /// Insert a loader record; caller checks existence first
    async fn insert_loader_entry(&self, entry: &LoaderEntry) -> Result<()>;

    /// Advance the matching super record to the Wash stage unless it is
    /// already at or beyond it; returns affected rows
    async fn advance_super_to_wash(
        &self,
        bill: i64,
        log_dt: NaiveDate,
        log_time: NaiveTime,
        location: &str,
    ) -> Result<u64>;

    /// Set the load flag and load time on the matching tunnel record,
    /// unconditionally; returns affected rows
    async fn mark_tunnel_loaded(
        &self,
        bill: i64,
        log_dt: NaiveDate,
        log_time: NaiveTime,
        location: &str,
    ) -> Result<u64>;

    /// Whether any RTC row with this wash id already exists
    async fn rtc_event_exists(&self, wash_id: &str) -> Result<bool>;

    /// Append one RTC event row
    async fn insert_rtc_event(
        &self,
        event: &RtcEvent,
        created_on: NaiveDate,
        created_at: NaiveTime,
    ) -> Result<()>;

    /// Append one heartbeat row for liveness monitoring
    async fn record_heartbeat(&self, source: &str) -> Result<()>;
}

/// PostgreSQL-backed record store
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, row), fields(bill = row.bill))]
    async fn upsert_wash_session(&self, row: &WashSessionRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO washify (
                bill, wash_ts_first, wash_ts_last, license_plate, customer_name,
                wash_package_id, wash_package_name, wash_type, payment_type, image_path,
                is_unlimited, unlimited_type, addons, tip_amount,
                discount_code, discount_amount, tax, total,
                location, source_file, created_on, created_at, invoice_kind
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10,
                $11, $12, $13, $14,
                $15, $16, $17, $18,
                $19, $20, $21, $22, $23
            )
            ON CONFLICT (bill) DO UPDATE SET
                wash_ts_first     = EXCLUDED.wash_ts_first,
                wash_ts_last      = EXCLUDED.wash_ts_last,
                license_plate     = EXCLUDED.license_plate,
                customer_name     = EXCLUDED.customer_name,
                wash_package_id   = EXCLUDED.wash_package_id,
                wash_package_name = EXCLUDED.wash_package_name,
                wash_type         = EXCLUDED.wash_type,
                payment_type      = EXCLUDED.payment_type,
                image_path        = EXCLUDED.image_path,
                is_unlimited      = EXCLUDED.is_unlimited,
                unlimited_type    = EXCLUDED.unlimited_type,
                addons            = EXCLUDED.addons,
                tip_amount        = EXCLUDED.tip_amount,
                discount_code     = EXCLUDED.discount_code,
                discount_amount   = EXCLUDED.discount_amount,
                tax               = EXCLUDED.tax,
                total             = EXCLUDED.total,
                location          = EXCLUDED.location,
                source_file       = EXCLUDED.source_file,
                created_on        = EXCLUDED.created_on,
                created_at        = EXCLUDED.created_at,
                invoice_kind      = EXCLUDED.invoice_kind
            "#,
        )
        .bind(row.bill)
        .bind(row.wash_ts_first)
        .bind(row.wash_ts_last)
        .bind(row.license_plate.as_deref())
        .bind(row.customer_name.as_deref())
        .bind(row.wash_package_id)
        .bind(row.wash_package_name.as_deref())
        .bind(row.wash_type.map(|t| t.as_str()))
        .bind(row.payment_type.as_deref())
        .bind(row.image_path.as_deref())
        .bind(row.is_unlimited)
        .bind(row.unlimited_type.map(|t| t.as_str()))
        .bind(row.addons.as_deref())
        .bind(row.tip_amount)
        .bind(row.discount_code.as_deref())
        .bind(row.discount_amount)
        .bind(row.tax)
        .bind(row.total)
        .bind(&row.location)
        .bind(&row.source_file)
        .bind(row.created_on)
        .bind(row.created_at)
        .bind(row.invoice_kind.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to upsert wash session")?;

        debug!(bill = row.bill, "Wash session upserted");
        Ok(())
    }

    async fn latest_loader_entry(&self) -> Result<Option<LoaderCursor>> {
        let row = sqlx::query(
            r#"
            SELECT bill, log_dt, log_time
            FROM loader_log
            ORDER BY log_dt DESC, log_time DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query latest loader entry")?;

        Ok(row.map(|r| LoaderCursor {
            bill: r.get("bill"),
            log_dt: r.get("log_dt"),
            log_time: r.get("log_time"),
        }))
    }

    async fn loader_entry_exists(&self, bill: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM loader_log WHERE bill = $1")
            .bind(bill)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check loader entry existence")?;

        Ok(row.is_some())
    }

    #[instrument(skip(self, entry), fields(bill = entry.bill))]
    async fn insert_loader_entry(&self, entry: &LoaderEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loader_log (bill, washify_rec, log_dt, log_time)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.bill)
        .bind(entry.washify_rec)
        .bind(entry.log_dt)
        .bind(entry.log_time)
        .execute(&self.pool)
        .await
        .context("Failed to insert loader entry")?;

        debug!(bill = entry.bill, "Loader entry inserted");
        Ok(())
    }

    async fn advance_super_to_wash(
        &self,
        bill: i64,
        log_dt: NaiveDate,
        log_time: NaiveTime,
        location: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE super
               SET status = 3,
                   prep_end = $1,
                   status_desc = 'Wash'
             WHERE bill = $2
               AND created_on = $3
               AND location = $4
               AND (status IS NULL OR status < 3)
            "#,
        )
        .bind(log_time)
        .bind(bill)
        .bind(log_dt)
        .bind(location)
        .execute(&self.pool)
        .await
        .context("Failed to advance super record")?;

        Ok(result.rows_affected())
    }

    async fn mark_tunnel_loaded(
        &self,
        bill: i64,
        log_dt: NaiveDate,
        log_time: NaiveTime,
        location: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tunnel
               SET load = TRUE,
                   load_time = $1
             WHERE bill = $2
               AND created_on = $3
               AND location = $4
            "#,
        )
        .bind(log_time)
        .bind(bill)
        .bind(log_dt)
        .bind(location)
        .execute(&self.pool)
        .await
        .context("Failed to mark tunnel record loaded")?;

        Ok(result.rows_affected())
    }

    async fn rtc_event_exists(&self, wash_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM rtc_log WHERE wash_id = $1 LIMIT 1")
            .bind(wash_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check RTC event existence")?;

        Ok(row.is_some())
    }

    #[instrument(skip(self, event), fields(wash_id = %event.wash_id))]
    async fn insert_rtc_event(
        &self,
        event: &RtcEvent,
        created_on: NaiveDate,
        created_at: NaiveTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rtc_log (
                wash_id, washpkgnum, wash_ts, source_ip, direction,
                raw_xml, created_on, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&event.wash_id)
        .bind(event.washpkgnum)
        .bind(event.wash_ts)
        .bind(&event.source_ip)
        .bind(event.direction.as_str())
        .bind(&event.raw_payload)
        .bind(created_on)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert RTC event")?;

        debug!(wash_id = %event.wash_id, "RTC event inserted");
        Ok(())
    }

    async fn record_heartbeat(&self, source: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeat (source, created_on, created_at)
            VALUES ($1, CURRENT_DATE, CURRENT_TIME)
            "#,
        )
        .bind(source)
        .execute(&self.pool)
        .await
        .context("Failed to record heartbeat")?;

        Ok(())
    }
}
