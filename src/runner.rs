//! Per-pipeline orchestration: fetch, normalize, reconstruct, persist,
//! then archive or quarantine the source object.
//!
//! Each run is a pure function of (trigger, storage state): no state
//! survives between invocations, so re-triggering a run, even one that
//! overlaps a previous run, only re-applies idempotent writes. Every
//! session, block, and event is its own failure domain; a source file is
//! only deleted or archived once none of its units failed.

use crate::blob_store::{BlobStore, ObjectRef};
use crate::config::{KioskConfig, LoaderConfig, RtcConfig};
use crate::kiosk::{self, WashSessionRow};
use crate::loader::{self, BLOCK_STRIDE};
use crate::normalize::{clean_bytes, NormalizeOptions};
use crate::record_store::RecordStore;
use crate::rtc::{self, Direction};
use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Current date and time at the site
pub fn site_now(tz: Tz) -> (NaiveDate, NaiveTime) {
    let now = Utc::now().with_timezone(&tz);
    (now.date_naive(), now.time())
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Result of one kiosk pipeline run
#[derive(Debug, Default, Clone)]
pub struct KioskOutcome {
    pub rows_parsed: usize,
    pub rows_upserted: usize,
    pub rows_failed: usize,
    pub source_deleted: bool,
    pub quarantined: bool,
}

/// Result of one loader pipeline run
#[derive(Debug, Default, Clone)]
pub struct LoaderOutcome {
    pub files_seen: usize,
    pub blocks_parsed: usize,
    pub blocks_failed: usize,
    pub entries_inserted: usize,
    pub files_archived: usize,
}

/// Result of one RTC pipeline run
#[derive(Debug, Default, Clone)]
pub struct RtcOutcome {
    pub events_extracted: usize,
    pub recv_events: usize,
    pub events_inserted: usize,
    pub stopped_early: bool,
    pub quarantined: bool,
    pub source_deleted: bool,
}

/// Newest object under the prefix whose basename carries the match token.
async fn latest_matching_object(
    blobs: &dyn BlobStore,
    prefix: &str,
    file_match: &str,
) -> Result<Option<ObjectRef>> {
    let objects = blobs.list(prefix).await?;
    Ok(objects
        .into_iter()
        .filter(|obj| basename(&obj.key).contains(file_match))
        .max_by_key(|obj| obj.last_modified))
}

/// Run the kiosk pipeline over one transaction log.
///
/// Without an explicit key the newest matching upload is used. Each
/// reconstructed session upserts independently; the source object is
/// deleted only when every row persisted, and zero-yield files are
/// copied to the quarantine prefix instead.
pub async fn run_kiosk(
    blobs: &dyn BlobStore,
    store: &dyn RecordStore,
    cfg: &KioskConfig,
    tz: Tz,
    key: Option<&str>,
) -> Result<KioskOutcome> {
    let mut outcome = KioskOutcome::default();

    let key = match key {
        Some(k) => k.to_string(),
        None => match latest_matching_object(blobs, &cfg.prefix, &cfg.file_match).await? {
            Some(obj) => obj.key,
            None => {
                info!(prefix = %cfg.prefix, "No transaction files to process");
                return Ok(outcome);
            }
        },
    };

    info!(key = %key, "Processing kiosk transaction log");

    let bytes = blobs.get(&key).await?;
    let text = clean_bytes(&bytes, NormalizeOptions::plain());

    let file_name = basename(&key);
    let location = kiosk::location_from_filename(file_name, &cfg.site_prefix);
    let sessions = kiosk::fold_sessions(text.lines());
    let (created_on, created_at) = site_now(tz);
    let rows = kiosk::build_rows(sessions, &location, file_name, created_on, created_at);

    // Dedup by bill before persistence, last parse wins
    let mut deduped: BTreeMap<i64, WashSessionRow> = BTreeMap::new();
    for row in rows {
        deduped.insert(row.bill, row);
    }
    outcome.rows_parsed = deduped.len();

    if deduped.is_empty() {
        if key.starts_with(&cfg.quarantine_prefix) {
            debug!(key = %key, "Zero-yield file already under quarantine");
        } else {
            let dest = format!("{}{}", cfg.quarantine_prefix, file_name);
            blobs.put(&dest, bytes).await?;
            outcome.quarantined = true;
            metrics::counter!("washlog.kiosk.files_quarantined").increment(1);
            warn!(key = %key, dest = %dest, "Zero-yield kiosk file quarantined");
        }
        return Ok(outcome);
    }

    for row in deduped.values() {
        match store.upsert_wash_session(row).await {
            Ok(()) => {
                outcome.rows_upserted += 1;
                metrics::counter!("washlog.kiosk.rows_upserted").increment(1);
            }
            Err(e) => {
                outcome.rows_failed += 1;
                metrics::counter!("washlog.kiosk.rows_failed").increment(1);
                warn!(bill = row.bill, error = %e, "Failed to upsert wash session");
            }
        }
    }

    if outcome.rows_failed == 0 {
        match blobs.delete(&key).await {
            Ok(()) => outcome.source_deleted = true,
            Err(e) => warn!(key = %key, error = %e, "Failed to delete processed file"),
        }
    } else {
        warn!(
            key = %key,
            failed = outcome.rows_failed,
            "Rows failed; source file left in place for retry"
        );
    }

    info!(
        key = %key,
        parsed = outcome.rows_parsed,
        upserted = outcome.rows_upserted,
        "Kiosk run complete"
    );
    Ok(outcome)
}

/// Run the loader pipeline over today's and yesterday's date folders.
///
/// Each file resumes past the most recently persisted record, walks
/// 4-line blocks, and is archived (or deleted) only when every block in
/// it succeeded. One heartbeat row is written after the run.
pub async fn run_loader(
    blobs: &dyn BlobStore,
    store: &dyn RecordStore,
    cfg: &LoaderConfig,
    tz: Tz,
) -> Result<LoaderOutcome> {
    let mut outcome = LoaderOutcome::default();

    let (today, _) = site_now(tz);
    let yesterday = today - Duration::days(1);

    // Two folders to tolerate midnight-boundary uploads
    let mut keys = Vec::new();
    for day in [today, yesterday] {
        let prefix = format!(
            "{}/{}/",
            cfg.prefix.trim_end_matches('/'),
            day.format("%Y-%m-%d")
        );
        let objects = blobs.list(&prefix).await?;
        keys.extend(
            objects
                .into_iter()
                .filter(|obj| obj.key.to_lowercase().ends_with(".txt"))
                .map(|obj| obj.key),
        );
    }

    if keys.is_empty() {
        info!(prefix = %cfg.prefix, "No loader files found");
        return Ok(outcome);
    }

    for key in keys {
        outcome.files_seen += 1;
        let file_ok = process_loader_file(blobs, store, cfg, &key, &mut outcome).await?;

        if file_ok {
            let disposed = match &cfg.archive_prefix {
                Some(archive_prefix) => {
                    let suffix = key
                        .strip_prefix(cfg.prefix.trim_end_matches('/'))
                        .map(|s| s.trim_start_matches('/'))
                        .unwrap_or(basename(&key));
                    let dest = format!("{}/{}", archive_prefix.trim_end_matches('/'), suffix);
                    blobs.archive(&key, &dest).await
                }
                None => blobs.delete(&key).await,
            };
            match disposed {
                Ok(()) => outcome.files_archived += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to dispose processed file"),
            }
        } else {
            warn!(key = %key, "File had failures; left in place for retry");
        }
    }

    if let Err(e) = store.record_heartbeat(&cfg.heartbeat_source).await {
        warn!(error = %e, "Heartbeat logging failed");
    }

    info!(
        files = outcome.files_seen,
        inserted = outcome.entries_inserted,
        "Loader run complete"
    );
    Ok(outcome)
}

/// Walk one loader file; returns whether every block in it succeeded.
async fn process_loader_file(
    blobs: &dyn BlobStore,
    store: &dyn RecordStore,
    cfg: &LoaderConfig,
    key: &str,
    outcome: &mut LoaderOutcome,
) -> Result<bool> {
    info!(key = %key, "Processing loader file");

    let bytes = blobs.get(key).await?;
    let text = clean_bytes(&bytes, NormalizeOptions::plain());
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    // Tail-seek: start at the block holding the last persisted record,
    // so its dependent updates are re-applied and everything after it is
    // new. A cursor bill absent from this file means the whole file is
    // unseen.
    let start = match store.latest_loader_entry().await? {
        Some(cursor) => {
            let start = loader::resume_start(&lines, cursor.bill).unwrap_or(0);
            debug!(key = %key, bill = cursor.bill, start = start, "Resume point resolved");
            start
        }
        None => 0,
    };

    let mut all_ok = true;
    let mut index = start;
    while index < lines.len() {
        match loader::parse_block(&lines, index) {
            Ok(entry) => {
                outcome.blocks_parsed += 1;

                match store.loader_entry_exists(entry.bill).await {
                    Ok(false) => match store.insert_loader_entry(&entry).await {
                        Ok(()) => {
                            outcome.entries_inserted += 1;
                            metrics::counter!("washlog.loader.entries_inserted").increment(1);
                            info!(bill = entry.bill, "Loader entry inserted");
                        }
                        Err(e) => {
                            all_ok = false;
                            warn!(bill = entry.bill, error = %e, "Failed to insert loader entry");
                        }
                    },
                    Ok(true) => {
                        debug!(bill = entry.bill, "Entry already exists, continuing with updates");
                    }
                    Err(e) => {
                        all_ok = false;
                        warn!(bill = entry.bill, error = %e, "Existence check failed");
                    }
                }

                // Dependent updates always run, even for a previously
                // seen bill: they model a downstream status advance.
                match store
                    .advance_super_to_wash(entry.bill, entry.log_dt, entry.log_time, &cfg.location)
                    .await
                {
                    Ok(n) if n > 0 => debug!(bill = entry.bill, "Super record advanced to Wash"),
                    Ok(_) => {}
                    Err(e) => {
                        all_ok = false;
                        warn!(bill = entry.bill, error = %e, "Super update failed");
                    }
                }
                match store
                    .mark_tunnel_loaded(entry.bill, entry.log_dt, entry.log_time, &cfg.location)
                    .await
                {
                    Ok(n) if n > 0 => debug!(bill = entry.bill, "Tunnel record marked loaded"),
                    Ok(_) => {}
                    Err(e) => {
                        all_ok = false;
                        warn!(bill = entry.bill, error = %e, "Tunnel update failed");
                    }
                }
            }
            Err(e) => {
                outcome.blocks_failed += 1;
                all_ok = false;
                metrics::counter!("washlog.loader.blocks_skipped").increment(1);
                warn!(key = %key, line = index, error = %e, "Skipping invalid loader block");
            }
        }
        index += BLOCK_STRIDE;
    }

    Ok(all_ok)
}

fn quarantine_key(key: &str, source_prefix: &str, quarantine_prefix: &str) -> String {
    match key.strip_prefix(source_prefix) {
        Some(rest) => format!("{quarantine_prefix}{rest}"),
        None => format!("{}{}", quarantine_prefix, basename(key)),
    }
}

/// Run the RTC pipeline over one interface log.
///
/// Only `recv` events persist. Insertion walks events in file order and
/// stops outright after two consecutive already-known wash ids: the
/// file is time-ordered, so recently seen ids imply the rest was already
/// ingested. Zero-yield files are quarantined for manual review.
pub async fn run_rtc(
    blobs: &dyn BlobStore,
    store: &dyn RecordStore,
    cfg: &RtcConfig,
    tz: Tz,
    key: &str,
) -> Result<RtcOutcome> {
    let mut outcome = RtcOutcome::default();

    info!(key = %key, "Processing RTC interface log");

    let bytes = blobs.get(key).await?;
    let text = clean_bytes(&bytes, NormalizeOptions::rtc());

    let events = rtc::extract_events(&text, cfg.permissive_fallback);
    outcome.events_extracted = events.len();

    let recv_events: Vec<_> = events
        .into_iter()
        .filter(|event| event.direction == Direction::Recv)
        .collect();
    outcome.recv_events = recv_events.len();

    if recv_events.is_empty() {
        if key.starts_with(&cfg.quarantine_prefix) {
            debug!(key = %key, "Zero-yield file already under quarantine");
        } else {
            let dest = quarantine_key(key, &cfg.source_prefix, &cfg.quarantine_prefix);
            blobs.put(&dest, bytes).await?;
            outcome.quarantined = true;
            metrics::counter!("washlog.rtc.files_quarantined").increment(1);
            warn!(key = %key, dest = %dest, "Zero-yield RTC file quarantined");
        }
        return Ok(outcome);
    }

    let (created_on, created_at) = site_now(tz);
    let mut consecutive_existing = 0u32;
    for event in &recv_events {
        if store.rtc_event_exists(&event.wash_id).await? {
            consecutive_existing += 1;
            if consecutive_existing >= 2 {
                info!(
                    wash_id = %event.wash_id,
                    "Two consecutive known wash ids; stopping insertion"
                );
                outcome.stopped_early = true;
                break;
            }
            continue;
        }
        consecutive_existing = 0;
        store.insert_rtc_event(event, created_on, created_at).await?;
        outcome.events_inserted += 1;
        metrics::counter!("washlog.rtc.events_inserted").increment(1);
    }

    match blobs.delete(key).await {
        Ok(()) => outcome.source_deleted = true,
        Err(e) => warn!(key = %key, error = %e, "Failed to delete processed file"),
    }

    info!(
        key = %key,
        extracted = outcome.events_extracted,
        inserted = outcome.events_inserted,
        "RTC run complete"
    );
    Ok(outcome)
}
