use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::models::{BackupId, ObjectKey};
use crate::upload::{FileList, UploadReport};

/// Create a JSON summary of an upload run.
///
/// The summary lists every entry of the backup with its object key, size,
/// checksum and outcome, followed by the run totals. It is meant to be kept
/// next to the backup as a record of what was detached.
///
/// # Example Output
///
/// ```json
/// {
///   "run_id": "550e8400-e29b-41d4-a716-446655440000",
///   "backup_id": "QQUYO0",
///   "bucket": "backups",
///   "started_at": "2024-01-15T14:30:52Z",
///   "finished_at": "2024-01-15T14:31:07Z",
///   "files": [...],
///   "totals": {"uploaded": 3, "failed": 0, ...}
/// }
/// ```
pub fn create_run_summary(
    backup_id: BackupId,
    bucket: &str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    files: &FileList,
    report: &UploadReport,
) -> Result<String> {
    let file_list: Vec<_> = files
        .iter()
        .map(|entry| {
            let record = entry.snapshot();
            let key = entry
                .is_regular()
                .then(|| ObjectKey::new(backup_id, entry.rel_path()).to_string());
            json!({
                "rel_path": record.rel_path,
                "key": key,
                "kind": record.kind,
                "external_dir_num": record.external_dir_num,
                "size": record.size,
                "crc": record.crc,
                "write_size": record.write_size,
                "outcome": record.outcome
            })
        })
        .collect();

    let summary = json!({
        "run_id": Uuid::new_v4().to_string(),
        "backup_id": backup_id.to_string(),
        "backup_start_time": backup_id.start_datetime().map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
        "bucket": bucket,
        "started_at": started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "finished_at": finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "duration_seconds": (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        "tool_version": env!("CARGO_PKG_VERSION"),
        "files": file_list,
        "totals": report,
    });

    serde_json::to_string_pretty(&summary).context("Failed to serialize run summary to JSON")
}

/// Write a summary produced by [`create_run_summary`].
pub fn write_run_summary(path: &Path, summary: &str) -> Result<()> {
    fs::write(path, summary).with_context(|| format!("Failed to write run summary to {}", path.display()))
}
