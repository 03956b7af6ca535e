//! Loader for `backup_content.control`.
//!
//! The catalog stores one JSON object per line. Numeric fields are written as
//! strings, e.g.
//! `{"path":"base/1/1259", "size":"8192", "mode":"33184", "external_dir_num":"0"}`.
//! Fields other than path, size, mode and external directory are ignored.

use std::fs;
use std::path::Path;

use log::info;
use serde_json::Value;

use crate::constants::BACKUP_CONTENT_FILE;
use crate::error::DetachError;
use crate::models::BackupFileEntry;

/// Load the file list recorded for the backup in `backup_dir`.
pub fn load_file_list(backup_dir: &Path) -> Result<Vec<BackupFileEntry>, DetachError> {
    let path = backup_dir.join(BACKUP_CONTENT_FILE);
    let content = fs::read_to_string(&path)
        .map_err(|e| DetachError::Catalog(format!("Failed to read {}: {}", path.display(), e)))?;

    let entries = parse_control_file(&content)
        .map_err(|e| DetachError::Catalog(format!("{}: {}", path.display(), e)))?;

    info!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Parse the whole control file; errors name the offending line.
pub fn parse_control_file(content: &str) -> Result<Vec<BackupFileEntry>, String> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| parse_control_line(line).map_err(|e| format!("line {}: {}", index + 1, e)))
        .collect()
}

pub fn parse_control_line(line: &str) -> Result<BackupFileEntry, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;

    let rel_path = match value.get("path") {
        Some(Value::String(path)) if !path.is_empty() => path.clone(),
        _ => return Err("missing \"path\"".to_string()),
    };
    let mode = numeric_field(&value, "mode")?
        .ok_or_else(|| "missing \"mode\"".to_string())
        .and_then(|mode| u32::try_from(mode).map_err(|_| format!("mode {} out of range", mode)))?;
    let size = numeric_field(&value, "size")?;
    let external_dir_num = match numeric_field(&value, "external_dir_num")? {
        Some(n) => u32::try_from(n).map_err(|_| format!("external_dir_num {} out of range", n))?,
        None => 0,
    };

    Ok(BackupFileEntry::new(rel_path, size, mode, external_dir_num))
}

/// Read a number that may be encoded either as a JSON number or a string.
/// Negative values (the catalog's "unknown") read as absent.
fn numeric_field(value: &Value, name: &str) -> Result<Option<u64>, String> {
    match value.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => Ok(Some(n)),
            None if n.as_i64().is_some() => Ok(None),
            None => Err(format!("invalid \"{}\": {}", name, n)),
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.starts_with('-') && s[1..].parse::<u64>().is_ok() {
                return Ok(None);
            }
            s.parse::<u64>()
                .map(Some)
                .map_err(|_| format!("invalid \"{}\": {:?}", name, s))
        }
        Some(other) => Err(format!("invalid \"{}\": {}", name, other)),
    }
}
