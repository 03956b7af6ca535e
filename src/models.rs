use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use crate::error::DetachError;

const BASE36_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Backup identifier: the backup's start time, rendered in upper-case base 36.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackupId(u64);

impl BackupId {
    pub const fn from_timestamp(start_time: u64) -> Self {
        BackupId(start_time)
    }

    pub fn start_time(&self) -> u64 {
        self.0
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(i64::try_from(self.0).ok()?, 0).single()
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0");
        }
        let mut digits = Vec::with_capacity(13);
        let mut value = self.0;
        while value > 0 {
            digits.push(BASE36_DIGITS[(value % 36) as usize] as char);
            value /= 36;
        }
        let encoded: String = digits.iter().rev().collect();
        f.write_str(&encoded)
    }
}

impl FromStr for BackupId {
    type Err = DetachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DetachError::Catalog(format!("invalid backup id '{}'", s)));
        }
        u64::from_str_radix(trimmed, 36)
            .map(BackupId)
            .map_err(|e| DetachError::Catalog(format!("invalid backup id '{}': {}", s, e)))
    }
}

/// Remote key of an uploaded file: `<backup-id>/<relative-path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(backup_id: BackupId, rel_path: &str) -> Self {
        let normalized = rel_path.replace('\\', "/");
        ObjectKey(format!("{}/{}", backup_id, normalized.trim_start_matches('/')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl FileKind {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileKind::Regular,
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }
}

/// Upload outcome of a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Pending = 0,
    Uploaded = 1,
    Failed = 2,
    Skipped = 3,
}

impl FileOutcome {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => FileOutcome::Uploaded,
            2 => FileOutcome::Failed,
            3 => FileOutcome::Skipped,
            _ => FileOutcome::Pending,
        }
    }
}

/// One file of a backup, as listed by the catalog.
///
/// Everything except the atomics is fixed when the list is built. The claim
/// flag guarantees that the checksum, byte counters and outcome are only ever
/// written by the single worker that claimed the entry.
#[derive(Debug)]
pub struct BackupFileEntry {
    rel_path: String,
    mode: u32,
    external_dir_num: u32,
    size: AtomicU64,
    crc: AtomicU32,
    write_size: AtomicU64,
    outcome: AtomicU8,
    claimed: AtomicBool,
}

impl BackupFileEntry {
    /// A `size` of `None` (or zero) means "not recorded"; it is resolved with
    /// `stat` right before the upload.
    pub fn new(rel_path: impl Into<String>, size: Option<u64>, mode: u32, external_dir_num: u32) -> Self {
        Self {
            rel_path: rel_path.into(),
            mode,
            external_dir_num,
            size: AtomicU64::new(size.unwrap_or(0)),
            crc: AtomicU32::new(0),
            write_size: AtomicU64::new(0),
            outcome: AtomicU8::new(FileOutcome::Pending as u8),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn regular(rel_path: impl Into<String>, size: u64) -> Self {
        Self::new(rel_path, Some(size), S_IFREG | 0o600, 0)
    }

    pub fn directory(rel_path: impl Into<String>) -> Self {
        Self::new(rel_path, None, S_IFDIR | 0o700, 0)
    }

    pub fn symlink(rel_path: impl Into<String>) -> Self {
        Self::new(rel_path, None, S_IFLNK | 0o777, 0)
    }

    pub fn with_external_dir(mut self, external_dir_num: u32) -> Self {
        self.external_dir_num = external_dir_num;
        self
    }

    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_regular(&self) -> bool {
        self.kind() == FileKind::Regular
    }

    pub fn external_dir_num(&self) -> u32 {
        self.external_dir_num
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn has_recorded_size(&self) -> bool {
        self.size() != 0
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::SeqCst);
    }

    pub fn crc(&self) -> u32 {
        self.crc.load(Ordering::SeqCst)
    }

    pub(crate) fn set_crc(&self, crc: u32) {
        self.crc.store(crc, Ordering::SeqCst);
    }

    /// Bytes handed to the store for this file, across all attempts.
    pub fn write_size(&self) -> u64 {
        self.write_size.load(Ordering::SeqCst)
    }

    pub(crate) fn add_write_size(&self, bytes: u64) {
        self.write_size.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn outcome(&self) -> FileOutcome {
        FileOutcome::from_u8(self.outcome.load(Ordering::SeqCst))
    }

    pub(crate) fn set_outcome(&self, outcome: FileOutcome) {
        self.outcome.store(outcome as u8, Ordering::SeqCst);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Atomic test-and-set of the claim flag. Only one caller ever wins.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn reset_claim(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> FileRecord {
        FileRecord {
            rel_path: self.rel_path.clone(),
            kind: self.kind(),
            external_dir_num: self.external_dir_num,
            size: self.size(),
            crc: format!("{:08X}", self.crc()),
            write_size: self.write_size(),
            outcome: self.outcome(),
        }
    }
}

/// Plain copy of an entry's state for reports.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub rel_path: String,
    pub kind: FileKind,
    pub external_dir_num: u32,
    pub size: u64,
    pub crc: String,
    pub write_size: u64,
    pub outcome: FileOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_id_base36() {
        assert_eq!(BackupId::from_timestamp(0).to_string(), "0");
        assert_eq!(BackupId::from_timestamp(35).to_string(), "Z");
        assert_eq!(BackupId::from_timestamp(36).to_string(), "10");
        // 2021-04-01T00:00:00Z
        assert_eq!(BackupId::from_timestamp(1_617_235_200).to_string(), "QQUYO0");
    }

    #[test]
    fn test_backup_id_parse() {
        let id: BackupId = "QQUYO0".parse().unwrap();
        assert_eq!(id.start_time(), 1_617_235_200);
        let lower: BackupId = "qquyo0".parse().unwrap();
        assert_eq!(lower, id);
        assert!("".parse::<BackupId>().is_err());
        assert!("QQ-YO0".parse::<BackupId>().is_err());
    }

    #[test]
    fn test_backup_id_datetime() {
        let id = BackupId::from_timestamp(1_617_235_200);
        let dt = id.start_datetime().unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-04-01T00:00:00+00:00");
    }

    #[test]
    fn test_object_key_derivation() {
        let id = BackupId::from_timestamp(1_617_235_200);
        let key = ObjectKey::new(id, "base/1/1259");
        assert_eq!(key.as_str(), "QQUYO0/base/1/1259");
        assert_eq!(ObjectKey::new(id, "base/1/1259"), key);
        assert_eq!(ObjectKey::new(id, "/global\\pg_control").as_str(), "QQUYO0/global/pg_control");
    }

    #[test]
    fn test_file_kind_from_mode() {
        assert_eq!(FileKind::from_mode(0o100644), FileKind::Regular);
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::Symlink);
        assert_eq!(FileKind::from_mode(0o020644), FileKind::Other);
    }

    #[test]
    fn test_claim_is_single_winner() {
        let entry = BackupFileEntry::regular("a", 1);
        assert!(!entry.is_claimed());
        assert!(entry.try_claim());
        assert!(!entry.try_claim());
        assert!(entry.is_claimed());
        entry.reset_claim();
        assert!(entry.try_claim());
    }

    #[test]
    fn test_unrecorded_size() {
        let entry = BackupFileEntry::new("a", None, 0o100600, 0);
        assert!(!entry.has_recorded_size());
        entry.set_size(42);
        assert!(entry.has_recorded_size());
        assert_eq!(entry.size(), 42);
    }

    #[test]
    fn test_snapshot() {
        let entry = BackupFileEntry::regular("base/1/2", 10).with_external_dir(2);
        entry.set_crc(0xDEADBEEF);
        entry.add_write_size(10);
        entry.set_outcome(FileOutcome::Uploaded);
        let record = entry.snapshot();
        assert_eq!(record.crc, "DEADBEEF");
        assert_eq!(record.external_dir_num, 2);
        assert_eq!(record.write_size, 10);
        assert_eq!(record.outcome, FileOutcome::Uploaded);
        assert_eq!(record.kind, FileKind::Regular);
    }
}
