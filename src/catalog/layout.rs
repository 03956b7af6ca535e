use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::constants::{DATABASE_DIR, EXTERNAL_DIR, EXTERNAL_DIR_PREFIX};
use crate::error::DetachError;
use crate::models::BackupFileEntry;

/// Where the local bytes of a backup's entries live.
///
/// Entries with external-directory index 0 resolve against `database_dir`;
/// index N resolves against the N-th external directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    database_dir: PathBuf,
    external_dirs: BTreeMap<u32, PathBuf>,
}

impl SourceLayout {
    pub fn new(database_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_dir: database_dir.into(),
            external_dirs: BTreeMap::new(),
        }
    }

    pub fn with_external_dir(mut self, index: u32, dir: impl Into<PathBuf>) -> Self {
        self.external_dirs.insert(index, dir.into());
        self
    }

    /// Standard backup layout: `<backup>/database` plus every
    /// `<backup>/external_directories/externaldir<N>` that exists.
    pub fn for_backup(backup_dir: &Path) -> Result<Self, DetachError> {
        let mut layout = Self::new(backup_dir.join(DATABASE_DIR));

        let external_root = backup_dir.join(EXTERNAL_DIR);
        let listing = match fs::read_dir(&external_root) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(layout),
            Err(e) => return Err(DetachError::local_io(external_root, e)),
        };

        for dir_entry in listing {
            let dir_entry = dir_entry.map_err(|e| DetachError::local_io(&external_root, e))?;
            let name = dir_entry.file_name();
            let index = name
                .to_str()
                .and_then(|n| n.strip_prefix(EXTERNAL_DIR_PREFIX))
                .and_then(|n| n.parse::<u32>().ok());
            match index {
                Some(index) if index > 0 => {
                    debug!("External directory {} at {}", index, dir_entry.path().display());
                    layout.external_dirs.insert(index, dir_entry.path());
                }
                _ => debug!("Ignoring {} in {}", name.to_string_lossy(), external_root.display()),
            }
        }

        Ok(layout)
    }

    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    pub fn external_dir(&self, index: u32) -> Option<&Path> {
        self.external_dirs.get(&index).map(PathBuf::as_path)
    }

    /// External directories by index, in ascending order.
    pub fn external_dirs(&self) -> impl Iterator<Item = (u32, &Path)> {
        self.external_dirs.iter().map(|(index, dir)| (*index, dir.as_path()))
    }

    /// Root directory an entry's relative path is joined to.
    pub fn source_root(&self, external_dir_num: u32) -> Option<&Path> {
        if external_dir_num == 0 {
            Some(&self.database_dir)
        } else {
            self.external_dir(external_dir_num)
        }
    }

    /// Full local path of an entry.
    pub fn resolve(&self, entry: &BackupFileEntry) -> Result<PathBuf, DetachError> {
        let rel_path = entry.rel_path().trim_start_matches('/');
        match self.source_root(entry.external_dir_num()) {
            Some(root) => Ok(root.join(rel_path)),
            None => Err(DetachError::local_io(
                rel_path,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("external directory {} is not available", entry.external_dir_num()),
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_temp_dir;

    #[test]
    fn test_resolve_database_entry() {
        let layout = SourceLayout::new("/backups/QQUYO0/database");
        let entry = BackupFileEntry::regular("base/1/1259", 8192);
        assert_eq!(
            layout.resolve(&entry).unwrap(),
            PathBuf::from("/backups/QQUYO0/database/base/1/1259")
        );
    }

    #[test]
    fn test_resolve_external_entry() {
        let layout = SourceLayout::new("/db").with_external_dir(2, "/ext/two");
        let entry = BackupFileEntry::regular("conf/app.conf", 10).with_external_dir(2);
        assert_eq!(layout.resolve(&entry).unwrap(), PathBuf::from("/ext/two/conf/app.conf"));
    }

    #[test]
    fn test_missing_external_dir_is_local_io() {
        let layout = SourceLayout::new("/db");
        let entry = BackupFileEntry::regular("x", 1).with_external_dir(3);
        let err = layout.resolve(&entry).unwrap_err();
        assert!(matches!(err, DetachError::LocalIo { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_for_backup_discovers_external_dirs() {
        let backup = create_temp_dir().unwrap();
        fs::create_dir_all(backup.path().join("database")).unwrap();
        fs::create_dir_all(backup.path().join("external_directories/externaldir1")).unwrap();
        fs::create_dir_all(backup.path().join("external_directories/externaldir3")).unwrap();
        fs::create_dir_all(backup.path().join("external_directories/stray")).unwrap();

        let layout = SourceLayout::for_backup(backup.path()).unwrap();
        assert_eq!(layout.database_dir(), backup.path().join("database"));
        let indexes: Vec<u32> = layout.external_dirs().map(|(i, _)| i).collect();
        assert_eq!(indexes, vec![1, 3]);
        assert!(layout.external_dir(2).is_none());
    }

    #[test]
    fn test_for_backup_without_external_dirs() {
        let backup = create_temp_dir().unwrap();
        let layout = SourceLayout::for_backup(backup.path()).unwrap();
        assert_eq!(layout.external_dirs().count(), 0);
    }
}
