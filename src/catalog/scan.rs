use std::path::Path;

use log::{debug, warn};
use walkdir::WalkDir;

use crate::catalog::layout::SourceLayout;
use crate::error::DetachError;
use crate::models::BackupFileEntry;

/// Build a file list by walking the backup's directories.
///
/// Used when the backup has no catalog file. Symlinks are listed as symlinks
/// and never followed.
pub fn scan_file_list(layout: &SourceLayout) -> Result<Vec<BackupFileEntry>, DetachError> {
    let mut entries = scan_root(layout.database_dir(), 0)?;
    for (index, dir) in layout.external_dirs() {
        entries.extend(scan_root(dir, index)?);
    }
    debug!("Scanned {} entries", entries.len());
    Ok(entries)
}

fn scan_root(root: &Path, external_dir_num: u32) -> Result<Vec<BackupFileEntry>, DetachError> {
    let mut entries = Vec::new();

    for item in WalkDir::new(root).min_depth(1).follow_links(false).sort_by_file_name() {
        let item = item.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            match e.into_io_error() {
                Some(source) => DetachError::local_io(path, source),
                None => DetachError::Catalog(format!("filesystem loop at {}", path.display())),
            }
        })?;

        let rel_path = match item.path().strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => {
                warn!("Skipping {} outside {}", item.path().display(), root.display());
                continue;
            }
        };

        let metadata = item
            .metadata()
            .map_err(|e| DetachError::Catalog(format!("Failed to stat {}: {}", item.path().display(), e)))?;
        let file_type = item.file_type();
        let mode = mode_bits(&metadata, file_type);
        let size = file_type.is_file().then(|| metadata.len());

        entries.push(BackupFileEntry::new(rel_path, size, mode, external_dir_num));
    }

    Ok(entries)
}

#[cfg(unix)]
fn mode_bits(metadata: &std::fs::Metadata, _file_type: std::fs::FileType) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_bits(_metadata: &std::fs::Metadata, file_type: std::fs::FileType) -> u32 {
    use crate::constants::{S_IFDIR, S_IFLNK, S_IFREG};

    if file_type.is_symlink() {
        S_IFLNK | 0o777
    } else if file_type.is_dir() {
        S_IFDIR | 0o755
    } else if file_type.is_file() {
        S_IFREG | 0o644
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileKind;
    use crate::test_utils::create_temp_dir;
    use std::fs;

    #[test]
    fn test_scan_lists_files_and_directories() {
        let backup = create_temp_dir().unwrap();
        let database = backup.path().join("database");
        fs::create_dir_all(database.join("base/1")).unwrap();
        fs::write(database.join("PG_VERSION"), b"16\n").unwrap();
        fs::write(database.join("base/1/1259"), vec![0u8; 8192]).unwrap();

        let entries = scan_file_list(&SourceLayout::new(&database)).unwrap();
        let listed: Vec<(&str, FileKind)> = entries.iter().map(|e| (e.rel_path(), e.kind())).collect();
        assert_eq!(
            listed,
            vec![
                ("PG_VERSION", FileKind::Regular),
                ("base", FileKind::Directory),
                ("base/1", FileKind::Directory),
                ("base/1/1259", FileKind::Regular),
            ]
        );
        assert_eq!(entries[3].size(), 8192);
        assert!(!entries[1].has_recorded_size());
    }

    #[test]
    fn test_scan_includes_external_dirs() {
        let backup = create_temp_dir().unwrap();
        let database = backup.path().join("database");
        let external = backup.path().join("ext1");
        fs::create_dir_all(&database).unwrap();
        fs::create_dir_all(&external).unwrap();
        fs::write(external.join("extra.conf"), b"x=1").unwrap();

        let layout = SourceLayout::new(&database).with_external_dir(1, &external);
        let entries = scan_file_list(&layout).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path(), "extra.conf");
        assert_eq!(entries[0].external_dir_num(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_keeps_symlinks() {
        let backup = create_temp_dir().unwrap();
        let database = backup.path().join("database");
        fs::create_dir_all(&database).unwrap();
        fs::write(database.join("target"), b"data").unwrap();
        std::os::unix::fs::symlink(database.join("target"), database.join("link")).unwrap();

        let entries = scan_file_list(&SourceLayout::new(&database)).unwrap();
        let link = entries.iter().find(|e| e.rel_path() == "link").unwrap();
        assert_eq!(link.kind(), FileKind::Symlink);
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let layout = SourceLayout::new("/nonexistent/backup/database");
        assert!(scan_file_list(&layout).is_err());
    }
}
