//! Backup catalog adapters.
//!
//! Turns a backup directory into the inputs of an upload run: the backup id,
//! the file list and the layout used to find each file's bytes.

mod control_file;
mod layout;
mod scan;

use std::path::Path;

use log::info;

use crate::constants::BACKUP_CONTENT_FILE;
use crate::error::DetachError;
use crate::models::{BackupFileEntry, BackupId};

pub use control_file::{load_file_list, parse_control_file, parse_control_line};
pub use layout::SourceLayout;
pub use scan::scan_file_list;

/// Load the file list from the catalog file, or scan the layout when the
/// backup has none.
pub fn discover_file_list(backup_dir: &Path, layout: &SourceLayout) -> Result<Vec<BackupFileEntry>, DetachError> {
    if backup_dir.join(BACKUP_CONTENT_FILE).is_file() {
        load_file_list(backup_dir)
    } else {
        info!(
            "No {} in {}, scanning {}",
            BACKUP_CONTENT_FILE,
            backup_dir.display(),
            layout.database_dir().display()
        );
        scan_file_list(layout)
    }
}

/// Backup id taken from the backup directory's name.
pub fn backup_id_from_dir(backup_dir: &Path) -> Result<BackupId, DetachError> {
    let name = backup_dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| DetachError::Catalog(format!("No backup id in path {}", backup_dir.display())))?;
    name.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_temp_dir;
    use std::fs;

    #[test]
    fn test_backup_id_from_dir() {
        let id = backup_id_from_dir(Path::new("/var/backups/node1/QQUYO0")).unwrap();
        assert_eq!(id.start_time(), 1_617_235_200);
        assert!(backup_id_from_dir(Path::new("/var/backups/not-an-id")).is_err());
        assert!(backup_id_from_dir(Path::new("/")).is_err());
    }

    #[test]
    fn test_discover_prefers_control_file() {
        let backup = create_temp_dir().unwrap();
        let database = backup.path().join("database");
        fs::create_dir_all(&database).unwrap();
        fs::write(database.join("on_disk_only"), b"1").unwrap();
        fs::write(
            backup.path().join(BACKUP_CONTENT_FILE),
            "{\"path\":\"from_catalog\", \"size\":\"1\", \"mode\":\"33188\"}\n",
        )
        .unwrap();

        let layout = SourceLayout::for_backup(backup.path()).unwrap();
        let entries = discover_file_list(backup.path(), &layout).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path(), "from_catalog");

        fs::remove_file(backup.path().join(BACKUP_CONTENT_FILE)).unwrap();
        let entries = discover_file_list(backup.path(), &layout).unwrap();
        assert_eq!(entries[0].rel_path(), "on_disk_only");
    }
}
