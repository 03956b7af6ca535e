//! Shared work list with lock-free claiming.
//!
//! Every worker scans the same sorted list and takes an entry by winning the
//! atomic test-and-set on its claim flag. No entry is ever handed to two
//! workers and no worker blocks on another.

use std::slice;

use crate::models::BackupFileEntry;

#[derive(Debug, Default)]
pub struct FileList {
    entries: Vec<BackupFileEntry>,
}

impl FileList {
    /// Build the list, sorted by relative path and then external directory.
    pub fn new(mut entries: Vec<BackupFileEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.rel_path()
                .cmp(b.rel_path())
                .then(a.external_dir_num().cmp(&b.external_dir_num()))
        });
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, BackupFileEntry> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&BackupFileEntry> {
        self.entries.get(index)
    }

    /// Regular files, the only entries that are ever claimed.
    pub fn regular_files(&self) -> impl Iterator<Item = &BackupFileEntry> {
        self.entries.iter().filter(|entry| entry.is_regular())
    }

    /// Clear every claim flag. Only valid while no worker is running.
    pub fn reset_claims(&self) {
        for entry in &self.entries {
            entry.reset_claim();
        }
    }

    /// Claim the first unclaimed regular file, scanning from the start.
    pub fn claim_next(&self) -> Option<&BackupFileEntry> {
        self.entries
            .iter()
            .find(|entry| entry.is_regular() && entry.try_claim())
    }

    /// Per-worker claiming iterator.
    ///
    /// Equivalent to calling [`FileList::claim_next`] repeatedly, but resumes
    /// from where it stopped: a passed entry stays claimed for the rest of the
    /// run, so rescanning it would never succeed.
    pub fn claims(&self) -> Claims<'_> {
        Claims {
            entries: self.entries.iter(),
        }
    }
}

impl<'a> IntoIterator for &'a FileList {
    type Item = &'a BackupFileEntry;
    type IntoIter = slice::Iter<'a, BackupFileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Iterator over the entries one worker wins.
pub struct Claims<'a> {
    entries: slice::Iter<'a, BackupFileEntry>,
}

impl<'a> Iterator for Claims<'a> {
    type Item = &'a BackupFileEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries
            .by_ref()
            .find(|entry| entry.is_regular() && entry.try_claim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn sample() -> FileList {
        FileList::new(vec![
            BackupFileEntry::regular("c", 3),
            BackupFileEntry::directory("base"),
            BackupFileEntry::regular("a", 1),
            BackupFileEntry::regular("a", 1).with_external_dir(1),
            BackupFileEntry::symlink("pg_wal"),
            BackupFileEntry::regular("b", 2),
        ])
    }

    #[test]
    fn test_sorted_by_path_then_external_dir() {
        let list = sample();
        let order: Vec<(&str, u32)> = list.iter().map(|e| (e.rel_path(), e.external_dir_num())).collect();
        assert_eq!(
            order,
            vec![("a", 0), ("a", 1), ("b", 0), ("base", 0), ("c", 0), ("pg_wal", 0)]
        );
    }

    #[test]
    fn test_claim_next_skips_non_regular() {
        let list = sample();
        let mut claimed = Vec::new();
        while let Some(entry) = list.claim_next() {
            claimed.push((entry.rel_path().to_string(), entry.external_dir_num()));
        }
        assert_eq!(claimed.len(), 4);
        assert!(!list.iter().find(|e| e.rel_path() == "base").unwrap().is_claimed());
        assert!(!list.iter().find(|e| e.rel_path() == "pg_wal").unwrap().is_claimed());
        assert!(list.claim_next().is_none());
    }

    #[test]
    fn test_reset_claims() {
        let list = sample();
        assert_eq!(list.claims().count(), 4);
        assert_eq!(list.claims().count(), 0);
        list.reset_claims();
        assert_eq!(list.claims().count(), 4);
    }

    #[test]
    fn test_empty_list() {
        let list = FileList::new(Vec::new());
        assert!(list.is_empty());
        assert!(list.claim_next().is_none());
        assert_eq!(list.claims().count(), 0);
    }

    #[test]
    fn test_only_directories() {
        let list = FileList::new(vec![BackupFileEntry::directory("a"), BackupFileEntry::directory("b")]);
        assert!(list.claim_next().is_none());
        assert_eq!(list.regular_files().count(), 0);
    }

    #[test]
    fn test_concurrent_claims_partition_the_list() {
        let entries = (0..500).map(|i| BackupFileEntry::regular(format!("f{:04}", i), 1)).collect();
        let list = FileList::new(entries);
        let seen = Mutex::new(Vec::new());

        crossbeam::scope(|scope| {
            for worker in 0..8 {
                let list = &list;
                let seen = &seen;
                scope.spawn(move |_| {
                    // mix both claiming styles
                    let mine: Vec<String> = if worker % 2 == 0 {
                        list.claims().map(|e| e.rel_path().to_string()).collect()
                    } else {
                        std::iter::from_fn(|| list.claim_next())
                            .map(|e| e.rel_path().to_string())
                            .collect()
                    };
                    seen.lock().unwrap().extend(mine);
                });
            }
        })
        .unwrap();

        let seen = seen.into_inner().unwrap();
        let unique: HashSet<&String> = seen.iter().collect();
        assert_eq!(seen.len(), 500);
        assert_eq!(unique.len(), 500);
    }
}
