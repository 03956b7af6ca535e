//! Streaming upload of a single claimed file.
//!
//! The store pulls the body in chunks through [`BodySource`]; every chunk
//! read from disk is folded into the running CRC and counted on the entry.
//! Nothing beyond one chunk is held in memory.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{error, info};

use crate::catalog::SourceLayout;
use crate::cloud::client::{BodySource, ObjectStore, StoreClient, UploadResult};
use crate::config::StoreConfig;
use crate::error::DetachError;
use crate::models::{BackupFileEntry, BackupId, ObjectKey};
use crate::utils::checksum::{format_crc, ChecksumAccumulator};

/// Body of one PUT, read from the entry's local file.
pub struct UploadSession<'a, R = File> {
    entry: &'a BackupFileEntry,
    path: PathBuf,
    file: R,
    size: u64,
    remaining: u64,
    checksum: ChecksumAccumulator,
    hit_eof: bool,
    read_error: Option<(io::ErrorKind, String)>,
}

impl<'a> UploadSession<'a, File> {
    /// Open the entry's file, resolving an unrecorded size with `stat`.
    pub fn open(entry: &'a BackupFileEntry, path: PathBuf) -> Result<Self, DetachError> {
        let file = File::open(&path).map_err(|e| DetachError::local_io(&path, e))?;

        if !entry.has_recorded_size() {
            let metadata = file.metadata().map_err(|e| DetachError::local_io(&path, e))?;
            entry.set_size(metadata.len());
        }
        Ok(Self::with_reader(entry, path, file))
    }
}

impl<'a, R: Read + Seek> UploadSession<'a, R> {
    /// Stream the entry's recorded size from an already opened reader.
    pub fn with_reader(entry: &'a BackupFileEntry, path: PathBuf, reader: R) -> Self {
        let size = entry.size();
        Self {
            entry,
            path,
            file: reader,
            size,
            remaining: size,
            checksum: ChecksumAccumulator::new(),
            hit_eof: false,
            read_error: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared object size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checksum of the bytes sent by the current attempt.
    pub fn crc(&self) -> u32 {
        self.checksum.value()
    }

    /// Turn the store's answer into the file's result.
    ///
    /// Local failures win over the remote status: a body aborted because the
    /// file was short or unreadable is not the store's fault.
    pub fn finish(self, key: &ObjectKey, result: UploadResult) -> Result<UploadResult, DetachError> {
        let crc = self.checksum.value();
        self.entry.set_crc(crc);
        info!("done put_object crc {} file {}", format_crc(crc), self.entry.rel_path());

        if let Some((kind, message)) = self.read_error {
            return Err(DetachError::local_io(self.path, io::Error::new(kind, message)));
        }

        if self.remaining > 0 && (self.hit_eof || result.is_success()) {
            error!(
                "Failed to read remaining {} of {} bytes from {}",
                self.remaining,
                self.size,
                self.path.display()
            );
            return Err(DetachError::ShortRead {
                path: self.path,
                expected: self.size,
                remaining: self.remaining,
            });
        }

        if !result.is_success() {
            error!("{}", result.describe());
            return Err(DetachError::TerminalStore {
                key: key.to_string(),
                status: result.status,
                detail: result.detail,
            });
        }

        Ok(result)
    }
}

impl<R: Read + Seek> BodySource for UploadSession<'_, R> {
    fn next_chunk(&mut self, max_len: usize) -> io::Result<Bytes> {
        let wanted = self.remaining.min(max_len as u64) as usize;
        let mut buffer = vec![0u8; wanted];
        let mut filled = 0;

        while filled < wanted {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => {
                    self.hit_eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.read_error = Some((e.kind(), e.to_string()));
                    return Err(e);
                }
            }
        }

        buffer.truncate(filled);
        self.checksum.update(&buffer);
        self.remaining -= filled as u64;
        self.entry.add_write_size(filled as u64);
        Ok(Bytes::from(buffer))
    }

    fn remaining(&self) -> u64 {
        self.remaining
    }

    fn rewind(&mut self) -> io::Result<()> {
        // a failed seek is a local failure, whatever status the request ends with
        if let Err(e) = self.file.seek(SeekFrom::Start(0)) {
            self.read_error = Some((e.kind(), e.to_string()));
            return Err(e);
        }
        self.remaining = self.size;
        self.checksum.reset();
        self.hit_eof = false;
        self.read_error = None;
        Ok(())
    }
}

/// Upload one claimed regular file under `<backup id>/<relative path>`.
pub fn upload_file<S: ObjectStore>(
    client: &StoreClient<S>,
    config: &StoreConfig,
    layout: &SourceLayout,
    backup_id: BackupId,
    entry: &BackupFileEntry,
) -> Result<UploadResult, DetachError> {
    let path = layout.resolve(entry)?;
    info!("send file {} rel_path {}", path.display(), entry.rel_path());

    let mut session = UploadSession::open(entry, path)?;
    let key = ObjectKey::new(backup_id, entry.rel_path());
    let size = session.size();

    let result = client.put_object(config, &key, &mut session, size);
    session.finish(&key, result)
}
