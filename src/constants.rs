//! Global constants for backup-detach.
//!
//! This module centralizes hardcoded values so retry behaviour, chunking and
//! file-type classification can be tuned in one place.

use std::time::Duration;

// Retry and backoff constants
/// Attempts per store request: the first call plus five retries
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Backoff slept before the first retry
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Amount added to the backoff after every retry
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(1);

// Streaming constants
/// Largest chunk the S3 backend pulls from a body source (64KB)
pub const PUT_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between a worker and the in-flight PUT request
pub const BODY_CHANNEL_DEPTH: usize = 2;

// Worker pool constants
/// Lower bound on the number of upload workers
pub const MIN_WORKERS: usize = 1;

/// Prefix for upload worker thread names
pub const WORKER_THREAD_PREFIX: &str = "detach";

// Store defaults
/// Signing region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

// File mode bits (POSIX st_mode layout as stored in the backup catalog)
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

// Backup layout
/// Catalog file listing every file of a backup
pub const BACKUP_CONTENT_FILE: &str = "backup_content.control";

/// Data directory inside a backup
pub const DATABASE_DIR: &str = "database";

/// Parent directory of external directories inside a backup
pub const EXTERNAL_DIR: &str = "external_directories";

/// Name prefix of an individual external directory, suffixed with its index
pub const EXTERNAL_DIR_PREFIX: &str = "externaldir";

// Environment variables for store configuration
pub const ENV_ACCESS_KEY_ID: &str = "S3_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "S3_SECRET_ACCESS_KEY";
pub const ENV_HOSTNAME: &str = "S3_HOSTNAME";
pub const ENV_BUCKET: &str = "S3_BUCKET";
pub const ENV_FORCE_PATH_STYLE: &str = "S3_FORCE_PATH_STYLE";
pub const ENV_PROTOCOL: &str = "S3_PROTOCOL";
pub const ENV_REGION: &str = "S3_REGION";
