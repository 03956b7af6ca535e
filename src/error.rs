//! Error taxonomy for the upload engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cloud::status::{ErrorDetails, StoreStatus};

#[derive(Error, Debug)]
pub enum DetachError {
    #[error("required S3 parameter not specified: {0}")]
    Config(&'static str),

    #[error("invalid S3 parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("s3_bucket {bucket} test is failed: {status}")]
    Connectivity {
        bucket: String,
        status: StoreStatus,
        detail: Option<ErrorDetails>,
    },

    #[error("put_object {key} failed: {status}")]
    TerminalStore {
        key: String,
        status: StoreStatus,
        detail: Option<ErrorDetails>,
    },

    #[error("{}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read remaining {remaining} of {expected} bytes from {}", path.display())]
    ShortRead {
        path: PathBuf,
        expected: u64,
        remaining: u64,
    },

    #[error("failed to initialize object store client: {0}")]
    Initialization(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("upload worker {0} panicked")]
    WorkerPanicked(usize),
}

impl DetachError {
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DetachError::LocalIo { path: path.into(), source }
    }

    /// Whether this error aborts the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DetachError::TerminalStore { .. } | DetachError::LocalIo { .. } | DetachError::ShortRead { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_parameter() {
        let err = DetachError::Config("s3_bucket");
        assert_eq!(err.to_string(), "required S3 parameter not specified: s3_bucket");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_per_file_errors_are_not_fatal() {
        let io = DetachError::local_io("/tmp/x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(!io.is_fatal());
        assert!(io.to_string().starts_with("/tmp/x: "));

        let short = DetachError::ShortRead { path: PathBuf::from("/tmp/y"), expected: 10, remaining: 4 };
        assert!(!short.is_fatal());
        assert!(short.to_string().contains("remaining 4 of 10 bytes"));

        let store = DetachError::TerminalStore {
            key: "A/b".into(),
            status: StoreStatus::ErrorAccessDenied,
            detail: None,
        };
        assert!(!store.is_fatal());
    }

    #[test]
    fn test_connectivity_is_fatal() {
        let err = DetachError::Connectivity {
            bucket: "b".into(),
            status: StoreStatus::ErrorNoSuchBucket,
            detail: None,
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "s3_bucket b test is failed: ErrorNoSuchBucket");
    }
}
