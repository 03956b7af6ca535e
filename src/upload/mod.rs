//! Concurrent upload of a backup's files.
//!
//! - [`file_list`]: the shared list workers claim files from
//! - [`session`]: streaming one claimed file into the store
//! - [`orchestrator`]: validation, bucket check, worker pool and report

pub mod file_list;
pub mod orchestrator;
pub mod session;

pub use file_list::{Claims, FileList};
pub use orchestrator::{FailedFile, RunState, UploadOptions, UploadReport, Uploader};
pub use session::{upload_file, UploadSession};
