//! Object store access.
//!
//! [`client::StoreClient`] wraps an [`client::ObjectStore`] backend with the
//! retry policy from [`retry`]. Backends: [`s3::S3Store`] for real uploads and
//! [`memory::MemoryStore`] for dry runs.

pub mod client;
pub mod lifecycle;
pub mod memory;
pub mod retry;
pub mod s3;
pub mod status;

pub use client::{BodySource, ObjectStore, RequestResult, StoreClient, UploadResult};
pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use s3::S3Store;
pub use status::{ErrorDetails, StoreResponse, StoreStatus};
