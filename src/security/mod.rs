//! Security utilities.
//!
//! Credential scrubbing keeps access keys, secrets and request signatures
//! out of logs and run summaries.

pub mod credential_scrubber;

pub use credential_scrubber::{mask_secret, scrub_credentials, scrub_error_details};
