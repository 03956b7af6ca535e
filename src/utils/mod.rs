//! Utility functions shared by the upload engine and the binary.
//!
//! ## Components
//!
//! - **Checksum**: CRC-32C accumulation for streamed bodies and whole files
//! - **Summary**: JSON report of an upload run
//!
//! ### Verifying an uploaded file
//!
//! ```no_run
//! use backup_detach::utils::checksum::{crc32_file, format_crc};
//! use std::path::Path;
//!
//! # fn example() -> std::io::Result<()> {
//! let crc = crc32_file(Path::new("/var/backups/QQUYO0/database/base/1/1259"))?;
//! println!("CRC: {}", format_crc(crc));
//! # Ok(())
//! # }
//! ```

/// CRC-32C checksum helpers
pub mod checksum;

/// Upload run summary and reporting
pub mod summary;
