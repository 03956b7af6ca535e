use clap::Parser;
use std::path::PathBuf;

use crate::cloud::retry::RetryPolicy;
use crate::config::{Protocol, StoreParams};
use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::upload::UploadOptions;

/// Command-line arguments for backup-detach.
///
/// Store parameters given here override the `S3_*` environment variables,
/// which in turn override the optional YAML file given with `--s3-config`.
#[derive(Parser, Debug)]
#[clap(name = "backup-detach", about = "Upload a finished backup's files to S3-compatible storage")]
pub struct Args {
    /// Backup directory (contains backup_content.control and database/)
    #[clap(short = 'B', long)]
    pub backup_dir: PathBuf,

    /// Backup id used as the object key prefix (default: backup directory name)
    #[clap(short = 'i', long)]
    pub backup_id: Option<String>,

    /// Number of upload threads (default: number of CPUs)
    #[clap(short = 'j', long)]
    pub threads: Option<usize>,

    /// YAML file with S3 parameters
    #[clap(long)]
    pub s3_config: Option<PathBuf>,

    /// S3 access key id
    #[clap(long)]
    pub s3_access_key_id: Option<String>,

    /// S3 secret access key
    #[clap(long)]
    pub s3_secret_access_key: Option<String>,

    /// S3 endpoint hostname, optionally with a port
    #[clap(long)]
    pub s3_hostname: Option<String>,

    /// Destination bucket
    #[clap(long)]
    pub s3_bucket: Option<String>,

    /// Address the bucket in the URL path instead of the host name
    #[clap(long)]
    pub s3_force_path_style: bool,

    /// Endpoint protocol
    #[clap(long, value_enum)]
    pub s3_protocol: Option<Protocol>,

    /// Signing region (default: us-east-1)
    #[clap(long)]
    pub s3_region: Option<String>,

    /// Retries per request after the first attempt
    #[clap(long, default_value_t = DEFAULT_MAX_ATTEMPTS - 1)]
    pub retries: u32,

    /// Stop claiming files after the first file that is shorter than recorded
    #[clap(long)]
    pub fail_fast: bool,

    /// Go through the whole run against an in-memory store
    #[clap(long)]
    pub dry_run: bool,

    /// Write a JSON run summary to this file
    #[clap(long)]
    pub summary: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Store parameters given on the command line.
    pub fn store_params(&self) -> StoreParams {
        StoreParams {
            access_key_id: self.s3_access_key_id.clone(),
            secret_access_key: self.s3_secret_access_key.clone(),
            hostname: self.s3_hostname.clone(),
            bucket: self.s3_bucket.clone(),
            // an absent flag leaves the file or environment setting in place
            force_path_style: self.s3_force_path_style.then_some(true),
            protocol: self.s3_protocol,
            region: self.s3_region.clone(),
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        let defaults = UploadOptions::default();
        UploadOptions {
            threads: self.threads.unwrap_or(defaults.threads),
            fail_fast: self.fail_fast,
            retry: RetryPolicy::new(self.retries.saturating_add(1)),
        }
    }
}
