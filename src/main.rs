use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use backup_detach::catalog::{self, SourceLayout};
use backup_detach::cli::Args;
use backup_detach::cloud::{MemoryStore, ObjectStore, S3Store};
use backup_detach::config::{self as store_config, StoreConfig, StoreParams};
use backup_detach::error::DetachError;
use backup_detach::models::BackupId;
use backup_detach::upload::{FileList, UploadOptions, UploadReport, Uploader};
use backup_detach::utils::summary;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    let started_at = Utc::now();
    let backup_id = resolve_backup_id(&args)?;
    info!("Detaching backup {} from {}", backup_id, args.backup_dir.display());

    let params = store_config::load_store_params(args.s3_config.as_deref(), args.store_params())?;

    let options = args.upload_options();
    let (report, bucket, files) = if args.dry_run {
        info!("Dry run: files are streamed into an in-memory store");
        detach_with(&args, options, params, |_| Ok(MemoryStore::new()), backup_id)?
    } else {
        detach_with(&args, options, params, S3Store::connect, backup_id)?
    };

    if let Some(path) = &args.summary {
        let text = summary::create_run_summary(backup_id, &bucket, started_at, Utc::now(), &files, &report)?;
        summary::write_run_summary(path, &text)?;
        info!("Run summary written to {}", path.display());
    }

    for failed in &report.failed_files {
        error!("Not uploaded: {} ({})", failed.rel_path, failed.reason);
    }
    if !report.is_success() {
        bail!(
            "{} of {} files were not uploaded",
            report.failed + report.skipped,
            report.uploaded + report.failed + report.skipped
        );
    }

    info!("Backup {} detached: {} files uploaded", backup_id, report.uploaded);
    Ok(())
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ).context("Failed to initialize logger")?;
    Ok(())
}

fn resolve_backup_id(args: &Args) -> Result<BackupId> {
    let id = match &args.backup_id {
        Some(id) => id.parse()?,
        None => catalog::backup_id_from_dir(&args.backup_dir)
            .context("Backup id not given and backup directory name is not one")?,
    };
    Ok(id)
}

/// Validate the store parameters, load the backup's file list, connect,
/// check the bucket and upload. Returns the report, the bucket the files went
/// to and the file list the report describes.
fn detach_with<S, F>(
    args: &Args,
    options: UploadOptions,
    params: StoreParams,
    connect: F,
    backup_id: BackupId,
) -> Result<(UploadReport, String, FileList)>
where
    S: ObjectStore,
    F: FnOnce(&StoreConfig) -> Result<S, DetachError>,
{
    let mut uploader = Uploader::new(options);
    let bucket = uploader.validate(params)?.bucket().to_string();

    let layout = SourceLayout::for_backup(&args.backup_dir)
        .with_context(|| format!("Failed to read backup layout in {}", args.backup_dir.display()))?;
    let files = FileList::new(catalog::discover_file_list(&args.backup_dir, &layout)?);
    info!("Backup {} lists {} entries", backup_id, files.len());

    uploader.initialize(connect).context("Failed to initialize S3 client")?;
    let report = uploader.run(&files, &layout, backup_id)?;
    Ok((report, bucket, files))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_fails_before_catalog_is_read() {
        // the backup directory does not exist, so any catalog access would fail differently
        let args = Args::try_parse_from(["backup-detach", "-B", "/nonexistent/backups/QQUYO0"]).unwrap();
        let mut connected = false;

        let err = detach_with(
            &args,
            args.upload_options(),
            StoreParams::default(),
            |_| {
                connected = true;
                Ok(MemoryStore::new())
            },
            BackupId::from_timestamp(1_617_235_200),
        )
        .unwrap_err();

        match err.downcast_ref::<DetachError>() {
            Some(DetachError::Config(name)) => assert_eq!(*name, "s3_access_key_id"),
            other => panic!("expected a configuration error, got {:?}", other),
        }
        assert!(!connected);
    }
}
