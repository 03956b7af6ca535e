//! Upload run orchestration.
//!
//! A run moves through `Unconfigured → Validated → Initialized → Uploading →
//! Joined`. Configuration and bucket failures abort the run before any worker
//! starts; per-file failures are recorded and the run carries on.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::catalog::SourceLayout;
use crate::cloud::client::{ObjectStore, StoreClient};
use crate::cloud::retry::RetryPolicy;
use crate::config::{StoreConfig, StoreParams};
use crate::constants::{MIN_WORKERS, WORKER_THREAD_PREFIX};
use crate::error::DetachError;
use crate::models::{BackupId, FileOutcome};
use crate::upload::file_list::FileList;
use crate::upload::session::upload_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Unconfigured,
    Validated,
    Initialized,
    Uploading,
    Joined,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Number of upload workers
    pub threads: usize,
    /// Stop claiming new files after the first local integrity failure
    pub fail_fast: bool,
    pub retry: RetryPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            fail_fast: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub rel_path: String,
    pub external_dir_num: u32,
    pub reason: String,
}

/// Totals of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    /// Regular files never attempted because the run stopped early
    pub skipped: usize,
    /// Directories, symlinks and other non-regular entries
    pub ignored: usize,
    /// Bytes handed to the store, retries included
    pub bytes_transmitted: u64,
    pub failed_files: Vec<FailedFile>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Drives one upload run.
pub struct Uploader<S> {
    state: RunState,
    options: UploadOptions,
    config: Option<StoreConfig>,
    client: Option<StoreClient<S>>,
}

impl<S: ObjectStore> Uploader<S> {
    pub fn new(options: UploadOptions) -> Self {
        Self {
            state: RunState::Unconfigured,
            options,
            config: None,
            client: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn config(&self) -> Option<&StoreConfig> {
        self.config.as_ref()
    }

    pub fn client(&self) -> Option<&StoreClient<S>> {
        self.client.as_ref()
    }

    fn transition(&mut self, next: RunState) {
        debug!("Upload state {} -> {}", self.state, next);
        self.state = next;
    }

    fn expect_state(&self, expected: RunState) -> Result<(), DetachError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DetachError::Initialization(format!(
                "upload run is {}, expected {}",
                self.state, expected
            )))
        }
    }

    /// Check the store parameters. Nothing touches the network before this succeeds.
    pub fn validate(&mut self, params: StoreParams) -> Result<&StoreConfig, DetachError> {
        self.expect_state(RunState::Unconfigured)?;
        let config = params.validate()?;
        info!("S3 configuration: {:?}", config);
        self.transition(RunState::Validated);
        Ok(self.config.insert(config))
    }

    /// Bring up the store backend. `connect` performs any process-wide client
    /// initialization the backend needs.
    pub fn initialize<F>(&mut self, connect: F) -> Result<(), DetachError>
    where
        F: FnOnce(&StoreConfig) -> Result<S, DetachError>,
    {
        self.expect_state(RunState::Validated)?;
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| DetachError::Initialization("missing validated configuration".to_string()))?;
        let store = connect(config)?;
        self.client = Some(StoreClient::new(store, self.options.retry));
        self.transition(RunState::Initialized);
        Ok(())
    }

    /// Verify the bucket, then upload every regular file with a fixed pool of
    /// workers and wait for all of them.
    pub fn run(
        &mut self,
        files: &FileList,
        layout: &SourceLayout,
        backup_id: BackupId,
    ) -> Result<UploadReport, DetachError> {
        self.expect_state(RunState::Initialized)?;
        let (client, config) = match (&self.client, &self.config) {
            (Some(client), Some(config)) => (client, config),
            _ => return Err(DetachError::Initialization("store client not initialized".to_string())),
        };

        client.require_bucket(config)?;

        files.reset_claims();
        let threads = self.options.threads.max(MIN_WORKERS);
        info!(
            "Uploading {} files of backup {} with {} threads",
            files.regular_files().count(),
            backup_id,
            threads
        );

        let context = WorkerContext {
            client,
            config,
            layout,
            backup_id,
            files,
            fail_fast: self.options.fail_fast,
            abort: AtomicBool::new(false),
        };

        self.state = RunState::Uploading;
        debug!("Upload state {} -> {}", RunState::Initialized, RunState::Uploading);
        let joined = run_workers(&context, threads);
        self.transition(RunState::Joined);

        let failed_files = joined?;
        let report = build_report(files, failed_files);
        info!(
            "Upload finished: {} uploaded, {} failed, {} skipped, {} bytes sent",
            report.uploaded, report.failed, report.skipped, report.bytes_transmitted
        );
        Ok(report)
    }
}

struct WorkerContext<'a, S> {
    client: &'a StoreClient<S>,
    config: &'a StoreConfig,
    layout: &'a SourceLayout,
    backup_id: BackupId,
    files: &'a FileList,
    fail_fast: bool,
    abort: AtomicBool,
}

fn run_workers<S: ObjectStore>(context: &WorkerContext<'_, S>, threads: usize) -> Result<Vec<FailedFile>, DetachError> {
    let joined = crossbeam::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for number in 1..=threads {
            let spawned = scope
                .builder()
                .name(format!("{}-{}", WORKER_THREAD_PREFIX, number))
                .spawn(move |_| worker_loop(number, context));
            match spawned {
                Ok(handle) => handles.push((number, handle)),
                Err(e) => warn!("Failed to start upload thread {}: {}", number, e),
            }
        }

        if handles.is_empty() {
            return Err(DetachError::Initialization("no upload thread could be started".to_string()));
        }

        let mut failed_files = Vec::new();
        let mut panicked = None;
        for (number, handle) in handles {
            match handle.join() {
                Ok(failures) => failed_files.extend(failures),
                Err(_) => {
                    error!("Upload thread {} panicked", number);
                    if panicked.is_none() {
                        panicked = Some(number);
                    }
                }
            }
        }
        match panicked {
            Some(number) => Err(DetachError::WorkerPanicked(number)),
            None => Ok(failed_files),
        }
    });

    // every handle is joined above, so the scope itself cannot report a panic
    joined.map_err(|_| DetachError::WorkerPanicked(0))?
}

fn worker_loop<S: ObjectStore>(number: usize, context: &WorkerContext<'_, S>) -> Vec<FailedFile> {
    info!("Start thread {}", number);
    let mut failures = Vec::new();
    let mut claims = context.files.claims();

    while !context.abort.load(Ordering::SeqCst) {
        let entry = match claims.next() {
            Some(entry) => entry,
            None => break,
        };

        match upload_file(context.client, context.config, context.layout, context.backup_id, entry) {
            Ok(_) => entry.set_outcome(FileOutcome::Uploaded),
            Err(err) => {
                entry.set_outcome(FileOutcome::Failed);
                error!("Failed to upload {}: {}", entry.rel_path(), err);

                if context.fail_fast && matches!(err, DetachError::ShortRead { .. }) {
                    warn!("Stopping upload after local integrity failure");
                    context.abort.store(true, Ordering::SeqCst);
                }
                failures.push(FailedFile {
                    rel_path: entry.rel_path().to_string(),
                    external_dir_num: entry.external_dir_num(),
                    reason: err.to_string(),
                });
            }
        }
    }

    debug!("Thread {} finished", number);
    failures
}

fn build_report(files: &FileList, mut failed_files: Vec<FailedFile>) -> UploadReport {
    let mut report = UploadReport::default();

    for entry in files {
        if !entry.is_regular() {
            entry.set_outcome(FileOutcome::Skipped);
            report.ignored += 1;
            continue;
        }
        report.bytes_transmitted += entry.write_size();
        match entry.outcome() {
            FileOutcome::Uploaded => report.uploaded += 1,
            FileOutcome::Failed => report.failed += 1,
            FileOutcome::Pending | FileOutcome::Skipped => {
                entry.set_outcome(FileOutcome::Skipped);
                report.skipped += 1;
            }
        }
    }

    failed_files.sort_by(|a, b| {
        a.rel_path
            .cmp(&b.rel_path)
            .then(a.external_dir_num.cmp(&b.external_dir_num))
    });
    report.failed_files = failed_files;
    report
}
