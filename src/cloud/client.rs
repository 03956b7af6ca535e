use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info};

use crate::cloud::retry::RetryPolicy;
use crate::cloud::status::{ErrorDetails, StoreResponse, StoreStatus};
use crate::config::StoreConfig;
use crate::error::DetachError;
use crate::models::ObjectKey;
use crate::security::credential_scrubber::{mask_secret, scrub_error_details};

/// Pull-based source of an object body.
///
/// The store asks for chunks of at most `max_len` bytes. A chunk shorter than
/// requested (including an empty one) marks the end of the body.
pub trait BodySource {
    fn next_chunk(&mut self, max_len: usize) -> io::Result<Bytes>;

    /// Bytes the source still expects to deliver
    fn remaining(&self) -> u64;

    /// Restart the body from its first byte before a retried request.
    fn rewind(&mut self) -> io::Result<()>;
}

/// One attempt of a remote call, without retries.
///
/// Implementations report every outcome as a [`StoreResponse`]; they never
/// retry on their own; [`StoreClient`] owns that policy.
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    fn test_bucket(&self, config: &StoreConfig) -> StoreResponse;

    fn put_object(
        &self,
        config: &StoreConfig,
        key: &ObjectKey,
        body: &mut dyn BodySource,
        content_length: u64,
    ) -> StoreResponse;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn test_bucket(&self, config: &StoreConfig) -> StoreResponse {
        (**self).test_bucket(config)
    }

    fn put_object(
        &self,
        config: &StoreConfig,
        key: &ObjectKey,
        body: &mut dyn BodySource,
        content_length: u64,
    ) -> StoreResponse {
        (**self).put_object(config, key, body, content_length)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn test_bucket(&self, config: &StoreConfig) -> StoreResponse {
        (**self).test_bucket(config)
    }

    fn put_object(
        &self,
        config: &StoreConfig,
        key: &ObjectKey,
        body: &mut dyn BodySource,
        content_length: u64,
    ) -> StoreResponse {
        (**self).put_object(config, key, body, content_length)
    }
}

/// Final outcome of a logical request after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    pub status: StoreStatus,
    /// Scrubbed error payload of the last attempt
    pub detail: Option<ErrorDetails>,
    pub attempts: u32,
    /// Backoff intervals slept between attempts
    pub backoffs: Vec<Duration>,
}

/// Result of a PUT.
pub type UploadResult = RequestResult;

impl RequestResult {
    pub fn is_success(&self) -> bool {
        self.status.is_ok()
    }

    /// Log-ready description of the final status.
    pub fn describe(&self) -> String {
        StoreResponse {
            status: self.status,
            detail: self.detail.clone(),
        }
        .describe()
    }
}

/// Object-store client: one backend plus the retry discipline around it.
///
/// The client is stateless apart from its immutable policy, so one instance
/// is shared by every worker. Each call builds its own retry budget.
pub struct StoreClient<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: ObjectStore> StoreClient<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Check that the configured bucket is reachable, retrying transient failures.
    pub fn test_bucket(&self, config: &StoreConfig) -> RequestResult {
        info!(
            "s3_test_bucket: begin: access key {} hostname {} bucket {} ({})",
            mask_secret(config.access_key_id()),
            config.hostname(),
            config.bucket(),
            self.store.name()
        );

        let mut budget = self.retry.budget();
        let response = loop {
            budget.begin_attempt();
            let response = self.store.test_bucket(config);
            info!("s3_test_bucket: {}. status {}", config.bucket(), response.status);

            if response.status.is_ok() || !budget.should_retry(response.status) {
                break response;
            }
        };

        let result = finish(response, budget.attempts(), budget.into_backoffs());
        if result.is_success() {
            info!("s3_test_bucket succeed {}", config.bucket());
        } else {
            error!("{}", result.describe());
        }
        result
    }

    pub fn bucket_exists(&self, config: &StoreConfig) -> bool {
        self.test_bucket(config).is_success()
    }

    /// Bucket check that turns a failure into a fatal connectivity error.
    pub fn require_bucket(&self, config: &StoreConfig) -> Result<RequestResult, DetachError> {
        let result = self.test_bucket(config);
        if result.is_success() {
            Ok(result)
        } else {
            Err(DetachError::Connectivity {
                bucket: config.bucket().to_string(),
                status: result.status,
                detail: result.detail,
            })
        }
    }

    /// Upload one object, pulling its body from `body`.
    ///
    /// Retried attempts rewind the body first so every attempt transmits the
    /// whole object. A body that cannot be rewound ends the request with
    /// `AbortedByCallback`.
    pub fn put_object(
        &self,
        config: &StoreConfig,
        key: &ObjectKey,
        body: &mut dyn BodySource,
        expected_size: u64,
    ) -> UploadResult {
        let mut budget = self.retry.budget();
        let response = loop {
            let attempt = budget.begin_attempt();
            if attempt > 1 {
                if let Err(e) = body.rewind() {
                    break StoreResponse::with_detail(
                        StoreStatus::AbortedByCallback,
                        ErrorDetails {
                            message: Some(format!("failed to rewind body for retry: {}", e)),
                            ..Default::default()
                        },
                    );
                }
            }

            let response = self.store.put_object(config, key, body, expected_size);
            debug!("put_object {}: attempt {} status {}", key, attempt, response.status);

            if response.status.is_ok() || !budget.should_retry(response.status) {
                break response;
            }
        };

        finish(response, budget.attempts(), budget.into_backoffs())
    }
}

fn finish(response: StoreResponse, attempts: u32, backoffs: Vec<Duration>) -> RequestResult {
    RequestResult {
        status: response.status,
        detail: response.detail.as_ref().map(scrub_error_details),
        attempts,
        backoffs,
    }
}
