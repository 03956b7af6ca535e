//! Status vocabulary shared by every object store backend.
//!
//! A store request always completes with a [`StoreStatus`]; store-side
//! failures additionally carry an [`ErrorDetails`] payload parsed from the
//! response body. Transport failures (DNS, connect, aborted body) never have
//! details because the store never answered.

use std::fmt;

/// Outcome of a single store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreStatus {
    Ok,
    // transport and client-side statuses
    NameLookupError,
    FailedToConnect,
    ConnectionFailed,
    AbortedByCallback,
    ResponseParseError,
    InvalidRequest,
    CredentialsError,
    // statuses reported by the store itself
    ErrorAccessDenied,
    ErrorNoSuchBucket,
    ErrorInternalError,
    ErrorOperationAborted,
    ErrorRequestTimeout,
    ErrorSlowDown,
    ErrorServiceUnavailable,
    ErrorInvalidAccessKeyId,
    ErrorSignatureDoesNotMatch,
    HttpError(u16),
    ErrorUnknown,
}

impl StoreStatus {
    pub fn is_ok(self) -> bool {
        self == StoreStatus::Ok
    }

    /// Transient statuses that are safe to retry in place.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            StoreStatus::NameLookupError
                | StoreStatus::FailedToConnect
                | StoreStatus::ConnectionFailed
                | StoreStatus::ErrorInternalError
                | StoreStatus::ErrorOperationAborted
                | StoreStatus::ErrorRequestTimeout
                | StoreStatus::ErrorSlowDown
                | StoreStatus::ErrorServiceUnavailable
        )
    }

    /// Whether the status came from a store response (and may carry details).
    pub fn is_store_error(self) -> bool {
        !matches!(
            self,
            StoreStatus::Ok
                | StoreStatus::NameLookupError
                | StoreStatus::FailedToConnect
                | StoreStatus::ConnectionFailed
                | StoreStatus::AbortedByCallback
                | StoreStatus::ResponseParseError
                | StoreStatus::InvalidRequest
                | StoreStatus::CredentialsError
        )
    }

    /// Map an S3 `<Code>` element to a status.
    pub fn from_s3_code(code: &str) -> Self {
        match code {
            "AccessDenied" => StoreStatus::ErrorAccessDenied,
            "NoSuchBucket" => StoreStatus::ErrorNoSuchBucket,
            "InternalError" => StoreStatus::ErrorInternalError,
            "OperationAborted" => StoreStatus::ErrorOperationAborted,
            "RequestTimeout" => StoreStatus::ErrorRequestTimeout,
            "SlowDown" => StoreStatus::ErrorSlowDown,
            "ServiceUnavailable" => StoreStatus::ErrorServiceUnavailable,
            "InvalidAccessKeyId" => StoreStatus::ErrorInvalidAccessKeyId,
            "SignatureDoesNotMatch" => StoreStatus::ErrorSignatureDoesNotMatch,
            _ => StoreStatus::ErrorUnknown,
        }
    }

    /// Map a bare HTTP status code when the body carried no error code.
    pub fn from_http_status(code: u16) -> Self {
        match code {
            200..=299 => StoreStatus::Ok,
            403 => StoreStatus::ErrorAccessDenied,
            404 => StoreStatus::ErrorNoSuchBucket,
            408 => StoreStatus::ErrorRequestTimeout,
            409 => StoreStatus::ErrorOperationAborted,
            // Too Many Requests: throttling without an S3 error body
            429 => StoreStatus::ErrorSlowDown,
            500 => StoreStatus::ErrorInternalError,
            503 => StoreStatus::ErrorServiceUnavailable,
            other => StoreStatus::HttpError(other),
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStatus::HttpError(code) => write!(f, "HttpError({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Diagnostic payload of a failed store response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetails {
    pub message: Option<String>,
    pub resource: Option<String>,
    pub further_details: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl ErrorDetails {
    pub fn is_empty(&self) -> bool {
        self.message.is_none()
            && self.resource.is_none()
            && self.further_details.is_none()
            && self.extra.is_empty()
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            writeln!(f, "  Message: {}", message)?;
        }
        if let Some(resource) = &self.resource {
            writeln!(f, "  Resource: {}", resource)?;
        }
        if let Some(further) = &self.further_details {
            writeln!(f, "  Further Details: {}", further)?;
        }
        if !self.extra.is_empty() {
            writeln!(f, "  Extra Details:")?;
            for (name, value) in &self.extra {
                writeln!(f, "    {}: {}", name, value)?;
            }
        }
        Ok(())
    }
}

/// Status and optional detail captured from one store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    pub status: StoreStatus,
    pub detail: Option<ErrorDetails>,
}

impl StoreResponse {
    pub fn ok() -> Self {
        Self { status: StoreStatus::Ok, detail: None }
    }

    pub fn status(status: StoreStatus) -> Self {
        Self { status, detail: None }
    }

    pub fn with_detail(status: StoreStatus, detail: ErrorDetails) -> Self {
        let detail = if detail.is_empty() { None } else { Some(detail) };
        Self { status, detail }
    }

    /// One-line-plus-details description for logs.
    pub fn describe(&self) -> String {
        match (&self.detail, self.status.is_store_error()) {
            (Some(detail), true) => format!("S3 error: {}. {}", self.status, detail.to_string().trim_end()),
            _ => format!("S3 error: {}", self.status),
        }
    }
}
