//! S3 backend built on rusoto.
//!
//! Workers are plain threads, while rusoto is async. Each PUT is spawned on
//! the shared client runtime and its body is fed from the calling thread
//! through a small bounded channel, so the file is streamed in chunks rather
//! than loaded into memory.

use std::io;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use rusoto_core::{ByteStream, HttpClient, Region, RusotoError};
use rusoto_credential::StaticProvider;
use rusoto_s3::{HeadBucketError, HeadBucketRequest, PutObjectRequest, S3Client, S3};
use tokio::sync::mpsc;

use crate::cloud::client::{BodySource, ObjectStore};
use crate::cloud::lifecycle;
use crate::cloud::status::{ErrorDetails, StoreResponse, StoreStatus};
use crate::config::StoreConfig;
use crate::constants::{BODY_CHANNEL_DEPTH, PUT_CHUNK_SIZE};
use crate::error::DetachError;
use crate::models::ObjectKey;

lazy_static! {
    /// Leaf elements of an S3 XML error document
    static ref XML_ELEMENT: Regex = Regex::new(r"<([A-Za-z]+)>([^<]*)</([A-Za-z]+)>").unwrap();
}

type BodyChunk = Result<Bytes, io::Error>;

/// Object store speaking the S3 protocol.
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Initialize the client library and build a client for `config`'s endpoint.
    pub fn connect(config: &StoreConfig) -> Result<Self, DetachError> {
        let runtime = lifecycle::initialize_global()?;

        if !config.force_path_style() {
            warn!(
                "Virtual-host addressing is not available, bucket {} is addressed path-style",
                config.bucket()
            );
        }

        let region = Region::Custom {
            name: config.region().to_string(),
            endpoint: config.endpoint(),
        };
        let credentials = StaticProvider::new_minimal(
            config.access_key_id().to_string(),
            config.secret_access_key().to_string(),
        );

        // hyper's connector must be created inside the runtime it will run on
        let _guard = runtime.enter();
        let http = HttpClient::new()
            .map_err(|e| DetachError::Initialization(format!("Failed to create HTTP client: {}", e)))?;

        debug!("S3 client ready for endpoint {}", config.endpoint());
        Ok(Self {
            client: S3Client::new_with(http, credentials, region),
        })
    }
}

impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    fn test_bucket(&self, config: &StoreConfig) -> StoreResponse {
        let runtime = match lifecycle::global().runtime() {
            Ok(runtime) => runtime,
            Err(e) => return not_initialized(e),
        };

        let request = HeadBucketRequest {
            bucket: config.bucket().to_string(),
            ..Default::default()
        };

        match runtime.block_on(self.client.head_bucket(request)) {
            Ok(()) => StoreResponse::ok(),
            Err(err) => classify_rusoto_error(err, |service| {
                #[allow(unreachable_patterns)]
                match service {
                    HeadBucketError::NoSuchBucket(message) => (StoreStatus::ErrorNoSuchBucket, message),
                    other => (StoreStatus::ErrorUnknown, other.to_string()),
                }
            }),
        }
    }

    fn put_object(
        &self,
        config: &StoreConfig,
        key: &ObjectKey,
        body: &mut dyn BodySource,
        content_length: u64,
    ) -> StoreResponse {
        let runtime = match lifecycle::global().runtime() {
            Ok(runtime) => runtime,
            Err(e) => return not_initialized(e),
        };

        let (sender, receiver) = mpsc::channel::<BodyChunk>(BODY_CHANNEL_DEPTH);
        let stream = ChunkStream {
            receiver: Mutex::new(receiver),
        };
        let request = PutObjectRequest {
            bucket: config.bucket().to_string(),
            key: key.as_str().to_string(),
            content_length: Some(content_length as i64),
            body: Some(ByteStream::new_with_size(stream, content_length as usize)),
            ..Default::default()
        };

        let client = self.client.clone();
        let in_flight = runtime.spawn(async move { client.put_object(request).await });

        let aborted = feed_body(body, &sender);
        drop(sender);

        match runtime.block_on(in_flight) {
            Err(join_error) => StoreResponse::with_detail(
                StoreStatus::ConnectionFailed,
                ErrorDetails {
                    message: Some(format!("request task failed: {}", join_error)),
                    ..Default::default()
                },
            ),
            Ok(_) if aborted => StoreResponse::status(StoreStatus::AbortedByCallback),
            Ok(Ok(_output)) => StoreResponse::ok(),
            Ok(Err(err)) => classify_rusoto_error(err, |service| (StoreStatus::ErrorUnknown, service.to_string())),
        }
    }
}

fn not_initialized(error: DetachError) -> StoreResponse {
    StoreResponse::with_detail(
        StoreStatus::InvalidRequest,
        ErrorDetails {
            message: Some(error.to_string()),
            ..Default::default()
        },
    )
}

/// Push the body into the request channel.
///
/// Returns `true` when the body had to be aborted because the local source
/// failed or ended before its declared size.
fn feed_body(body: &mut dyn BodySource, sender: &mpsc::Sender<BodyChunk>) -> bool {
    loop {
        let wanted = body.remaining().min(PUT_CHUNK_SIZE as u64) as usize;
        if wanted == 0 {
            return false;
        }

        match body.next_chunk(wanted) {
            Ok(chunk) => {
                let short = chunk.len() < wanted;
                if !chunk.is_empty() && sender.blocking_send(Ok(chunk)).is_err() {
                    // request already finished; its status says why
                    return false;
                }
                if short {
                    let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "local file ended before its declared size");
                    let _ = sender.blocking_send(Err(eof));
                    return true;
                }
            }
            Err(e) => {
                let _ = sender.blocking_send(Err(e));
                return true;
            }
        }
    }
}

/// Receiving half of the body channel, exposed as the stream rusoto expects.
struct ChunkStream {
    // Mutex only to make the stream Sync
    receiver: Mutex<mpsc::Receiver<BodyChunk>>,
}

impl Stream for ChunkStream {
    type Item = BodyChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let receiver = self
            .get_mut()
            .receiver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        receiver.poll_recv(cx)
    }
}

/// Translate a rusoto failure into the store status vocabulary.
fn classify_rusoto_error<E, F>(err: RusotoError<E>, service: F) -> StoreResponse
where
    F: FnOnce(E) -> (StoreStatus, String),
{
    match err {
        RusotoError::Service(e) => {
            let (status, message) = service(e);
            with_message(status, message)
        }
        RusotoError::HttpDispatch(e) => {
            let message = e.to_string();
            with_message(classify_dispatch(&message), message)
        }
        RusotoError::Credentials(e) => with_message(StoreStatus::CredentialsError, e.to_string()),
        RusotoError::Validation(message) => with_message(StoreStatus::InvalidRequest, message),
        RusotoError::ParseError(message) => with_message(StoreStatus::ResponseParseError, message),
        RusotoError::Unknown(response) => parse_error_response(response.status.as_u16(), &response.body),
        RusotoError::Blocking => StoreResponse::status(StoreStatus::ConnectionFailed),
    }
}

fn with_message(status: StoreStatus, message: String) -> StoreResponse {
    StoreResponse::with_detail(
        status,
        ErrorDetails {
            message: Some(message).filter(|m| !m.is_empty()),
            ..Default::default()
        },
    )
}

/// Classify a transport failure from its message.
fn classify_dispatch(message: &str) -> StoreStatus {
    let lower = message.to_lowercase();
    if lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve") {
        StoreStatus::NameLookupError
    } else if lower.contains("connect") {
        StoreStatus::FailedToConnect
    } else {
        StoreStatus::ConnectionFailed
    }
}

/// Parse an S3 XML error document into a status and its details.
pub(crate) fn parse_error_response(http_status: u16, body: &[u8]) -> StoreResponse {
    let text = String::from_utf8_lossy(body);
    let mut code: Option<String> = None;
    let mut detail = ErrorDetails::default();

    for caps in XML_ELEMENT.captures_iter(&text) {
        let (name, close) = (&caps[1], &caps[3]);
        let value = unescape_xml(caps[2].trim());
        if name != close || value.is_empty() {
            continue;
        }
        match name {
            "Code" => code = Some(value),
            "Message" => detail.message = Some(value),
            "Resource" => detail.resource = Some(value),
            "FurtherDetails" => detail.further_details = Some(value),
            _ => detail.extra.push((name.to_string(), value)),
        }
    }

    let status = match code {
        Some(code) => match StoreStatus::from_s3_code(&code) {
            StoreStatus::ErrorUnknown => {
                detail.extra.insert(0, ("Code".to_string(), code));
                fallback_status(http_status)
            }
            known => known,
        },
        None => fallback_status(http_status),
    };

    StoreResponse::with_detail(status, detail)
}

fn fallback_status(http_status: u16) -> StoreStatus {
    match StoreStatus::from_http_status(http_status) {
        // an error response with a success code is still an error
        StoreStatus::Ok => StoreStatus::ErrorUnknown,
        status => status,
    }
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
