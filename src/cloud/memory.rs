//! In-memory object store.
//!
//! Used for `--dry-run` and by the tests. It pulls bodies exactly like the S3
//! backend does and can be scripted to answer with specific statuses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::cloud::client::{BodySource, ObjectStore};
use crate::cloud::status::{StoreResponse, StoreStatus};
use crate::config::StoreConfig;
use crate::constants::PUT_CHUNK_SIZE;
use crate::models::ObjectKey;
use crate::utils::checksum::ChecksumAccumulator;

/// An object received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub size: u64,
    pub crc: u32,
    /// Body bytes, when the store keeps them
    pub data: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    bucket_script: Mutex<VecDeque<StoreResponse>>,
    put_script: Mutex<VecDeque<StoreResponse>>,
    bucket_calls: AtomicU64,
    put_calls: AtomicU64,
    chunk_size: usize,
    keep_data: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            bucket_script: Mutex::new(VecDeque::new()),
            put_script: Mutex::new(VecDeque::new()),
            bucket_calls: AtomicU64::new(0),
            put_calls: AtomicU64::new(0),
            chunk_size: PUT_CHUNK_SIZE,
            keep_data: false,
        }
    }

    /// Keep received bodies so callers can compare them byte for byte.
    pub fn keep_data(mut self) -> Self {
        self.keep_data = true;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Answer the next bucket check with `response` instead of `Ok`.
    pub fn push_bucket_response(&self, response: StoreResponse) {
        lock(&self.bucket_script).push_back(response);
    }

    /// Answer the next PUT (from any worker) with `response` instead of storing it.
    pub fn push_put_response(&self, response: StoreResponse) {
        lock(&self.put_script).push_back(response);
    }

    pub fn bucket_calls(&self) -> u64 {
        self.bucket_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    /// Keys stored so far, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn test_bucket(&self, _config: &StoreConfig) -> StoreResponse {
        self.bucket_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.bucket_script).pop_front().unwrap_or_else(StoreResponse::ok)
    }

    fn put_object(
        &self,
        _config: &StoreConfig,
        key: &ObjectKey,
        body: &mut dyn BodySource,
        content_length: u64,
    ) -> StoreResponse {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(scripted) = lock(&self.put_script).pop_front() {
            if !scripted.status.is_ok() {
                // a failed request still pulls part of the body first
                let _ = body.next_chunk(self.chunk_size.min(content_length as usize));
                return scripted;
            }
        }

        let mut checksum = ChecksumAccumulator::new();
        let mut data = Vec::new();
        let mut received = 0u64;
        while received < content_length {
            let wanted = (content_length - received).min(self.chunk_size as u64) as usize;
            let chunk = match body.next_chunk(wanted) {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!("put_object {}: body failed: {}", key, e);
                    return StoreResponse::status(StoreStatus::AbortedByCallback);
                }
            };
            checksum.update(&chunk);
            if self.keep_data {
                data.extend_from_slice(&chunk);
            }
            received += chunk.len() as u64;
            if chunk.len() < wanted {
                break;
            }
        }

        if received < content_length {
            debug!("put_object {}: body ended after {} of {} bytes", key, received, content_length);
            return StoreResponse::status(StoreStatus::AbortedByCallback);
        }

        let object = StoredObject {
            size: received,
            crc: checksum.value(),
            data: self.keep_data.then_some(data),
        };
        lock(&self.objects).insert(key.as_str().to_string(), object);
        StoreResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupId;
    use crate::test_utils::{test_config, VecBody};
    use crate::utils::checksum::crc32_bytes;

    fn key(rel: &str) -> ObjectKey {
        ObjectKey::new(BackupId::from_timestamp(1_617_235_200), rel)
    }

    #[test]
    fn test_stores_object_with_checksum() {
        let store = MemoryStore::new().keep_data().with_chunk_size(7);
        let data = b"hello memory store".to_vec();
        let mut body = VecBody::new(data.clone());

        let response = store.put_object(&test_config(), &key("a/b"), &mut body, data.len() as u64);
        assert!(response.status.is_ok());

        let object = store.object("QQUYO0/a/b").unwrap();
        assert_eq!(object.size, data.len() as u64);
        assert_eq!(object.crc, crc32_bytes(&data));
        assert_eq!(object.data.unwrap(), data);
        assert_eq!(store.keys(), vec!["QQUYO0/a/b".to_string()]);
    }

    #[test]
    fn test_short_body_is_aborted() {
        let store = MemoryStore::new();
        let mut body = VecBody::new(vec![0; 10]).declared_size(20);
        let response = store.put_object(&test_config(), &key("short"), &mut body, 20);
        assert_eq!(response.status, StoreStatus::AbortedByCallback);
        assert!(store.is_empty());
    }

    #[test]
    fn test_scripted_failures_are_consumed_in_order() {
        let store = MemoryStore::new();
        store.push_put_response(StoreResponse::status(StoreStatus::ErrorSlowDown));
        store.push_bucket_response(StoreResponse::status(StoreStatus::ErrorAccessDenied));

        assert_eq!(store.test_bucket(&test_config()).status, StoreStatus::ErrorAccessDenied);
        assert!(store.test_bucket(&test_config()).status.is_ok());

        let mut body = VecBody::new(vec![1, 2, 3]);
        let first = store.put_object(&test_config(), &key("f"), &mut body, 3);
        assert_eq!(first.status, StoreStatus::ErrorSlowDown);
        assert!(store.is_empty());

        body.rewind().unwrap();
        let second = store.put_object(&test_config(), &key("f"), &mut body, 3);
        assert!(second.status.is_ok());
        assert_eq!(store.put_calls(), 2);
        assert_eq!(store.bucket_calls(), 2);
    }

    #[test]
    fn test_empty_object() {
        let store = MemoryStore::new();
        let mut body = VecBody::new(Vec::new());
        assert!(store.put_object(&test_config(), &key("empty"), &mut body, 0).status.is_ok());
        let object = store.object("QQUYO0/empty").unwrap();
        assert_eq!(object.size, 0);
        assert_eq!(object.crc, 0);
    }
}
