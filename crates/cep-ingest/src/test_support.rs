//! Shared test doubles
//!
//! In-memory stand-ins for the storage, dispatch, and event seams, plus row
//! builders used across test modules.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::events::EventPublisher;
use crate::jobs::JobDispatcher;
use crate::reader::ParsedRow;
use crate::storage::{line_from_raw, LineStream, ObjectStore, RawLine, StorageError};

/// In-memory object store with the same byte semantics as S3
#[derive(Default)]
pub(crate) struct MemoryObjectStore {
    objects: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub(crate) fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .insert(key.to_string(), bytes);
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).is_some())
    }

    async fn stream_lines(&self, key: &str) -> Result<Box<dyn LineStream>, StorageError> {
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::new(MemoryLineStream::new(data)))
    }

    async fn stream_line_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<Box<dyn LineStream>, StorageError> {
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let start = start as usize;
        let end = (end as usize + 1).min(data.len());
        if start >= end {
            return Ok(Box::new(MemoryLineStream::new(Vec::new())));
        }
        Ok(Box::new(MemoryLineStream::new(data[start..end].to_vec())))
    }

    async fn signed_upload_url(
        &self,
        key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "https://storage.test/{}?expires={}",
            key,
            expires_in.as_secs()
        ))
    }
}

/// Line stream over a byte buffer, newline-inclusive byte lengths
pub(crate) struct MemoryLineStream {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryLineStream {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

#[async_trait]
impl LineStream for MemoryLineStream {
    async fn next_line(&mut self) -> Result<Option<RawLine>, StorageError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }

        let rest = &self.data[self.pos..];
        let raw = match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => &rest[..=idx],
            None => rest,
        };
        self.pos += raw.len();

        Ok(Some(line_from_raw(raw)))
    }
}

/// Dispatcher that records enqueued batch ids
#[derive(Default)]
pub(crate) struct CapturingDispatcher {
    enqueued: Mutex<Vec<Uuid>>,
}

impl CapturingDispatcher {
    pub(crate) async fn enqueued(&self) -> Vec<Uuid> {
        self.enqueued.lock().await.clone()
    }
}

#[async_trait]
impl JobDispatcher for CapturingDispatcher {
    async fn enqueue(&self, batch_upload_id: Uuid) -> anyhow::Result<()> {
        self.enqueued.lock().await.push(batch_upload_id);
        Ok(())
    }
}

/// Publisher that records events instead of delivering them
#[derive(Default)]
pub(crate) struct CapturingEventPublisher {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl CapturingEventPublisher {
    pub(crate) async fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for CapturingEventPublisher {
    async fn publish(&self, event: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        self.published
            .lock()
            .await
            .push((event.to_string(), payload));
        Ok(())
    }
}

/// Row builder for validator/processor tests
pub(crate) fn csv_row(row_number: i64, fields: &[(&str, &str)]) -> ParsedRow {
    ParsedRow {
        row_number,
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}
