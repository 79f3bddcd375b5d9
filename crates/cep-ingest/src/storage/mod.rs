//! Object storage access
//!
//! The rest of the crate consumes storage through the narrow [`ObjectStore`]
//! / [`LineStream`] traits: existence checks, whole-object line streaming,
//! byte-range line streaming, and presigned upload URLs. [`Storage`] is the
//! S3-compatible implementation (AWS or MinIO path-style).
//!
//! Lines are yielded with their exact raw byte length, newline included, so
//! the reader can keep byte-accurate offsets even across blank or malformed
//! lines.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub mod config;

/// Errors from the storage layer. All of them map to taxonomy code STG_001
/// at the processing boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    Request(String),

    #[error("storage read failed: {0}")]
    Read(String),
}

/// One raw line from an object.
///
/// `byte_len` is the exact number of bytes the line occupied in the object,
/// including its terminating newline (and carriage return) when present.
/// `text` has the line ending stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    pub byte_len: u64,
}

/// Pull-based line stream over an object or a byte range of one
#[async_trait]
pub trait LineStream: Send {
    async fn next_line(&mut self) -> Result<Option<RawLine>, StorageError>;
}

/// Narrow storage interface the ingestion core consumes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the object exists (HEAD)
    async fn object_exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Stream the whole object line by line
    async fn stream_lines(&self, key: &str) -> Result<Box<dyn LineStream>, StorageError>;

    /// Stream an inclusive byte range of the object line by line
    async fn stream_line_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<Box<dyn LineStream>, StorageError>;

    /// Presigned PUT URL for direct client uploads
    async fn signed_upload_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

/// S3-compatible object storage client
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(config: config::StorageConfig) -> anyhow::Result<Self> {
        debug!("Initializing storage client for bucket: {}", config.bucket);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "cep-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    /// Conventional key for an uploaded source file
    pub fn build_upload_key(&self, batch_id: &str, filename: &str) -> String {
        format!("batch-uploads/{}/{}", batch_id, filename)
    }
}

#[async_trait]
impl ObjectStore for Storage {
    #[instrument(skip(self))]
    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("404") {
                    Ok(false)
                } else {
                    Err(StorageError::Request(e.to_string()))
                }
            },
        }
    }

    #[instrument(skip(self))]
    async fn stream_lines(&self, key: &str) -> Result<Box<dyn LineStream>, StorageError> {
        debug!("Streaming s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Request(e.to_string())
                }
            })?;

        Ok(Box::new(ByteStreamLines::new(response.body)))
    }

    #[instrument(skip(self))]
    async fn stream_line_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<Box<dyn LineStream>, StorageError> {
        debug!(
            "Streaming s3://{}/{} bytes {}-{}",
            self.bucket, key, start, end
        );

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Request(e.to_string())
                }
            })?;

        Ok(Box::new(ByteStreamLines::new(response.body)))
    }

    #[instrument(skip(self))]
    async fn signed_upload_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Request(e.to_string()))?;

        let presigned_request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }
}

/// Incremental line splitter over an S3 body.
///
/// Buffers only the bytes of the line being assembled, never the whole
/// object.
struct ByteStreamLines {
    body: ByteStream,
    buf: Vec<u8>,
    exhausted: bool,
}

impl ByteStreamLines {
    fn new(body: ByteStream) -> Self {
        Self {
            body,
            buf: Vec::new(),
            exhausted: false,
        }
    }

    fn take_line(&mut self, newline_at: usize) -> RawLine {
        let rest = self.buf.split_off(newline_at + 1);
        let raw = std::mem::replace(&mut self.buf, rest);
        line_from_raw(&raw)
    }
}

#[async_trait]
impl LineStream for ByteStreamLines {
    async fn next_line(&mut self) -> Result<Option<RawLine>, StorageError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                return Ok(Some(self.take_line(pos)));
            }

            if self.exhausted {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Final line without a trailing newline
                let raw = std::mem::take(&mut self.buf);
                return Ok(Some(line_from_raw(&raw)));
            }

            match self
                .body
                .try_next()
                .await
                .map_err(|e| StorageError::Read(e.to_string()))?
            {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
    }
}

/// Build a [`RawLine`] from raw bytes, stripping the line ending from the
/// text while counting it in `byte_len`.
pub(crate) fn line_from_raw(raw: &[u8]) -> RawLine {
    let byte_len = raw.len() as u64;
    let mut content = raw;
    if content.ends_with(b"\n") {
        content = &content[..content.len() - 1];
    }
    if content.ends_with(b"\r") {
        content = &content[..content.len() - 1];
    }
    RawLine {
        text: String::from_utf8_lossy(content).into_owned(),
        byte_len,
    }
}
