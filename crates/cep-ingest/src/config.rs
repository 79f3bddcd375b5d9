//! Configuration management

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::storage::config::StorageConfig;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/cep";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default records per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default attempt budget for a failed chunk.
pub const DEFAULT_MAX_CHUNK_ATTEMPTS: u32 = 3;

/// Default attempt budget for a failed job.
pub const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 3;

/// Default worker threads for job processing.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default presigned upload URL expiry in seconds (15 minutes).
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 900;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Records held in memory per chunk
    pub chunk_size: usize,
    /// Retry budget for a chunk that failed with a database error
    pub max_chunk_attempts: u32,
    /// Retry budget for a job that failed with a storage error
    pub max_job_attempts: u32,
    /// Worker threads for job processing
    pub worker_threads: usize,
    /// Presigned upload URL expiry in seconds
    pub presign_expiry_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = AppConfig {
            database: DatabaseConfig::from_env(),
            storage: StorageConfig::from_env()?,
            ingest: IngestConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.ingest.validate()?;

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            min_connections: std::env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
            connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Build the connection pool
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .connect(&self.url)
            .await
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            chunk_size: std::env::var("INGEST_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            max_chunk_attempts: std::env::var("INGEST_MAX_CHUNK_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_CHUNK_ATTEMPTS),
            max_job_attempts: std::env::var("INGEST_MAX_JOB_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_JOB_ATTEMPTS),
            worker_threads: std::env::var("INGEST_WORKER_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WORKER_THREADS),
            presign_expiry_secs: std::env::var("INGEST_PRESIGN_EXPIRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PRESIGN_EXPIRY_SECS),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("INGEST_CHUNK_SIZE must be greater than 0");
        }
        if self.max_chunk_attempts == 0 {
            anyhow::bail!("INGEST_MAX_CHUNK_ATTEMPTS must be greater than 0");
        }
        if self.max_job_attempts == 0 {
            anyhow::bail!("INGEST_MAX_JOB_ATTEMPTS must be greater than 0");
        }
        if self.worker_threads == 0 {
            anyhow::bail!("INGEST_WORKER_THREADS must be greater than 0");
        }
        Ok(())
    }

    /// Presigned URL expiry as a Duration
    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_attempts: DEFAULT_MAX_CHUNK_ATTEMPTS,
            max_job_attempts: DEFAULT_MAX_JOB_ATTEMPTS,
            worker_threads: DEFAULT_WORKER_THREADS,
            presign_expiry_secs: DEFAULT_PRESIGN_EXPIRY_SECS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}
