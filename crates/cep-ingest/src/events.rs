//! Domain event publication
//!
//! The pipeline announces created certifications through this seam; the
//! workflow and notification systems that react to them live outside this
//! crate. Publish failures are the caller's to log — committed data must
//! never be rolled back because a downstream consumer hiccuped.

use async_trait::async_trait;
use tracing::info;

/// Event emitted once per persisted certification, after commit
pub const CERTIFICATION_CREATED: &str = "CertificationCreated";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// Default publisher: structured log only.
///
/// Stands in until a real event bus is wired up; keeps the seam exercised in
/// every environment.
#[derive(Debug, Default, Clone)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        info!(event, payload = %payload, "Publishing domain event");
        Ok(())
    }
}
