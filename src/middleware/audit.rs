use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::middleware::metrics;
use crate::models::audit::AuditEntry;

#[derive(Debug, Error)]
pub enum AuditError {
    /// The write failed but the sink may recover (timeouts, dropped connections).
    #[error("transient audit write failure: {0}")]
    Transient(String),

    /// The sink is gone; nothing further can be recorded.
    #[error("audit sink unavailable: {0}")]
    Fatal(String),
}

/// Append-only destination for audit entries. There is deliberately no
/// update or delete.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Newest first.
    async fn entries_for_token(
        &self,
        token_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Writes one entry per authorization attempt.
///
/// Transient failures are logged and swallowed so the response path never
/// waits on audit availability; only a fatal sink error reaches the caller.
/// A write that outlives `timeout` counts as transient.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    async fn append_bounded(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        match tokio::time::timeout(self.timeout, self.sink.append(entry)).await {
            Ok(res) => res,
            Err(_) => Err(AuditError::Transient(format!(
                "append timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    pub async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        match self.append_bounded(&entry).await {
            Ok(()) => {
                tracing::debug!(
                    audit_id = %entry.id,
                    token_id = ?entry.token_id,
                    authorized = entry.authorized,
                    "audit entry recorded"
                );
                Ok(())
            }
            Err(AuditError::Transient(e)) => {
                metrics::record_audit_failure("transient");
                tracing::error!(
                    audit_id = %entry.id,
                    token_id = ?entry.token_id,
                    endpoint = %entry.endpoint,
                    "failed to write audit log: {}",
                    e
                );
                Ok(())
            }
            Err(fatal @ AuditError::Fatal(_)) => {
                metrics::record_audit_failure("fatal");
                tracing::error!(audit_id = %entry.id, "audit sink unavailable: {}", fatal);
                Err(fatal)
            }
        }
    }

    /// Fire-and-forget variant for paths that can no longer wait, such as a
    /// request future being dropped.
    pub fn record_detached(&self, entry: AuditEntry) {
        let recorder = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = recorder.record(entry).await;
                });
            }
            Err(_) => {
                tracing::error!(audit_id = %entry.id, "no runtime available, audit entry lost");
            }
        }
    }

    pub async fn entries_for_token(
        &self,
        token_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        self.sink.entries_for_token(token_id, limit).await
    }
}
