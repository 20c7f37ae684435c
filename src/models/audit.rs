use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One authorization attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    /// `None` when the credential never resolved to a token.
    pub token_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub source_address: String,
    pub method: String,
    pub endpoint: String,
    pub status_code: i16,
    pub authorized: bool,
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn allowed(
        token_id: Uuid,
        source_address: impl Into<String>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_id: Some(token_id),
            timestamp: Utc::now(),
            source_address: source_address.into(),
            method: method.into(),
            endpoint: endpoint.into(),
            status_code: status_code as i16,
            authorized: true,
            reason: None,
        }
    }

    pub fn denied(
        token_id: Option<Uuid>,
        source_address: impl Into<String>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        status_code: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_id,
            timestamp: Utc::now(),
            source_address: source_address.into(),
            method: method.into(),
            endpoint: endpoint.into(),
            status_code: status_code as i16,
            authorized: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_only_on_denial() {
        let ok = AuditEntry::allowed(Uuid::new_v4(), "10.0.0.1", "GET", "/api/v1/fcs/parameters", 200);
        assert!(ok.authorized);
        assert!(ok.reason.is_none());

        let denied = AuditEntry::denied(None, "10.0.0.1", "GET", "/x", 401, "Invalid token");
        assert!(!denied.authorized);
        assert_eq!(denied.reason.as_deref(), Some("Invalid token"));
        assert!(denied.token_id.is_none());
    }
}
