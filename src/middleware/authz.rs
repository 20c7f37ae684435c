//! Authorization decision for a resolved token.
//!
//! [`Authorizer::decide`] does no I/O. The caller owns the side effects
//! (audit write, `last_used_at` bump).

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::models::scope::{Scope, ScopeModel};
use crate::models::token::Token;

/// Why a request was denied. The strings are part of the external contract
/// and end up verbatim in audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    InvalidToken,
    Revoked,
    Expired,
    IpNotAllowed,
    InsufficientPermissions,
    /// The caller went away before a decision was reached.
    Aborted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::InvalidToken => "Invalid token",
            DenyReason::Revoked => "Token revoked",
            DenyReason::Expired => "Token expired",
            DenyReason::IpNotAllowed => "IP address not allowed",
            DenyReason::InsufficientPermissions => "Insufficient permissions",
            DenyReason::Aborted => "Request aborted",
        }
    }

    /// Status recorded in the audit trail and returned to the client.
    pub fn status_code(&self) -> u16 {
        match self {
            DenyReason::InvalidToken | DenyReason::Revoked | DenyReason::Expired => 401,
            DenyReason::IpNotAllowed | DenyReason::InsufficientPermissions => 403,
            // nginx's "client closed request"
            DenyReason::Aborted => 499,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DenyReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// `{allowed, reason}` handed back to protected handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[derive(Clone)]
pub struct Authorizer {
    scopes: Arc<ScopeModel>,
}

impl Authorizer {
    pub fn new(scopes: Arc<ScopeModel>) -> Self {
        Self { scopes }
    }

    pub fn scope_model(&self) -> &ScopeModel {
        &self.scopes
    }

    /// Checks run in a fixed order: revocation, expiry, source address,
    /// scope. A revoked token past its expiry therefore reports revocation.
    pub fn decide(
        &self,
        token: &Token,
        required: &Scope,
        source: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Verdict {
        if token.is_revoked() {
            return Verdict::deny(DenyReason::Revoked);
        }
        if token.is_expired_at(now) {
            return Verdict::deny(DenyReason::Expired);
        }
        if !source_allowed(token.allowed_ips.as_deref(), source) {
            return Verdict::deny(DenyReason::IpNotAllowed);
        }
        if !self.scopes.any_includes(&token.scopes, required) {
            return Verdict::deny(DenyReason::InsufficientPermissions);
        }
        Verdict::allow()
    }
}

/// An absent or empty allowlist admits every source. A non-empty one
/// rejects requests whose source address is unknown.
fn source_allowed(allowed: Option<&[String]>, source: Option<IpAddr>) -> bool {
    let Some(allowed) = allowed.filter(|a| !a.is_empty()) else {
        return true;
    };
    let Some(source) = source.map(|ip| ip.to_canonical()) else {
        return false;
    };
    allowed
        .iter()
        .filter_map(|a| a.parse::<IpAddr>().ok())
        .any(|a| a.to_canonical() == source)
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn authorizer() -> Authorizer {
        Authorizer::new(Arc::new(ScopeModel::builtin()))
    }

    fn token(scopes: &[&str]) -> Token {
        let now = Utc::now();
        Token {
            id: Uuid::new_v4(),
            owner_id: "alice".into(),
            name: "ci".into(),
            token_prefix: "pat_0123abcd".into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            allowed_ips: None,
            created_at: now,
            expires_at: Some(now + Duration::days(30)),
            revoked_at: None,
            last_used_at: None,
        }
    }

    fn scope(s: &str) -> Scope {
        s.parse().unwrap()
    }

    #[test]
    fn test_admin_includes_read_but_not_other_resource() {
        let a = authorizer();
        let t = token(&["workspaces:admin"]);
        let now = Utc::now();

        assert_eq!(a.decide(&t, &scope("workspaces:read"), None, now), Verdict::allow());
        assert_eq!(
            a.decide(&t, &scope("fcs:read"), None, now),
            Verdict::deny(DenyReason::InsufficientPermissions)
        );
    }

    #[test]
    fn test_hierarchy_both_directions() {
        let a = authorizer();
        let model = ScopeModel::builtin();
        let now = Utc::now();
        for (resource, perms) in model.resources() {
            for (i, high) in perms.iter().enumerate() {
                for low in &perms[i + 1..] {
                    let high_scope = format!("{}:{}", resource, high);
                    let low_scope = format!("{}:{}", resource, low);
                    let t_high = token(&[high_scope.as_str()]);
                    let t_low = token(&[low_scope.as_str()]);
                    assert!(a.decide(&t_high, &scope(&low_scope), None, now).allowed);
                    assert!(!a.decide(&t_low, &scope(&high_scope), None, now).allowed);
                }
            }
        }
    }

    #[test]
    fn test_highest_on_one_resource_grants_nothing_elsewhere() {
        let a = authorizer();
        let model = ScopeModel::builtin();
        let now = Utc::now();
        for (r1, perms1) in model.resources() {
            let t = token(&[format!("{}:{}", r1, perms1[0]).as_str()]);
            for (r2, perms2) in model.resources().filter(|(r, _)| *r != r1) {
                for p in perms2 {
                    let v = a.decide(&t, &scope(&format!("{}:{}", r2, p)), None, now);
                    assert_eq!(v.reason, Some(DenyReason::InsufficientPermissions));
                }
            }
        }
    }

    #[test]
    fn test_expired_token() {
        let a = authorizer();
        let mut t = token(&["fcs:read"]);
        t.expires_at = Some(Utc::now() - Duration::hours(1));
        let v = a.decide(&t, &scope("fcs:read"), None, Utc::now());
        assert_eq!(v, Verdict::deny(DenyReason::Expired));
        assert_eq!(v.reason.unwrap().to_string(), "Token expired");
    }

    #[test]
    fn test_revoked_token() {
        let a = authorizer();
        let mut t = token(&["fcs:read"]);
        t.revoked_at = Some(Utc::now());
        let v = a.decide(&t, &scope("fcs:read"), None, Utc::now());
        assert_eq!(v.reason.map(|r| r.as_str()), Some("Token revoked"));
    }

    #[test]
    fn test_revocation_beats_expiry() {
        let a = authorizer();
        let mut t = token(&["fcs:read"]);
        t.expires_at = Some(Utc::now() - Duration::days(3));
        t.revoked_at = Some(Utc::now() - Duration::days(5));
        let v = a.decide(&t, &scope("fcs:read"), None, Utc::now());
        assert_eq!(v.reason, Some(DenyReason::Revoked));
    }

    #[test]
    fn test_valid_at_exact_expiry_instant() {
        let a = authorizer();
        let mut t = token(&["fcs:read"]);
        let exp = Utc::now();
        t.expires_at = Some(exp);
        assert!(a.decide(&t, &scope("fcs:read"), None, exp).allowed);
        assert!(!a.decide(&t, &scope("fcs:read"), None, exp + Duration::milliseconds(1)).allowed);
    }

    #[test]
    fn test_never_expiring_token() {
        let a = authorizer();
        let mut t = token(&["fcs:read"]);
        t.expires_at = None;
        let far = Utc::now() + Duration::days(10_000);
        assert!(a.decide(&t, &scope("fcs:read"), None, far).allowed);
    }

    #[test]
    fn test_ip_allowlist() {
        let a = authorizer();
        let mut t = token(&["fcs:read"]);
        t.allowed_ips = Some(vec!["10.0.0.1".into(), "::1".into()]);
        let now = Utc::now();
        let required = scope("fcs:read");

        assert!(a.decide(&t, &required, Some("10.0.0.1".parse().unwrap()), now).allowed);
        assert!(a.decide(&t, &required, Some("::ffff:10.0.0.1".parse().unwrap()), now).allowed);
        assert_eq!(
            a.decide(&t, &required, Some("10.0.0.2".parse().unwrap()), now).reason,
            Some(DenyReason::IpNotAllowed)
        );
        assert_eq!(
            a.decide(&t, &required, None, now).reason,
            Some(DenyReason::IpNotAllowed)
        );

        t.allowed_ips = Some(vec![]);
        assert!(a.decide(&t, &required, None, now).allowed);
    }

    #[test]
    fn test_ip_checked_after_expiry_before_scope() {
        let a = authorizer();
        let mut t = token(&["fcs:read"]);
        t.allowed_ips = Some(vec!["10.0.0.1".into()]);
        let stranger = Some("192.168.1.1".parse().unwrap());

        let v = a.decide(&t, &scope("workspaces:admin"), stranger, Utc::now());
        assert_eq!(v.reason, Some(DenyReason::IpNotAllowed));

        t.expires_at = Some(Utc::now() - Duration::seconds(1));
        let v = a.decide(&t, &scope("fcs:read"), stranger, Utc::now());
        assert_eq!(v.reason, Some(DenyReason::Expired));
    }

    #[test]
    fn test_scope_removed_from_hierarchy_grants_nothing() {
        let a = authorizer();
        let t = token(&["legacy:admin"]);
        let v = a.decide(&t, &scope("fcs:read"), None, Utc::now());
        assert_eq!(v.reason, Some(DenyReason::InsufficientPermissions));
    }

    #[test]
    fn test_verdict_serializes_reason_string() {
        let json = serde_json::to_value(Verdict::deny(DenyReason::Expired)).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["reason"], "Token expired");
        let json = serde_json::to_value(Verdict::allow()).unwrap();
        assert!(json["reason"].is_null());
    }
}
