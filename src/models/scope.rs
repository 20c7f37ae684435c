//! Hierarchical scope model.
//!
//! A scope is a `resource:permission` pair. Each resource carries an ordered
//! permission list, highest privilege first. A granted scope includes a
//! required one iff both name the same resource and the granted permission
//! appears at or before the required one in that list. Inclusion never
//! crosses resources.
//!
//! The table is built once at startup and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("malformed scope '{0}': expected 'resource:permission'")]
    Malformed(String),

    #[error("unknown scope '{0}'")]
    UnknownScope(String),

    #[error("resource '{0}' has an empty permission list")]
    EmptyPermissions(String),

    #[error("resource '{resource}' lists permission '{permission}' more than once")]
    DuplicatePermission { resource: String, permission: String },

    #[error("resource '{0}' is defined more than once")]
    DuplicateResource(String),

    #[error("invalid name '{0}' in hierarchy")]
    InvalidName(String),
}

/// A parsed `resource:permission` pair. Parsing only checks the shape;
/// membership in the hierarchy is checked by [`ScopeModel::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope {
    resource: String,
    permission: String,
}

impl Scope {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn permission(&self) -> &str {
        &self.permission
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, permission) = s
            .split_once(':')
            .ok_or_else(|| ScopeError::Malformed(s.to_string()))?;
        if !valid_name(resource) || !valid_name(permission) {
            return Err(ScopeError::Malformed(s.to_string()));
        }
        Ok(Scope {
            resource: resource.to_string(),
            permission: permission.to_string(),
        })
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.permission)
    }
}

fn valid_name(s: &str) -> bool {
    !s.is_empty() && !s.contains(':') && !s.chars().any(char::is_whitespace)
}

/// On-disk form of the hierarchy: resource name → permissions, highest first.
///
/// ```yaml
/// resources:
///   - name: workspaces
///     permissions: [admin, delete, write, read]
///   - name: fcs
///     permissions: [analyze, write, read]
/// ```
#[derive(Debug, Deserialize)]
pub struct HierarchyFile {
    pub resources: Vec<ResourceDef>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceDef {
    pub name: String,
    pub permissions: Vec<String>,
}

/// Immutable permission hierarchy.
#[derive(Debug, Clone)]
pub struct ScopeModel {
    /// resource → (permission → rank), rank 0 is the lowest privilege.
    ranks: HashMap<String, HashMap<String, usize>>,
    /// Original ordering, highest first, kept for listing.
    order: Vec<(String, Vec<String>)>,
}

impl ScopeModel {
    /// Build a hierarchy from `(resource, [permissions high → low])` pairs.
    pub fn new<R, P>(resources: R) -> Result<Self, ScopeError>
    where
        R: IntoIterator<Item = (String, P)>,
        P: IntoIterator<Item = String>,
    {
        let mut ranks = HashMap::new();
        let mut order = Vec::new();

        for (resource, permissions) in resources {
            if !valid_name(&resource) {
                return Err(ScopeError::InvalidName(resource));
            }
            let permissions: Vec<String> = permissions.into_iter().collect();
            if permissions.is_empty() {
                return Err(ScopeError::EmptyPermissions(resource));
            }

            let top = permissions.len() - 1;
            let mut levels = HashMap::with_capacity(permissions.len());
            for (idx, permission) in permissions.iter().enumerate() {
                if !valid_name(permission) {
                    return Err(ScopeError::InvalidName(permission.clone()));
                }
                if levels.insert(permission.clone(), top - idx).is_some() {
                    return Err(ScopeError::DuplicatePermission {
                        resource,
                        permission: permission.clone(),
                    });
                }
            }

            if ranks.insert(resource.clone(), levels).is_some() {
                return Err(ScopeError::DuplicateResource(resource));
            }
            order.push((resource, permissions));
        }

        Ok(Self { ranks, order })
    }

    /// The hierarchy shipped with the service.
    pub fn builtin() -> Self {
        let table = [
            ("workspaces", &["admin", "delete", "write", "read"][..]),
            ("users", &["write", "read"][..]),
            ("fcs", &["analyze", "write", "read"][..]),
        ];
        Self::new(table.iter().map(|(resource, perms)| {
            (
                resource.to_string(),
                perms.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            )
        }))
        .expect("builtin hierarchy is valid")
    }

    /// Load a hierarchy from a YAML file.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let file: HierarchyFile = serde_yaml::from_str(raw)?;
        let model = Self::new(
            file.resources
                .into_iter()
                .map(|r| (r.name, r.permissions)),
        )?;
        Ok(model)
    }

    /// Rank of a permission within its resource (0 = lowest).
    pub fn level_of(&self, resource: &str, permission: &str) -> Result<usize, ScopeError> {
        self.ranks
            .get(resource)
            .and_then(|levels| levels.get(permission))
            .copied()
            .ok_or_else(|| ScopeError::UnknownScope(format!("{}:{}", resource, permission)))
    }

    /// Parse and validate a scope string against this hierarchy.
    pub fn parse(&self, raw: &str) -> Result<Scope, ScopeError> {
        let scope: Scope = raw.parse()?;
        self.level_of(&scope.resource, &scope.permission)?;
        Ok(scope)
    }

    /// Validate a requested scope list, dropping duplicates while keeping
    /// the caller's order.
    pub fn validate_all(&self, raw: &[String]) -> Result<Vec<Scope>, ScopeError> {
        let mut out: Vec<Scope> = Vec::with_capacity(raw.len());
        for s in raw {
            let scope = self.parse(s.trim())?;
            if !out.contains(&scope) {
                out.push(scope);
            }
        }
        Ok(out)
    }

    /// True iff `granted` covers `required`. Unknown scopes include nothing,
    /// which matters when the hierarchy changes under already issued tokens.
    pub fn includes(&self, granted: &Scope, required: &Scope) -> bool {
        if granted.resource != required.resource {
            return false;
        }
        match (
            self.level_of(&granted.resource, &granted.permission),
            self.level_of(&required.resource, &required.permission),
        ) {
            (Ok(g), Ok(r)) => g >= r,
            _ => false,
        }
    }

    /// True iff any of the granted scope strings includes `required`.
    /// Malformed stored scopes are skipped.
    pub fn any_includes<S: AsRef<str>>(&self, granted: &[S], required: &Scope) -> bool {
        granted
            .iter()
            .filter_map(|s| s.as_ref().parse::<Scope>().ok())
            .any(|g| self.includes(&g, required))
    }

    /// Highest granted scope for `resource`, if any.
    pub fn highest_scope<S: AsRef<str>>(&self, granted: &[S], resource: &str) -> Option<Scope> {
        granted
            .iter()
            .filter_map(|s| self.parse(s.as_ref()).ok())
            .filter(|s| s.resource == resource)
            .max_by_key(|s| self.level_of(&s.resource, &s.permission).unwrap_or(0))
    }

    /// Resources and their permissions, highest first, in definition order.
    pub fn resources(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.order.iter().map(|(r, p)| (r.as_str(), p.as_slice()))
    }
}
