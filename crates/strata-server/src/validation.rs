//! Request validation.
//!
//! Runs before any storage work. Every check is evaluated independently and
//! all failures are reported together, so a request missing both its key and
//! its creator says so.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_types::{Entity, EntityKey, TypeError};

/// A single reason a write request was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    MissingKey,
    MissingCreatedBy,
    MissingUpdatedBy,
    MalformedKey {
        key: String,
        reason: String,
    },
    /// An explicitly set component field disagrees with the key.
    KeyMismatch {
        field: String,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => write!(f, "missing key"),
            Self::MissingCreatedBy => write!(f, "missing created_by"),
            Self::MissingUpdatedBy => write!(f, "missing updated_by"),
            Self::MalformedKey { key, reason } => write!(f, "malformed key {key:?}: {reason}"),
            Self::KeyMismatch {
                field,
                expected,
                actual,
            } => write!(f, "{field} is {actual:?} but the key says {expected:?}"),
        }
    }
}

/// All violations found in one request. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid request: {}", join(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn contains(&self, violation: &Violation) -> bool {
        self.violations.contains(violation)
    }

    pub fn is_missing_key(&self) -> bool {
        self.contains(&Violation::MissingKey)
    }

    pub fn is_missing_created_by(&self) -> bool {
        self.contains(&Violation::MissingCreatedBy)
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a create request and resolve its key.
pub fn validate_create(entity: &Entity) -> Result<EntityKey, ValidationError> {
    let mut violations = Vec::new();
    let key = check_key(entity, &mut violations);
    if entity.created_by.trim().is_empty() {
        violations.push(Violation::MissingCreatedBy);
    }
    finish(key, violations)
}

/// Validate an update request and resolve its key.
pub fn validate_update(entity: &Entity) -> Result<EntityKey, ValidationError> {
    let mut violations = Vec::new();
    let key = check_key(entity, &mut violations);
    if entity.updated_by.trim().is_empty() {
        violations.push(Violation::MissingUpdatedBy);
    }
    finish(key, violations)
}

/// Validate a bare key, as carried by read, delete and history requests.
pub fn validate_key(key: &str) -> Result<EntityKey, ValidationError> {
    if key.is_empty() {
        return Err(ValidationError {
            violations: vec![Violation::MissingKey],
        });
    }
    EntityKey::parse(key).map_err(|e| ValidationError {
        violations: vec![malformed(key, e)],
    })
}

fn check_key(entity: &Entity, violations: &mut Vec<Violation>) -> Option<EntityKey> {
    if entity.key.is_empty() {
        violations.push(Violation::MissingKey);
        return None;
    }
    let parsed = match EntityKey::parse(&entity.key) {
        Ok(parsed) => parsed,
        Err(e) => {
            violations.push(malformed(&entity.key, e));
            return None;
        }
    };

    let subresource = parsed.subresource.as_deref().unwrap_or("");
    let components = [
        ("group", parsed.group.as_str(), entity.group.as_str()),
        ("resource", parsed.resource.as_str(), entity.resource.as_str()),
        ("namespace", parsed.namespace.as_str(), entity.namespace.as_str()),
        ("name", parsed.name.as_str(), entity.name.as_str()),
        ("subresource", subresource, entity.subresource.as_str()),
    ];
    for (field, expected, actual) in components {
        if !actual.is_empty() && actual != expected {
            violations.push(Violation::KeyMismatch {
                field: field.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Some(parsed)
}

fn malformed(key: &str, err: TypeError) -> Violation {
    let reason = match err {
        TypeError::MalformedKey { reason, .. } => reason,
        other => other.to_string(),
    };
    Violation::MalformedKey {
        key: key.to_string(),
        reason,
    }
}

fn finish(
    key: Option<EntityKey>,
    violations: Vec<Violation>,
) -> Result<EntityKey, ValidationError> {
    match key {
        Some(key) if violations.is_empty() => Ok(key),
        _ => Err(ValidationError { violations }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "/apps/deployments/prod/web";

    #[test]
    fn well_formed_create_resolves_key() {
        let key = validate_create(&Entity::new(KEY, "alice")).unwrap();
        assert_eq!(key, EntityKey::new("apps", "deployments", "prod", "web"));
    }

    #[test]
    fn missing_key_alone() {
        let err = validate_create(&Entity::new("", "alice")).unwrap_err();
        assert_eq!(err.violations, vec![Violation::MissingKey]);
        assert!(err.is_missing_key());
        assert!(!err.is_missing_created_by());
    }

    #[test]
    fn missing_created_by_alone() {
        let err = validate_create(&Entity::new(KEY, "")).unwrap_err();
        assert_eq!(err.violations, vec![Violation::MissingCreatedBy]);
        assert!(!err.is_missing_key());
    }

    #[test]
    fn missing_both_reports_both() {
        let err = validate_create(&Entity::default()).unwrap_err();
        assert!(err.is_missing_key());
        assert!(err.is_missing_created_by());
        assert_eq!(err.violations.len(), 2);
        assert_eq!(err.to_string(), "invalid request: missing key; missing created_by");
    }

    #[test]
    fn whitespace_creator_is_missing() {
        let err = validate_create(&Entity::new(KEY, "  ")).unwrap_err();
        assert!(err.is_missing_created_by());
    }

    #[test]
    fn malformed_key_carries_reason() {
        let err = validate_create(&Entity::new("/apps//prod/web", "alice")).unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation::MalformedKey {
                key: "/apps//prod/web".into(),
                reason: "segment 2 is empty".into(),
            }]
        );
    }

    #[test]
    fn padded_key_segment_is_malformed() {
        let err = validate_create(&Entity::new("/ apps/deployments/prod/web", "alice")).unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation::MalformedKey {
                key: "/ apps/deployments/prod/web".into(),
                reason: "segment 1 contains whitespace".into(),
            }]
        );
    }

    #[test]
    fn explicit_components_must_match_key() {
        let mut entity = Entity::new(KEY, "alice");
        entity.group = "apps".into();
        entity.namespace = "staging".into();
        entity.subresource = "scale".into();
        let err = validate_create(&entity).unwrap_err();
        assert_eq!(
            err.violations,
            vec![
                Violation::KeyMismatch {
                    field: "namespace".into(),
                    expected: "prod".into(),
                    actual: "staging".into(),
                },
                Violation::KeyMismatch {
                    field: "subresource".into(),
                    expected: "".into(),
                    actual: "scale".into(),
                },
            ]
        );
    }

    #[test]
    fn update_requires_updated_by_not_created_by() {
        let mut entity = Entity::new(KEY, "");
        assert_eq!(
            validate_update(&entity).unwrap_err().violations,
            vec![Violation::MissingUpdatedBy]
        );
        entity.updated_by = "bob".into();
        assert!(validate_update(&entity).is_ok());
    }

    #[test]
    fn bare_key_validation() {
        assert!(validate_key(KEY).is_ok());
        assert!(validate_key("").unwrap_err().is_missing_key());
        assert!(matches!(
            validate_key("apps/deployments").unwrap_err().violations[0],
            Violation::MalformedKey { .. }
        ));
    }

    #[test]
    fn violations_serialize_tagged() {
        let json = serde_json::to_value(Violation::MissingCreatedBy).unwrap();
        assert_eq!(json, serde_json::json!({ "violation": "missing_created_by" }));
    }
}
