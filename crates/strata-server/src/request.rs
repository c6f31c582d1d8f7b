//! Request and response types for the entity service.
//!
//! Every type derives `serde` so transports and the CLI can carry them as
//! JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_types::Entity;

use crate::error::{ServerError, StatusCode};

/// Error payload carried in-band by write responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub code: StatusCode,
    pub message: String,
    /// Structured detail, e.g. the validation violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&ServerError> for ErrorResult {
    fn from(err: &ServerError) -> Self {
        let details = match err {
            ServerError::Validation(v) => serde_json::to_value(&v.violations).ok(),
            ServerError::Conflict {
                expected, actual, ..
            } => Some(serde_json::json!({ "expected": expected, "actual": actual })),
            ServerError::AlreadyExists { version, .. } => {
                Some(serde_json::json!({ "resource_version": version }))
            }
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            details,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntityRequest {
    pub entity: Entity,
}

impl CreateEntityRequest {
    pub fn new(entity: Entity) -> Self {
        Self { entity }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStatus {
    Created,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntityResponse {
    pub status: CreateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResult>,
}

impl CreateEntityResponse {
    pub fn created(entity: Entity) -> Self {
        Self {
            status: CreateStatus::Created,
            entity: Some(entity),
            error: None,
        }
    }

    pub fn from_error(err: &ServerError) -> Self {
        Self {
            status: CreateStatus::Error,
            entity: None,
            error: Some(err.into()),
        }
    }
}

/// Read the current revision of a key, or the revision recorded at
/// `resource_version`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadEntityRequest {
    pub key: String,
    pub resource_version: Option<u64>,
    pub with_body: bool,
    pub with_status: bool,
}

impl Default for ReadEntityRequest {
    fn default() -> Self {
        Self {
            key: String::new(),
            resource_version: None,
            with_body: true,
            with_status: true,
        }
    }
}

impl ReadEntityRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.resource_version = Some(version);
        self
    }

    pub fn without_body(mut self) -> Self {
        self.with_body = false;
        self
    }

    pub fn without_status(mut self) -> Self {
        self.with_status = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntityRequest {
    pub entity: Entity,
    /// When set, the update only applies if the current revision has this
    /// version.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl UpdateEntityRequest {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            expected_version: None,
        }
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Updated,
    /// The payload matched the current revision; nothing was written.
    Unchanged,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntityResponse {
    pub status: UpdateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResult>,
}

impl UpdateEntityResponse {
    pub fn from_error(err: &ServerError) -> Self {
        Self {
            status: UpdateStatus::Error,
            entity: None,
            error: Some(err.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntityRequest {
    pub key: String,
    #[serde(default)]
    pub expected_version: Option<u64>,
    /// Recorded as `updated_by` on the tombstone revision.
    #[serde(default)]
    pub deleted_by: String,
}

impl DeleteEntityRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expected_version: None,
            deleted_by: String::new(),
        }
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn by(mut self, deleted_by: impl Into<String>) -> Self {
        self.deleted_by = deleted_by.into();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Deleted,
    NotFound,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntityResponse {
    pub status: DeleteStatus,
    /// The tombstone revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResult>,
}

impl DeleteEntityResponse {
    /// `NotFound` errors get their own status; everything else is `Error`.
    pub fn from_error(err: &ServerError) -> Self {
        let status = match err {
            ServerError::NotFound(_) => DeleteStatus::NotFound,
            _ => DeleteStatus::Error,
        };
        Self {
            status,
            entity: None,
            error: Some(err.into()),
        }
    }
}

/// List current entities, key-ordered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityListRequest {
    /// Keys must start with one of these. Empty lists everything.
    pub key_prefixes: Vec<String>,
    /// Every label must match exactly.
    pub labels: BTreeMap<String, String>,
    /// Page size; zero selects the configured default.
    pub limit: usize,
    pub next_page_token: String,
    pub with_body: bool,
    pub with_status: bool,
}

impl Default for EntityListRequest {
    fn default() -> Self {
        Self {
            key_prefixes: Vec::new(),
            labels: BTreeMap::new(),
            limit: 0,
            next_page_token: String::new(),
            with_body: true,
            with_status: true,
        }
    }
}

impl EntityListRequest {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefixes: vec![prefix.into()],
            ..Default::default()
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.next_page_token = token.into();
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityListResponse {
    pub results: Vec<Entity>,
    /// Empty when there are no further pages.
    #[serde(default)]
    pub next_page_token: String,
}

/// Page through every recorded revision of a key, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityHistoryRequest {
    pub key: String,
    /// Page size; zero selects the configured history page size.
    pub limit: usize,
    pub next_page_token: String,
}

impl EntityHistoryRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.next_page_token = token.into();
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHistoryResponse {
    pub key: String,
    pub versions: Vec<Entity>,
    #[serde(default)]
    pub next_page_token: String,
}

/// Opaque page tokens: hex-encoded resume positions.
pub(crate) mod page_token {
    use crate::error::{ServerError, ServerResult};

    pub fn encode_key(key: &str) -> String {
        hex::encode(key.as_bytes())
    }

    pub fn decode_key(token: &str) -> ServerResult<Option<String>> {
        if token.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(token).map_err(|e| ServerError::InvalidPageToken(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| ServerError::InvalidPageToken(e.to_string()))
    }

    pub fn encode_version(version: u64) -> String {
        hex::encode(version.to_be_bytes())
    }

    pub fn decode_version(token: &str) -> ServerResult<u64> {
        if token.is_empty() {
            return Ok(0);
        }
        let bytes = hex::decode(token).map_err(|e| ServerError::InvalidPageToken(e.to_string()))?;
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ServerError::InvalidPageToken("expected 8 bytes".into()))?;
        Ok(u64::from_be_bytes(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{ValidationError, Violation};

    #[test]
    fn read_request_defaults_include_payload() {
        let req: ReadEntityRequest =
            serde_json::from_str(r#"{"key":"/a/b/c/d"}"#).unwrap();
        assert!(req.with_body);
        assert!(req.with_status);
        assert_eq!(req.resource_version, None);
        assert_eq!(ReadEntityRequest::new("/a/b/c/d"), req);
    }

    #[test]
    fn validation_error_result_lists_violations() {
        let err = ServerError::Validation(ValidationError {
            violations: vec![Violation::MissingKey, Violation::MissingCreatedBy],
        });
        let resp = CreateEntityResponse::from_error(&err);
        assert_eq!(resp.status, CreateStatus::Error);
        assert!(resp.entity.is_none());
        let error = resp.error.unwrap();
        assert_eq!(error.code, StatusCode::InvalidArgument);
        assert_eq!(
            error.details.unwrap(),
            serde_json::json!([
                { "violation": "missing_key" },
                { "violation": "missing_created_by" }
            ])
        );
    }

    #[test]
    fn delete_not_found_has_own_status() {
        let resp = DeleteEntityResponse::from_error(&ServerError::NotFound("/a/b/c/d".into()));
        assert_eq!(resp.status, DeleteStatus::NotFound);
        let resp = DeleteEntityResponse::from_error(&ServerError::Internal("boom".into()));
        assert_eq!(resp.status, DeleteStatus::Error);
    }

    #[test]
    fn conflict_details_carry_versions() {
        let err = ServerError::Conflict {
            key: "/a/b/c/d".into(),
            expected: 1,
            actual: 4,
        };
        let resp = UpdateEntityResponse::from_error(&err);
        assert_eq!(resp.status, UpdateStatus::Error);
        assert_eq!(
            resp.error.unwrap().details.unwrap(),
            serde_json::json!({ "expected": 1, "actual": 4 })
        );
    }

    #[test]
    fn response_json_omits_absent_parts() {
        let json = serde_json::to_value(UpdateEntityResponse {
            status: UpdateStatus::Unchanged,
            entity: None,
            error: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "status": "unchanged" }));
    }

    #[test]
    fn page_tokens() {
        let token = page_token::encode_key("/a/b/c/d");
        assert_eq!(page_token::decode_key(&token).unwrap().as_deref(), Some("/a/b/c/d"));
        assert_eq!(page_token::decode_key("").unwrap(), None);
        assert!(matches!(
            page_token::decode_key("zz"),
            Err(ServerError::InvalidPageToken(_))
        ));

        let token = page_token::encode_version(42);
        assert_eq!(page_token::decode_version(&token).unwrap(), 42);
        assert_eq!(page_token::decode_version("").unwrap(), 0);
        assert!(page_token::decode_version("abcd").is_err());
    }
}
