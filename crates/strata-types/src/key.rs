use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Parsed hierarchical entity key.
///
/// The canonical string form is
/// `/{group}/{resource}/{namespace}/{name}` with an optional trailing
/// `/{subresource}`. Every segment must be non-empty and must not contain
/// `/` or whitespace. Parsing then formatting yields the original string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub subresource: Option<String>,
}

impl EntityKey {
    /// Build a key from its components.
    pub fn new(
        group: impl Into<String>,
        resource: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            namespace: namespace.into(),
            name: name.into(),
            subresource: None,
        }
    }

    /// Attach a subresource segment.
    pub fn with_subresource(mut self, subresource: impl Into<String>) -> Self {
        self.subresource = Some(subresource.into());
        self
    }

    /// Parse the canonical string form.
    pub fn parse(key: &str) -> Result<Self, TypeError> {
        let malformed = |reason: &str| TypeError::MalformedKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let rest = key
            .strip_prefix('/')
            .ok_or_else(|| malformed("must start with '/'"))?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != 4 && segments.len() != 5 {
            return Err(malformed(
                "expected /{group}/{resource}/{namespace}/{name}[/{subresource}]",
            ));
        }
        if let Some(i) = segments.iter().position(|s| s.is_empty()) {
            return Err(malformed(&format!("segment {} is empty", i + 1)));
        }
        if let Some(i) = segments
            .iter()
            .position(|s| s.chars().any(char::is_whitespace))
        {
            return Err(malformed(&format!("segment {} contains whitespace", i + 1)));
        }

        Ok(Self {
            group: segments[0].to_string(),
            resource: segments[1].to_string(),
            namespace: segments[2].to_string(),
            name: segments[3].to_string(),
            subresource: segments.get(4).map(|s| s.to_string()),
        })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}",
            self.group, self.resource, self.namespace, self.name
        )?;
        if let Some(sub) = &self.subresource {
            write!(f, "/{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for EntityKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
