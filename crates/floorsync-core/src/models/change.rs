//! Change record model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ChangePayload, ModelName};

/// Locally assigned, monotonically increasing change id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(i64);

impl ChangeId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Kind of mutation a change record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown change type: {other}"))),
        }
    }
}

/// Identity of the server entity a change targets
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub model_name: ModelName,
    /// Absent for a CREATE until the server assigns an id
    pub object_id: Option<String>,
}

impl ObjectKey {
    pub fn new(model_name: ModelName, object_id: impl Into<String>) -> Self {
        Self {
            model_name,
            object_id: Some(object_id.into()),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object_id {
            Some(id) => write!(f, "{}#{id}", self.model_name),
            None => write!(f, "{}#<new>", self.model_name),
        }
    }
}

/// A queued local mutation, as persisted in the change log.
///
/// Records are append-only: apart from `synced`, nothing changes after the
/// record is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    /// Correlation id transmitted with the change and echoed by the server
    pub client_id: Uuid,
    pub change_type: ChangeType,
    pub object_id: Option<String>,
    pub payload: ChangePayload,
    /// Entity version the client observed when the edit was made
    pub version_at_change: i64,
    /// Local creation time (Unix ms), display only
    pub created_at: i64,
    pub synced: bool,
}

impl Change {
    pub const fn model_name(&self) -> ModelName {
        self.payload.model_name()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            model_name: self.model_name(),
            object_id: self.object_id.clone(),
        }
    }

    /// Copy of this change's intent, pinned to a newer server version
    pub fn resubmission(&self, version_at_change: i64) -> NewChange {
        NewChange {
            change_type: self.change_type,
            object_id: self.object_id.clone(),
            payload: self.payload.clone(),
            version_at_change,
        }
    }
}

/// A mutation about to be appended to the change log
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub change_type: ChangeType,
    pub object_id: Option<String>,
    pub payload: ChangePayload,
    pub version_at_change: i64,
}

impl NewChange {
    /// Create a new entity; the server assigns its id
    pub const fn create(payload: ChangePayload) -> Self {
        Self {
            change_type: ChangeType::Create,
            object_id: None,
            payload,
            version_at_change: 0,
        }
    }

    /// Patch fields of an existing entity last seen at `version_at_change`
    pub fn update(
        object_id: impl Into<String>,
        version_at_change: i64,
        payload: ChangePayload,
    ) -> Self {
        Self {
            change_type: ChangeType::Update,
            object_id: Some(object_id.into()),
            payload,
            version_at_change,
        }
    }

    /// Delete an existing entity last seen at `version_at_change`
    pub fn delete(model: ModelName, object_id: impl Into<String>, version_at_change: i64) -> Self {
        Self {
            change_type: ChangeType::Delete,
            object_id: Some(object_id.into()),
            payload: ChangePayload::empty(model),
            version_at_change,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            model_name: self.payload.model_name(),
            object_id: self.object_id.clone(),
        }
    }

    /// Validate the change before it is queued.
    pub fn validate(&self) -> Result<()> {
        if self.version_at_change < 0 {
            return Err(Error::InvalidInput(format!(
                "version_at_change must not be negative (got {})",
                self.version_at_change
            )));
        }

        let object_id = self
            .object_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        match (self.change_type, object_id) {
            (ChangeType::Create, Some(id)) => {
                return Err(Error::InvalidInput(format!(
                    "CREATE must not carry an object id (got {id})"
                )));
            }
            (ChangeType::Update | ChangeType::Delete, None) => {
                return Err(Error::InvalidInput(format!(
                    "{} requires an object id",
                    self.change_type
                )));
            }
            _ => {}
        }

        self.payload.validate(self.change_type)
    }
}
