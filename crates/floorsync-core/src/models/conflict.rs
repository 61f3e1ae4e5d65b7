//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{Change, ChangeId, ObjectKey};

/// One field the server refused to overwrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    /// Value the client intended to write
    #[serde(default)]
    pub yours: serde_json::Value,
    /// Value currently on the server
    #[serde(default)]
    pub theirs: serde_json::Value,
    /// Value the client started from
    #[serde(default)]
    pub base: serde_json::Value,
}

/// All field conflicts reported for one queued change in one sync cycle.
///
/// Transient: held in memory by the resolver, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSet {
    /// The local record the server rejected
    pub change: Change,
    pub conflicts: Vec<FieldConflict>,
    /// Entity version on the server when the conflict was detected
    pub server_version: Option<i64>,
}

impl ConflictSet {
    pub const fn change_id(&self) -> ChangeId {
        self.change.id
    }

    pub fn key(&self) -> ObjectKey {
        self.change.key()
    }

    /// Names of the conflicting fields
    pub fn fields(&self) -> Vec<&str> {
        self.conflicts
            .iter()
            .map(|conflict| conflict.field.as_str())
            .collect()
    }
}

/// Whole-side choice applied to a conflicted change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Abandon the local change and adopt the server's value
    UseServer,
    /// Resubmit the local change against the server's current version
    UseMine,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UseServer => "USE_SERVER",
            Self::UseMine => "USE_MINE",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "use_server" | "server" | "theirs" => Ok(Self::UseServer),
            "use_mine" | "mine" | "yours" => Ok(Self::UseMine),
            other => Err(Error::InvalidInput(format!(
                "Unknown resolution: {other} (expected mine or server)"
            ))),
        }
    }
}
