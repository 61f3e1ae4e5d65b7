//! Batch-sync wire format.
//!
//! `POST /sync/batch` carries every sendable pending change; the server
//! answers with a three-way partition of the batch (synced, conflicts,
//! failed). Echoed changes are decoded leniently: older servers send
//! integer object ids, omit `change_data`, and report conflicts as bare
//! field names.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Change, ChangeType, FieldConflict};

/// Request body for `POST /sync/batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSyncRequest {
    pub changes: Vec<WireChange>,
}

impl BatchSyncRequest {
    /// Build a request from pending records, preserving their order
    pub fn from_changes(changes: &[Change]) -> Result<Self> {
        let changes = changes
            .iter()
            .map(WireChange::from_change)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { changes })
    }
}

/// A change as it appears on the wire, in requests and in echoes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    /// Correlation id; absent when the server does not echo it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    pub change_type: ChangeType,
    pub model_name: String,
    #[serde(default, deserialize_with = "deserialize_object_id")]
    pub object_id: Option<String>,
    #[serde(default)]
    pub change_data: serde_json::Value,
    #[serde(default)]
    pub version_at_change: i64,
}

impl WireChange {
    pub fn from_change(change: &Change) -> Result<Self> {
        Ok(Self {
            client_id: Some(change.client_id),
            change_type: change.change_type,
            model_name: change.model_name().as_str().to_string(),
            object_id: change.object_id.clone(),
            change_data: change.payload.change_data()?,
            version_at_change: change.version_at_change,
        })
    }
}

/// Response body for `POST /sync/batch`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub results: SyncResults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResults {
    #[serde(default)]
    pub synced: Vec<SyncedEntry>,
    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,
    #[serde(default)]
    pub failed: Vec<FailedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedEntry {
    pub change: WireChange,
    /// Server-assigned id for an acknowledged CREATE
    #[serde(
        default,
        deserialize_with = "deserialize_object_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub new_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub change: WireChange,
    #[serde(default, deserialize_with = "deserialize_field_conflicts")]
    pub conflicts: Vec<FieldConflict>,
    /// Entity version on the server at the time of the check
    #[serde(default, alias = "current_version", skip_serializing_if = "Option::is_none")]
    pub server_version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub change: WireChange,
    #[serde(default, alias = "error")]
    pub reason: Option<String>,
}

fn deserialize_object_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(
        Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
            RawId::Text(text) => text,
            RawId::Int(value) => value.to_string(),
        }),
    )
}

fn deserialize_field_conflicts<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<FieldConflict>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawConflict {
        Detailed(FieldConflict),
        FieldOnly(String),
    }

    let raw = Option::<Vec<RawConflict>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|conflict| match conflict {
            RawConflict::Detailed(conflict) => conflict,
            RawConflict::FieldOnly(field) => FieldConflict {
                field,
                yours: serde_json::Value::Null,
                theirs: serde_json::Value::Null,
                base: serde_json::Value::Null,
            },
        })
        .collect())
}
