//! Typed change payloads, one schema per server model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::ChangeType;

/// Server models that can be mutated offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelName {
    FloorPlan,
    Room,
    Booking,
}

impl ModelName {
    /// Wire name of the model
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FloorPlan => "FloorPlan",
            Self::Room => "Room",
            Self::Booking => "Booking",
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "FloorPlan" => Ok(Self::FloorPlan),
            "Room" => Ok(Self::Room),
            "Booking" => Ok(Self::Booking),
            other => Err(Error::InvalidInput(format!("Unsupported model: {other}"))),
        }
    }
}

/// Field patch for a floor plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FloorPlanFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_number: Option<i64>,
}

/// Field patch for a room
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_plan: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_type: Option<RoomType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_projector: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_whiteboard: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_video_conference: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_tv_monitor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_premium_audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_natural_light: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_kitchen_access: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_under_maintenance: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Meeting,
    Conference,
    Huddle,
    PhoneBooth,
}

/// Field patch for a booking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<i64>,
    /// Start of the booking (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    /// End of the booking (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Completed,
}

/// Field-level payload of a change, tagged by the model it targets.
///
/// Serializes as `{"model_name": "...", "change_data": {...}}`, which is the
/// shape both the change log and the batch-sync request use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_name", content = "change_data")]
pub enum ChangePayload {
    FloorPlan(FloorPlanFields),
    Room(RoomFields),
    Booking(BookingFields),
}

impl ChangePayload {
    /// An empty payload for the given model (used by DELETE)
    pub fn empty(model: ModelName) -> Self {
        match model {
            ModelName::FloorPlan => Self::FloorPlan(FloorPlanFields::default()),
            ModelName::Room => Self::Room(RoomFields::default()),
            ModelName::Booking => Self::Booking(BookingFields::default()),
        }
    }

    /// Parse a payload from a model name and a raw `change_data` object
    pub fn from_parts(model: ModelName, change_data: serde_json::Value) -> Result<Self> {
        let change_data = if change_data.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            change_data
        };
        Ok(match model {
            ModelName::FloorPlan => Self::FloorPlan(serde_json::from_value(change_data)?),
            ModelName::Room => Self::Room(serde_json::from_value(change_data)?),
            ModelName::Booking => Self::Booking(serde_json::from_value(change_data)?),
        })
    }

    pub const fn model_name(&self) -> ModelName {
        match self {
            Self::FloorPlan(_) => ModelName::FloorPlan,
            Self::Room(_) => ModelName::Room,
            Self::Booking(_) => ModelName::Booking,
        }
    }

    /// The `change_data` object as JSON
    pub fn change_data(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::FloorPlan(fields) => serde_json::to_value(fields)?,
            Self::Room(fields) => serde_json::to_value(fields)?,
            Self::Booking(fields) => serde_json::to_value(fields)?,
        };
        Ok(value)
    }

    /// Number of fields the payload sets
    pub fn field_count(&self) -> usize {
        self.change_data()
            .ok()
            .and_then(|value| value.as_object().map(serde_json::Map::len))
            .unwrap_or(0)
    }

    /// Check the payload against the rules for `change_type`.
    pub fn validate(&self, change_type: ChangeType) -> Result<()> {
        match change_type {
            ChangeType::Create => self.require_create_fields()?,
            ChangeType::Update => {
                if self.field_count() == 0 {
                    return Err(Error::InvalidInput(format!(
                        "{} update must change at least one field",
                        self.model_name()
                    )));
                }
            }
            ChangeType::Delete => return Ok(()),
        }
        self.check_values()
    }

    fn require_create_fields(&self) -> Result<()> {
        let missing: Vec<&str> = match self {
            Self::FloorPlan(fields) => [
                ("name", fields.name.is_none()),
                ("floor_number", fields.floor_number.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect(),
            Self::Room(fields) => [
                ("floor_plan", fields.floor_plan.is_none()),
                ("name", fields.name.is_none()),
                ("room_number", fields.room_number.is_none()),
                ("capacity", fields.capacity.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect(),
            Self::Booking(fields) => [
                ("room", fields.room.is_none()),
                ("start_time", fields.start_time.is_none()),
                ("end_time", fields.end_time.is_none()),
                ("participants_count", fields.participants_count.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect(),
        };

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "{} create is missing required fields: {}",
                self.model_name(),
                missing.join(", ")
            )))
        }
    }

    fn check_values(&self) -> Result<()> {
        match self {
            Self::FloorPlan(fields) => check_name(fields.name.as_deref(), "name"),
            Self::Room(fields) => {
                check_name(fields.name.as_deref(), "name")?;
                check_name(fields.room_number.as_deref(), "room_number")?;
                check_positive(fields.capacity, "capacity")
            }
            Self::Booking(fields) => {
                check_positive(fields.participants_count, "participants_count")?;
                if let (Some(start), Some(end)) = (fields.start_time, fields.end_time) {
                    if end <= start {
                        return Err(Error::InvalidInput(
                            "Booking end_time must be after start_time".to_string(),
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_name(value: Option<&str>, field: &str) -> Result<()> {
    match value {
        Some(value) if value.trim().is_empty() => {
            Err(Error::InvalidInput(format!("{field} must not be blank")))
        }
        _ => Ok(()),
    }
}

fn check_positive(value: Option<i64>, field: &str) -> Result<()> {
    match value {
        Some(value) if value < 1 => Err(Error::InvalidInput(format!(
            "{field} must be at least 1 (got {value})"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn payload_serializes_with_model_tag() {
        let payload = ChangePayload::Room(RoomFields {
            capacity: Some(8),
            ..Default::default()
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({"model_name": "Room", "change_data": {"capacity": 8}})
        );
    }

    #[test]
    fn from_parts_rejects_unknown_fields() {
        let error =
            ChangePayload::from_parts(ModelName::FloorPlan, json!({"colour": "red"})).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn from_parts_treats_null_as_empty() {
        let payload = ChangePayload::from_parts(ModelName::Booking, serde_json::Value::Null).unwrap();
        assert_eq!(payload, ChangePayload::empty(ModelName::Booking));
        assert_eq!(payload.field_count(), 0);
    }

    #[test]
    fn model_name_parses_wire_names() {
        assert_eq!("Room".parse::<ModelName>().unwrap(), ModelName::Room);
        assert!("Desk".parse::<ModelName>().is_err());
    }

    #[test]
    fn create_requires_model_fields() {
        let payload = ChangePayload::FloorPlan(FloorPlanFields {
            name: Some("Level 2".to_string()),
            floor_number: None,
        });
        let error = payload.validate(ChangeType::Create).unwrap_err();
        assert!(error.to_string().contains("floor_number"));
    }

    #[test]
    fn update_requires_a_field() {
        let payload = ChangePayload::empty(ModelName::Room);
        assert!(payload.validate(ChangeType::Update).is_err());
        assert!(payload.validate(ChangeType::Delete).is_ok());
    }

    #[test]
    fn rejects_non_positive_capacity() {
        let payload = ChangePayload::Room(RoomFields {
            capacity: Some(0),
            ..Default::default()
        });
        assert!(payload.validate(ChangeType::Update).is_err());
    }

    #[test]
    fn rejects_booking_that_ends_before_it_starts() {
        let start = chrono::Utc::now();
        let payload = ChangePayload::Booking(BookingFields {
            start_time: Some(start),
            end_time: Some(start - chrono::Duration::minutes(30)),
            ..Default::default()
        });
        assert!(payload.validate(ChangeType::Update).is_err());
    }

    #[test]
    fn rejects_blank_names() {
        let payload = ChangePayload::FloorPlan(FloorPlanFields {
            name: Some("   ".to_string()),
            floor_number: Some(1),
        });
        assert!(payload.validate(ChangeType::Create).is_err());
    }
}
