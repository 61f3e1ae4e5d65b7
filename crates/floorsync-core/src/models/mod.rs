//! Data models for floorsync

mod change;
mod conflict;
mod payload;

pub use change::{Change, ChangeId, ChangeType, NewChange, ObjectKey};
pub use conflict::{ConflictSet, FieldConflict, Resolution};
pub use payload::{
    BookingFields, BookingStatus, ChangePayload, FloorPlanFields, ModelName, RoomFields, RoomType,
};
