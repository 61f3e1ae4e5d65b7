//! floorsync-core - offline change queue and batch sync
//!
//! Local mutations are appended to a durable `SQLite` change log while the
//! server of record is unreachable. Once connectivity returns the sync
//! coordinator submits every pending change in one batch, marks
//! acknowledged records synced, and hands version conflicts to the
//! resolver, which applies the collaborator's whole-side choice.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result, TransportError};
pub use models::{Change, ChangeId, ChangeType, ConflictSet, NewChange, ObjectKey, Resolution};
pub use services::ChangeQueue;
pub use sync::{
    ConflictResolver, Connectivity, ConnectivityMonitor, CycleResult, HttpSyncClient,
    ResolutionApplier, SyncCoordinator, SyncReport, SyncTransport,
};
