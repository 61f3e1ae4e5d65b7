//! Batch sync: connectivity, the coordinator, and conflict resolution.

mod applier;
mod backoff;
mod connectivity;
mod coordinator;
mod matching;
pub mod protocol;
mod resolver;
mod transport;

pub use applier::{AppliedResolution, ResolutionApplier};
pub use backoff::Backoff;
pub use connectivity::{Connectivity, ConnectivityMonitor, PendingGauge};
pub use coordinator::{
    CreatedObject, CycleResult, FailedChange, SyncCoordinator, SyncPhase, SyncReport,
};
pub use matching::BatchMatcher;
pub use resolver::{BlockedChanges, ConflictResolver};
pub use transport::{HttpSyncClient, SyncTransport};
