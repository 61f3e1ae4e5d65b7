//! Turns a resolution choice into a change-log action.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Change, ChangeId, ConflictSet, Resolution};
use crate::services::ChangeQueue;
use crate::sync::ConnectivityMonitor;

/// What applying a resolution did to the change log
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AppliedResolution {
    /// The local change was marked synced without resubmission
    Abandoned { change_id: ChangeId },
    /// The local change was retired and a copy queued at the server's version
    Resubmitted {
        original: ChangeId,
        replacement: Change,
    },
}

#[derive(Clone)]
pub struct ResolutionApplier {
    queue: ChangeQueue,
    monitor: ConnectivityMonitor,
}

impl ResolutionApplier {
    pub const fn new(queue: ChangeQueue, monitor: ConnectivityMonitor) -> Self {
        Self { queue, monitor }
    }

    pub async fn apply(
        &self,
        conflict: &ConflictSet,
        resolution: Resolution,
    ) -> Result<AppliedResolution> {
        let change_id = conflict.change_id();
        match resolution {
            Resolution::UseServer => {
                if !self.queue.mark_synced(change_id).await? {
                    tracing::debug!("Change {change_id} was already settled");
                }
                tracing::info!(
                    "Abandoned change {change_id} for {}; server value kept",
                    conflict.key()
                );
                Ok(AppliedResolution::Abandoned { change_id })
            }
            Resolution::UseMine => {
                let version = conflict
                    .server_version
                    .ok_or(Error::MissingServerVersion(change_id))?;
                let replacement = self
                    .queue
                    .supersede(change_id, &conflict.change.resubmission(version))
                    .await?;
                tracing::info!(
                    "Resubmitting change {change_id} for {} as {} at version {version}",
                    conflict.key(),
                    replacement.id
                );
                if self.monitor.is_online() {
                    self.monitor.request_sync();
                }
                Ok(AppliedResolution::Resubmitted {
                    original: change_id,
                    replacement,
                })
            }
        }
    }
}
