//! Batch sync coordinator.
//!
//! Drains the change log into one batch request per cycle and applies the
//! server's three-way answer. At most one cycle is in flight at a time; a
//! cycle requested while another runs returns immediately.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncSettings;
use crate::error::{Result, TransportError};
use crate::models::{Change, ChangeId, ChangeType, ConflictSet, ObjectKey};
use crate::services::ChangeQueue;
use crate::sync::backoff::Backoff;
use crate::sync::matching::BatchMatcher;
use crate::sync::protocol::{BatchSyncRequest, BatchSyncResponse};
use crate::sync::{ConflictResolver, ConnectivityMonitor, SyncTransport};

const NO_REASON: &str = "server gave no reason";

/// Where the coordinator is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Draining,
    AwaitingResponse,
    ApplyingResult,
}

/// A synced CREATE and the id the server assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedObject {
    pub change_id: ChangeId,
    pub new_id: String,
}

/// A record the server refused for reasons other than a version conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedChange {
    pub change_id: ChangeId,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered: bool,
}

/// What one completed cycle did to the batch it sent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Records in the batch
    pub submitted: usize,
    pub synced: Vec<ChangeId>,
    pub created: Vec<CreatedObject>,
    pub conflicts: Vec<ConflictSet>,
    pub failed: Vec<FailedChange>,
    /// Batch records the response did not mention; they stay pending
    pub unanswered: Vec<ChangeId>,
    /// Response entries that matched no record in the batch
    pub unmatched: usize,
    /// Sendable records queued while the batch was in flight
    pub enqueued_during_cycle: usize,
    /// Set when the server refused the whole batch
    pub rejected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncReport {
    /// Whether every record in the batch was acknowledged
    pub fn is_clean(&self) -> bool {
        self.synced.len() == self.submitted
    }
}

/// Outcome of one attempt to run a cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleResult {
    /// Another cycle was running; nothing was done
    AlreadyInFlight,
    /// Nothing sendable was pending
    Idle,
    /// The server answered and its answer was applied
    Completed(SyncReport),
    /// The server could not be reached; no record changed state
    TransportFailed { batch_size: usize, reason: String },
}

impl CycleResult {
    fn should_continue(&self) -> bool {
        matches!(self, Self::Completed(report) if report.enqueued_during_cycle > 0)
    }
}

/// Releases the in-flight flag and returns the phase to `Idle` on drop,
/// including when a cycle bails out on a store error.
struct InFlightGuard<'a> {
    in_flight: &'a AtomicBool,
    phase: &'a watch::Sender<SyncPhase>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(SyncPhase::Idle);
        self.in_flight.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator<T> {
    transport: T,
    queue: ChangeQueue,
    monitor: ConnectivityMonitor,
    resolver: ConflictResolver,
    phase: watch::Sender<SyncPhase>,
    in_flight: AtomicBool,
    dead_letter_after: u32,
    probe_interval: Duration,
    retry_base: Duration,
    retry_max: Duration,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    pub fn new(
        transport: T,
        queue: ChangeQueue,
        monitor: ConnectivityMonitor,
        resolver: ConflictResolver,
        settings: &SyncSettings,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            transport,
            queue,
            monitor,
            resolver,
            phase,
            in_flight: AtomicBool::new(false),
            dead_letter_after: settings.dead_letter_after,
            probe_interval: settings.probe_interval(),
            retry_base: settings.retry_base(),
            retry_max: settings.retry_max(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub const fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub const fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub const fn queue(&self) -> &ChangeQueue {
        &self.queue
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(InFlightGuard {
            in_flight: &self.in_flight,
            phase: &self.phase,
        })
    }

    fn enter(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    /// Probe the server and feed the result to the connectivity monitor.
    /// Returns whether the server answered.
    pub async fn probe(&self) -> bool {
        match self.transport.probe().await {
            Ok(()) => {
                self.monitor.report_probe(true);
                true
            }
            Err(error) => {
                tracing::debug!("Probe failed: {error}");
                self.monitor.mark_offline(&error.to_string());
                false
            }
        }
    }

    /// Pending records eligible for the next batch, in creation order
    async fn sendable(&self) -> Result<Vec<Change>> {
        let dead_lettered = self.queue.dead_lettered_ids().await?;
        let conflicted = self.queue.conflicted_ids().await?;
        let resubmissions = self.queue.resubmission_ids().await?;
        let pending: Vec<Change> = self
            .queue
            .list_pending()
            .await?
            .into_iter()
            .filter(|change| !dead_lettered.contains(&change.id))
            .collect();

        let mut blocked = self.resolver.blocked();
        blocked.hold_in_order(&pending, &conflicted, &resubmissions);
        Ok(pending
            .into_iter()
            .filter(|change| !blocked.contains(change))
            .collect())
    }

    /// Ask the server for an object's version when a conflict entry omits it
    async fn lookup_version(&self, key: &ObjectKey) -> Option<i64> {
        match self.transport.current_version(key).await {
            Ok(version) => version,
            Err(error) => {
                tracing::warn!("Could not look up the server version of {key}: {error}");
                None
            }
        }
    }

    /// Run one sync cycle.
    ///
    /// Sync failures are reported through the returned `CycleResult`; an
    /// `Err` means the local change log itself failed.
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        let Some(_guard) = self.try_begin() else {
            tracing::debug!("Sync cycle already in flight; skipping");
            return Ok(CycleResult::AlreadyInFlight);
        };

        self.enter(SyncPhase::Draining);
        let batch = self.sendable().await?;
        if batch.is_empty() {
            tracing::debug!("Nothing to sync");
            return Ok(CycleResult::Idle);
        }
        let request = BatchSyncRequest::from_changes(&batch)?;

        self.enter(SyncPhase::AwaitingResponse);
        tracing::info!("Submitting batch of {} changes", batch.len());
        let response = self.transport.submit_batch(&request).await;

        self.enter(SyncPhase::ApplyingResult);
        let mut report = match response {
            Err(TransportError::Unreachable(reason)) => {
                tracing::warn!("Batch of {} changes not delivered: {reason}", batch.len());
                self.monitor.mark_offline(&reason);
                return Ok(CycleResult::TransportFailed {
                    batch_size: batch.len(),
                    reason,
                });
            }
            Err(error) => self.reject_batch(&batch, &error.to_string()).await?,
            Ok(response) => self.apply_response(&batch, response).await?,
        };

        self.queue.purge_synced().await?;
        let last_sent = batch.iter().map(|change| change.id).max();
        report.enqueued_during_cycle = self
            .sendable()
            .await?
            .iter()
            .filter(|change| Some(change.id) > last_sent)
            .count();

        tracing::info!(
            "Sync cycle done: {} synced, {} conflicts, {} failed, {} pending",
            report.synced.len(),
            report.conflicts.len(),
            report.failed.len(),
            self.monitor.pending_count()
        );
        Ok(CycleResult::Completed(report))
    }

    /// Run cycles until nothing queued during the last one is left to send,
    /// or the server becomes unreachable.
    pub async fn sync_until_settled(&self) -> Result<Vec<CycleResult>> {
        let mut results = Vec::new();
        loop {
            let result = self.run_cycle().await?;
            let again = result.should_continue() && self.monitor.is_online();
            results.push(result);
            if !again {
                return Ok(results);
            }
        }
    }

    async fn apply_response(
        &self,
        batch: &[Change],
        response: BatchSyncResponse,
    ) -> Result<SyncReport> {
        let mut matcher = BatchMatcher::new(batch);
        let mut report = SyncReport {
            submitted: batch.len(),
            message: response.message,
            ..SyncReport::default()
        };
        let results = response.results;

        for entry in results.synced {
            let Some(change) = matcher.claim(&entry.change) else {
                tracing::warn!(
                    "Ignoring acknowledgment for unknown {} {} change",
                    entry.change.change_type,
                    entry.change.model_name
                );
                report.unmatched += 1;
                continue;
            };
            self.queue.mark_synced(change.id).await?;
            report.synced.push(change.id);

            if change.change_type == ChangeType::Create {
                if let Some(new_id) = entry.new_id.or(entry.change.object_id) {
                    tracing::debug!("Change {} created {}#{new_id}", change.id, change.model_name());
                    report.created.push(CreatedObject {
                        change_id: change.id,
                        new_id,
                    });
                }
            }
        }

        for entry in results.conflicts {
            let Some(change) = matcher.claim(&entry.change) else {
                tracing::warn!("Ignoring conflict for unknown {} change", entry.change.model_name);
                report.unmatched += 1;
                continue;
            };
            let server_version = match entry.server_version {
                Some(version) => Some(version),
                None => self.lookup_version(&change.key()).await,
            };
            let conflict = ConflictSet {
                change: change.clone(),
                conflicts: entry.conflicts,
                server_version,
            };
            self.queue.mark_conflicted(change.id).await?;
            self.resolver.record(conflict.clone());
            report.conflicts.push(conflict);
        }

        for entry in results.failed {
            let Some(change) = matcher.claim(&entry.change) else {
                tracing::warn!("Ignoring failure for unknown {} change", entry.change.model_name);
                report.unmatched += 1;
                continue;
            };
            let reason = entry.reason.unwrap_or_else(|| NO_REASON.to_string());
            report.failed.push(self.fail(change.id, reason).await?);
        }

        report.unanswered = matcher.unclaimed().map(|change| change.id).collect();
        if !report.unanswered.is_empty() {
            tracing::warn!(
                "Server did not answer for {} changes; leaving them pending",
                report.unanswered.len()
            );
        }
        Ok(report)
    }

    /// The server answered but refused the whole request: every record in
    /// the batch counts as a validation failure.
    async fn reject_batch(&self, batch: &[Change], reason: &str) -> Result<SyncReport> {
        tracing::warn!("Batch of {} changes rejected: {reason}", batch.len());
        let mut report = SyncReport {
            submitted: batch.len(),
            rejected: Some(reason.to_string()),
            ..SyncReport::default()
        };
        for change in batch {
            report.failed.push(self.fail(change.id, reason.to_string()).await?);
        }
        Ok(report)
    }

    async fn fail(&self, change_id: ChangeId, reason: String) -> Result<FailedChange> {
        let state = self
            .queue
            .record_failure(change_id, &reason, self.dead_letter_after)
            .await?;
        if state.dead_lettered {
            tracing::warn!(
                "Change {change_id} dead-lettered after {} failed attempts: {reason}",
                state.attempts
            );
        } else {
            tracing::debug!("Change {change_id} failed (attempt {}): {reason}", state.attempts);
        }
        Ok(FailedChange {
            change_id,
            reason,
            attempts: state.attempts,
            dead_lettered: state.dead_lettered,
        })
    }

    /// Drive sync until `shutdown` resolves.
    ///
    /// While OFFLINE the server is probed every `probe_interval`; a probe
    /// that brings it back ONLINE raises the sync signal. While ONLINE the
    /// same tick retries leftover records, spaced by capped exponential
    /// backoff that resets once a cycle comes back clean. With nothing
    /// pending an ONLINE tick probes instead, so an outage is still noticed.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut backoff = Backoff::new(self.retry_base, self.retry_max);
        let mut retry_at: Option<Instant> = None;
        let mut tick = tokio::time::interval(self.probe_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Sync loop started");
        loop {
            let cycle_due = tokio::select! {
                () = &mut shutdown => break,
                () = self.monitor.sync_requested() => self.monitor.is_online(),
                _ = tick.tick() => {
                    if self.monitor.is_online() && self.monitor.pending_count() > 0 {
                        retry_at.map_or(true, |at| Instant::now() >= at)
                    } else {
                        self.probe().await;
                        false
                    }
                }
            };
            if !cycle_due {
                continue;
            }

            let results = self.sync_until_settled().await?;
            retry_at = match results.last() {
                Some(CycleResult::Completed(report)) if !report.is_clean() => {
                    if !report.synced.is_empty() {
                        backoff.reset();
                    }
                    let delay = backoff.next_delay();
                    tracing::debug!("Retrying leftover changes in {delay:?}");
                    Some(Instant::now() + delay)
                }
                Some(CycleResult::AlreadyInFlight) => retry_at,
                _ => {
                    backoff.reset();
                    None
                }
            };
        }
        tracing::info!("Sync loop stopped");
        Ok(())
    }
}
