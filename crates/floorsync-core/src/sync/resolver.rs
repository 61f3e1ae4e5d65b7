//! Open conflict bookkeeping.
//!
//! Conflicts returned by a sync cycle are held here, keyed by the object
//! they target, until a collaborator picks a resolution. While an object
//! has an open conflict none of its pending records are submitted.
//! Field details live in memory only. The change log keeps a conflict flag,
//! so after a restart the conflicted record is submitted alone, the server
//! reports the conflict afresh, and later edits to the object stay queued.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::models::{Change, ChangeId, ConflictSet, ObjectKey, Resolution};
use crate::sync::applier::{AppliedResolution, ResolutionApplier};

const EVENT_CAPACITY: usize = 64;

type OpenConflicts = BTreeMap<ObjectKey, Vec<ConflictSet>>;

/// Snapshot of what must be held back from the next batch
#[derive(Debug, Default)]
pub struct BlockedChanges {
    keys: HashSet<ObjectKey>,
    ids: HashSet<ChangeId>,
}

impl BlockedChanges {
    pub fn contains(&self, change: &Change) -> bool {
        if self.ids.contains(&change.id) {
            return true;
        }
        // A CREATE has no server id yet, so only the conflicted record itself is held
        change.object_id.is_some() && self.keys.contains(&change.key())
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Add the ordering holds recorded in the change log.
    ///
    /// A record queued after a flagged conflict on its object waits for that
    /// conflict to be resolved. A record queued before a pending resubmission
    /// of its object waits for the resubmission to be acknowledged, unless it
    /// is itself conflicted. `pending` must be in id order.
    pub fn hold_in_order(
        &mut self,
        pending: &[Change],
        conflicted: &HashSet<ChangeId>,
        resubmissions: &HashSet<ChangeId>,
    ) {
        let mut first_conflict = HashMap::new();
        let mut last_resubmission = HashMap::new();
        for change in pending.iter().filter(|change| change.object_id.is_some()) {
            if conflicted.contains(&change.id) {
                first_conflict.entry(change.key()).or_insert(change.id);
            }
            if resubmissions.contains(&change.id) {
                last_resubmission.insert(change.key(), change.id);
            }
        }

        for change in pending.iter().filter(|change| change.object_id.is_some()) {
            let key = change.key();
            let behind_conflict = first_conflict
                .get(&key)
                .is_some_and(|&conflict| change.id > conflict);
            let ahead_of_resubmission = !conflicted.contains(&change.id)
                && last_resubmission
                    .get(&key)
                    .is_some_and(|&resubmission| change.id < resubmission);
            if behind_conflict || ahead_of_resubmission {
                self.ids.insert(change.id);
            }
        }
    }
}

#[derive(Clone)]
pub struct ConflictResolver {
    open: Arc<Mutex<OpenConflicts>>,
    events: broadcast::Sender<ConflictSet>,
    applier: ResolutionApplier,
}

impl ConflictResolver {
    pub fn new(applier: ResolutionApplier) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            open: Arc::new(Mutex::new(BTreeMap::new())),
            events,
            applier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OpenConflicts> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive each conflict as it is recorded
    pub fn subscribe(&self) -> broadcast::Receiver<ConflictSet> {
        self.events.subscribe()
    }

    /// Track a conflict reported by the server. A fresh report for the same
    /// change replaces the previous one.
    pub fn record(&self, conflict: ConflictSet) {
        let key = conflict.key();
        tracing::info!(
            "Conflict on {key} for change {}: {}",
            conflict.change_id(),
            conflict.fields().join(", ")
        );
        {
            let mut open = self.lock();
            let entries = open.entry(key).or_default();
            match entries
                .iter_mut()
                .find(|existing| existing.change_id() == conflict.change_id())
            {
                Some(existing) => *existing = conflict.clone(),
                None => entries.push(conflict.clone()),
            }
        }
        // No subscribers is fine
        let _ = self.events.send(conflict);
    }

    /// Open conflicts for one object, oldest change first
    pub fn conflicts_for(&self, key: &ObjectKey) -> Vec<ConflictSet> {
        let mut conflicts = self.lock().get(key).cloned().unwrap_or_default();
        conflicts.sort_by_key(ConflictSet::change_id);
        conflicts
    }

    /// Every open conflict, grouped by object
    pub fn open_conflicts(&self) -> Vec<ConflictSet> {
        let open = self.lock();
        let mut conflicts = Vec::new();
        for entries in open.values() {
            let mut entries = entries.clone();
            entries.sort_by_key(ConflictSet::change_id);
            conflicts.extend(entries);
        }
        conflicts
    }

    pub fn has_open(&self, key: &ObjectKey) -> bool {
        self.lock().get(key).is_some_and(|entries| !entries.is_empty())
    }

    pub fn get(&self, change_id: ChangeId) -> Option<ConflictSet> {
        self.lock()
            .values()
            .flatten()
            .find(|conflict| conflict.change_id() == change_id)
            .cloned()
    }

    pub fn blocked(&self) -> BlockedChanges {
        let open = self.lock();
        let mut blocked = BlockedChanges::default();
        for (key, entries) in open.iter() {
            if entries.is_empty() {
                continue;
            }
            blocked.keys.insert(key.clone());
            blocked
                .ids
                .extend(entries.iter().map(ConflictSet::change_id));
        }
        blocked
    }

    /// Apply a resolution to an open conflict.
    ///
    /// The conflict is closed only if the change log accepted the action;
    /// on error it stays open and can be resolved again.
    pub async fn resolve(
        &self,
        change_id: ChangeId,
        resolution: Resolution,
    ) -> Result<AppliedResolution> {
        let conflict = self.get(change_id).ok_or(Error::NoOpenConflict(change_id))?;
        let applied = self.applier.apply(&conflict, resolution).await?;
        self.close(&conflict.key(), change_id);
        Ok(applied)
    }

    fn close(&self, key: &ObjectKey, change_id: ChangeId) {
        let mut open = self.lock();
        if let Some(entries) = open.get_mut(key) {
            entries.retain(|conflict| conflict.change_id() != change_id);
            if entries.is_empty() {
                open.remove(key);
            }
        }
    }
}
