//! Connectivity monitor.
//!
//! Tracks whether the server of record is reachable and publishes every
//! transition on a `watch` channel. Going ONLINE also raises the "sync now"
//! signal the coordinator waits on. Reads never block.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Notify};

/// Reachability of the server of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared count of unsynced records, readable without touching the store.
#[derive(Debug, Clone, Default)]
pub struct PendingGauge(Arc<AtomicUsize>);

impl PendingGauge {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, count: usize) {
        self.0.store(count, Ordering::Relaxed);
    }
}

/// Clonable handle; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<Connectivity>>,
    sync_now: Arc<Notify>,
    pending: PendingGauge,
}

impl ConnectivityMonitor {
    /// Create a monitor that starts OFFLINE until the first successful probe.
    pub fn new(pending: PendingGauge) -> Self {
        let (state, _) = watch::channel(Connectivity::Offline);
        Self {
            state: Arc::new(state),
            sync_now: Arc::new(Notify::new()),
            pending,
        }
    }

    pub fn state(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == Connectivity::Online
    }

    /// Unsynced records, as last refreshed by the change queue
    pub fn pending_count(&self) -> usize {
        self.pending.get()
    }

    /// Receive every state transition
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Feed a reachability probe result. Returns whether the state changed.
    pub fn report_probe(&self, reachable: bool) -> bool {
        if reachable {
            self.mark_online()
        } else {
            self.mark_offline("reachability probe failed")
        }
    }

    /// Returns whether the state changed.
    pub fn mark_online(&self) -> bool {
        let changed = self.transition(Connectivity::Online);
        if changed {
            tracing::info!(
                "Server reachable; {} pending changes to sync",
                self.pending_count()
            );
            self.sync_now.notify_one();
        }
        changed
    }

    /// Returns whether the state changed.
    pub fn mark_offline(&self, reason: &str) -> bool {
        let changed = self.transition(Connectivity::Offline);
        if changed {
            tracing::info!("Server unreachable ({reason}); working offline");
        }
        changed
    }

    /// Ask the coordinator for a cycle without a connectivity transition
    pub fn request_sync(&self) {
        self.sync_now.notify_one();
    }

    /// Resolves once a sync has been requested. A request made while nobody
    /// was waiting is kept and consumed by the next wait.
    pub async fn sync_requested(&self) {
        self.sync_now.notified().await;
    }

    fn transition(&self, next: Connectivity) -> bool {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_offline() {
        let monitor = ConnectivityMonitor::new(PendingGauge::default());
        assert_eq!(monitor.state(), Connectivity::Offline);
        assert!(!monitor.is_online());
    }

    #[test]
    fn only_real_transitions_are_published() {
        let monitor = ConnectivityMonitor::new(PendingGauge::default());
        let mut updates = monitor.subscribe();

        assert!(!monitor.mark_offline("still down"));
        assert!(!updates.has_changed().unwrap());

        assert!(monitor.report_probe(true));
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), Connectivity::Online);

        assert!(!monitor.mark_online());
        assert!(!updates.has_changed().unwrap());

        assert!(monitor.report_probe(false));
        assert_eq!(*updates.borrow_and_update(), Connectivity::Offline);
    }

    #[tokio::test]
    async fn going_online_raises_sync_signal() {
        let monitor = ConnectivityMonitor::new(PendingGauge::default());
        monitor.mark_online();

        tokio::time::timeout(Duration::from_millis(100), monitor.sync_requested())
            .await
            .expect("sync signal should be pending");
    }

    #[tokio::test]
    async fn no_sync_signal_without_transition() {
        let monitor = ConnectivityMonitor::new(PendingGauge::default());
        monitor.mark_offline("down");

        let waited =
            tokio::time::timeout(Duration::from_millis(20), monitor.sync_requested()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn clones_share_state_and_gauge() {
        let gauge = PendingGauge::default();
        let monitor = ConnectivityMonitor::new(gauge.clone());
        let other = monitor.clone();

        other.mark_online();
        gauge.set(3);
        assert!(monitor.is_online());
        assert_eq!(monitor.pending_count(), 3);
    }
}
