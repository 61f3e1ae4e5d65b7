use std::path::Path;

use floorsync_core::SyncSettings;
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{format_conflict_lines, SyncLock, SyncStack};
use crate::error::CliError;

async fn wait_for_ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
}

pub async fn run_loop(db_path: &Path, settings: &SyncSettings) -> Result<(), CliError> {
    let stack = SyncStack::open(db_path, settings)?;
    let _lock = SyncLock::acquire(db_path)?;

    let mut connectivity = stack.monitor.subscribe();
    let monitor = stack.monitor.clone();
    let connectivity_task = tokio::spawn(async move {
        while connectivity.changed().await.is_ok() {
            let state = *connectivity.borrow_and_update();
            println!("Server {state}; {} change(s) pending", monitor.pending_count());
        }
    });

    let mut conflicts = stack.resolver.subscribe();
    let conflict_task = tokio::spawn(async move {
        loop {
            match conflicts.recv().await {
                Ok(conflict) => {
                    for line in format_conflict_lines(&conflict) {
                        println!("{line}");
                    }
                    println!("Stop this loop and run `floorsync sync` to resolve it.");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {skipped} conflict notification(s)");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!(
        "Syncing {} ({} pending). Press Ctrl-C to stop.",
        db_path.display(),
        stack.monitor.pending_count()
    );
    let result = stack.coordinator.run(wait_for_ctrl_c()).await;

    connectivity_task.abort();
    conflict_task.abort();
    result?;
    println!(
        "Stopped; {} change(s) pending",
        stack.queue.pending_count().await?
    );
    Ok(())
}
