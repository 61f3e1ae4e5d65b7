use std::path::Path;

use floorsync_core::{Connectivity, SyncSettings};
use serde::Serialize;

use crate::commands::common::{open_queue, SyncStack};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub db_path: String,
    pub server_url: Option<String>,
    /// `None` when no server is configured
    pub connectivity: Option<Connectivity>,
    pub pending: usize,
    pub dead_lettered: usize,
}

pub fn format_status_lines(status: &StatusReport) -> Vec<String> {
    let server = match (&status.server_url, status.connectivity) {
        (Some(url), Some(connectivity)) => format!("{url} ({connectivity})"),
        (Some(url), None) => url.clone(),
        (None, _) => "not configured".to_string(),
    };
    vec![
        format!("Change log:    {}", status.db_path),
        format!("Server:        {server}"),
        format!("Pending:       {}", status.pending),
        format!("Dead-lettered: {}", status.dead_lettered),
    ]
}

pub async fn run_status(
    as_json: bool,
    db_path: &Path,
    settings: &SyncSettings,
) -> Result<(), CliError> {
    let (queue, connectivity) = if settings.server_url.is_some() {
        let stack = SyncStack::open(db_path, settings)?;
        stack.coordinator.probe().await;
        (stack.queue, Some(stack.monitor.state()))
    } else {
        (open_queue(db_path)?, None)
    };

    let status = StatusReport {
        db_path: db_path.display().to_string(),
        server_url: settings.server_url.clone(),
        connectivity,
        pending: queue.pending_count().await?,
        dead_lettered: queue.dead_lettered_ids().await?.len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
