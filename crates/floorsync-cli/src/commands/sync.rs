use std::collections::HashSet;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use floorsync_core::sync::AppliedResolution;
use floorsync_core::{ConflictSet, CycleResult, Resolution, SyncSettings};
use serde::Serialize;

use crate::cli::ConflictStrategy;
use crate::commands::common::{format_conflict_lines, format_report_lines, SyncLock, SyncStack};
use crate::error::CliError;

/// Sync rounds allowed while conflicts keep getting resolved and resubmitted
const MAX_RESOLUTION_ROUNDS: usize = 5;

#[derive(Debug, Default, Serialize)]
pub struct SyncSummary {
    pub cycles: Vec<CycleResult>,
    pub resolutions: Vec<AppliedResolution>,
    pub open_conflicts: Vec<ConflictSet>,
    pub pending: usize,
}

impl SyncSummary {
    fn went_offline(&self) -> bool {
        matches!(
            self.cycles.last(),
            Some(CycleResult::TransportFailed { .. })
        )
    }
}

/// Parsed answer to the interactive conflict prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Resolve(Resolution),
    LeaveOpen,
}

pub fn parse_conflict_choice(input: &str) -> Option<ConflictChoice> {
    match input.trim().to_ascii_lowercase().as_str() {
        "m" | "mine" => Some(ConflictChoice::Resolve(Resolution::UseMine)),
        "s" | "server" | "theirs" => Some(ConflictChoice::Resolve(Resolution::UseServer)),
        "" | "l" | "leave" | "skip" => Some(ConflictChoice::LeaveOpen),
        _ => None,
    }
}

fn prompt_for_resolution(conflict: &ConflictSet) -> Result<ConflictChoice, CliError> {
    for line in format_conflict_lines(conflict) {
        println!("{line}");
    }

    let stdin = io::stdin();
    loop {
        print!("Keep [m]ine, take [s]erver, or [l]eave open? ");
        io::stdout().flush()?;

        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer)? == 0 {
            return Ok(ConflictChoice::LeaveOpen);
        }
        if let Some(choice) = parse_conflict_choice(&answer) {
            return Ok(choice);
        }
        println!("Please answer m, s or l.");
    }
}

fn choose(
    strategy: ConflictStrategy,
    conflict: &ConflictSet,
    interactive: bool,
) -> Result<ConflictChoice, CliError> {
    match strategy {
        ConflictStrategy::Mine => Ok(ConflictChoice::Resolve(Resolution::UseMine)),
        ConflictStrategy::Server => Ok(ConflictChoice::Resolve(Resolution::UseServer)),
        ConflictStrategy::Ask if interactive => prompt_for_resolution(conflict),
        ConflictStrategy::Ask => Ok(ConflictChoice::LeaveOpen),
    }
}

pub async fn run_sync(
    strategy: ConflictStrategy,
    as_json: bool,
    db_path: &Path,
    settings: &SyncSettings,
) -> Result<(), CliError> {
    let stack = SyncStack::open(db_path, settings)?;
    let _lock = SyncLock::acquire(db_path)?;

    if !stack.coordinator.probe().await {
        return Err(CliError::ServerUnreachable(stack.monitor.pending_count()));
    }

    let interactive = !as_json && io::stdin().is_terminal();
    let mut summary = SyncSummary::default();
    let mut left_open = HashSet::new();
    for _ in 0..MAX_RESOLUTION_ROUNDS {
        summary
            .cycles
            .extend(stack.coordinator.sync_until_settled().await?);
        if summary.went_offline() {
            break;
        }

        let mut resolved_any = false;
        for conflict in stack.resolver.open_conflicts() {
            if left_open.contains(&conflict.change_id()) {
                continue;
            }
            let ConflictChoice::Resolve(resolution) = choose(strategy, &conflict, interactive)?
            else {
                left_open.insert(conflict.change_id());
                continue;
            };
            match stack.resolver.resolve(conflict.change_id(), resolution).await {
                Ok(applied) => {
                    resolved_any = true;
                    summary.resolutions.push(applied);
                }
                Err(floorsync_core::Error::MissingServerVersion(change_id)) => {
                    left_open.insert(change_id);
                    eprintln!(
                        "Cannot resubmit change {change_id}: the server did not report its current version"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
        if !resolved_any {
            break;
        }
    }
    summary.open_conflicts = stack.resolver.open_conflicts();
    summary.pending = stack.queue.pending_count().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    for line in format_summary_lines(&summary) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_summary_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines = Vec::new();
    for cycle in &summary.cycles {
        match cycle {
            CycleResult::Completed(report) => lines.extend(format_report_lines(report)),
            CycleResult::TransportFailed { batch_size, reason } => {
                lines.push(format!("Batch of {batch_size} not delivered: {reason}"));
            }
            CycleResult::Idle | CycleResult::AlreadyInFlight => {}
        }
    }
    if lines.is_empty() {
        lines.push("Nothing to sync.".to_string());
    }

    for resolution in &summary.resolutions {
        lines.push(match resolution {
            AppliedResolution::Abandoned { change_id } => {
                format!("Change {change_id}: kept the server's values")
            }
            AppliedResolution::Resubmitted {
                original,
                replacement,
            } => format!(
                "Change {original}: resubmitted as {} at v{}",
                replacement.id, replacement.version_at_change
            ),
        });
    }
    for conflict in &summary.open_conflicts {
        lines.extend(format_conflict_lines(conflict));
    }
    if !summary.open_conflicts.is_empty() {
        lines.push(format!(
            "{} conflict(s) left open; they are reported again on the next sync",
            summary.open_conflicts.len()
        ));
    }
    lines.push(format!("{} change(s) pending", summary.pending));
    lines
}
