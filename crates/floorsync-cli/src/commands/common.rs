use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use floorsync_core::models::{ChangePayload, ModelName};
use floorsync_core::util::unix_millis_now;
use floorsync_core::{
    Change, ChangeId, ChangeQueue, ChangeType, ConflictResolver, ConflictSet, ConnectivityMonitor,
    HttpSyncClient, NewChange, ResolutionApplier, SyncCoordinator, SyncReport, SyncSettings,
};
use serde::Serialize;
use single_instance::SingleInstance;

use crate::cli::ChangeKind;
use crate::error::CliError;

pub const DB_PATH_ENV: &str = "FLOORSYNC_DB_PATH";
pub const CONFIG_PATH_ENV: &str = "FLOORSYNC_CONFIG";

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("floorsync")
        .join("floorsync.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("floorsync")
        .join("config.json")
}

/// Settings from the config file with environment overrides on top
pub fn load_settings(config_path: &Path) -> Result<SyncSettings, CliError> {
    let mut settings = SyncSettings::load_from_path(config_path)?;
    settings.apply_env()?;
    Ok(settings)
}

pub fn open_queue(db_path: &Path) -> Result<ChangeQueue, CliError> {
    Ok(ChangeQueue::open_path(db_path)?)
}

/// Every sync component wired to one change log and one HTTP client
pub struct SyncStack {
    pub queue: ChangeQueue,
    pub monitor: ConnectivityMonitor,
    pub resolver: ConflictResolver,
    pub coordinator: SyncCoordinator<HttpSyncClient>,
}

impl SyncStack {
    pub fn open(db_path: &Path, settings: &SyncSettings) -> Result<Self, CliError> {
        let transport = HttpSyncClient::new(settings)?;
        let queue = open_queue(db_path)?;
        let monitor = ConnectivityMonitor::new(queue.pending_gauge());
        let resolver =
            ConflictResolver::new(ResolutionApplier::new(queue.clone(), monitor.clone()));
        let coordinator = SyncCoordinator::new(
            transport,
            queue.clone(),
            monitor.clone(),
            resolver.clone(),
            settings,
        );
        Ok(Self {
            queue,
            monitor,
            resolver,
            coordinator,
        })
    }
}

/// Process-wide lock held while a command submits batches for `db_path`.
///
/// Two coordinators on one change log would submit the same records twice.
pub struct SyncLock {
    _instance: SingleInstance,
}

impl SyncLock {
    pub fn acquire(db_path: &Path) -> Result<Self, CliError> {
        let instance = SingleInstance::new(&sync_lock_name(db_path))
            .map_err(|error| CliError::Lock(error.to_string()))?;
        if !instance.is_single() {
            return Err(CliError::AlreadyRunning(db_path.to_path_buf()));
        }
        Ok(Self {
            _instance: instance,
        })
    }
}

/// Lock name derived from the resolved database path
pub fn sync_lock_name(db_path: &Path) -> String {
    let resolved = db_path
        .canonicalize()
        .unwrap_or_else(|_| db_path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    resolved.hash(&mut hasher);
    format!("floorsync-sync-{:016x}", hasher.finish())
}

pub fn parse_change_id(raw: &str) -> Result<ChangeId, CliError> {
    raw.parse::<ChangeId>()
        .map_err(|_| CliError::InvalidChangeId(raw.trim().to_string()))
}

/// Build a change from command-line arguments without touching the store
pub fn build_new_change(
    kind: ChangeKind,
    model: &str,
    object_id: Option<String>,
    version: i64,
    data: Option<&str>,
) -> Result<NewChange, CliError> {
    let model = model.parse::<ModelName>()?;
    let change_data = match data.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|error| CliError::InvalidData(error.to_string()))?,
        None => serde_json::Value::Null,
    };
    if !(change_data.is_object() || change_data.is_null()) {
        return Err(CliError::InvalidData(
            "expected a JSON object of field values".to_string(),
        ));
    }

    let payload = ChangePayload::from_parts(model, change_data)
        .map_err(|error| CliError::InvalidData(error.to_string()))?;
    let change = NewChange {
        change_type: ChangeType::from(kind),
        object_id: object_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()),
        payload,
        version_at_change: version,
    };
    change.validate()?;
    Ok(change)
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

#[derive(Debug, Serialize)]
pub struct ChangeListItem {
    pub id: i64,
    pub client_id: String,
    pub change_type: ChangeType,
    pub model_name: ModelName,
    pub object_id: Option<String>,
    pub version_at_change: i64,
    pub change_data: serde_json::Value,
    pub created_at: i64,
    pub relative_time: String,
}

pub fn change_to_list_item(change: &Change) -> ChangeListItem {
    ChangeListItem {
        id: change.id.get(),
        client_id: change.client_id.to_string(),
        change_type: change.change_type,
        model_name: change.model_name(),
        object_id: change.object_id.clone(),
        version_at_change: change.version_at_change,
        change_data: change
            .payload
            .change_data()
            .unwrap_or(serde_json::Value::Null),
        created_at: change.created_at,
        relative_time: format_relative_time(change.created_at, unix_millis_now()),
    }
}

pub fn format_change_line(change: &Change, now_ms: i64) -> String {
    format!(
        "{:>5}  {:<6}  {:<20}  v{:<4} {:>3} field(s)  {}",
        change.id.get(),
        change.change_type.as_str(),
        change.key().to_string(),
        change.version_at_change,
        change.payload.field_count(),
        format_relative_time(change.created_at, now_ms)
    )
}

pub fn format_change_lines(changes: &[Change]) -> Vec<String> {
    let now_ms = unix_millis_now();
    changes
        .iter()
        .map(|change| format_change_line(change, now_ms))
        .collect()
}

pub fn format_conflict_lines(conflict: &ConflictSet) -> Vec<String> {
    let server_version = conflict
        .server_version
        .map_or_else(|| "unknown".to_string(), |version| version.to_string());
    let mut lines = vec![format!(
        "Conflict on {} (change {}, edited at v{}, server at v{server_version})",
        conflict.key(),
        conflict.change_id(),
        conflict.change.version_at_change
    )];
    for field in &conflict.conflicts {
        lines.push(format!(
            "  {}: yours={} theirs={} base={}",
            field.field, field.yours, field.theirs, field.base
        ));
    }
    lines
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Sent {}: {} synced, {} conflict(s), {} failed, {} unanswered",
        report.submitted,
        report.synced.len(),
        report.conflicts.len(),
        report.failed.len(),
        report.unanswered.len()
    )];
    if let Some(reason) = &report.rejected {
        lines.push(format!("  Batch rejected: {reason}"));
    }
    for created in &report.created {
        lines.push(format!(
            "  Change {} created object {}",
            created.change_id, created.new_id
        ));
    }
    for failed in &report.failed {
        let suffix = if failed.dead_lettered {
            " (dead-lettered)"
        } else {
            ""
        };
        lines.push(format!(
            "  Change {} failed after {} attempt(s): {}{suffix}",
            failed.change_id, failed.attempts, failed.reason
        ));
    }
    if report.unmatched > 0 {
        lines.push(format!(
            "  {} response entr(ies) matched no queued change",
            report.unmatched
        ));
    }
    lines
}
