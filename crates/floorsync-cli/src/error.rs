use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] floorsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid change data: {0}")]
    InvalidData(String),
    #[error("Invalid change id: {0}")]
    InvalidChangeId(String),
    #[error("Change {0} has no recorded failures to clear")]
    NothingToRequeue(String),
    #[error("Another floorsync process is already syncing {}", .0.display())]
    AlreadyRunning(PathBuf),
    #[error("Failed to acquire run lock: {0}")]
    Lock(String),
    #[error("Server unreachable; {0} change(s) remain queued")]
    ServerUnreachable(usize),
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
