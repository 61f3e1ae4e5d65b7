//! Database layer for floorsync

mod change_log;
mod connection;
mod migrations;

pub use change_log::{ChangeLog, DeadLetter, FailureState, SqliteChangeLog};
pub use connection::Database;
