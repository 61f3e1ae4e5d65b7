pub mod common;
pub mod completions;
pub mod config;
pub mod enqueue;
pub mod queue;
pub mod run;
pub mod status;
pub mod sync;
