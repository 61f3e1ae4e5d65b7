use std::path::Path;

use crate::cli::ChangeKind;
use crate::commands::common::{build_new_change, open_queue};
use crate::error::CliError;

pub async fn run_enqueue(
    kind: ChangeKind,
    model: &str,
    object_id: Option<String>,
    version: i64,
    data: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let change = build_new_change(kind, model, object_id, version, data)?;
    let queue = open_queue(db_path)?;
    let queued = queue.enqueue(&change).await?;

    println!("{}", queued.id);
    Ok(())
}
