use std::path::Path;

use floorsync_core::db::DeadLetter;
use serde::Serialize;

use crate::commands::common::{
    change_to_list_item, format_change_lines, format_timestamp, open_queue, parse_change_id,
    ChangeListItem,
};
use crate::error::CliError;

pub async fn run_pending(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path)?;
    let pending = queue.list_pending().await?;

    if as_json {
        let json_items = pending
            .iter()
            .map(change_to_list_item)
            .collect::<Vec<ChangeListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }
    for line in format_change_lines(&pending) {
        println!("{line}");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct DeadLetterItem {
    #[serde(flatten)]
    pub change: ChangeListItem,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub fn dead_letter_to_item(dead_letter: &DeadLetter) -> DeadLetterItem {
    DeadLetterItem {
        change: change_to_list_item(&dead_letter.change),
        attempts: dead_letter.attempts,
        last_error: dead_letter.last_error.clone(),
    }
}

pub fn format_dead_letter_lines(dead_letters: &[DeadLetter]) -> Vec<String> {
    dead_letters
        .iter()
        .map(|dead_letter| {
            let change = &dead_letter.change;
            format!(
                "{:>5}  {:<6}  {}  queued {}  {} attempt(s): {}",
                change.id.get(),
                change.change_type.as_str(),
                change.key(),
                format_timestamp(change.created_at),
                dead_letter.attempts,
                dead_letter.last_error.as_deref().unwrap_or("no reason given")
            )
        })
        .collect()
}

pub async fn run_dead_letters(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path)?;
    let dead_letters = queue.list_dead_letters().await?;

    if as_json {
        let json_items = dead_letters
            .iter()
            .map(dead_letter_to_item)
            .collect::<Vec<DeadLetterItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if dead_letters.is_empty() {
        println!("No dead-lettered changes.");
        return Ok(());
    }
    for line in format_dead_letter_lines(&dead_letters) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_requeue(raw_id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_change_id(raw_id)?;
    let queue = open_queue(db_path)?;
    if !queue.requeue(id).await? {
        return Err(CliError::NothingToRequeue(id.to_string()));
    }

    println!("Requeued change {id}");
    Ok(())
}

pub async fn run_purge(db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path)?;
    let purged = queue.purge_synced().await?;

    println!("Purged {purged} synced record(s)");
    Ok(())
}
