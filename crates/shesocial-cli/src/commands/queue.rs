use std::path::Path;

use crate::commands::common::{format_failed_lines, format_queue_lines, open_store, print_json};
use crate::error::CliError;

pub async fn run_queue(
    failed: bool,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    if failed {
        let operations = store.list_failed_operations(limit).await?;
        if as_json {
            return print_json(&operations);
        }
        if operations.is_empty() {
            println!("No failed operations.");
        }
        for line in format_failed_lines(&operations) {
            println!("{line}");
        }
        return Ok(());
    }

    let mut items = store.queue_items().await?;
    items.truncate(limit);
    if as_json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("Queue is empty.");
    }
    for line in format_queue_lines(&items) {
        println!("{line}");
    }
    Ok(())
}
