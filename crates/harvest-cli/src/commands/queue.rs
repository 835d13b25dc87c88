use harvest_core::util::now_millis;
use harvest_core::QueueEntry;
use serde::Serialize;

use crate::commands::common::{format_relative_time, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueueListItem {
    pub id: String,
    pub kind: &'static str,
    pub record: String,
    pub timestamp: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

pub fn queue_list_item(entry: &QueueEntry) -> QueueListItem {
    QueueListItem {
        id: entry.id.to_string(),
        kind: entry.kind(),
        record: entry.operation.record_id().to_string(),
        timestamp: entry.timestamp,
        retry_count: entry.retry_count,
        last_error: entry
            .last_error
            .as_ref()
            .map(|failure| failure.message.clone()),
    }
}

pub fn format_queue_lines(entries: &[QueueEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let retries = match entry.retry_count {
                0 => String::new(),
                1 => "  (1 retry)".to_string(),
                count => format!("  ({count} retries)"),
            };
            format!(
                "{}  {:<20}  {}{}",
                entry.id,
                entry.kind(),
                format_relative_time(entry.timestamp, now_ms),
                retries
            )
        })
        .collect()
}

pub async fn run_queue(context: &Context, as_json: bool) -> Result<(), CliError> {
    let db = context.open_database().await?;
    let entries = db.pending_entries().await?;
    let dead_letters = db.dead_letter_count().await?;

    if as_json {
        let items = entries.iter().map(queue_list_item).collect::<Vec<_>>();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "pending": items,
                "dead_letters": dead_letters,
            }))?
        );
        return Ok(());
    }

    if entries.is_empty() {
        println!("Queue is empty.");
    } else {
        for line in format_queue_lines(&entries, now_millis()) {
            println!("{line}");
        }
    }
    if dead_letters > 0 {
        println!("{dead_letters} entries in the dead-letter queue; see `harvest dlq list`.");
    }
    Ok(())
}
