use harvest_core::dead_letter::{
    DeadLetterItem, DeadLetterOperator, DeadLetterReport, DiscardScope, RetryOutcome,
};
use harvest_core::services::DatabaseService;
use harvest_core::sync::{SyncProcessor, SyncTrigger};
use harvest_core::util::now_millis;

use crate::cli::DlqCommands;
use crate::commands::common::{confirm, format_relative_time, parse_entry_id, Context};
use crate::commands::sync::format_sync_report;
use crate::error::CliError;

pub fn format_dead_letter_lines(report: &DeadLetterReport, now_ms: i64) -> Vec<String> {
    let mut lines = Vec::new();
    for (label, items) in [
        ("Critical", &report.critical),
        ("Warning", &report.warning),
        ("Recent", &report.recent),
    ] {
        if items.is_empty() {
            continue;
        }
        lines.push(format!("{label} ({})", items.len()));
        lines.extend(items.iter().map(|item| format_item(item, now_ms)));
    }
    lines
}

fn format_item(item: &DeadLetterItem, now_ms: i64) -> String {
    format!(
        "  {}  {:<20}  {:>3} attempts  {}  {}",
        item.id,
        item.operation.kind(),
        item.retry_count,
        format_relative_time(item.created_at, now_ms),
        item.description
    )
}

/// How many entries a bulk discard in `scope` would remove.
pub async fn discard_count(db: &DatabaseService, scope: DiscardScope) -> Result<usize, CliError> {
    Ok(match scope {
        DiscardScope::Critical => {
            DeadLetterOperator::new(db.clone(), SyncTrigger::new())
                .report()
                .await?
                .critical
                .len()
        }
        DiscardScope::All => db.queue_len().await? + db.dead_letter_count().await?,
    })
}

pub async fn run_dlq(context: &Context, command: DlqCommands) -> Result<(), CliError> {
    let db = context.open_database().await?;

    match command {
        DlqCommands::List { json } => {
            let report = DeadLetterOperator::new(db, SyncTrigger::new())
                .report()
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.is_empty() {
                println!("No failed entries.");
            } else {
                for line in format_dead_letter_lines(&report, now_millis()) {
                    println!("{line}");
                }
            }
        }
        DlqCommands::Retry { id } => {
            let id = parse_entry_id(&id)?;
            // A requeued entry is pushed right away when the remote is reachable.
            if context.config.has_remote() {
                let processor = SyncProcessor::new(
                    db.clone(),
                    context.remote_client()?,
                    context.config.sync_policy(),
                );
                let operator = DeadLetterOperator::new(db, processor.trigger());
                let outcome = operator.retry(&id).await?;
                print_retry_outcome(outcome);
                if outcome == RetryOutcome::Requeued {
                    let report = processor.drain().await?;
                    println!("{}", format_sync_report(&report));
                }
            } else {
                let outcome = DeadLetterOperator::new(db, SyncTrigger::new())
                    .retry(&id)
                    .await?;
                print_retry_outcome(outcome);
            }
        }
        DlqCommands::Discard { id, yes } => {
            let id = parse_entry_id(&id)?;
            confirm(&format!("discard {id}"), yes)?;
            DeadLetterOperator::new(db, SyncTrigger::new())
                .discard(&id)
                .await?;
            println!("Discarded {id}");
        }
        DlqCommands::DiscardAll { scope, yes } => {
            let scope = DiscardScope::from(scope);
            let count = discard_count(&db, scope).await?;
            if count == 0 {
                println!("Nothing to discard.");
                return Ok(());
            }
            let action = match scope {
                DiscardScope::Critical => format!("discard {count} critical entries"),
                DiscardScope::All => format!("discard all {count} queued and failed entries"),
            };
            confirm(&action, yes)?;
            let operator = DeadLetterOperator::new(db, SyncTrigger::new());
            let removed = operator.discard_all(scope).await?;
            println!("Discarded {removed} entries");
        }
    }
    Ok(())
}

fn print_retry_outcome(outcome: RetryOutcome) {
    match outcome {
        RetryOutcome::Requeued => println!("Moved back to the sync queue"),
        RetryOutcome::Reset => println!("Retry count reset"),
    }
}
