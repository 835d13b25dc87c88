use harvest_core::sync::{SyncProcessor, SyncReport, SyncStatus};
use tokio::sync::watch;

use crate::commands::common::{format_timestamp, Context};
use crate::error::CliError;

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut summary = format!(
        "Synced {} of {} attempted; {} left in queue",
        report.synced, report.attempted, report.remaining
    );
    if report.retried > 0 {
        summary.push_str(&format!(", {} will be retried", report.retried));
    }
    if report.dead_lettered > 0 {
        summary.push_str(&format!(
            ", {} moved to the dead-letter queue",
            report.dead_lettered
        ));
    }
    if report.went_offline {
        summary.push_str(" (remote unreachable, stopped early)");
    }
    summary
}

pub fn format_sync_status(status: &SyncStatus) -> String {
    let mut line = format!("{}: {} pending", status.state.as_str(), status.pending);
    if let Some(at) = status.last_synced_at {
        line.push_str(&format!(", last synced {}", format_timestamp(at)));
    }
    if let Some(error) = status.last_error.as_deref() {
        line.push_str(&format!(", last error: {error}"));
    }
    line
}

pub async fn run_sync(context: &Context, watch_mode: bool) -> Result<(), CliError> {
    let client = context.remote_client()?;
    let db = context.open_database().await?;
    let processor = SyncProcessor::new(db, client, context.config.sync_policy());

    if !watch_mode {
        let report = processor.drain().await?;
        println!("{}", format_sync_report(&report));
        return Ok(());
    }

    let (_online_tx, online_rx) = watch::channel(true);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let mut status = processor.subscribe();
    let printer = async {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            println!("{}", format_sync_status(&current));
        }
    };

    println!(
        "Syncing every {}s; press Ctrl-C to stop.",
        context.config.sync_interval_secs
    );
    tokio::select! {
        result = processor.run(online_rx, shutdown_rx) => result?,
        () = printer => {}
    }
    Ok(())
}
