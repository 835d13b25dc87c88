//! Field actions: bucket scans and attendance.

use harvest_core::queue::{self, BucketScanner};
use harvest_core::util::now_millis;
use harvest_core::QualityGrade;

use crate::commands::common::{find_picker, format_timestamp, Context};
use crate::error::CliError;

pub async fn run_scan(context: &Context, code: &str, grade: QualityGrade) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;
    let scanner = BucketScanner::new(db, orchard_id, context.config.scan_guard());

    let receipt = scanner.scan(code, grade).await?;
    println!(
        "{} grade {} for {} ({} today) [{}]",
        if grade == QualityGrade::Reject {
            "Recorded reject"
        } else {
            "Recorded bucket"
        },
        grade,
        receipt.picker.name,
        receipt.total_buckets_today,
        receipt.entry.id
    );
    Ok(())
}

pub async fn run_check_in(context: &Context, code: &str) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;
    let picker = find_picker(&db, orchard_id, code).await?;

    let record = queue::check_in(&db, &picker, now_millis()).await?;
    println!(
        "{} checked in at {}",
        picker.name,
        format_timestamp(record.check_in_time)
    );
    Ok(())
}

pub async fn run_check_out(context: &Context, code: &str) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;
    let picker = find_picker(&db, orchard_id, code).await?;

    let now = now_millis();
    let record = queue::check_out(&db, &picker, now).await?;
    println!(
        "{} checked out after {:.2} hours",
        picker.name,
        record.hours_worked(now)
    );
    Ok(())
}

pub async fn run_break(context: &Context, code: &str, meal: bool) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;
    let picker = find_picker(&db, orchard_id, code).await?;

    queue::record_break(&db, &picker, now_millis(), meal).await?;
    println!(
        "Recorded {} break for {}",
        if meal { "meal" } else { "rest" },
        picker.name
    );
    Ok(())
}
