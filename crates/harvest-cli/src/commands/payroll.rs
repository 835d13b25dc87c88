//! Payroll, compliance and export views over today's state.

use std::path::Path;

use harvest_core::compliance::{ComplianceViolation, PayrollSummary, WageRates};
use harvest_core::export::{render_payroll_export, suggested_export_file_name, PayrollExportFormat};
use harvest_core::state::StateSnapshot;
use harvest_core::util::{day_of, now_millis};

use crate::commands::common::{write_output, Context};
use crate::error::CliError;

async fn load_today(context: &Context) -> Result<(StateSnapshot, i64), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;
    let now = now_millis();
    Ok((StateSnapshot::load(&db, orchard_id, now).await?, now))
}

pub fn format_payroll_lines(summary: &PayrollSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<8}  {:<20}  {:>7}  {:>6}  {:>9}  {:>9}  {:>9}",
        "Code", "Name", "Buckets", "Hours", "Piece", "Top-up", "Total"
    )];
    lines.extend(summary.pickers.iter().map(|line| {
        format!(
            "{:<8}  {:<20}  {:>7}  {:>6.2}  {:>9.2}  {:>9.2}  {:>9.2}",
            line.picker_code,
            line.name,
            line.buckets,
            line.hours,
            line.wage.piece_earnings,
            line.wage.minimum_owed,
            line.wage.total_earnings
        )
    }));
    lines.push(format!(
        "{:<8}  {:<20}  {:>7}  {:>6.2}  {:>9.2}  {:>9.2}  {:>9.2}",
        "",
        "TOTAL",
        summary.total_buckets,
        summary.total_hours,
        summary.total_piece_earnings,
        summary.total_minimum_owed,
        summary.total_earnings
    ));
    lines
}

pub fn format_violation_lines(violations: &[ComplianceViolation]) -> Vec<String> {
    violations
        .iter()
        .map(|violation| {
            format!(
                "[{}] {}: {}",
                violation.severity, violation.kind, violation.description
            )
        })
        .collect()
}

pub async fn run_payroll(context: &Context, as_json: bool) -> Result<(), CliError> {
    let (snapshot, now) = load_today(context).await?;
    let summary = snapshot.payroll(now);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for line in format_payroll_lines(&summary) {
        println!("{line}");
    }
    if summary.pickers_topped_up > 0 {
        println!(
            "{} picker(s) topped up to the minimum wage of ${:.2}/h",
            summary.pickers_topped_up, snapshot.settings.min_wage_rate
        );
    }
    Ok(())
}

pub async fn run_compliance(context: &Context, as_json: bool) -> Result<(), CliError> {
    let (snapshot, _) = load_today(context).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&snapshot.violations)?);
        return Ok(());
    }

    if snapshot.violations.is_empty() {
        println!("No compliance issues.");
        return Ok(());
    }
    for line in format_violation_lines(&snapshot.violations) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_export(
    context: &Context,
    format: PayrollExportFormat,
    output: Option<&Path>,
) -> Result<(), CliError> {
    let (snapshot, now) = load_today(context).await?;
    let pay_date = day_of(now);
    let rendered = render_payroll_export(
        &snapshot.payroll(now),
        WageRates::from(&snapshot.settings),
        pay_date,
        format,
    )?;

    let target = output.map(|path| {
        if path.is_dir() {
            path.join(suggested_export_file_name(
                format,
                &snapshot.orchard_id,
                pay_date,
            ))
        } else {
            path.to_path_buf()
        }
    });
    write_output(&rendered, target.as_deref())
}
