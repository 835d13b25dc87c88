//! Payroll export rendering for the CLI and manager dashboards.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::compliance::{PayrollSummary, WageRates};
use crate::Error;

/// Payroll export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayrollExportFormat {
    /// One row per picker with the full breakdown
    Csv,
    Json,
    /// Earnings lines shaped for a Xero pay-run import
    Xero,
}

impl PayrollExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv | Self::Xero => "csv",
        }
    }
}

impl FromStr for PayrollExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "xero" => Ok(Self::Xero),
            other => Err(Error::InvalidInput(format!(
                "unknown export format '{other}' (expected csv, json or xero)"
            ))),
        }
    }
}

#[derive(Serialize)]
struct JsonExport<'a> {
    pay_date: NaiveDate,
    rates: WageRates,
    #[serde(flatten)]
    summary: &'a PayrollSummary,
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(output: &mut String, fields: &[String]) {
    let line = fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",");
    // RFC 4180 line ending
    output.push_str(&line);
    output.push_str("\r\n");
}

/// Render the crew payroll as CSV, one row per picker plus a totals row.
#[must_use]
pub fn render_csv_export(summary: &PayrollSummary, pay_date: NaiveDate) -> String {
    let mut output = String::new();
    csv_row(
        &mut output,
        &[
            "pay_date", "picker_code", "name", "buckets", "hours", "piece_earnings",
            "minimum_owed", "total_earnings",
        ]
        .map(String::from),
    );

    for line in &summary.pickers {
        csv_row(
            &mut output,
            &[
                pay_date.to_string(),
                line.picker_code.clone(),
                line.name.clone(),
                line.buckets.to_string(),
                format!("{:.2}", line.hours),
                format!("{:.2}", line.wage.piece_earnings),
                format!("{:.2}", line.wage.minimum_owed),
                format!("{:.2}", line.wage.total_earnings),
            ],
        );
    }

    csv_row(
        &mut output,
        &[
            pay_date.to_string(),
            String::new(),
            "TOTAL".to_string(),
            summary.total_buckets.to_string(),
            format!("{:.2}", summary.total_hours),
            format!("{:.2}", summary.total_piece_earnings),
            format!("{:.2}", summary.total_minimum_owed),
            format!("{:.2}", summary.total_earnings),
        ],
    );
    output
}

/// Render Xero earnings lines: piece work per picker, plus a top-up line for
/// anyone paid up to the minimum wage.
#[must_use]
pub fn render_xero_export(
    summary: &PayrollSummary,
    rates: WageRates,
    pay_date: NaiveDate,
) -> String {
    let mut output = String::new();
    csv_row(
        &mut output,
        &[
            "EmployeeCode", "EmployeeName", "PayDate", "EarningsRate", "Units", "RatePerUnit",
            "Amount",
        ]
        .map(String::from),
    );

    for line in &summary.pickers {
        if line.buckets > 0 {
            csv_row(
                &mut output,
                &[
                    line.picker_code.clone(),
                    line.name.clone(),
                    pay_date.to_string(),
                    "Piece Rate".to_string(),
                    line.buckets.to_string(),
                    format!("{:.2}", rates.piece_rate),
                    format!("{:.2}", line.wage.piece_earnings),
                ],
            );
        }
        if line.wage.minimum_owed > 0.0 {
            csv_row(
                &mut output,
                &[
                    line.picker_code.clone(),
                    line.name.clone(),
                    pay_date.to_string(),
                    "Minimum Wage Top-Up".to_string(),
                    "1".to_string(),
                    format!("{:.2}", line.wage.minimum_owed),
                    format!("{:.2}", line.wage.minimum_owed),
                ],
            );
        }
    }
    output
}

/// Render the payroll based on the selected format.
pub fn render_payroll_export(
    summary: &PayrollSummary,
    rates: WageRates,
    pay_date: NaiveDate,
    format: PayrollExportFormat,
) -> serde_json::Result<String> {
    match format {
        PayrollExportFormat::Csv => Ok(render_csv_export(summary, pay_date)),
        PayrollExportFormat::Json => serde_json::to_string_pretty(&JsonExport {
            pay_date,
            rates,
            summary,
        }),
        PayrollExportFormat::Xero => Ok(render_xero_export(summary, rates, pay_date)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(
    format: PayrollExportFormat,
    orchard_id: &str,
    pay_date: NaiveDate,
) -> String {
    let orchard = orchard_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>();
    let suffix = if format == PayrollExportFormat::Xero {
        "-xero"
    } else {
        ""
    };
    format!("payroll-{orchard}-{pay_date}{suffix}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{calculate_payroll, PickerShift};
    use pretty_assertions::assert_eq;

    const RATES: WageRates = WageRates {
        piece_rate: 6.50,
        min_wage_rate: 23.50,
    };

    fn pay_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn summary() -> PayrollSummary {
        let shift = |code: &str, name: &str, buckets, hours| PickerShift {
            picker_id: format!("id-{code}"),
            picker_code: code.to_string(),
            name: name.to_string(),
            buckets,
            hours,
            minutes_since_break: 0,
            meal_break_taken: true,
        };
        calculate_payroll(
            &[
                shift("P-1", "Smith, \"Jo\"", 5, 8.0),
                shift("P-2", "Aroha", 30, 8.0),
            ],
            RATES,
        )
    }

    #[test]
    fn csv_escapes_and_totals() {
        let rendered = render_csv_export(&summary(), pay_date());
        let lines = rendered.split("\r\n").collect::<Vec<_>>();

        assert_eq!(
            lines[0],
            "pay_date,picker_code,name,buckets,hours,piece_earnings,minimum_owed,total_earnings"
        );
        assert_eq!(
            lines[1],
            "2026-03-02,P-1,\"Smith, \"\"Jo\"\"\",5,8.00,32.50,155.50,188.00"
        );
        assert_eq!(lines[2], "2026-03-02,P-2,Aroha,30,8.00,195.00,0.00,195.00");
        assert_eq!(lines[3], "2026-03-02,,TOTAL,35,16.00,227.50,155.50,383.00");
    }

    #[test]
    fn xero_adds_top_up_lines_only_when_owed() {
        let rendered = render_xero_export(&summary(), RATES, pay_date());
        let lines = rendered.lines().collect::<Vec<_>>();

        assert_eq!(lines.len(), 4);
        assert!(lines[2].ends_with("Minimum Wage Top-Up,1,155.50,155.50"));
        assert!(lines[3].starts_with("P-2,Aroha,2026-03-02,Piece Rate,30,6.50,195.00"));
    }

    #[test]
    fn json_carries_rates_and_totals() {
        let rendered =
            render_payroll_export(&summary(), RATES, pay_date(), PayrollExportFormat::Json)
                .unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(value["pay_date"], "2026-03-02");
        assert_eq!(value["rates"]["piece_rate"], 6.5);
        assert_eq!(value["total_earnings"], 383.0);
        assert_eq!(value["pickers"][0]["minimum_owed"], 155.5);
    }

    #[test]
    fn format_parsing_and_file_names() {
        assert_eq!(
            "XERO".parse::<PayrollExportFormat>().unwrap(),
            PayrollExportFormat::Xero
        );
        assert!("pdf".parse::<PayrollExportFormat>().is_err());
        assert_eq!(
            suggested_export_file_name(PayrollExportFormat::Csv, "orchard 1", pay_date()),
            "payroll-orchard_1-2026-03-02.csv"
        );
        assert_eq!(
            suggested_export_file_name(PayrollExportFormat::Xero, "o-1", pay_date()),
            "payroll-o-1-2026-03-02-xero.csv"
        );
    }
}
