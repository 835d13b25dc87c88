//! Piece-rate pay with minimum-wage top-up, and break compliance.
//!
//! Everything here is derived. Violations are recomputed from the crew as a
//! whole each time; nothing is patched incrementally.

use std::fmt;

use serde::Serialize;

use crate::models::{AttendanceRecord, HarvestSettings, Picker};
use crate::util::round_cents;

/// A rest break is due after this many minutes of work.
pub const REST_BREAK_INTERVAL_MINUTES: i64 = 120;
/// Minutes without a rest break at which the violation becomes critical.
pub const REST_BREAK_CRITICAL_MINUTES: i64 = 180;
/// Hours on shift by which the meal break must have been taken.
pub const MEAL_BREAK_DEADLINE_HOURS: f64 = 4.0;

/// Pay rates a wage calculation needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WageRates {
    pub piece_rate: f64,
    pub min_wage_rate: f64,
}

impl From<&HarvestSettings> for WageRates {
    fn from(settings: &HarvestSettings) -> Self {
        Self {
            piece_rate: settings.piece_rate,
            min_wage_rate: settings.min_wage_rate,
        }
    }
}

/// One picker's earnings, in currency units rounded to cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WageBreakdown {
    pub piece_earnings: f64,
    /// Employer top-up so the picker earns at least the minimum wage
    pub minimum_owed: f64,
    pub total_earnings: f64,
    /// `total_earnings / hours`, zero when no hours were worked
    pub effective_hourly_rate: f64,
}

/// Piece earnings plus whatever tops them up to the minimum wage.
pub fn calculate_wage(buckets: u32, hours: f64, rates: WageRates) -> WageBreakdown {
    let hours = if hours.is_finite() { hours.max(0.0) } else { 0.0 };
    let piece_earnings = f64::from(buckets) * rates.piece_rate;
    let minimum_owed = hours.mul_add(rates.min_wage_rate, -piece_earnings).max(0.0);
    let total_earnings = piece_earnings + minimum_owed;

    WageBreakdown {
        piece_earnings: round_cents(piece_earnings),
        minimum_owed: round_cents(minimum_owed),
        total_earnings: round_cents(total_earnings),
        effective_hourly_rate: if hours > 0.0 {
            round_cents(total_earnings / hours)
        } else {
            0.0
        },
    }
}

/// What the calculator knows about one picker's day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickerShift {
    /// Picker row id
    pub picker_id: String,
    /// Badge code
    pub picker_code: String,
    pub name: String,
    /// Payable buckets today
    pub buckets: u32,
    pub hours: f64,
    /// Minutes worked since the last break ended (or since check-in)
    pub minutes_since_break: i64,
    pub meal_break_taken: bool,
}

impl PickerShift {
    /// Build a shift from the roster row and today's attendance, as of `now`.
    pub fn from_roster(picker: &Picker, attendance: Option<&AttendanceRecord>, now: i64) -> Self {
        let (hours, minutes_since_break, meal_break_taken) = attendance.map_or(
            (picker.hours, 0, false),
            |record| {
                let end = record.check_out_time.map_or(now, |out| out.min(now));
                (
                    record.hours_worked(now),
                    record.minutes_since_break(end),
                    record.meal_break_taken,
                )
            },
        );

        Self {
            picker_id: picker.id.clone(),
            picker_code: picker.picker_id.clone(),
            name: picker.name.clone(),
            buckets: picker.total_buckets_today,
            hours,
            minutes_since_break,
            meal_break_taken,
        }
    }
}

/// Kind of compliance problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    RestBreak,
    MealBreak,
    BelowMinimumWage,
}

impl ViolationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RestBreak => "rest_break",
            Self::MealBreak => "meal_break",
            Self::BelowMinimumWage => "below_minimum_wage",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Critical,
    Warning,
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
        })
    }
}

/// A derived compliance problem for one picker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceViolation {
    pub picker_id: String,
    pub kind: ViolationKind,
    pub severity: ViolationSeverity,
    pub description: String,
}

/// Violations for one picker's shift.
pub fn assess_shift(shift: &PickerShift, rates: WageRates) -> Vec<ComplianceViolation> {
    let mut violations = Vec::new();
    if shift.hours <= 0.0 {
        return violations;
    }

    let violation = |kind, severity, description: String| ComplianceViolation {
        picker_id: shift.picker_id.clone(),
        kind,
        severity,
        description,
    };

    if shift.minutes_since_break > REST_BREAK_INTERVAL_MINUTES {
        let severity = if shift.minutes_since_break >= REST_BREAK_CRITICAL_MINUTES {
            ViolationSeverity::Critical
        } else {
            ViolationSeverity::Warning
        };
        violations.push(violation(
            ViolationKind::RestBreak,
            severity,
            format!(
                "{} has worked {} minutes without a rest break (due every {REST_BREAK_INTERVAL_MINUTES})",
                shift.name, shift.minutes_since_break
            ),
        ));
    }

    if shift.hours >= MEAL_BREAK_DEADLINE_HOURS && !shift.meal_break_taken {
        violations.push(violation(
            ViolationKind::MealBreak,
            ViolationSeverity::Warning,
            format!(
                "{} has worked {:.1} hours without a meal break",
                shift.name, shift.hours
            ),
        ));
    }

    let wage = calculate_wage(shift.buckets, shift.hours, rates);
    if wage.minimum_owed > 0.0 {
        violations.push(violation(
            ViolationKind::BelowMinimumWage,
            ViolationSeverity::Warning,
            format!(
                "{} earned ${:.2} from {} buckets in {:.1} hours; ${:.2} top-up owed",
                shift.name, wage.piece_earnings, shift.buckets, shift.hours, wage.minimum_owed
            ),
        ));
    }

    violations
}

/// Violations for the whole crew, critical first.
pub fn assess_crew(shifts: &[PickerShift], rates: WageRates) -> Vec<ComplianceViolation> {
    let mut violations = shifts
        .iter()
        .flat_map(|shift| assess_shift(shift, rates))
        .collect::<Vec<_>>();
    violations.sort_by(|left, right| {
        left.severity
            .cmp(&right.severity)
            .then_with(|| left.picker_id.cmp(&right.picker_id))
    });
    violations
}

/// One line of the payroll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickerPayroll {
    pub picker_id: String,
    pub picker_code: String,
    pub name: String,
    pub buckets: u32,
    pub hours: f64,
    #[serde(flatten)]
    pub wage: WageBreakdown,
}

/// Crew payroll with totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayrollSummary {
    pub pickers: Vec<PickerPayroll>,
    pub total_buckets: u64,
    pub total_hours: f64,
    pub total_piece_earnings: f64,
    pub total_minimum_owed: f64,
    pub total_earnings: f64,
    /// Pickers whose pay needed a minimum-wage top-up
    pub pickers_topped_up: usize,
}

pub fn calculate_payroll(shifts: &[PickerShift], rates: WageRates) -> PayrollSummary {
    let mut summary = PayrollSummary::default();

    for shift in shifts {
        let wage = calculate_wage(shift.buckets, shift.hours, rates);
        summary.total_buckets += u64::from(shift.buckets);
        summary.total_hours += shift.hours.max(0.0);
        summary.total_piece_earnings += wage.piece_earnings;
        summary.total_minimum_owed += wage.minimum_owed;
        summary.total_earnings += wage.total_earnings;
        if wage.minimum_owed > 0.0 {
            summary.pickers_topped_up += 1;
        }
        summary.pickers.push(PickerPayroll {
            picker_id: shift.picker_id.clone(),
            picker_code: shift.picker_code.clone(),
            name: shift.name.clone(),
            buckets: shift.buckets,
            hours: shift.hours,
            wage,
        });
    }

    summary.total_hours = (summary.total_hours * 100.0).round() / 100.0;
    summary.total_piece_earnings = round_cents(summary.total_piece_earnings);
    summary.total_minimum_owed = round_cents(summary.total_minimum_owed);
    summary.total_earnings = round_cents(summary.total_earnings);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RATES: WageRates = WageRates {
        piece_rate: 6.50,
        min_wage_rate: 23.50,
    };

    fn shift(buckets: u32, hours: f64) -> PickerShift {
        PickerShift {
            picker_id: format!("picker-{buckets}"),
            picker_code: format!("P-{buckets}"),
            name: format!("Picker {buckets}"),
            buckets,
            hours,
            minutes_since_break: 30,
            meal_break_taken: true,
        }
    }

    fn kinds(violations: &[ComplianceViolation]) -> Vec<ViolationKind> {
        violations.iter().map(|violation| violation.kind).collect()
    }

    #[test]
    fn slow_picker_is_topped_up_to_minimum_wage() {
        assert_eq!(
            calculate_wage(5, 8.0, RATES),
            WageBreakdown {
                piece_earnings: 32.50,
                minimum_owed: 155.50,
                total_earnings: 188.00,
                effective_hourly_rate: 23.50,
            }
        );
    }

    #[test]
    fn fast_picker_needs_no_top_up() {
        let wage = calculate_wage(30, 8.0, RATES);
        assert_eq!(wage.piece_earnings, 195.00);
        assert_eq!(wage.minimum_owed, 0.0);
        assert_eq!(wage.total_earnings, 195.00);
    }

    #[test]
    fn invalid_hours_count_as_zero() {
        let wage = calculate_wage(2, f64::NAN, RATES);
        assert_eq!(wage.total_earnings, 13.00);
        assert_eq!(wage.minimum_owed, 0.0);
        assert_eq!(calculate_wage(2, -3.0, RATES).minimum_owed, 0.0);
    }

    #[test]
    fn zero_hours_is_never_a_violation() {
        let mut idle = shift(0, 0.0);
        idle.minutes_since_break = 500;
        idle.meal_break_taken = false;
        assert!(assess_shift(&idle, RATES).is_empty());
    }

    #[test]
    fn below_minimum_wage_is_flagged() {
        let violations = assess_shift(&shift(5, 8.0), RATES);
        assert_eq!(kinds(&violations), vec![ViolationKind::BelowMinimumWage]);
        assert!(violations[0].description.contains("155.50"));
        assert!(assess_shift(&shift(30, 8.0), RATES).is_empty());
    }

    #[test]
    fn rest_break_escalates() {
        let mut worker = shift(30, 3.0);
        worker.minutes_since_break = 120;
        assert!(assess_shift(&worker, RATES).is_empty());

        worker.minutes_since_break = 121;
        let violations = assess_shift(&worker, RATES);
        assert_eq!(violations[0].severity, ViolationSeverity::Warning);

        worker.minutes_since_break = 180;
        let violations = assess_shift(&worker, RATES);
        assert_eq!(violations[0].kind, ViolationKind::RestBreak);
        assert_eq!(violations[0].severity, ViolationSeverity::Critical);
    }

    #[test]
    fn meal_break_due_by_four_hours() {
        let mut worker = shift(30, 3.9);
        worker.meal_break_taken = false;
        assert!(assess_shift(&worker, RATES).is_empty());

        worker.hours = 4.0;
        assert_eq!(
            kinds(&assess_shift(&worker, RATES)),
            vec![ViolationKind::MealBreak]
        );
    }

    #[test]
    fn crew_assessment_orders_critical_first() {
        let slow = shift(5, 8.0);
        let mut tired = shift(40, 6.0);
        tired.minutes_since_break = 200;

        let violations = assess_crew(&[slow, tired], RATES);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].severity, ViolationSeverity::Critical);
        assert_eq!(violations[1].kind, ViolationKind::BelowMinimumWage);
    }

    #[test]
    fn payroll_totals() {
        let summary = calculate_payroll(&[shift(5, 8.0), shift(30, 8.0)], RATES);

        assert_eq!(summary.pickers.len(), 2);
        assert_eq!(summary.total_buckets, 35);
        assert_eq!(summary.total_hours, 16.0);
        assert_eq!(summary.total_piece_earnings, 227.50);
        assert_eq!(summary.total_minimum_owed, 155.50);
        assert_eq!(summary.total_earnings, 383.00);
        assert_eq!(summary.pickers_topped_up, 1);
    }

    #[test]
    fn shift_from_roster_uses_attendance() {
        const HOUR: i64 = 3_600_000;
        let mut picker = Picker::new("P-1", "Hemi", "orchard-1");
        picker.total_buckets_today = 12;
        let start = 1_699_950_000_000;
        let mut record = AttendanceRecord::check_in(&picker.id, "orchard-1", start);
        record.last_break_at = Some(start + 2 * HOUR);
        record.meal_break_taken = true;

        let shift = PickerShift::from_roster(&picker, Some(&record), start + 5 * HOUR);
        assert_eq!(shift.buckets, 12);
        assert!((shift.hours - 5.0).abs() < 1e-9);
        assert_eq!(shift.minutes_since_break, 180);
        assert!(shift.meal_break_taken);

        let absent = PickerShift::from_roster(&picker, None, start);
        assert_eq!(absent.hours, 0.0);
    }
}
