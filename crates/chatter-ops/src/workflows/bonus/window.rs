use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use super::domain::{
    BonusRule, CompanyId, WindowFallback, WindowKind, WindowSource, WindowSpan, WorkerId,
};
use super::repository::ShiftDirectory;

/// Compute the calendar window containing `as_of` for the given shape,
/// anchored at local midnight in `tz`. Bounds are half-open `[start, end)`.
pub fn calendar_window(kind: WindowKind, as_of: DateTime<Utc>, tz: Tz) -> WindowSpan {
    let local_date = as_of.with_timezone(&tz).date_naive();

    let (start_date, end_date) = match kind {
        WindowKind::CalendarDay => (local_date, local_date + Duration::days(1)),
        WindowKind::CalendarWeek => {
            let monday =
                local_date - Duration::days(local_date.weekday().num_days_from_monday() as i64);
            (monday, monday + Duration::days(7))
        }
        WindowKind::CalendarMonth => {
            let first = local_date.with_day(1).unwrap_or(local_date);
            (first, first_of_next_month(first))
        }
    };

    WindowSpan {
        start: local_midnight(tz, start_date),
        end: local_midnight(tz, end_date),
        source: WindowSource::Calendar,
    }
}

/// Resolve the evaluation window for one rule × worker. Shift-based day rules
/// use the worker's recorded shift span; a missing shift or a lookup failure
/// falls back to the calendar day and flags the reason.
pub fn resolve_window<S>(
    rule: &BonusRule,
    company_id: &CompanyId,
    worker_id: &WorkerId,
    as_of: DateTime<Utc>,
    shifts: &S,
) -> WindowSpan
where
    S: ShiftDirectory + ?Sized,
{
    if !(rule.config.shift_based && rule.window == WindowKind::CalendarDay) {
        return calendar_window(rule.window, as_of, rule.timezone);
    }

    let local_date = as_of.with_timezone(&rule.timezone).date_naive();
    let fallback = |reason: WindowFallback| {
        let mut span = calendar_window(WindowKind::CalendarDay, as_of, rule.timezone);
        span.source = WindowSource::CalendarFallback { reason };
        span
    };

    match shifts.shift_covering(company_id, worker_id, local_date) {
        Ok(Some(shift)) => WindowSpan {
            start: shift.start,
            end: shift.end,
            source: WindowSource::Shift,
        },
        Ok(None) => fallback(WindowFallback::NoShiftFound),
        Err(err) => {
            warn!(
                rule = %rule.id.0,
                worker = %worker_id.0,
                %local_date,
                error = %err,
                "shift lookup failed, using calendar day window"
            );
            fallback(WindowFallback::ShiftLookupFailed)
        }
    }
}

fn first_of_next_month(first: NaiveDate) -> NaiveDate {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first)
}

/// Local midnight of `date` in `tz`, as a UTC instant. A DST gap at midnight
/// resolves to the earliest valid local time of that date.
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).expect("midnight is a valid time");
    match tz.from_local_datetime(&naive).earliest() {
        Some(instant) => instant.with_timezone(&Utc),
        None => {
            // Midnight does not exist on this date (spring-forward gap);
            // probe forward in 15-minute increments for the first valid time.
            let mut probe = naive;
            loop {
                probe += Duration::minutes(15);
                if let Some(instant) = tz.from_local_datetime(&probe).earliest() {
                    return instant.with_timezone(&Utc);
                }
            }
        }
    }
}
