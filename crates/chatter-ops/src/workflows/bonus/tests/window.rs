use chrono::NaiveDate;

use super::common::*;
use crate::workflows::bonus::domain::{
    RuleConfig, ShiftSpan, TierBand, WindowFallback, WindowKind, WindowSource, EARNINGS_METRIC,
};
use crate::workflows::bonus::window::{calendar_window, resolve_window};

#[test]
fn day_window_is_local_midnight_to_midnight() {
    // 2025-06-15 12:30 local in Chicago (CDT, UTC-5).
    let as_of = utc(2025, 6, 15, 17, 30);
    let window = calendar_window(WindowKind::CalendarDay, as_of, CHICAGO);

    assert_eq!(window.start, utc(2025, 6, 15, 5, 0));
    assert_eq!(window.end, utc(2025, 6, 16, 5, 0));
    assert_eq!(window.source, WindowSource::Calendar);
}

#[test]
fn day_window_follows_the_local_date_not_the_utc_date() {
    // 03:00 UTC on the 15th is still 22:00 on the 14th in Chicago.
    let as_of = utc(2025, 6, 15, 3, 0);
    let window = calendar_window(WindowKind::CalendarDay, as_of, CHICAGO);

    assert_eq!(window.start, utc(2025, 6, 14, 5, 0));
    assert_eq!(window.end, utc(2025, 6, 15, 5, 0));
}

#[test]
fn week_window_starts_on_the_monday_on_or_before() {
    // 2025-06-15 is a Sunday; its week began Monday 2025-06-09.
    let as_of = utc(2025, 6, 15, 17, 30);
    let window = calendar_window(WindowKind::CalendarWeek, as_of, CHICAGO);

    assert_eq!(window.start, utc(2025, 6, 9, 5, 0));
    assert_eq!(window.end, utc(2025, 6, 16, 5, 0));
}

#[test]
fn week_window_on_a_monday_starts_that_day() {
    let as_of = utc(2025, 6, 9, 12, 0);
    let window = calendar_window(WindowKind::CalendarWeek, as_of, CHICAGO);

    assert_eq!(window.start, utc(2025, 6, 9, 5, 0));
    assert_eq!(window.end, utc(2025, 6, 16, 5, 0));
}

#[test]
fn month_window_is_stable_across_the_whole_month() {
    let expected_start = utc(2025, 6, 1, 5, 0);
    let expected_end = utc(2025, 7, 1, 5, 0);

    for as_of in [
        utc(2025, 6, 1, 5, 0),
        utc(2025, 6, 10, 0, 0),
        utc(2025, 6, 18, 23, 45),
        utc(2025, 7, 1, 4, 59),
    ] {
        let window = calendar_window(WindowKind::CalendarMonth, as_of, CHICAGO);
        assert_eq!(window.start, expected_start, "as_of {as_of}");
        assert_eq!(window.end, expected_end, "as_of {as_of}");
    }
}

#[test]
fn month_window_rolls_over_the_year_boundary() {
    // Chicago is on CST (UTC-6) in December.
    let as_of = utc(2025, 12, 15, 12, 0);
    let window = calendar_window(WindowKind::CalendarMonth, as_of, CHICAGO);

    assert_eq!(window.start, utc(2025, 12, 1, 6, 0));
    assert_eq!(window.end, utc(2026, 1, 1, 6, 0));
}

#[test]
fn midnight_dst_gap_resolves_to_first_valid_instant() {
    // Chile springs forward at midnight: 2025-09-07 00:00 does not exist and
    // the day starts at 01:00 local (UTC-3).
    let santiago: chrono_tz::Tz = chrono_tz::America::Santiago;
    let as_of = utc(2025, 9, 7, 12, 0);
    let window = calendar_window(WindowKind::CalendarDay, as_of, santiago);

    assert_eq!(window.start, utc(2025, 9, 7, 4, 0));
    assert_eq!(window.end, utc(2025, 9, 8, 3, 0));
}

fn shift_rule(shift_based: bool) -> crate::workflows::bonus::domain::BonusRule {
    crate::workflows::bonus::domain::BonusRule {
        id: crate::workflows::bonus::domain::RuleId("rule-window-test".to_string()),
        company_id: company(),
        name: "Shift bonus".to_string(),
        window: WindowKind::CalendarDay,
        timezone: CHICAGO,
        priority: 0,
        active: true,
        config: RuleConfig {
            metric: EARNINGS_METRIC.to_string(),
            tiers: vec![TierBand {
                min_amount_cents: 1000,
                bonus_cents: 100,
            }],
            include_refunds: false,
            shift_based,
            award_once_per_window: false,
        },
    }
}

#[test]
fn shift_based_rule_uses_the_recorded_shift_span() {
    let shifts = MemoryShifts::default();
    let worker = worker("a");
    let date = NaiveDate::from_ymd_opt(2025, 6, 15).expect("valid date");
    let span = ShiftSpan {
        start: utc(2025, 6, 15, 13, 0),
        end: utc(2025, 6, 15, 21, 0),
    };
    shifts.set(&company(), &worker, date, span);

    let rule = shift_rule(true);
    let as_of = utc(2025, 6, 15, 17, 30);
    let window = resolve_window(&rule, &company(), &worker, as_of, &shifts);

    assert_eq!(window.start, span.start);
    assert_eq!(window.end, span.end);
    assert_eq!(window.source, WindowSource::Shift);
}

#[test]
fn missing_shift_falls_back_to_the_calendar_day() {
    let shifts = MemoryShifts::default();
    let rule = shift_rule(true);
    let as_of = utc(2025, 6, 15, 17, 30);
    let window = resolve_window(&rule, &company(), &worker("a"), as_of, &shifts);

    assert_eq!(window.start, utc(2025, 6, 15, 5, 0));
    assert_eq!(window.end, utc(2025, 6, 16, 5, 0));
    assert_eq!(
        window.source,
        WindowSource::CalendarFallback {
            reason: WindowFallback::NoShiftFound
        }
    );
}

#[test]
fn failed_shift_lookup_falls_back_and_flags_the_reason() {
    let rule = shift_rule(true);
    let as_of = utc(2025, 6, 15, 17, 30);
    let window = resolve_window(&rule, &company(), &worker("a"), as_of, &OfflineShifts);

    assert_eq!(window.start, utc(2025, 6, 15, 5, 0));
    assert_eq!(
        window.source,
        WindowSource::CalendarFallback {
            reason: WindowFallback::ShiftLookupFailed
        }
    );
}

#[test]
fn shift_flag_is_ignored_for_non_day_windows() {
    let mut rule = shift_rule(true);
    rule.window = WindowKind::CalendarWeek;
    let as_of = utc(2025, 6, 15, 17, 30);
    let window = resolve_window(&rule, &company(), &worker("a"), as_of, &OfflineShifts);

    assert_eq!(window.start, utc(2025, 6, 9, 5, 0));
    assert_eq!(window.source, WindowSource::Calendar);
}
