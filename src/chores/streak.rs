//! Streak calculator. Continuity is decided by missed-occurrence detection
//! against the chore's schedule, not by naive day-gap arithmetic — a weekly
//! chore completed on consecutive Mondays has a 13-day gap and an intact
//! streak. The day-gap rule survives only as the fallback for unscheduled
//! chores and for schedule arithmetic failures.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::recurrence::Schedule;

/// Streak value after an approval at `current_completion`.
///
/// First-ever completion starts at 1. A skipped occurrence between the two
/// completions resets to 1; otherwise the streak extends. Schedule errors
/// never fail the surrounding approval: they degrade to the day-gap rule
/// with a warning.
pub fn compute_streak(
    previous_streak: u32,
    last_completion: Option<DateTime<Utc>>,
    current_completion: DateTime<Utc>,
    schedule: &Schedule,
) -> u32 {
    let Some(last) = last_completion else {
        return 1;
    };
    if schedule.is_unscheduled() {
        return day_gap_streak(previous_streak, last, current_completion);
    }
    match schedule.has_missed_occurrence(last, current_completion) {
        Ok(true) => 1,
        Ok(false) => previous_streak.saturating_add(1),
        Err(err) => {
            warn!(
                err = %err,
                schedule = %schedule,
                "schedule arithmetic failed, falling back to day-gap streak"
            );
            day_gap_streak(previous_streak, last, current_completion)
        }
    }
}

/// Legacy rule: a gap of at most one calendar day continues the streak.
fn day_gap_streak(
    previous_streak: u32,
    last: DateTime<Utc>,
    current: DateTime<Utc>,
) -> u32 {
    let gap = (current.date_naive() - last.date_naive()).num_days();
    if (0..=1).contains(&gap) {
        previous_streak.saturating_add(1)
    } else {
        1
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{Frequency, IntervalUnit};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn daily() -> Schedule {
        Schedule {
            frequency: Frequency::Daily,
            ..Schedule::default()
        }
    }

    #[test]
    fn first_completion_starts_at_one() {
        assert_eq!(compute_streak(0, None, at(2026, 1, 1, 10), &daily()), 1);
        // Even a stale previous value cannot leak through.
        assert_eq!(compute_streak(7, None, at(2026, 1, 1, 10), &daily()), 1);
    }

    #[test]
    fn consecutive_days_extend() {
        let s = daily();
        assert_eq!(
            compute_streak(4, Some(at(2026, 1, 1, 10)), at(2026, 1, 2, 10), &s),
            5
        );
    }

    #[test]
    fn skipped_occurrence_resets_to_one() {
        let s = daily();
        assert_eq!(
            compute_streak(9, Some(at(2026, 1, 1, 10)), at(2026, 1, 3, 10), &s),
            1
        );
    }

    #[test]
    fn weekly_gap_is_not_a_reset() {
        let s = Schedule {
            frequency: Frequency::Weekly,
            weekdays: Some(vec![chrono::Weekday::Mon]),
            ..Schedule::default()
        };
        // Mondays 2025-01-06 and 2025-01-13: 7 days apart, streak extends.
        assert_eq!(
            compute_streak(3, Some(at(2025, 1, 6, 9)), at(2025, 1, 13, 9), &s),
            4
        );
        // Skipping the 13th resets.
        assert_eq!(
            compute_streak(3, Some(at(2025, 1, 6, 9)), at(2025, 1, 20, 9), &s),
            1
        );
    }

    #[test]
    fn unscheduled_uses_day_gap_rule() {
        let s = Schedule::unscheduled();
        assert_eq!(
            compute_streak(2, Some(at(2026, 1, 1, 22)), at(2026, 1, 2, 7), &s),
            3
        );
        assert_eq!(
            compute_streak(2, Some(at(2026, 1, 1, 22)), at(2026, 1, 4, 7), &s),
            1
        );
    }

    #[test]
    fn schedule_error_degrades_to_day_gap() {
        let s = Schedule {
            frequency: Frequency::Every {
                count: 0,
                unit: IntervalUnit::Days,
            },
            ..Schedule::default()
        };
        // Zero interval is an arithmetic error; approval still gets a streak.
        assert_eq!(
            compute_streak(5, Some(at(2026, 1, 1, 10)), at(2026, 1, 2, 10), &s),
            6
        );
        assert_eq!(
            compute_streak(5, Some(at(2026, 1, 1, 10)), at(2026, 1, 5, 10), &s),
            1
        );
    }

    #[test]
    fn out_of_order_timestamps_do_not_reset() {
        // Clock skew: current before last. Missed-occurrence answers false,
        // so the streak extends rather than resetting spuriously.
        let s = daily();
        assert_eq!(
            compute_streak(4, Some(at(2026, 1, 2, 10)), at(2026, 1, 2, 9), &s),
            5
        );
    }

    #[test]
    fn streak_saturates_at_u32_max() {
        let s = daily();
        assert_eq!(
            compute_streak(u32::MAX, Some(at(2026, 1, 1, 10)), at(2026, 1, 2, 10), &s),
            u32::MAX
        );
    }
}
