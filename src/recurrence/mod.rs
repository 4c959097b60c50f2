//! Recurrence engine — schedule definitions and occurrence arithmetic.
//!
//! Pure and stateless: given a schedule and a reference instant it computes
//! the next scheduled occurrence, enumerates occurrences in a window, and
//! answers "was a scheduled occurrence skipped between two completions?".
//! Streak continuity and overdue detection are both built on the last of
//! those, so the date math lives here and nowhere else.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Fallback anchor for stride-based schedules with no explicit start date.
/// 2024-01-01 is a Monday, so un-anchored weekly schedules land on Mondays.
const DEFAULT_ANCHOR: (i32, u32, u32) = (2024, 1, 1);

/// Upper bound on the candidate scan inside a single occurrence lookup.
/// Weekday filters need at most 7 steps; month clamping needs at most 3.
const MAX_SCAN_STEPS: u32 = 8;

fn default_due_time() -> NaiveTime {
    // 23:59 — end of day, keeping occurrences clear of the midnight boundary.
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default()
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Recoverable schedule-arithmetic failures.
///
/// Callers on the streak/overdue paths catch these and fall back to a
/// conservative answer instead of failing the surrounding command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("interval count must be at least 1")]
    ZeroInterval,
    #[error("date arithmetic overflow while stepping the schedule")]
    DateOverflow,
}

// ─── Schedule types ──────────────────────────────────────────────────────────

/// Interval unit for custom `every N <unit>` frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
}

/// How often a chore recurs.
///
/// `None` is the unscheduled sentinel: it produces no occurrences and never
/// reports a missed one, so streak and overdue logic stay inert for chores
/// without a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    None,
    Daily,
    Weekly,
    Monthly,
    Every { count: u32, unit: IntervalUnit },
}

impl Default for Frequency {
    fn default() -> Self {
        Self::None
    }
}

/// A chore's recurrence pattern: frequency, optional weekday filter,
/// time-of-day occurrences land on, and the base date strides are anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub frequency: Frequency,
    /// Restrict weekly-kind occurrences to these weekdays (e.g. `["mon", "thu"]`).
    #[serde(with = "weekday_filter")]
    pub weekdays: Option<Vec<Weekday>>,
    /// Time of day each occurrence falls due (default 23:59).
    #[serde(with = "short_time")]
    pub due_time: NaiveTime,
    /// Base/reference date occurrences are generated from.
    pub start_date: Option<NaiveDate>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            frequency: Frequency::None,
            weekdays: None,
            due_time: default_due_time(),
            start_date: None,
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.frequency {
            Frequency::None => write!(f, "unscheduled"),
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => match &self.weekdays {
                Some(days) if !days.is_empty() => {
                    let names: Vec<String> =
                        days.iter().map(|d| format!("{d}").to_lowercase()).collect();
                    write!(f, "weekly on {}", names.join(", "))
                }
                _ => write!(f, "weekly"),
            },
            Frequency::Monthly => write!(f, "monthly (day {})", self.anchor().day()),
            Frequency::Every { count, unit } => {
                let unit = match unit {
                    IntervalUnit::Days => "day",
                    IntervalUnit::Weeks => "week",
                    IntervalUnit::Months => "month",
                };
                if *count == 1 {
                    write!(f, "every {unit}")
                } else {
                    write!(f, "every {count} {unit}s")
                }
            }
        }
    }
}

impl Schedule {
    /// Convenience constructor for an unscheduled chore.
    pub fn unscheduled() -> Self {
        Self::default()
    }

    /// Returns `true` if no recurrence pattern is configured.
    pub fn is_unscheduled(&self) -> bool {
        matches!(self.frequency, Frequency::None)
    }

    /// Anchor date strides and month patterns are generated from.
    fn anchor(&self) -> NaiveDate {
        self.start_date.unwrap_or_else(|| {
            let (y, m, d) = DEFAULT_ANCHOR;
            NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
        })
    }

    /// The effective weekday filter, if any (empty filters count as absent).
    fn filter(&self) -> Option<&[Weekday]> {
        match &self.weekdays {
            Some(days) if !days.is_empty() => Some(days),
            _ => None,
        }
    }

    /// Returns `true` for weekly-kind frequencies, the only ones a weekday
    /// filter applies to.
    pub fn is_weekly_kind(&self) -> bool {
        matches!(
            self.frequency,
            Frequency::Weekly
                | Frequency::Every {
                    unit: IntervalUnit::Weeks,
                    ..
                }
        )
    }

    // ─── Occurrence arithmetic ───────────────────────────────────────────────

    /// First occurrence date on or after `date`, or `None` for unscheduled.
    fn first_occurrence_on_or_after(&self, date: NaiveDate) -> Result<Option<NaiveDate>, ScheduleError> {
        match &self.frequency {
            Frequency::None => Ok(None),
            Frequency::Daily => Ok(Some(date)),
            Frequency::Weekly => match self.filter() {
                Some(days) => next_weekday_in(date, days).map(Some),
                None => stride_on_or_after(self.anchor(), date, 7).map(Some),
            },
            Frequency::Monthly => month_stride_on_or_after(self.anchor(), date, 1).map(Some),
            Frequency::Every { count, unit } => {
                if *count == 0 {
                    return Err(ScheduleError::ZeroInterval);
                }
                match unit {
                    IntervalUnit::Days => {
                        stride_on_or_after(self.anchor(), date, i64::from(*count)).map(Some)
                    }
                    IntervalUnit::Weeks => match self.filter() {
                        // A filter on a 1-week stride is just a weekly filter.
                        Some(days) if *count == 1 => next_weekday_in(date, days).map(Some),
                        _ => stride_on_or_after(self.anchor(), date, i64::from(*count) * 7)
                            .map(Some),
                    },
                    IntervalUnit::Months => {
                        month_stride_on_or_after(self.anchor(), date, *count).map(Some)
                    }
                }
            }
        }
    }

    /// Next scheduled occurrence strictly after `after`, or `None` for
    /// unscheduled chores.
    pub fn next_occurrence(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        if self.is_unscheduled() {
            return Ok(None);
        }
        let after = truncate_to_second(after);
        let mut date = after.date_naive();
        // The same-day occurrence counts only if its instant is still ahead.
        for _ in 0..MAX_SCAN_STEPS {
            match self.first_occurrence_on_or_after(date)? {
                Some(d) => {
                    let at = d.and_time(self.due_time).and_utc();
                    if at > after {
                        return Ok(Some(at));
                    }
                    date = d.succ_opt().ok_or(ScheduleError::DateOverflow)?;
                }
                None => return Ok(None),
            }
        }
        Err(ScheduleError::DateOverflow)
    }

    /// Occurrences in the half-open window `(start, end]`, oldest first,
    /// capped at `limit`.
    ///
    /// Restartable: pass the last yielded occurrence as the new `start` to
    /// continue the enumeration.
    pub fn occurrences_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let mut out = Vec::new();
        let mut cursor = start;
        while out.len() < limit {
            match self.next_occurrence(cursor)? {
                Some(at) if at <= end => {
                    out.push(at);
                    cursor = at;
                }
                _ => break,
            }
        }
        Ok(out)
    }

    /// Returns `true` iff at least one scheduled occurrence was skipped
    /// between the two completions.
    ///
    /// Comparison happens at occurrence-date granularity: a completion any
    /// time during an occurrence's day satisfies that occurrence, so an
    /// early-morning approval never counts the same evening's occurrence as
    /// missed. Both inputs are truncated to whole seconds first; equal or
    /// out-of-order instants never report a miss. Unscheduled chores always
    /// answer `false`.
    pub fn has_missed_occurrence(
        &self,
        last_completion: DateTime<Utc>,
        current_completion: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        if self.is_unscheduled() {
            return Ok(false);
        }
        let last = truncate_to_second(last_completion);
        let current = truncate_to_second(current_completion);
        if current <= last {
            return Ok(false);
        }
        let after = last
            .date_naive()
            .succ_opt()
            .ok_or(ScheduleError::DateOverflow)?;
        match self.first_occurrence_on_or_after(after)? {
            Some(next) => Ok(next < current.date_naive()),
            None => Ok(false),
        }
    }
}

// ─── Date helpers ────────────────────────────────────────────────────────────

/// Drop sub-second precision so both sides of a comparison sit on the same
/// grid (occurrence instants are always whole seconds).
pub fn truncate_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(0).unwrap_or(at)
}

/// Next date on or after `date` whose weekday is in `days`.
fn next_weekday_in(date: NaiveDate, days: &[Weekday]) -> Result<NaiveDate, ScheduleError> {
    let mut d = date;
    for _ in 0..7 {
        if days.contains(&d.weekday()) {
            return Ok(d);
        }
        d = d.succ_opt().ok_or(ScheduleError::DateOverflow)?;
    }
    // Only reachable with an empty filter, which `Schedule::filter` screens out.
    Err(ScheduleError::DateOverflow)
}

/// First date on or after `date` that sits on the `stride_days` grid
/// anchored at `anchor`.
fn stride_on_or_after(
    anchor: NaiveDate,
    date: NaiveDate,
    stride_days: i64,
) -> Result<NaiveDate, ScheduleError> {
    if stride_days <= 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    if date <= anchor {
        return Ok(anchor);
    }
    let gap = (date - anchor).num_days();
    let steps = (gap + stride_days - 1) / stride_days;
    anchor
        .checked_add_signed(Duration::days(steps * stride_days))
        .ok_or(ScheduleError::DateOverflow)
}

/// First date on or after `date` that lands `k * every_months` months after
/// `anchor` (day-of-month clamped by chrono, e.g. Jan 31 + 1 month = Feb 28).
fn month_stride_on_or_after(
    anchor: NaiveDate,
    date: NaiveDate,
    every_months: u32,
) -> Result<NaiveDate, ScheduleError> {
    if every_months == 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    if date <= anchor {
        return Ok(anchor);
    }
    let month_gap = (i64::from(date.year()) - i64::from(anchor.year())) * 12
        + i64::from(date.month()) - i64::from(anchor.month());
    let mut steps = (month_gap.max(0) as u32) / every_months;
    // Clamping can pull the candidate before `date`; at most two extra steps.
    for _ in 0..MAX_SCAN_STEPS {
        let candidate = anchor
            .checked_add_months(Months::new(steps * every_months))
            .ok_or(ScheduleError::DateOverflow)?;
        if candidate >= date {
            return Ok(candidate);
        }
        steps += 1;
    }
    Err(ScheduleError::DateOverflow)
}

// ─── Serde helpers ───────────────────────────────────────────────────────────

/// Weekday filters round-trip as lowercase short names (`"mon"`, `"tue"`, …),
/// accepting full names case-insensitively on input.
mod weekday_filter {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<Weekday>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .as_ref()
            .map(|days| {
                days.iter()
                    .map(|d| format!("{d}").to_lowercase())
                    .collect::<Vec<_>>()
            })
            .serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<Vec<Weekday>>, D::Error> {
        let raw: Option<Vec<String>> = Option::deserialize(de)?;
        raw.map(|names| {
            names
                .iter()
                .map(|name| {
                    name.parse::<Weekday>().map_err(|_| {
                        serde::de::Error::custom(format!("unknown weekday: {name}"))
                    })
                })
                .collect()
        })
        .transpose()
    }
}

/// Due times round-trip as `"HH:MM"`, accepting `"HH:MM:SS"` on input.
mod short_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&value.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(de)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|_| serde::de::Error::custom(format!("invalid time of day: {raw}")))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
