//! Occurrence generation -- expands a recurrence rule into concrete intervals.
//!
//! Every occurrence is anchored on the original start: occurrence `i` starts
//! `i × step` calendar days after it, at the same wall-clock time in the
//! configured timezone. Anchoring on the original start rather than the previous
//! occurrence keeps DST shifts from accumulating.

use std::collections::HashSet;

use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::model::{RecurrenceEnd, RecurrenceRule};

/// Hard ceiling on occurrences generated by a single request.
pub const MAX_OCCURRENCES: u32 = 104;

/// A single generated occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of a generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrencePlan {
    /// How many candidates the run intended to produce.
    pub planned: u32,
    /// Surviving occurrences, ordered by start, one per calendar date.
    pub occurrences: Vec<Occurrence>,
}

/// Number of candidates a rule asks for, before date bounds and deduplication.
///
/// Always at least 1 and never above `min(ceiling, MAX_OCCURRENCES)`.
pub fn planned_count(rule: &RecurrenceRule, start: DateTime<Utc>, ceiling: u32) -> u32 {
    let requested: i64 = match rule.end {
        RecurrenceEnd::Count(count) => i64::from(count),
        RecurrenceEnd::Until(until) => rule.pattern.occurrences_within(elapsed_days(start, until)),
        RecurrenceEnd::Never => i64::from(rule.pattern.open_ended_count()),
    };
    let ceiling = i64::from(ceiling.clamp(1, MAX_OCCURRENCES));
    // Bounded by `ceiling`, so the cast cannot truncate.
    requested.clamp(1, ceiling) as u32
}

/// Expand `[start, end)` according to `rule`.
///
/// # Errors
/// Returns `EngineError::Validation` if `end <= start`, if a count-bounded rule
/// asks for zero occurrences, or if a date-bounded rule ends before `start`.
pub fn generate_occurrences(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    rule: &RecurrenceRule,
    ceiling: u32,
    tz: Tz,
) -> Result<OccurrencePlan> {
    if end <= start {
        return Err(EngineError::Validation(
            "end date must be after start date".to_string(),
        ));
    }
    match rule.end {
        RecurrenceEnd::Count(0) => {
            return Err(EngineError::Validation(
                "recurrence count must be greater than zero".to_string(),
            ));
        }
        RecurrenceEnd::Until(until) if until < start => {
            return Err(EngineError::Validation(
                "recurrence end date must not be before the start date".to_string(),
            ));
        }
        _ => {}
    }

    let planned = planned_count(rule, start, ceiling);
    let duration = end - start;
    let anchor = start.with_timezone(&tz).naive_local();
    let step_days = rule.pattern.step_days() as u64;
    let bound = match rule.end {
        RecurrenceEnd::Until(until) => Some((until, whole_days(start, until))),
        _ => None,
    };

    let mut seen: HashSet<NaiveDate> = HashSet::new();
    let mut occurrences = Vec::with_capacity(planned as usize);

    for i in 0..u64::from(planned) {
        let candidate = if i == 0 {
            start
        } else {
            let Some(local) = anchor.checked_add_days(Days::new(i * step_days)) else {
                break;
            };
            match resolve_local(&tz, local) {
                Some(instant) => instant,
                None => {
                    tracing::debug!(%local, "Skipping occurrence with no local time");
                    continue;
                }
            }
        };

        // An occurrence a whole number of days inside the bound stays even when
        // a DST shift moves its instant past `until`.
        if let Some((until, days)) = bound {
            if candidate > until && i * step_days > days {
                break;
            }
        }

        if !seen.insert(calendar_date(candidate, tz)) {
            continue;
        }

        occurrences.push(Occurrence {
            start: candidate,
            end: candidate + duration,
        });
    }

    Ok(OccurrencePlan {
        planned,
        occurrences,
    })
}

/// Weekday of `instant` in `tz`, 0 = Sunday.
pub fn day_of_week(instant: DateTime<Utc>, tz: Tz) -> u8 {
    instant.with_timezone(&tz).weekday().num_days_from_sunday() as u8
}

/// Calendar date of `instant` in `tz`.
pub fn calendar_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Whole days from `start` to `until`, rounded down.
fn whole_days(start: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    u64::try_from((until - start).num_days()).unwrap_or(0)
}

fn elapsed_days(start: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let elapsed = until - start;
    let whole = elapsed.num_days();
    if elapsed > Duration::days(whole) {
        whole + 1
    } else {
        whole
    }
}

/// Map a wall-clock time to UTC. Ambiguous times take the earlier instant;
/// times inside a DST gap move forward by an hour. `None` when even that hour
/// does not exist (a skipped calendar day).
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let resolved = match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz.from_local_datetime(&(local + Duration::hours(1))).earliest(),
    };
    resolved.map(|dt| dt.with_timezone(&Utc))
}
