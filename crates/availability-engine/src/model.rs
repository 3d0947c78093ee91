//! Core data model: availability blocks, statuses, and recurrence metadata.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::mapping::BlockRecord;

/// Repository-assigned identifier of a persisted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub i64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of a block. Blocks never span users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier shared by every occurrence of one recurring series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecurrenceGroup(String);

impl RecurrenceGroup {
    /// Issue a fresh group id. One is generated per create request.
    pub fn generate() -> Self {
        Self(format!("series-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecurrenceGroup {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecurrenceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    #[default]
    Available,
    Unavailable,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AvailabilityStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(EngineError::Validation(format!(
                "unknown status '{}' (expected available or unavailable)",
                other
            ))),
        }
    }
}

/// How far apart consecutive occurrences of a series are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Biweekly,
}

impl RecurrencePattern {
    /// Days between two consecutive occurrences.
    pub fn step_days(&self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Biweekly => 14,
        }
    }

    pub fn step(&self) -> Duration {
        Duration::days(self.step_days())
    }

    /// Occurrence count used when a series has no end (`never`).
    pub fn open_ended_count(&self) -> u32 {
        match self {
            Self::Daily => 30,
            Self::Weekly => 52,
            Self::Biweekly => 26,
        }
    }

    /// Occurrences needed to cover `elapsed_days` days, counting the first one.
    pub fn occurrences_within(&self, elapsed_days: i64) -> i64 {
        let elapsed_days = elapsed_days.max(0);
        let step = self.step_days();
        (elapsed_days + step - 1) / step + 1
    }
}

/// Wire-level tag for [`RecurrenceEnd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceEndType {
    Count,
    Date,
    Never,
}

/// When a recurring series stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceEnd {
    /// Exactly this many occurrences (before same-day deduplication).
    Count(u32),
    /// No occurrence may start after this instant.
    Until(DateTime<Utc>),
    /// Open-ended; bounded by the pattern's default count.
    Never,
}

impl RecurrenceEnd {
    pub fn end_type(&self) -> RecurrenceEndType {
        match self {
            Self::Count(_) => RecurrenceEndType::Count,
            Self::Until(_) => RecurrenceEndType::Date,
            Self::Never => RecurrenceEndType::Never,
        }
    }

    pub fn count(&self) -> Option<u32> {
        match self {
            Self::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Until(date) => Some(*date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub pattern: RecurrencePattern,
    pub end: RecurrenceEnd,
}

/// Recurrence metadata carried by every occurrence of a series.
///
/// A block either has all of it or none of it, so the "recurring without a
/// group" state cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesMembership {
    pub group: RecurrenceGroup,
    pub rule: RecurrenceRule,
}

/// A persisted availability block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "BlockRecord", try_from = "BlockRecord")]
pub struct AvailabilityBlock {
    pub id: BlockId,
    pub user_id: UserId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AvailabilityStatus,
    pub series: Option<SeriesMembership>,
    /// Weekday of this occurrence, 0 = Sunday.
    pub day_of_week: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityBlock {
    pub fn is_recurring(&self) -> bool {
        self.series.is_some()
    }

    pub fn recurrence_group(&self) -> Option<&RecurrenceGroup> {
        self.series.as_ref().map(|s| &s.group)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// A block that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBlock {
    pub user_id: UserId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AvailabilityStatus,
    pub series: Option<SeriesMembership>,
    pub day_of_week: u8,
}

/// Column changes applied by [`crate::repository::AvailabilityRepository::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockChanges {
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: Option<AvailabilityStatus>,
    pub day_of_week: Option<u8>,
}

impl BlockChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.status.is_none()
            && self.day_of_week.is_none()
    }
}

/// Payload of a create call, as received from a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateBlockRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub title: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub status: AvailabilityStatus,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(default)]
    pub recurrence_end_type: Option<RecurrenceEndType>,
    #[serde(default)]
    pub recurrence_count: Option<i64>,
    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,
}

impl CreateBlockRequest {
    /// A one-off block with the default title.
    pub fn single(
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: AvailabilityStatus,
    ) -> Self {
        Self {
            user_id,
            title: None,
            start_date: start,
            end_date: end,
            status,
            is_recurring: false,
            recurrence_pattern: None,
            recurrence_end_type: None,
            recurrence_count: None,
            recurrence_end_date: None,
        }
    }

    /// Turn this request into a recurring one.
    pub fn repeating(mut self, pattern: RecurrencePattern, end: RecurrenceEnd) -> Self {
        self.is_recurring = true;
        self.recurrence_pattern = Some(pattern);
        self.recurrence_end_type = Some(end.end_type());
        self.recurrence_count = end.count().map(i64::from);
        self.recurrence_end_date = end.end_date();
        self
    }
}

/// Partial update of a single block. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<AvailabilityStatus>,
}

impl BlockPatch {
    pub fn changes_time(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }
}
