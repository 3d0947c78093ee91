//! Bidirectional field-name mapping between the camelCase API schema and the
//! snake_case persistence schema.
//!
//! [`FIELD_MAP`] is the single source of truth. [`BlockRecord`] (API) and
//! [`BlockRow`] (persistence) are the two serialized shapes of an
//! [`AvailabilityBlock`]; both are checked against the table in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::model::{
    AvailabilityBlock, AvailabilityStatus, BlockId, RecurrenceEnd, RecurrenceEndType,
    RecurrencePattern, RecurrenceRule, SeriesMembership, UserId,
};

/// One column of the block schema under both naming conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub api: &'static str,
    pub persistence: &'static str,
}

const fn field(api: &'static str, persistence: &'static str) -> FieldMapping {
    FieldMapping { api, persistence }
}

pub const FIELD_MAP: &[FieldMapping] = &[
    field("id", "id"),
    field("userId", "user_id"),
    field("title", "title"),
    field("startDate", "start_date"),
    field("endDate", "end_date"),
    field("status", "status"),
    field("isRecurring", "is_recurring"),
    field("recurrencePattern", "recurrence_pattern"),
    field("recurrenceGroup", "recurrence_group"),
    field("recurrenceEndType", "recurrence_end_type"),
    field("recurrenceCount", "recurrence_count"),
    field("recurrenceEndDate", "recurrence_end_date"),
    field("dayOfWeek", "day_of_week"),
    field("createdAt", "created_at"),
    field("updatedAt", "updated_at"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToPersistence,
    ToApi,
}

pub fn to_persistence(api_name: &str) -> Option<&'static str> {
    FIELD_MAP
        .iter()
        .find(|f| f.api == api_name)
        .map(|f| f.persistence)
}

pub fn to_api(persistence_name: &str) -> Option<&'static str> {
    FIELD_MAP
        .iter()
        .find(|f| f.persistence == persistence_name)
        .map(|f| f.api)
}

/// Rename the top-level keys of a JSON object. Keys missing from the table
/// and non-object values pass through unchanged.
pub fn rename_keys(value: Value, direction: Direction) -> Value {
    match value {
        Value::Object(map) => {
            let renamed: Map<String, Value> = map
                .into_iter()
                .map(|(key, v)| {
                    let mapped = match direction {
                        Direction::ToPersistence => to_persistence(&key),
                        Direction::ToApi => to_api(&key),
                    };
                    (mapped.map(str::to_string).unwrap_or(key), v)
                })
                .collect();
            Value::Object(renamed)
        }
        other => other,
    }
}

/// API (camelCase) representation of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub id: BlockId,
    pub user_id: UserId,
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: AvailabilityStatus,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub recurrence_group: Option<String>,
    pub recurrence_end_type: Option<RecurrenceEndType>,
    pub recurrence_count: Option<u32>,
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub day_of_week: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence (snake_case) representation of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRow {
    pub id: BlockId,
    pub user_id: UserId,
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: AvailabilityStatus,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub recurrence_group: Option<String>,
    pub recurrence_end_type: Option<RecurrenceEndType>,
    pub recurrence_count: Option<u32>,
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub day_of_week: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AvailabilityBlock> for BlockRecord {
    fn from(block: AvailabilityBlock) -> Self {
        let rule = block.series.as_ref().map(|s| s.rule);
        Self {
            id: block.id,
            user_id: block.user_id,
            title: block.title,
            start_date: block.start,
            end_date: block.end,
            status: block.status,
            is_recurring: block.series.is_some(),
            recurrence_pattern: rule.map(|r| r.pattern),
            recurrence_group: block.series.map(|s| s.group.to_string()),
            recurrence_end_type: rule.map(|r| r.end.end_type()),
            recurrence_count: rule.and_then(|r| r.end.count()),
            recurrence_end_date: rule.and_then(|r| r.end.end_date()),
            day_of_week: block.day_of_week,
            created_at: block.created_at,
            updated_at: block.updated_at,
        }
    }
}

impl TryFrom<BlockRecord> for AvailabilityBlock {
    type Error = EngineError;

    fn try_from(record: BlockRecord) -> Result<Self, Self::Error> {
        let series = series_from_columns(&record)?;
        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            title: record.title,
            start: record.start_date,
            end: record.end_date,
            status: record.status,
            series,
            day_of_week: record.day_of_week,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn series_from_columns(record: &BlockRecord) -> Result<Option<SeriesMembership>, EngineError> {
    let invalid = |reason: &str| {
        EngineError::Validation(format!("block {}: {}", record.id, reason))
    };

    if !record.is_recurring {
        if record.recurrence_group.is_some() {
            return Err(invalid("non-recurring block carries a recurrence group"));
        }
        return Ok(None);
    }

    let group = record
        .recurrence_group
        .clone()
        .ok_or_else(|| invalid("recurring block has no recurrence group"))?;
    let pattern = record
        .recurrence_pattern
        .ok_or_else(|| invalid("recurring block has no recurrence pattern"))?;
    let end = match record.recurrence_end_type {
        Some(RecurrenceEndType::Count) => RecurrenceEnd::Count(
            record
                .recurrence_count
                .ok_or_else(|| invalid("count-bounded series has no recurrence count"))?,
        ),
        Some(RecurrenceEndType::Date) => RecurrenceEnd::Until(
            record
                .recurrence_end_date
                .ok_or_else(|| invalid("date-bounded series has no recurrence end date"))?,
        ),
        Some(RecurrenceEndType::Never) => RecurrenceEnd::Never,
        None => return Err(invalid("recurring block has no recurrence end type")),
    };

    Ok(Some(SeriesMembership {
        group: group.into(),
        rule: RecurrenceRule { pattern, end },
    }))
}

impl From<BlockRecord> for BlockRow {
    fn from(r: BlockRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            title: r.title,
            start_date: r.start_date,
            end_date: r.end_date,
            status: r.status,
            is_recurring: r.is_recurring,
            recurrence_pattern: r.recurrence_pattern,
            recurrence_group: r.recurrence_group,
            recurrence_end_type: r.recurrence_end_type,
            recurrence_count: r.recurrence_count,
            recurrence_end_date: r.recurrence_end_date,
            day_of_week: r.day_of_week,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<BlockRow> for BlockRecord {
    fn from(r: BlockRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            title: r.title,
            start_date: r.start_date,
            end_date: r.end_date,
            status: r.status,
            is_recurring: r.is_recurring,
            recurrence_pattern: r.recurrence_pattern,
            recurrence_group: r.recurrence_group,
            recurrence_end_type: r.recurrence_end_type,
            recurrence_count: r.recurrence_count,
            recurrence_end_date: r.recurrence_end_date,
            day_of_week: r.day_of_week,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<AvailabilityBlock> for BlockRow {
    fn from(block: AvailabilityBlock) -> Self {
        BlockRecord::from(block).into()
    }
}

impl TryFrom<BlockRow> for AvailabilityBlock {
    type Error = EngineError;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        BlockRecord::from(row).try_into()
    }
}
