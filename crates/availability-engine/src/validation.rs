//! Payload validation performed before anything reaches the resolver.

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};
use crate::model::{
    AvailabilityBlock, AvailabilityStatus, BlockPatch, CreateBlockRequest, RecurrenceEnd,
    RecurrenceEndType, RecurrenceRule, UserId,
};

pub const MAX_TITLE_LEN: usize = 255;

/// A create request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCreate {
    pub user_id: UserId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AvailabilityStatus,
    pub rule: Option<RecurrenceRule>,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::Validation(message.into())
}

pub fn validate_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end <= start {
        return Err(invalid(format!(
            "end date {} must be after start date {}",
            end.to_rfc3339(),
            start.to_rfc3339()
        )));
    }
    Ok(())
}

fn validate_title(title: Option<&str>, default_title: &str) -> Result<String> {
    let title = match title.map(str::trim) {
        None | Some("") => default_title.to_string(),
        Some(t) => t.to_string(),
    };
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(invalid(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title)
}

/// Validate a create request, filling in the default title.
///
/// Recurrence fields are ignored unless `is_recurring` is set.
pub fn validate_create(request: &CreateBlockRequest, default_title: &str) -> Result<ValidatedCreate> {
    validate_interval(request.start_date, request.end_date)?;
    let title = validate_title(request.title.as_deref(), default_title)?;

    let rule = if request.is_recurring {
        Some(validate_rule(request)?)
    } else {
        None
    };

    Ok(ValidatedCreate {
        user_id: request.user_id,
        title,
        start: request.start_date,
        end: request.end_date,
        status: request.status,
        rule,
    })
}

fn validate_rule(request: &CreateBlockRequest) -> Result<RecurrenceRule> {
    let pattern = request
        .recurrence_pattern
        .ok_or_else(|| invalid("recurring blocks require a recurrence pattern"))?;
    let end_type = request
        .recurrence_end_type
        .ok_or_else(|| invalid("recurring blocks require a recurrence end type"))?;

    let end = match end_type {
        RecurrenceEndType::Count => {
            let count = request
                .recurrence_count
                .ok_or_else(|| invalid("recurrence count is required when the end type is count"))?;
            if count <= 0 {
                return Err(invalid("recurrence count must be greater than zero"));
            }
            // The generator clamps to its ceiling; keep the caller's count as given.
            RecurrenceEnd::Count(u32::try_from(count).unwrap_or(u32::MAX))
        }
        RecurrenceEndType::Date => {
            let until = request.recurrence_end_date.ok_or_else(|| {
                invalid("recurrence end date is required when the end type is date")
            })?;
            if until < request.start_date {
                return Err(invalid("recurrence end date must not be before the start date"));
            }
            RecurrenceEnd::Until(until)
        }
        RecurrenceEndType::Never => RecurrenceEnd::Never,
    };

    Ok(RecurrenceRule { pattern, end })
}

/// Validate a patch against the block it will be applied to.
pub fn validate_patch(patch: &BlockPatch, current: &AvailabilityBlock) -> Result<()> {
    let start = patch.start_date.unwrap_or(current.start);
    let end = patch.end_date.unwrap_or(current.end);
    validate_interval(start, end)?;

    if let Some(title) = patch.title.as_deref() {
        if title.trim().is_empty() {
            return Err(invalid("title must not be empty"));
        }
        validate_title(Some(title), &current.title)?;
    }
    Ok(())
}
