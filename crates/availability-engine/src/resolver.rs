//! Merge/override/split resolution of substantive conflicts.
//!
//! Planning is pure ([`plan_resolution`]); [`apply_resolution`] executes a plan
//! against a repository. Same-status collisions merge into the existing block.
//! Different-status collisions let the incoming interval win and cut the
//! existing block back: deleted when engulfed, split when the incoming interval
//! lies inside it, trimmed at one edge otherwise.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::conflict::{Conflict, ConflictType};
use crate::error::{EngineError, Result};
use crate::model::{AvailabilityBlock, AvailabilityStatus, BlockChanges, BlockId, NewBlock};
use crate::recurrence::day_of_week;
use crate::repository::AvailabilityRepository;

/// The interval and status a create or update wants to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub status: AvailabilityStatus,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// What to do with one conflicting block.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Same status: stretch the existing block over the union interval.
    Merge {
        target: BlockId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Existing block lies entirely under the proposal.
    Delete { target: BlockId },
    /// Proposal sits strictly inside: keep `[start, keep_until)`, recreate the tail.
    Split {
        target: BlockId,
        keep_until: DateTime<Utc>,
        remainder: NewBlock,
    },
    /// Proposal covers the head: existing now starts at `new_start`.
    ShiftStart {
        target: BlockId,
        new_start: DateTime<Utc>,
    },
    /// Proposal covers the tail: existing now ends at `new_end`.
    ShiftEnd {
        target: BlockId,
        new_end: DateTime<Utc>,
    },
}

impl Resolution {
    pub fn target(&self) -> BlockId {
        match self {
            Self::Merge { target, .. }
            | Self::Delete { target }
            | Self::Split { target, .. }
            | Self::ShiftStart { target, .. }
            | Self::ShiftEnd { target, .. } => *target,
        }
    }
}

/// What happened to an existing block once a resolution was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "fate", rename_all = "snake_case")]
pub enum BlockFate {
    Merged { block: AvailabilityBlock },
    Deleted { id: BlockId },
    Shrunk { block: AvailabilityBlock },
    Split {
        kept: AvailabilityBlock,
        remainder: AvailabilityBlock,
    },
}

/// Decide how `conflict` gives way to `proposal`.
///
/// # Errors
/// Returns `EngineError::Validation` for adjacent conflicts, which never need
/// resolution; callers are expected to filter them out.
pub fn plan_resolution(proposal: &Proposal, conflict: &Conflict, tz: Tz) -> Result<Resolution> {
    let existing = &conflict.block;
    let target = existing.id;

    if existing.status == proposal.status {
        return Ok(Resolution::Merge {
            target,
            start: proposal.start.min(existing.start),
            end: proposal.end.max(existing.end),
        });
    }

    let resolution = match conflict.conflict_type {
        ConflictType::Adjacent => {
            return Err(EngineError::Validation(format!(
                "block {} is only adjacent and needs no resolution",
                target
            )));
        }
        ConflictType::Engulfs => Resolution::Delete { target },
        ConflictType::Inside => Resolution::Split {
            target,
            keep_until: proposal.start,
            remainder: NewBlock {
                user_id: existing.user_id,
                title: existing.title.clone(),
                start: proposal.end,
                end: existing.end,
                status: existing.status,
                series: existing.series.clone(),
                day_of_week: day_of_week(proposal.end, tz),
            },
        },
        ConflictType::LeadingEdge => Resolution::ShiftStart {
            target,
            new_start: proposal.end,
        },
        ConflictType::TrailingEdge => Resolution::ShiftEnd {
            target,
            new_end: proposal.start,
        },
    };
    Ok(resolution)
}

/// Persist a planned resolution.
pub async fn apply_resolution(
    repo: &dyn AvailabilityRepository,
    resolution: Resolution,
    tz: Tz,
) -> Result<BlockFate> {
    tracing::debug!(target_block = %resolution.target(), ?resolution, "Applying conflict resolution");

    let fate = match resolution {
        Resolution::Merge { target, start, end } => {
            let changes = BlockChanges {
                start: Some(start),
                end: Some(end),
                day_of_week: Some(day_of_week(start, tz)),
                ..BlockChanges::default()
            };
            BlockFate::Merged {
                block: repo.update(target, changes).await?,
            }
        }
        Resolution::Delete { target } => {
            if !repo.delete(target).await? {
                return Err(EngineError::NotFound(target));
            }
            BlockFate::Deleted { id: target }
        }
        Resolution::Split {
            target,
            keep_until,
            remainder,
        } => {
            let kept = repo
                .update(
                    target,
                    BlockChanges {
                        end: Some(keep_until),
                        ..BlockChanges::default()
                    },
                )
                .await?;
            let remainder = repo.create(remainder).await?;
            BlockFate::Split { kept, remainder }
        }
        Resolution::ShiftStart { target, new_start } => {
            let changes = BlockChanges {
                start: Some(new_start),
                day_of_week: Some(day_of_week(new_start, tz)),
                ..BlockChanges::default()
            };
            BlockFate::Shrunk {
                block: repo.update(target, changes).await?,
            }
        }
        Resolution::ShiftEnd { target, new_end } => {
            let changes = BlockChanges {
                end: Some(new_end),
                ..BlockChanges::default()
            };
            BlockFate::Shrunk {
                block: repo.update(target, changes).await?,
            }
        }
    };

    Ok(fate)
}
