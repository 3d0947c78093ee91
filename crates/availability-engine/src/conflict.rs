//! Classify how a proposed interval collides with existing blocks.
//!
//! Two intervals overlap when `a.start < b.end && b.start < a.end`. Intervals
//! that only share a boundary instant are reported as [`ConflictType::Adjacent`]
//! and never require resolution.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{AvailabilityBlock, BlockId};

/// Shape of a collision, described from the proposed interval's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Touches the existing block at a boundary without overlapping it.
    Adjacent,
    /// Covers the existing block completely.
    Engulfs,
    /// Lies strictly inside the existing block.
    Inside,
    /// Overlaps the start of the existing block.
    LeadingEdge,
    /// Overlaps the end of the existing block.
    TrailingEdge,
}

impl ConflictType {
    pub fn is_substantive(&self) -> bool {
        !matches!(self, Self::Adjacent)
    }
}

/// An existing block that collides with the proposed interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub block: AvailabilityBlock,
    pub conflict_type: ConflictType,
    pub overlap_minutes: i64,
}

/// All collisions found for one proposed interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub has_conflicts: bool,
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn new(conflicts: Vec<Conflict>) -> Self {
        let has_conflicts = conflicts.iter().any(|c| c.conflict_type.is_substantive());
        Self {
            has_conflicts,
            conflicts,
        }
    }

    /// Conflicts that require merge/override resolution.
    pub fn substantive(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts
            .iter()
            .filter(|c| c.conflict_type.is_substantive())
    }

    pub fn into_substantive(self) -> Vec<Conflict> {
        self.conflicts
            .into_iter()
            .filter(|c| c.conflict_type.is_substantive())
            .collect()
    }
}

/// Classify the proposed interval `[start, end)` against `existing`.
///
/// Returns `None` when the two are disjoint.
pub fn classify(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    existing: &AvailabilityBlock,
) -> Option<ConflictType> {
    if end == existing.start || start == existing.end {
        return Some(ConflictType::Adjacent);
    }
    if !(start < existing.end && existing.start < end) {
        return None;
    }

    let covers_start = start <= existing.start;
    let covers_end = end >= existing.end;
    Some(match (covers_start, covers_end) {
        (true, true) => ConflictType::Engulfs,
        (false, false) => ConflictType::Inside,
        (true, false) => ConflictType::LeadingEdge,
        (false, true) => ConflictType::TrailingEdge,
    })
}

/// Classify every candidate against `[start, end)`, skipping `exclude` and
/// disjoint blocks. Results keep the candidates' order.
pub fn find_conflicts(
    candidates: &[AvailabilityBlock],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<BlockId>,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for block in candidates {
        if Some(block.id) == exclude {
            continue;
        }
        if let Some(conflict_type) = classify(start, end, block) {
            let overlap_start = start.max(block.start);
            let overlap_end = end.min(block.end);
            let overlap_minutes = (overlap_end - overlap_start).num_minutes().max(0);

            conflicts.push(Conflict {
                block: block.clone(),
                conflict_type,
                overlap_minutes,
            });
        }
    }

    conflicts
}
