//! The public face of the engine: create, update, delete and conflict checks.
//!
//! Every write runs validate → (generate) → detect → resolve → persist → emit.
//! Errors are returned as [`EngineError`]; wrap them in
//! [`crate::ServiceResponse`] for the `{success, error}` wire shape.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::{CreatePolicy, EngineConfig};
use crate::conflict::{self, Conflict, ConflictReport};
use crate::error::{EngineError, Result};
use crate::events::{AvailabilityEvent, EventPublisher};
use crate::locks::UserLocks;
use crate::model::{
    AvailabilityBlock, BlockChanges, BlockId, BlockPatch, CreateBlockRequest, NewBlock,
    RecurrenceGroup, SeriesMembership, UserId,
};
use crate::recurrence::{self, Occurrence, OccurrencePlan};
use crate::repository::AvailabilityRepository;
use crate::resolver::{self, BlockFate, Proposal, Resolution};
use crate::validation::{self, ValidatedCreate};

/// One occurrence that could not be persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceFailure {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub error: String,
}

/// What a create call actually did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    /// Occurrences the request asked for, after clamping.
    pub planned: u32,
    /// Occurrences left after date bounds and same-day deduplication.
    pub generated: u32,
    /// Occurrences that made it to storage (merged ones included).
    pub created: u32,
    pub recurrence_group: Option<RecurrenceGroup>,
    pub failures: Vec<OccurrenceFailure>,
    /// Existing blocks reshaped by conflict resolution.
    pub affected: Vec<BlockFate>,
}

impl GenerationReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    /// First persisted block, or the existing block it merged into.
    pub block: AvailabilityBlock,
    pub report: GenerationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub block: AvailabilityBlock,
    pub affected: Vec<BlockFate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub id: BlockId,
    pub user_id: UserId,
    pub deleted: usize,
    pub series: bool,
}

/// Result of placing one interval into a user's schedule.
struct Placement {
    block: AvailabilityBlock,
    affected: Vec<BlockFate>,
}

pub struct AvailabilityService {
    repo: Arc<dyn AvailabilityRepository>,
    events: Arc<dyn EventPublisher>,
    config: EngineConfig,
    tz: Tz,
    locks: UserLocks,
}

impl AvailabilityService {
    /// # Errors
    /// Returns `EngineError::InvalidTimezone` if the configured timezone is unknown.
    pub fn new(
        repo: Arc<dyn AvailabilityRepository>,
        events: Arc<dyn EventPublisher>,
        config: EngineConfig,
    ) -> Result<Self> {
        let tz = config.tz()?;
        Ok(Self {
            repo,
            events,
            config,
            tz,
            locks: UserLocks::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a block, or a whole series when the request is recurring.
    ///
    /// Occurrences are placed one at a time. A failing occurrence is logged and
    /// recorded in the report; the call fails only if none were placed.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_availability_block(
        &self,
        request: CreateBlockRequest,
    ) -> Result<CreateOutcome> {
        let valid = validation::validate_create(&request, &self.config.default_title)?;
        let plan = self.plan_for(&valid)?;
        let series = valid.rule.map(|rule| SeriesMembership {
            group: RecurrenceGroup::generate(),
            rule,
        });

        let _guard = self.locks.lock(valid.user_id).await;

        let mut first: Option<AvailabilityBlock> = None;
        let mut report = GenerationReport {
            planned: plan.planned,
            generated: plan.occurrences.len() as u32,
            created: 0,
            recurrence_group: series.as_ref().map(|s| s.group.clone()),
            failures: Vec::new(),
            affected: Vec::new(),
        };

        for occurrence in &plan.occurrences {
            match self.place(&valid, occurrence, series.as_ref()).await {
                Ok(placement) => {
                    report.created += 1;
                    report.affected.extend(placement.affected);
                    first.get_or_insert(placement.block);
                }
                Err(e) if series.is_none() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        start = %occurrence.start,
                        error = %e,
                        "Failed to persist occurrence, continuing with the rest of the series"
                    );
                    report.failures.push(OccurrenceFailure {
                        start: occurrence.start,
                        end: occurrence.end,
                        error: e.to_string(),
                    });
                }
            }
        }

        let Some(block) = first else {
            return Err(EngineError::Generation {
                planned: report.planned,
                failures: report.failures.iter().map(|f| f.error.clone()).collect(),
            });
        };

        tracing::info!(
            block_id = %block.id,
            planned = report.planned,
            created = report.created,
            failed = report.failures.len(),
            "Availability created"
        );
        self.emit(AvailabilityEvent::Created(block.clone())).await;

        Ok(CreateOutcome { block, report })
    }

    /// Expand a create request without touching storage.
    pub fn preview_occurrences(&self, request: &CreateBlockRequest) -> Result<OccurrencePlan> {
        let valid = validation::validate_create(request, &self.config.default_title)?;
        self.plan_for(&valid)
    }

    /// Update a single block. Conflict resolution re-runs when the interval
    /// changes and is applied to every overlapping neighbour.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update_availability_block(
        &self,
        id: BlockId,
        patch: BlockPatch,
    ) -> Result<UpdateOutcome> {
        let owner = self.get_availability_block(id).await?.user_id;
        let _guard = self.locks.lock(owner).await;

        // Re-read under the lock; the block may have changed while we waited.
        let current = self.get_availability_block(id).await?;
        validation::validate_patch(&patch, &current)?;

        let status = patch.status.unwrap_or(current.status);
        let mut start = patch.start_date.unwrap_or(current.start);
        let mut end = patch.end_date.unwrap_or(current.end);
        let mut affected = Vec::new();

        if patch.changes_time() {
            let proposal = Proposal { status, start, end };
            let report = self.detect(current.user_id, start, end, Some(id)).await?;

            for conflict in report.into_substantive() {
                if conflict.block.status == status {
                    // Same status: the updated block absorbs its neighbour.
                    start = start.min(conflict.block.start);
                    end = end.max(conflict.block.end);
                    if self.repo.delete(conflict.block.id).await? {
                        affected.push(BlockFate::Deleted {
                            id: conflict.block.id,
                        });
                    }
                    continue;
                }
                let resolution = resolver::plan_resolution(&proposal, &conflict, self.tz)?;
                let fate =
                    resolver::apply_resolution(self.repo.as_ref(), resolution, self.tz).await?;
                affected.push(fate);
            }
        }

        let changes = BlockChanges {
            title: patch.title.map(|t| t.trim().to_string()),
            start: (start != current.start).then_some(start),
            end: (end != current.end).then_some(end),
            status: patch.status,
            day_of_week: (start != current.start).then(|| recurrence::day_of_week(start, self.tz)),
        };

        let block = if changes.is_empty() {
            current
        } else {
            self.repo.update(id, changes).await?
        };

        tracing::info!(block_id = %id, reshaped = affected.len(), "Availability updated");
        self.emit(AvailabilityEvent::Updated(block.clone())).await;

        Ok(UpdateOutcome { block, affected })
    }

    /// Delete one block, or its whole series when `delete_series` is set and
    /// the block is recurring.
    #[tracing::instrument(skip(self))]
    pub async fn delete_availability_block(
        &self,
        id: BlockId,
        delete_series: bool,
    ) -> Result<DeleteOutcome> {
        let owner = self.get_availability_block(id).await?.user_id;
        let _guard = self.locks.lock(owner).await;

        // Re-read under the lock; a concurrent series delete may have removed it.
        let block = self.get_availability_block(id).await?;

        let (deleted, series) = match (delete_series, block.recurrence_group()) {
            (true, Some(group)) => {
                tracing::debug!(%group, "Deleting whole series");
                (self.repo.delete_series(group).await?, true)
            }
            _ => (usize::from(self.repo.delete(id).await?), false),
        };

        tracing::info!(block_id = %id, deleted, series, "Availability deleted");
        self.emit(AvailabilityEvent::Deleted {
            id,
            user_id: block.user_id,
        })
        .await;

        Ok(DeleteOutcome {
            id,
            user_id: block.user_id,
            deleted,
            series,
        })
    }

    /// Read-only conflict probe for callers validating a form before submit.
    #[tracing::instrument(skip(self))]
    pub async fn check_for_conflicts(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<BlockId>,
    ) -> Result<ConflictReport> {
        validation::validate_interval(start, end)?;
        self.detect(user_id, start, end, exclude).await
    }

    pub async fn get_availability_block(&self, id: BlockId) -> Result<AvailabilityBlock> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_availability_blocks(&self, user_id: UserId) -> Result<Vec<AvailabilityBlock>> {
        Ok(self.repo.find_all(user_id).await?)
    }

    fn plan_for(&self, valid: &ValidatedCreate) -> Result<OccurrencePlan> {
        match &valid.rule {
            Some(rule) => recurrence::generate_occurrences(
                valid.start,
                valid.end,
                rule,
                self.config.occurrence_ceiling(),
                self.tz,
            ),
            None => Ok(OccurrencePlan {
                planned: 1,
                occurrences: vec![Occurrence {
                    start: valid.start,
                    end: valid.end,
                }],
            }),
        }
    }

    async fn detect(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<BlockId>,
    ) -> Result<ConflictReport> {
        let candidates = self
            .repo
            .find_conflicts(user_id, start, end, exclude)
            .await?;
        let report = ConflictReport::new(conflict::find_conflicts(&candidates, start, end, exclude));
        tracing::debug!(
            %user_id,
            candidates = candidates.len(),
            has_conflicts = report.has_conflicts,
            "Conflict check"
        );
        Ok(report)
    }

    /// Detect, resolve and persist a single occurrence.
    async fn place(
        &self,
        valid: &ValidatedCreate,
        occurrence: &Occurrence,
        series: Option<&SeriesMembership>,
    ) -> Result<Placement> {
        let proposal = Proposal {
            status: valid.status,
            start: occurrence.start,
            end: occurrence.end,
        };
        let conflicts = self
            .detect(valid.user_id, occurrence.start, occurrence.end, None)
            .await?
            .into_substantive();

        let mut affected = Vec::new();
        let merged = match self.config.create_policy {
            CreatePolicy::FirstConflict => match conflicts.first() {
                Some(conflict) => self.resolve_one(&proposal, conflict, &mut affected).await?,
                None => None,
            },
            CreatePolicy::ResolveAll => self.resolve_all(&proposal, &conflicts, &mut affected).await?,
        };

        if let Some(block) = merged {
            return Ok(Placement { block, affected });
        }

        let block = self
            .repo
            .create(NewBlock {
                user_id: valid.user_id,
                title: valid.title.clone(),
                start: occurrence.start,
                end: occurrence.end,
                status: valid.status,
                series: series.cloned(),
                day_of_week: recurrence::day_of_week(occurrence.start, self.tz),
            })
            .await?;
        Ok(Placement { block, affected })
    }

    /// Resolve a single conflict. Returns the merged block if the proposal was
    /// absorbed into it.
    async fn resolve_one(
        &self,
        proposal: &Proposal,
        conflict: &Conflict,
        affected: &mut Vec<BlockFate>,
    ) -> Result<Option<AvailabilityBlock>> {
        let resolution = resolver::plan_resolution(proposal, conflict, self.tz)?;
        let fate = resolver::apply_resolution(self.repo.as_ref(), resolution, self.tz).await?;
        let merged = match &fate {
            BlockFate::Merged { block } => Some(block.clone()),
            _ => None,
        };
        affected.push(fate);
        Ok(merged)
    }

    /// Resolve every conflict. The first same-status block absorbs the proposal
    /// and any further same-status blocks it now touches.
    async fn resolve_all(
        &self,
        proposal: &Proposal,
        conflicts: &[Conflict],
        affected: &mut Vec<BlockFate>,
    ) -> Result<Option<AvailabilityBlock>> {
        let mut merged: Option<AvailabilityBlock> = None;

        for conflict in conflicts {
            let same_status = conflict.block.status == proposal.status;
            match (&merged, same_status) {
                (Some(target), true) => {
                    let resolution = Resolution::Merge {
                        target: target.id,
                        start: target.start.min(conflict.block.start),
                        end: target.end.max(conflict.block.end),
                    };
                    if !self.repo.delete(conflict.block.id).await? {
                        return Err(EngineError::NotFound(conflict.block.id));
                    }
                    affected.push(BlockFate::Deleted {
                        id: conflict.block.id,
                    });
                    let fate =
                        resolver::apply_resolution(self.repo.as_ref(), resolution, self.tz).await?;
                    if let BlockFate::Merged { block } = &fate {
                        merged = Some(block.clone());
                    }
                    affected.push(fate);
                }
                _ => {
                    if let Some(block) = self.resolve_one(proposal, conflict, affected).await? {
                        merged = Some(block);
                    }
                }
            }
        }

        Ok(merged)
    }

    async fn emit(&self, event: AvailabilityEvent) {
        if let Err(e) = self.events.publish(&event).await {
            tracing::warn!(event = event.name(), error = %e, "Failed to publish availability event");
        }
    }
}
