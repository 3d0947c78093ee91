//! Persistence seam for availability blocks.
//!
//! [`AvailabilityRepository`] is the contract the service depends on. SQL
//! backends live outside this crate; [`InMemoryRepository`] backs the CLI and
//! the tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::RepositoryError;
use crate::model::{AvailabilityBlock, BlockChanges, BlockId, NewBlock, RecurrenceGroup, UserId};

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Storage operations for availability blocks.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the service shares one instance
/// across concurrent requests.
#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// All blocks owned by `user_id`, ordered by start.
    async fn find_all(&self, user_id: UserId) -> RepositoryResult<Vec<AvailabilityBlock>>;

    async fn find_by_id(&self, id: BlockId) -> RepositoryResult<Option<AvailabilityBlock>>;

    /// Blocks of `user_id` that overlap or touch `[start, end]`, except `exclude`.
    ///
    /// Touching blocks are included so the detector can report them as adjacent.
    async fn find_conflicts(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<BlockId>,
    ) -> RepositoryResult<Vec<AvailabilityBlock>>;

    /// Persist a new block and assign its id.
    async fn create(&self, block: NewBlock) -> RepositoryResult<AvailabilityBlock>;

    /// Apply `changes` to an existing block.
    ///
    /// # Returns
    /// * `Err(RepositoryError::MissingRow)` - if `id` does not exist
    /// * `Err(RepositoryError::Rejected)` - if the result would have `start >= end`
    async fn update(&self, id: BlockId, changes: BlockChanges)
        -> RepositoryResult<AvailabilityBlock>;

    /// Remove one block. `Ok(false)` when it did not exist.
    async fn delete(&self, id: BlockId) -> RepositoryResult<bool>;

    /// Remove every block of a recurring series, returning how many were removed.
    async fn delete_series(&self, group: &RecurrenceGroup) -> RepositoryResult<usize>;
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    blocks: BTreeMap<BlockId, AvailabilityBlock>,
}

/// Process-local repository keyed by block id.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository with already persisted blocks.
    pub fn from_blocks(blocks: impl IntoIterator<Item = AvailabilityBlock>) -> Self {
        let blocks: BTreeMap<BlockId, AvailabilityBlock> =
            blocks.into_iter().map(|b| (b.id, b)).collect();
        let next_id = blocks.keys().next_back().map_or(1, |id| id.0 + 1);
        Self {
            state: RwLock::new(State { next_id, blocks }),
        }
    }

    /// Every stored block, ordered by id.
    pub async fn snapshot(&self) -> Vec<AvailabilityBlock> {
        self.state.read().await.blocks.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.blocks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn sorted_by_start(mut blocks: Vec<AvailabilityBlock>) -> Vec<AvailabilityBlock> {
    blocks.sort_by_key(|b| (b.start, b.id));
    blocks
}

#[async_trait]
impl AvailabilityRepository for InMemoryRepository {
    async fn find_all(&self, user_id: UserId) -> RepositoryResult<Vec<AvailabilityBlock>> {
        let state = self.state.read().await;
        Ok(sorted_by_start(
            state
                .blocks
                .values()
                .filter(|b| b.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_id(&self, id: BlockId) -> RepositoryResult<Option<AvailabilityBlock>> {
        Ok(self.state.read().await.blocks.get(&id).cloned())
    }

    async fn find_conflicts(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<BlockId>,
    ) -> RepositoryResult<Vec<AvailabilityBlock>> {
        let state = self.state.read().await;
        Ok(sorted_by_start(
            state
                .blocks
                .values()
                .filter(|b| b.user_id == user_id && Some(b.id) != exclude)
                .filter(|b| b.start <= end && b.end >= start)
                .cloned()
                .collect(),
        ))
    }

    async fn create(&self, block: NewBlock) -> RepositoryResult<AvailabilityBlock> {
        if block.start >= block.end {
            return Err(RepositoryError::Rejected(format!(
                "start {} is not before end {}",
                block.start, block.end
            )));
        }

        let mut state = self.state.write().await;
        let id = BlockId(state.next_id.max(1));
        state.next_id = id.0 + 1;

        let now = Utc::now();
        let stored = AvailabilityBlock {
            id,
            user_id: block.user_id,
            title: block.title,
            start: block.start,
            end: block.end,
            status: block.status,
            series: block.series,
            day_of_week: block.day_of_week,
            created_at: now,
            updated_at: now,
        };
        state.blocks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        id: BlockId,
        changes: BlockChanges,
    ) -> RepositoryResult<AvailabilityBlock> {
        let mut state = self.state.write().await;
        let block = state
            .blocks
            .get_mut(&id)
            .ok_or(RepositoryError::MissingRow(id))?;

        let start = changes.start.unwrap_or(block.start);
        let end = changes.end.unwrap_or(block.end);
        if start >= end {
            return Err(RepositoryError::Rejected(format!(
                "block {}: start {} is not before end {}",
                id, start, end
            )));
        }

        block.start = start;
        block.end = end;
        if let Some(title) = changes.title {
            block.title = title;
        }
        if let Some(status) = changes.status {
            block.status = status;
        }
        if let Some(day) = changes.day_of_week {
            block.day_of_week = day;
        }
        block.updated_at = Utc::now();
        Ok(block.clone())
    }

    async fn delete(&self, id: BlockId) -> RepositoryResult<bool> {
        Ok(self.state.write().await.blocks.remove(&id).is_some())
    }

    async fn delete_series(&self, group: &RecurrenceGroup) -> RepositoryResult<usize> {
        let mut state = self.state.write().await;
        let before = state.blocks.len();
        state
            .blocks
            .retain(|_, b| b.recurrence_group() != Some(group));
        Ok(before - state.blocks.len())
    }
}
