//! End-to-end tests for create/update/check through the service facade.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use availability_engine::error::{EngineError, RepositoryError};
use availability_engine::events::{AvailabilityEvent, CREATED, UPDATED};
use availability_engine::model::{
    AvailabilityBlock, AvailabilityStatus, BlockChanges, BlockId, BlockPatch, CreateBlockRequest,
    NewBlock, RecurrenceEnd, RecurrenceGroup, RecurrencePattern, UserId,
};
use availability_engine::repository::RepositoryResult;
use availability_engine::resolver::BlockFate;
use availability_engine::{
    AvailabilityRepository, AvailabilityService, CreatePolicy, EngineConfig, EventPublisher,
    InMemoryRepository, RecordingPublisher, ServiceResponse,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

use AvailabilityStatus::{Available, Unavailable};

// ── Helpers ─────────────────────────────────────────────────────────────────

const USER: UserId = UserId(42);

fn t(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, hour, min, 0).unwrap()
}

struct Harness {
    service: AvailabilityService,
    repo: Arc<InMemoryRepository>,
    events: Arc<RecordingPublisher>,
}

fn harness_with(policy: CreatePolicy) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let events = Arc::new(RecordingPublisher::new());
    let config = EngineConfig {
        create_policy: policy,
        ..EngineConfig::default()
    };
    let service = AvailabilityService::new(repo.clone(), events.clone(), config).unwrap();
    Harness {
        service,
        repo,
        events,
    }
}

fn harness() -> Harness {
    harness_with(CreatePolicy::FirstConflict)
}

fn single(start: DateTime<Utc>, end: DateTime<Utc>, status: AvailabilityStatus) -> CreateBlockRequest {
    CreateBlockRequest::single(USER, start, end, status)
}

async fn create(h: &Harness, start: DateTime<Utc>, end: DateTime<Utc>, status: AvailabilityStatus) -> AvailabilityBlock {
    h.service
        .create_availability_block(single(start, end, status))
        .await
        .expect("create should succeed")
        .block
}

async fn intervals(h: &Harness) -> Vec<(DateTime<Utc>, DateTime<Utc>, AvailabilityStatus)> {
    h.service
        .list_availability_blocks(USER)
        .await
        .unwrap()
        .into_iter()
        .map(|b| (b.start, b.end, b.status))
        .collect()
}

/// Repository that fails `create` on selected call numbers (1-based).
struct FlakyRepository {
    inner: InMemoryRepository,
    fail_on: HashSet<usize>,
    creates: AtomicUsize,
}

impl FlakyRepository {
    fn failing_on(calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: InMemoryRepository::new(),
            fail_on: calls.into_iter().collect(),
            creates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AvailabilityRepository for FlakyRepository {
    async fn find_all(&self, user_id: UserId) -> RepositoryResult<Vec<AvailabilityBlock>> {
        self.inner.find_all(user_id).await
    }

    async fn find_by_id(&self, id: BlockId) -> RepositoryResult<Option<AvailabilityBlock>> {
        self.inner.find_by_id(id).await
    }

    async fn find_conflicts(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<BlockId>,
    ) -> RepositoryResult<Vec<AvailabilityBlock>> {
        self.inner.find_conflicts(user_id, start, end, exclude).await
    }

    async fn create(&self, block: NewBlock) -> RepositoryResult<AvailabilityBlock> {
        let call = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(RepositoryError::Unavailable(format!("injected failure #{}", call)));
        }
        self.inner.create(block).await
    }

    async fn update(&self, id: BlockId, changes: BlockChanges) -> RepositoryResult<AvailabilityBlock> {
        self.inner.update(id, changes).await
    }

    async fn delete(&self, id: BlockId) -> RepositoryResult<bool> {
        self.inner.delete(id).await
    }

    async fn delete_series(&self, group: &RecurrenceGroup) -> RepositoryResult<usize> {
        self.inner.delete_series(group).await
    }
}

/// Publisher that always fails.
struct BrokenPublisher;

#[async_trait]
impl EventPublisher for BrokenPublisher {
    async fn publish(&self, _event: &AvailabilityEvent) -> availability_engine::error::Result<()> {
        Err(EngineError::Publish("broker down".to_string()))
    }
}

// ── Single creates ──────────────────────────────────────────────────────────

#[tokio::test]
async fn single_create_persists_and_emits() {
    let h = harness();
    let outcome = h
        .service
        .create_availability_block(single(t(6, 9, 0), t(6, 17, 0), Available))
        .await
        .unwrap();

    assert_eq!(outcome.block.title, "Available");
    assert_eq!(outcome.block.day_of_week, 1, "2025-01-06 is a Monday");
    assert!(!outcome.block.is_recurring());
    assert_eq!(outcome.report.planned, 1);
    assert_eq!(outcome.report.created, 1);
    assert!(outcome.report.recurrence_group.is_none());
    assert_eq!(h.events.names().await, vec![CREATED]);
}

#[tokio::test]
async fn invalid_interval_is_rejected_without_writes() {
    let h = harness();
    let result = h
        .service
        .create_availability_block(single(t(6, 10, 0), t(6, 9, 0), Available))
        .await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert!(h.repo.is_empty().await);
    assert!(h.events.events().await.is_empty());

    let response: ServiceResponse<_> = result.into();
    assert!(!response.success);
    assert!(response.error.unwrap().contains("must be after start date"));
}

#[tokio::test]
async fn adjacent_blocks_are_both_kept() {
    let h = harness();
    create(&h, t(6, 9, 0), t(6, 10, 0), Available).await;
    create(&h, t(6, 10, 0), t(6, 11, 0), Unavailable).await;

    assert_eq!(
        intervals(&h).await,
        vec![
            (t(6, 9, 0), t(6, 10, 0), Available),
            (t(6, 10, 0), t(6, 11, 0), Unavailable),
        ]
    );
}

// ── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn same_status_overlap_merges_into_existing_id() {
    let h = harness();
    let existing = create(&h, t(6, 9, 0), t(6, 12, 0), Available).await;

    let outcome = h
        .service
        .create_availability_block(single(t(6, 11, 0), t(6, 14, 0), Available))
        .await
        .unwrap();

    assert_eq!(outcome.block.id, existing.id);
    assert_eq!((outcome.block.start, outcome.block.end), (t(6, 9, 0), t(6, 14, 0)));
    assert_eq!(h.repo.len().await, 1);
    assert!(matches!(outcome.report.affected[..], [BlockFate::Merged { .. }]));
}

// ── Override ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn different_status_inside_splits_into_three() {
    let h = harness();
    create(&h, t(6, 9, 0), t(6, 17, 0), Available).await;

    let outcome = h
        .service
        .create_availability_block(single(t(6, 12, 0), t(6, 13, 0), Unavailable))
        .await
        .unwrap();

    assert_eq!(outcome.block.status, Unavailable);
    assert_eq!(
        intervals(&h).await,
        vec![
            (t(6, 9, 0), t(6, 12, 0), Available),
            (t(6, 12, 0), t(6, 13, 0), Unavailable),
            (t(6, 13, 0), t(6, 17, 0), Available),
        ]
    );
}

#[tokio::test]
async fn different_status_engulfing_deletes_existing() {
    let h = harness();
    let existing = create(&h, t(6, 10, 0), t(6, 11, 0), Available).await;

    create(&h, t(6, 9, 0), t(6, 12, 0), Unavailable).await;

    assert_eq!(intervals(&h).await, vec![(t(6, 9, 0), t(6, 12, 0), Unavailable)]);
    assert!(h.repo.find_by_id(existing.id).await.unwrap().is_none());
}

#[tokio::test]
async fn different_status_edges_trim_existing() {
    let h = harness();
    create(&h, t(6, 9, 0), t(6, 12, 0), Available).await;
    create(&h, t(7, 9, 0), t(7, 12, 0), Available).await;

    // Head of day 6, tail of day 7.
    create(&h, t(6, 8, 0), t(6, 10, 0), Unavailable).await;
    create(&h, t(7, 11, 0), t(7, 13, 0), Unavailable).await;

    assert_eq!(
        intervals(&h).await,
        vec![
            (t(6, 8, 0), t(6, 10, 0), Unavailable),
            (t(6, 10, 0), t(6, 12, 0), Available),
            (t(7, 9, 0), t(7, 11, 0), Available),
            (t(7, 11, 0), t(7, 13, 0), Unavailable),
        ]
    );
}

// ── Policies ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_conflict_policy_resolves_only_the_first() {
    let h = harness_with(CreatePolicy::FirstConflict);
    create(&h, t(6, 9, 0), t(6, 10, 0), Available).await;
    create(&h, t(6, 11, 0), t(6, 12, 0), Available).await;

    create(&h, t(6, 8, 0), t(6, 13, 0), Unavailable).await;

    // Only the 09:00 block was engulfed; the 11:00 block survives underneath.
    assert_eq!(
        intervals(&h).await,
        vec![
            (t(6, 8, 0), t(6, 13, 0), Unavailable),
            (t(6, 11, 0), t(6, 12, 0), Available),
        ]
    );
}

#[tokio::test]
async fn resolve_all_policy_clears_every_conflict() {
    let h = harness_with(CreatePolicy::ResolveAll);
    create(&h, t(6, 9, 0), t(6, 10, 0), Available).await;
    create(&h, t(6, 11, 0), t(6, 12, 0), Available).await;

    let outcome = h
        .service
        .create_availability_block(single(t(6, 8, 0), t(6, 13, 0), Unavailable))
        .await
        .unwrap();

    assert_eq!(outcome.report.affected.len(), 2);
    assert_eq!(intervals(&h).await, vec![(t(6, 8, 0), t(6, 13, 0), Unavailable)]);
}

#[tokio::test]
async fn resolve_all_policy_merges_bridged_neighbours() {
    let h = harness_with(CreatePolicy::ResolveAll);
    let first = create(&h, t(6, 9, 0), t(6, 10, 0), Available).await;
    create(&h, t(6, 11, 0), t(6, 12, 0), Available).await;

    let outcome = h
        .service
        .create_availability_block(single(t(6, 9, 30), t(6, 11, 30), Available))
        .await
        .unwrap();

    assert_eq!(outcome.block.id, first.id);
    assert_eq!(intervals(&h).await, vec![(t(6, 9, 0), t(6, 12, 0), Available)]);
}

// ── Recurring creates ───────────────────────────────────────────────────────

#[tokio::test]
async fn weekly_series_shares_one_group() {
    let h = harness();
    let request = single(t(6, 9, 0), t(6, 10, 0), Available)
        .repeating(RecurrencePattern::Weekly, RecurrenceEnd::Count(3));

    let outcome = h.service.create_availability_block(request).await.unwrap();

    assert_eq!(outcome.report.planned, 3);
    assert_eq!(outcome.report.created, 3);
    assert!(!outcome.report.is_partial());
    assert_eq!(outcome.block.start, t(6, 9, 0), "first occurrence is returned");

    let blocks = h.service.list_availability_blocks(USER).await.unwrap();
    let starts: Vec<_> = blocks.iter().map(|b| b.start).collect();
    assert_eq!(starts, vec![t(6, 9, 0), t(13, 9, 0), t(20, 9, 0)]);

    let groups: HashSet<_> = blocks.iter().map(|b| b.recurrence_group().cloned()).collect();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups.into_iter().next().unwrap(), outcome.report.recurrence_group);
    assert!(blocks.iter().all(|b| b.day_of_week == 1));
}

#[tokio::test]
async fn separate_series_get_distinct_groups() {
    let h = harness();
    let a = h
        .service
        .create_availability_block(
            single(t(6, 9, 0), t(6, 10, 0), Available)
                .repeating(RecurrencePattern::Daily, RecurrenceEnd::Count(2)),
        )
        .await
        .unwrap();
    let b = h
        .service
        .create_availability_block(
            single(t(6, 14, 0), t(6, 15, 0), Available)
                .repeating(RecurrencePattern::Daily, RecurrenceEnd::Count(2)),
        )
        .await
        .unwrap();

    assert_ne!(a.report.recurrence_group, b.report.recurrence_group);
}

#[tokio::test]
async fn partial_failure_is_reported_not_fatal() {
    let repo = Arc::new(FlakyRepository::failing_on([2]));
    let service = AvailabilityService::new(
        repo.clone(),
        Arc::new(RecordingPublisher::new()),
        EngineConfig::default(),
    )
    .unwrap();

    let request = single(t(6, 9, 0), t(6, 10, 0), Available)
        .repeating(RecurrencePattern::Daily, RecurrenceEnd::Count(4));
    let outcome = service.create_availability_block(request).await.unwrap();

    assert_eq!(outcome.report.planned, 4);
    assert_eq!(outcome.report.created, 3);
    assert!(outcome.report.is_partial());
    assert_eq!(outcome.report.failures.len(), 1);
    assert_eq!(outcome.report.failures[0].start, t(7, 9, 0));
    assert!(outcome.report.failures[0].error.contains("injected failure #2"));
    assert_eq!(repo.inner.len().await, 3);
}

#[tokio::test]
async fn total_failure_is_an_error() {
    let repo = Arc::new(FlakyRepository::failing_on(1..=10));
    let events = Arc::new(RecordingPublisher::new());
    let service =
        AvailabilityService::new(repo.clone(), events.clone(), EngineConfig::default()).unwrap();

    let request = single(t(6, 9, 0), t(6, 10, 0), Available)
        .repeating(RecurrencePattern::Daily, RecurrenceEnd::Count(3));
    let result = service.create_availability_block(request).await;

    match result {
        Err(EngineError::Generation { planned, failures }) => {
            assert_eq!(planned, 3);
            assert_eq!(failures.len(), 3);
        }
        other => panic!("expected generation failure, got {:?}", other),
    }
    assert!(events.events().await.is_empty());
}

#[tokio::test]
async fn failing_single_create_surfaces_repository_error() {
    let repo = Arc::new(FlakyRepository::failing_on([1]));
    let service =
        AvailabilityService::new(repo, Arc::new(RecordingPublisher::new()), EngineConfig::default())
            .unwrap();

    let result = service
        .create_availability_block(single(t(6, 9, 0), t(6, 10, 0), Available))
        .await;

    assert!(matches!(
        result,
        Err(EngineError::Repository(RepositoryError::Unavailable(_)))
    ));
}

#[tokio::test]
async fn publish_failure_does_not_fail_the_write() {
    let repo = Arc::new(InMemoryRepository::new());
    let service =
        AvailabilityService::new(repo.clone(), Arc::new(BrokenPublisher), EngineConfig::default())
            .unwrap();

    let outcome = service
        .create_availability_block(single(t(6, 9, 0), t(6, 10, 0), Available))
        .await;

    assert!(outcome.is_ok());
    assert_eq!(repo.len().await, 1);
}

#[tokio::test]
async fn preview_does_not_persist() {
    let h = harness();
    let request = single(t(6, 9, 0), t(6, 10, 0), Available)
        .repeating(RecurrencePattern::Biweekly, RecurrenceEnd::Never);

    let plan = h.service.preview_occurrences(&request).unwrap();

    assert_eq!(plan.planned, 26);
    assert_eq!(plan.occurrences.len(), 26);
    assert!(h.repo.is_empty().await);
}

// ── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_do_not_both_slip_through() {
    let h = Arc::new(harness());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move {
                let start = t(6, 9, 0) + Duration::minutes(i * 5);
                h.service
                    .create_availability_block(single(start, start + Duration::hours(1), Available))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // All eight intervals share 09:35-10:00, so whichever order they run in,
    // each one must see and merge into the block written before it.
    assert_eq!(
        intervals(&h).await,
        vec![(t(6, 9, 0), t(6, 10, 35), Available)]
    );
}

// ── Updates ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_without_time_change_skips_conflicts() {
    let h = harness();
    let block = create(&h, t(6, 9, 0), t(6, 10, 0), Available).await;

    let outcome = h
        .service
        .update_availability_block(
            block.id,
            BlockPatch {
                title: Some("Lunch".to_string()),
                ..BlockPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.block.title, "Lunch");
    assert!(outcome.affected.is_empty());
    assert_eq!(h.events.names().await, vec![CREATED, UPDATED]);
}

#[tokio::test]
async fn update_resolves_every_overlapping_neighbour() {
    let h = harness();
    let moving = create(&h, t(6, 7, 0), t(6, 8, 0), Unavailable).await;
    create(&h, t(6, 9, 0), t(6, 12, 0), Available).await;
    create(&h, t(6, 13, 0), t(6, 17, 0), Available).await;

    let outcome = h
        .service
        .update_availability_block(
            moving.id,
            BlockPatch {
                start_date: Some(t(6, 11, 0)),
                end_date: Some(t(6, 14, 0)),
                ..BlockPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.affected.len(), 2);
    assert_eq!(outcome.block.id, moving.id);
    assert_eq!(
        intervals(&h).await,
        vec![
            (t(6, 9, 0), t(6, 11, 0), Available),
            (t(6, 11, 0), t(6, 14, 0), Unavailable),
            (t(6, 14, 0), t(6, 17, 0), Available),
        ]
    );
}

#[tokio::test]
async fn update_absorbs_same_status_neighbours() {
    let h = harness();
    let moving = create(&h, t(6, 7, 0), t(6, 8, 0), Available).await;
    let neighbour = create(&h, t(6, 9, 0), t(6, 12, 0), Available).await;

    let outcome = h
        .service
        .update_availability_block(
            moving.id,
            BlockPatch {
                end_date: Some(t(6, 10, 0)),
                ..BlockPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.block.id, moving.id);
    assert_eq!((outcome.block.start, outcome.block.end), (t(6, 7, 0), t(6, 12, 0)));
    assert!(h.repo.find_by_id(neighbour.id).await.unwrap().is_none());
}

#[tokio::test]
async fn update_missing_block_is_not_found() {
    let h = harness();
    let result = h
        .service
        .update_availability_block(BlockId(404), BlockPatch::default())
        .await;

    assert!(matches!(result, Err(EngineError::NotFound(BlockId(404)))));
}

#[tokio::test]
async fn update_rejects_inverted_interval() {
    let h = harness();
    let block = create(&h, t(6, 9, 0), t(6, 10, 0), Available).await;

    let result = h
        .service
        .update_availability_block(
            block.id,
            BlockPatch {
                start_date: Some(t(6, 11, 0)),
                ..BlockPatch::default()
            },
        )
        .await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_eq!(intervals(&h).await, vec![(t(6, 9, 0), t(6, 10, 0), Available)]);
}

// ── Conflict probe ──────────────────────────────────────────────────────────

#[tokio::test]
async fn check_for_conflicts_is_read_only() {
    let h = harness();
    let existing = create(&h, t(6, 10, 0), t(6, 11, 0), Available).await;

    let adjacent = h
        .service
        .check_for_conflicts(USER, t(6, 9, 0), t(6, 10, 0), None)
        .await
        .unwrap();
    assert!(!adjacent.has_conflicts);
    assert_eq!(adjacent.conflicts.len(), 1);

    let overlapping = h
        .service
        .check_for_conflicts(USER, t(6, 9, 0), t(6, 10, 30), None)
        .await
        .unwrap();
    assert!(overlapping.has_conflicts);

    let excluded = h
        .service
        .check_for_conflicts(USER, t(6, 9, 0), t(6, 10, 30), Some(existing.id))
        .await
        .unwrap();
    assert!(!excluded.has_conflicts);

    let other_user = h
        .service
        .check_for_conflicts(UserId(7), t(6, 9, 0), t(6, 10, 30), None)
        .await
        .unwrap();
    assert!(other_user.conflicts.is_empty());

    assert_eq!(h.repo.len().await, 1);
}
