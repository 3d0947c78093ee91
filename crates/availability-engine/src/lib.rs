//! # availability-engine
//!
//! Recurring availability blocks with deterministic conflict resolution.
//!
//! A user's schedule is a set of non-overlapping blocks, each `available` or
//! `unavailable`. New blocks are expanded from a recurrence rule, checked
//! against the existing schedule, and folded in: same-status overlaps merge,
//! different-status overlaps override (delete, split, or trim) the existing
//! block.
//!
//! ## Modules
//!
//! - [`recurrence`] — recurrence rule → list of concrete occurrences
//! - [`conflict`] — classify overlaps as adjacent or substantive
//! - [`resolver`] — plan and apply merge/override/split
//! - [`service`] — create/update/delete/check operations
//! - [`model`] — blocks, statuses, recurrence rules
//! - [`repository`] — persistence trait and in-memory implementation
//! - [`events`] — domain events and publishers
//! - [`mapping`] — camelCase ↔ snake_case field table
//! - [`validation`] — request validation
//! - [`config`] — engine settings
//! - [`error`] — error types

pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
pub mod locks;
pub mod mapping;
pub mod model;
pub mod recurrence;
pub mod repository;
pub mod resolver;
pub mod response;
pub mod service;
pub mod validation;

pub use crate::config::{CreatePolicy, EngineConfig};
pub use conflict::{classify, find_conflicts, Conflict, ConflictReport, ConflictType};
pub use error::{EngineError, RepositoryError};
pub use events::{AvailabilityEvent, EventPublisher, RecordingPublisher, TracingPublisher};
pub use model::{
    AvailabilityBlock, AvailabilityStatus, BlockId, BlockPatch, CreateBlockRequest,
    RecurrenceEnd, RecurrencePattern, RecurrenceRule, UserId,
};
pub use recurrence::{generate_occurrences, Occurrence, OccurrencePlan, MAX_OCCURRENCES};
pub use repository::{AvailabilityRepository, InMemoryRepository};
pub use response::ServiceResponse;
pub use service::{AvailabilityService, CreateOutcome, DeleteOutcome, GenerationReport, UpdateOutcome};
