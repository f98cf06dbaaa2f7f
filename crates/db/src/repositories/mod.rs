use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use flowops_core::domain::artifact::{AiArtifact, ArtifactType};
use flowops_core::domain::customer::{Customer, CustomerId};
use flowops_core::domain::handoff::{Handoff, HandoffId, HandoffStatus};
use flowops_core::domain::interaction::Interaction;
use flowops_core::domain::outbox::{
    IdempotencyKey, NewOutboxEvent, OutboxEvent, OutboxEventId, OutboxStatus,
};
use flowops_core::domain::ticket::{Ticket, TicketId};

pub mod artifact;
pub mod customer;
pub mod handoff;
pub mod interaction;
pub mod memory;
pub mod outbox;
pub mod ticket;

pub use artifact::SqlArtifactRepository;
pub use customer::SqlCustomerRepository;
pub use handoff::SqlHandoffRepository;
pub use interaction::SqlInteractionRepository;
pub use memory::{
    InMemoryArtifactRepository, InMemoryCustomerRepository, InMemoryHandoffRepository,
    InMemoryInteractionRepository, InMemoryOutboxRepository, InMemoryTicketRepository,
};
pub use outbox::SqlOutboxRepository;
pub use ticket::SqlTicketRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result of an interaction insert guarded by `UNIQUE(customer_id,
/// request_id)`. A duplicate is an expected race, not a fault.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Result of an outbox enqueue guarded by the unique idempotency key.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Created(OutboxEvent),
    AlreadyQueued(OutboxEvent),
}

impl EnqueueOutcome {
    pub fn event(&self) -> &OutboxEvent {
        match self {
            Self::Created(event) | Self::AlreadyQueued(event) => event,
        }
    }
}

/// Result of a conditional handoff claim. `Conflict` covers both a missing
/// row and one some other operator claimed first; callers that need to
/// distinguish fetch the row afterwards.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(Handoff),
    Conflict,
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    async fn upsert(&self, customer: Customer) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError>;
    async fn save(&self, ticket: Ticket) -> Result<(), RepositoryError>;

    /// Most recent first; used by audit export.
    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Ticket>, RepositoryError>;

    /// Conditional: only non-terminal tickets move to resolved. Returns
    /// whether a row changed.
    async fn mark_resolved(
        &self,
        id: &TicketId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait InteractionRepository: Send + Sync {
    async fn insert(&self, interaction: Interaction) -> Result<InsertOutcome, RepositoryError>;

    async fn find_by_request(
        &self,
        customer_id: &CustomerId,
        request_id: &str,
    ) -> Result<Option<Interaction>, RepositoryError>;

    /// Newest first, capped at `limit`.
    async fn list_recent(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<Interaction>, RepositoryError>;

    /// Oldest first; used by audit export.
    async fn list_for_audit(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Interaction>, RepositoryError>;

    async fn count_all(&self) -> Result<i64, RepositoryError>;
    async fn count_replayed(&self) -> Result<i64, RepositoryError>;

    /// Confidence values of the newest interactions, newest first.
    async fn recent_confidences(&self, limit: u32) -> Result<Vec<f64>, RepositoryError>;
}

#[async_trait]
pub trait HandoffRepository: Send + Sync {
    async fn create(&self, handoff: Handoff) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &HandoffId) -> Result<Option<Handoff>, RepositoryError>;

    /// Newest first, optionally narrowed by status.
    async fn list(
        &self,
        status: Option<HandoffStatus>,
        limit: u32,
    ) -> Result<Vec<Handoff>, RepositoryError>;

    /// Oldest first; used by audit export.
    async fn list_for_audit(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Handoff>, RepositoryError>;

    /// Atomic claim: succeeds only while the handoff is pending and
    /// unclaimed.
    async fn claim(
        &self,
        id: &HandoffId,
        operator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepositoryError>;

    /// Conditional resolve: succeeds only while the handoff is claimed.
    /// Returns whether a row changed.
    async fn resolve(
        &self,
        id: &HandoffId,
        operator_id: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Pending handoffs past their SLA deadline and not yet marked,
    /// oldest deadline first, capped at `batch`.
    async fn list_sla_due(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<Handoff>, RepositoryError>;

    /// Conditional breach mark: stamps `sla_breached_at` and bumps the
    /// priority to high, only once. Returns whether a row changed.
    async fn mark_sla_breached(
        &self,
        id: &HandoffId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn count_by_status(&self, status: HandoffStatus) -> Result<i64, RepositoryError>;

    /// `(created_at, resolved_at)` pairs of the newest resolved handoffs.
    async fn recent_resolutions(
        &self,
        limit: u32,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, RepositoryError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn enqueue(
        &self,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, RepositoryError>;

    async fn find_by_id(&self, id: &OutboxEventId) -> Result<Option<OutboxEvent>, RepositoryError>;

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OutboxEvent>, RepositoryError>;

    /// Oldest eligible event: pending or failed, with `next_attempt_at`
    /// in the past.
    async fn next_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEvent>, RepositoryError>;

    /// Conditional claim to `processing`. Returns false when another
    /// dispatcher got there first.
    async fn mark_processing(
        &self,
        id: &OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn mark_sent(&self, id: &OutboxEventId, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;

    async fn mark_failed(
        &self,
        id: &OutboxEventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn mark_dead(
        &self,
        id: &OutboxEventId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Releases events stuck in `processing` since before `cutoff` back to
    /// `failed` so they become eligible again. Returns how many moved.
    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Newest first, optionally narrowed by status.
    async fn list(
        &self,
        status: Option<OutboxStatus>,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, RepositoryError>;

    /// Email events for one customer, oldest first; used by audit export.
    async fn list_customer_emails(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<OutboxEvent>, RepositoryError>;
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Insert-or-replace on `(handoff_id, type)`; regeneration overwrites.
    async fn upsert(&self, artifact: AiArtifact) -> Result<(), RepositoryError>;

    async fn find(
        &self,
        handoff_id: &HandoffId,
        artifact_type: ArtifactType,
    ) -> Result<Option<AiArtifact>, RepositoryError>;

    async fn list_for_handoff(
        &self,
        handoff_id: &HandoffId,
    ) -> Result<Vec<AiArtifact>, RepositoryError>;
}
