pub mod audit;
pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod policy;
pub mod request_key;
pub mod verify;

pub use auth::{Operator, OperatorDirectory, OperatorRole};
pub use domain::action::ActionTag;
pub use domain::artifact::{AiArtifact, ArtifactId, ArtifactStatus, ArtifactType};
pub use domain::customer::{Customer, CustomerId, Plan};
pub use domain::facts::{AccountFacts, ApiKeyStatus, BillingFacts, InvoiceStatus};
pub use domain::handoff::{Handoff, HandoffId, HandoffPriority, HandoffReason, HandoffStatus};
pub use domain::interaction::{Channel, Interaction, InteractionId, Mode};
pub use domain::outbox::{
    IdempotencyKey, NewOutboxEvent, OutboxEvent, OutboxEventId, OutboxEventType, OutboxStatus,
};
pub use domain::ticket::{Ticket, TicketId, TicketPriority, TicketStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use policy::{
    ConfidenceEstimator, ConfidenceInput, EscalationDecision, HeuristicConfidence, PolicyConfig,
    RefundDecision,
};
pub use verify::{VerificationInput, VerificationOutcome};
