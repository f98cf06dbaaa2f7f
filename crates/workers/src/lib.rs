//! Background workers: outbox dispatch, SLA watchdog, and artifact
//! generation.
//!
//! The dispatcher polls the durable outbox and delivers events through
//! registered handlers with exponential backoff; the watchdog marks
//! overdue handoffs breached and queues notifications; the artifact
//! handlers turn queued generation jobs into stored operator-assist
//! documents, via an OpenAI-compatible structured-output endpoint.

pub mod artifacts;
pub mod context;
pub mod dispatcher;
pub mod generate;
pub mod prompts;
pub mod sla;

pub use artifacts::{GeneratedArtifactHandler, HandoffSummaryHandler};
pub use context::{ContextBuilder, ContextError};
pub use dispatcher::{EmailSendHandler, OutboxDispatcher, OutboxHandler, SlaBreachNotifyHandler};
pub use generate::{GenerateError, GenerateRequest, OpenAiGenerator, StructuredGenerator};
pub use sla::SlaWatchdog;
