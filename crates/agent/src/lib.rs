//! Decision pipeline and operator workflow services.
//!
//! This crate is the "brain" of the system:
//! - `pipeline` runs one customer message end to end: idempotency check,
//!   fact fetch, policy decisions, reply verification, escalation, and
//!   durable side-effect enqueueing.
//! - `handoffs` drives the operator state machine (claim, resolve) and
//!   artifact generation requests.
//! - `tools` defines the fact-fetching seams the pipeline depends on.
//!
//! # Safety principle
//!
//! Everything here is deterministic. Refund amounts, escalation choices,
//! and SLA deadlines come from the pure policy engine in `flowops-core`;
//! the LLM only ever produces advisory artifacts, asynchronously, through
//! the outbox.

pub mod handoffs;
pub mod pipeline;
pub mod tools;

pub use handoffs::{HandoffError, HandoffService};
pub use pipeline::{ChatRequest, ChatResponse, SupportPipeline};
pub use tools::{AccountTool, BillingTool, StaticAccountTool, StaticBillingTool, ToolError};
