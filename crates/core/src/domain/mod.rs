pub mod action;
pub mod artifact;
pub mod customer;
pub mod facts;
pub mod handoff;
pub mod interaction;
pub mod outbox;
pub mod ticket;

/// Fresh UUIDv4 identifier with the given prefix (`hf_`, `evt_`, ...).
pub fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}
