use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::ActionTag;
use crate::domain::customer::CustomerId;
use crate::domain::ticket::TicketId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InteractionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Chat,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Email => "email",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// Shadow runs exercise the full decision path but persist nothing and
/// queue no side effects. Shadow is the default for unlabeled requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Shadow,
    Live,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Live => "live",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shadow" => Some(Self::Shadow),
            "live" => Some(Self::Live),
            _ => None,
        }
    }
}

/// One fully-processed request. `(customer_id, request_id)` is unique in
/// storage; a second arrival of the same pair replays `reply_text` instead
/// of re-running the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: InteractionId,
    pub customer_id: CustomerId,
    pub ticket_id: Option<TicketId>,
    pub request_id: String,
    pub channel: Channel,
    pub request_text: String,
    pub reply_text: String,
    pub mode: Mode,
    pub confidence: f64,
    pub escalated: bool,
    pub verified: bool,
    pub actions: Vec<ActionTag>,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn has_action(&self, tag: &ActionTag) -> bool {
        self.actions.contains(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, Mode};

    #[test]
    fn channel_round_trips_from_storage_encoding() {
        for channel in [Channel::Chat, Channel::Email] {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
    }

    #[test]
    fn mode_round_trips_from_storage_encoding() {
        for mode in [Mode::Shadow, Mode::Live] {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
    }
}
