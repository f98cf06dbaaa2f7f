use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Viewer,
    Operator,
    Supervisor,
}

impl OperatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Supervisor => "supervisor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "operator" => Some(Self::Operator),
            "supervisor" => Some(Self::Supervisor),
            _ => None,
        }
    }

    /// Whether this role may claim or resolve handoffs.
    pub fn can_work_handoffs(&self) -> bool {
        matches!(self, Self::Operator | Self::Supervisor)
    }
}

#[derive(Clone, Debug)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub role: OperatorRole,
    token: SecretString,
}

impl Operator {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: OperatorRole,
        token: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), name: name.into(), role, token: token.into().into() }
    }

    fn matches_token(&self, candidate: &str) -> bool {
        self.token.expose_secret() == candidate
    }
}

/// Token-to-operator lookup table, built once from config and passed down
/// explicitly to whatever needs authentication.
#[derive(Clone, Debug, Default)]
pub struct OperatorDirectory {
    operators: Vec<Operator>,
}

impl OperatorDirectory {
    pub fn new(operators: Vec<Operator>) -> Self {
        Self { operators }
    }

    pub fn by_token(&self, token: &str) -> Option<&Operator> {
        if token.is_empty() {
            return None;
        }
        self.operators.iter().find(|operator| operator.matches_token(token))
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }
}
