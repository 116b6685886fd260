use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a request held in the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Pending,
    Approved,
    Denied,
    TimedOut,
    Errored,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Pending)
    }
}

/// A decision delivered by the human reviewer through the channel transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum HumanDecision {
    /// Allow the action. `updated_input` carries a selected answer for
    /// question prompts.
    Approve { updated_input: Option<Value> },
    Deny,
}

impl HumanDecision {
    pub fn approve() -> Self {
        HumanDecision::Approve {
            updated_input: None,
        }
    }
}

/// The single result returned to a hook client for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Approved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
    },
    Denied,
    TimedOut,
    /// Mediation bypassed; the caller should use its own native prompt.
    Deferred,
    #[serde(rename = "error")]
    Errored { reason: String },
}

impl Outcome {
    pub fn errored(reason: impl Into<String>) -> Self {
        Outcome::Errored {
            reason: reason.into(),
        }
    }

    /// The table state this outcome corresponds to. `Deferred` never enters
    /// the table, so it has none.
    pub fn state(&self) -> Option<RequestState> {
        match self {
            Outcome::Approved { .. } => Some(RequestState::Approved),
            Outcome::Denied => Some(RequestState::Denied),
            Outcome::TimedOut => Some(RequestState::TimedOut),
            Outcome::Errored { .. } => Some(RequestState::Errored),
            Outcome::Deferred => None,
        }
    }

    /// Short human-readable note attached to the IPC response. Errors carry
    /// their own reason and get none.
    pub fn note(&self) -> Option<&'static str> {
        match self {
            Outcome::Approved { .. } => Some("approved by reviewer"),
            Outcome::Denied => Some("denied by reviewer"),
            Outcome::TimedOut => Some("no decision before deadline"),
            Outcome::Deferred => Some("mediation paused"),
            Outcome::Errored { .. } => None,
        }
    }
}

impl From<HumanDecision> for Outcome {
    fn from(decision: HumanDecision) -> Self {
        match decision {
            HumanDecision::Approve { updated_input } => Outcome::Approved { updated_input },
            HumanDecision::Deny => Outcome::Denied,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Approved { .. } => write!(f, "approved"),
            Outcome::Denied => write!(f, "denied"),
            Outcome::TimedOut => write!(f, "timed_out"),
            Outcome::Deferred => write!(f, "deferred"),
            Outcome::Errored { .. } => write!(f, "error"),
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Pending => write!(f, "pending"),
            RequestState::Approved => write!(f, "approved"),
            RequestState::Denied => write!(f, "denied"),
            RequestState::TimedOut => write!(f, "timed_out"),
            RequestState::Errored => write!(f, "errored"),
        }
    }
}

/// The action description a hook client asks to have approved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// The tool name (Bash, Write, Edit, AskUserQuestion, etc.)
    pub tool_name: String,

    /// Raw tool arguments as sent by the agent.
    #[serde(default)]
    pub tool_input: Value,

    /// Working directory of the requesting session.
    #[serde(default)]
    pub cwd: String,

    #[serde(default)]
    pub session_id: String,

    /// Correlation hint supplied by the hook client, used only in logs.
    #[serde(default)]
    pub hint: Option<String>,

    /// When the request was received.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl ActionPayload {
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            cwd: String::new(),
            session_id: String::new(),
            hint: None,
            received_at: Utc::now(),
        }
    }

    /// Question prompts get option buttons instead of allow/deny.
    pub fn is_question(&self) -> bool {
        self.tool_name == "AskUserQuestion"
    }
}
