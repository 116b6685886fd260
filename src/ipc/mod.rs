pub mod socket_client;
pub mod socket_server;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::{ActionPayload, Outcome};
use crate::error::{Result, StopkranError};

/// Upper bound on one request line, to keep a misbehaving client from
/// exhausting memory.
pub const MAX_REQUEST_BYTES: u64 = 1_048_576;

/// IPC request sent from the hook client to the daemon via Unix socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Optional token generated by the hook, echoed in daemon logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub session_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_suggestions: Vec<Value>,
}

impl IpcRequest {
    /// Parse and validate one request line.
    pub fn parse(line: &str) -> Result<Self> {
        let request: IpcRequest =
            serde_json::from_str(line.trim()).map_err(|e| StopkranError::MalformedRequest {
                reason: format!("invalid request JSON: {}", e),
            })?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool_name.trim().is_empty() {
            return Err(StopkranError::MalformedRequest {
                reason: "tool_name is empty".into(),
            });
        }
        if !(self.tool_input.is_object() || self.tool_input.is_null()) {
            return Err(StopkranError::MalformedRequest {
                reason: "tool_input must be an object".into(),
            });
        }
        Ok(())
    }

    pub fn into_payload(self) -> ActionPayload {
        ActionPayload {
            tool_name: self.tool_name,
            tool_input: self.tool_input,
            cwd: self.cwd,
            session_id: self.session_id,
            hint: self.request_id,
            received_at: chrono::Utc::now(),
        }
    }
}

/// IPC response from the daemon to the hook client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<Outcome> for IpcResponse {
    fn from(outcome: Outcome) -> Self {
        let note = outcome.note().map(String::from);
        Self { outcome, note }
    }
}
