use std::io::Read;
use std::path::PathBuf;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::decision::Outcome;
use crate::error::Result;
use crate::ipc::socket_client::IpcClient;
use crate::ipc::IpcRequest;

/// Forward one permission event from stdin to the daemon and print the
/// agent's hook output. Any failure degrades to printing nothing, which makes
/// the agent show its own prompt.
pub async fn run_hook(socket_path: PathBuf, timeout_secs: u64) -> Result<()> {
    let mut raw = String::new();
    if std::io::stdin().read_to_string(&mut raw).is_err() {
        return Ok(());
    }
    let Some(request) = request_from_event(&raw) else {
        return Ok(());
    };

    let client = IpcClient::new(socket_path, timeout_secs);
    match client.request(&request).await {
        Ok(response) => {
            if let Some(output) = hook_output(&response.outcome) {
                println!("{}", output);
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "daemon unavailable, falling back");
        }
    }
    Ok(())
}

/// Build the IPC request for a `PermissionRequest` hook event. Other events
/// and unparsable input yield `None`.
pub fn request_from_event(raw: &str) -> Option<IpcRequest> {
    let event: Value = serde_json::from_str(raw).ok()?;
    if event.get("hook_event_name").and_then(Value::as_str) != Some("PermissionRequest") {
        return None;
    }

    let str_field = |key: &str| {
        event
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Some(IpcRequest {
        request_id: Some(Uuid::new_v4().to_string()),
        session_id: str_field("session_id"),
        tool_name: str_field("tool_name"),
        tool_input: event.get("tool_input").cloned().unwrap_or_else(|| json!({})),
        cwd: str_field("cwd"),
        permission_suggestions: event
            .get("permission_suggestions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    })
}

/// Map a daemon outcome to the agent's `PermissionRequest` hook output.
/// `None` means print nothing and let the agent ask natively.
pub fn hook_output(outcome: &Outcome) -> Option<Value> {
    let decision = match outcome {
        Outcome::Approved { updated_input } => {
            let mut decision = json!({"behavior": "allow"});
            if let Some(input) = updated_input {
                decision["updatedInput"] = input.clone();
            }
            decision
        }
        Outcome::Denied | Outcome::TimedOut => json!({"behavior": "deny"}),
        Outcome::Deferred | Outcome::Errored { .. } => return None,
    };
    Some(json!({
        "hookSpecificOutput": {
            "hookEventName": "PermissionRequest",
            "decision": decision,
        }
    }))
}
