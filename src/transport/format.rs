use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::decision::{ActionPayload, Outcome};

/// Telegram rejects messages over 4096 characters; leave room for the
/// resolution suffix appended later.
const MAX_MESSAGE_CHARS: usize = 3800;

/// One selectable answer of a question prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionOption {
    pub label: String,
    pub description: Option<String>,
}

/// Render the approval prompt for a regular tool call.
pub fn format_request_message(payload: &ActionPayload) -> String {
    let mut lines = vec!["🔐 Permission Request".to_string(), String::new()];
    if !payload.cwd.is_empty() {
        lines.push(format!("📂 {}", payload.cwd));
    }
    lines.push(format!("🔧 {}", payload.tool_name));
    lines.push(String::new());
    lines.push(tool_snippet(&payload.tool_name, &payload.tool_input));

    let session = short_session(&payload.session_id);
    if !session.is_empty() {
        lines.push(String::new());
        lines.push(format!("Session: {}", session));
    }

    truncate(&lines.join("\n"), MAX_MESSAGE_CHARS)
}

/// Render a question prompt. Options are numbered from 1, matching the
/// digit quick replies.
pub fn format_question_message(payload: &ActionPayload) -> String {
    let mut lines = vec!["❓ Question from the agent".to_string(), String::new()];

    for question in questions(&payload.tool_input) {
        lines.push(str_field(question, "question").to_string());
        lines.push(String::new());
        for (i, option) in parse_options(question).iter().enumerate() {
            match &option.description {
                Some(desc) => lines.push(format!("{}. {} ({})", i + 1, option.label, desc)),
                None => lines.push(format!("{}. {}", i + 1, option.label)),
            }
        }
        lines.push(String::new());
    }

    let session = short_session(&payload.session_id);
    if !session.is_empty() {
        lines.push(format!("Session: {}", session));
    }

    truncate(lines.join("\n").trim(), MAX_MESSAGE_CHARS)
}

/// The first question of a question prompt and its options. Only the first
/// question is answerable from chat.
pub fn first_question(tool_input: &Value) -> Option<(String, Vec<QuestionOption>)> {
    let question = questions(tool_input).next()?;
    Some((
        str_field(question, "question").to_string(),
        parse_options(question),
    ))
}

/// The `updatedInput` sent back to the agent when an option is chosen.
pub fn answer_input(question: &str, label: &str) -> Value {
    let mut answers = serde_json::Map::new();
    answers.insert(question.to_string(), Value::String(label.to_string()));
    serde_json::json!({ "answers": answers })
}

/// Line appended to a prompt once its request is finished.
pub fn resolution_suffix(outcome: &Outcome, at: DateTime<Utc>) -> Option<String> {
    let time = at.format("%H:%M");
    match outcome {
        Outcome::Approved { updated_input } => {
            let label = updated_input
                .as_ref()
                .and_then(selected_answer)
                .map(|answer| format!("Answer: {}", answer))
                .unwrap_or_else(|| "Allowed".to_string());
            Some(format!("→ ✅ {} at {}", label, time))
        }
        Outcome::Denied => Some(format!("→ ❌ Denied at {}", time)),
        Outcome::TimedOut => Some("→ ⏰ Timed out, auto-denied".to_string()),
        Outcome::Deferred | Outcome::Errored { .. } => None,
    }
}

fn selected_answer(updated_input: &Value) -> Option<String> {
    updated_input
        .get("answers")?
        .as_object()?
        .values()
        .next()?
        .as_str()
        .map(String::from)
}

fn tool_snippet(tool: &str, input: &Value) -> String {
    match tool {
        "Bash" => str_field(input, "command").to_string(),
        "Edit" => format!(
            "{}\n-  {}\n+  {}",
            str_field(input, "file_path"),
            truncate(str_field(input, "old_string"), 120),
            truncate(str_field(input, "new_string"), 120),
        ),
        "Write" => format!(
            "{}\n{}",
            str_field(input, "file_path"),
            truncate(str_field(input, "content"), 200),
        ),
        _ => truncate(&input.to_string(), 300),
    }
}

fn questions(tool_input: &Value) -> impl Iterator<Item = &Value> {
    tool_input
        .get("questions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn parse_options(question: &Value) -> Vec<QuestionOption> {
    question
        .get("options")
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .enumerate()
                .map(|(i, option)| {
                    let label = str_field(option, "label");
                    QuestionOption {
                        label: if label.is_empty() {
                            format!("Option {}", i + 1)
                        } else {
                            label.to_string()
                        },
                        description: option
                            .get("description")
                            .and_then(Value::as_str)
                            .filter(|d| !d.is_empty())
                            .map(String::from),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn short_session(session_id: &str) -> String {
    session_id.chars().take(8).collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(tool: &str, input: Value) -> ActionPayload {
        let mut payload = ActionPayload::new(tool, input);
        payload.cwd = "/home/dev/project".into();
        payload.session_id = "0123456789abcdef".into();
        payload
    }

    #[test]
    fn bash_prompt_shows_command_cwd_and_short_session() {
        let text = format_request_message(&payload("Bash", json!({"command": "rm -rf /tmp/x"})));
        assert!(text.starts_with("🔐 Permission Request"));
        assert!(text.contains("📂 /home/dev/project"));
        assert!(text.contains("🔧 Bash"));
        assert!(text.contains("rm -rf /tmp/x"));
        assert!(text.contains("Session: 01234567"));
        assert!(!text.contains("89abcdef"));
    }

    #[test]
    fn edit_prompt_truncates_strings() {
        let long = "x".repeat(500);
        let text = format_request_message(&payload(
            "Edit",
            json!({"file_path": "src/lib.rs", "old_string": long, "new_string": "y"}),
        ));
        assert!(text.contains("src/lib.rs"));
        assert!(text.contains(&format!("-  {}...", "x".repeat(120))));
        assert!(text.contains("+  y"));
    }

    #[test]
    fn unknown_tool_falls_back_to_json() {
        let text = format_request_message(&payload("WebFetch", json!({"url": "https://x"})));
        assert!(text.contains(r#""url":"https://x""#));
    }

    #[test]
    fn question_prompt_numbers_options() {
        let input = json!({"questions": [{
            "question": "Which database?",
            "options": [
                {"label": "Postgres", "description": "relational"},
                {"label": "Redis"}
            ]
        }]});
        let text = format_question_message(&payload("AskUserQuestion", input.clone()));
        assert!(text.contains("Which database?"));
        assert!(text.contains("1. Postgres (relational)"));
        assert!(text.contains("2. Redis"));

        let (question, options) = first_question(&input).unwrap();
        assert_eq!(question, "Which database?");
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].label, "Redis");
    }

    #[test]
    fn suffix_reports_selected_answer() {
        let at = Utc::now();
        let outcome = Outcome::Approved {
            updated_input: Some(answer_input("Which database?", "Redis")),
        };
        let suffix = resolution_suffix(&outcome, at).unwrap();
        assert!(suffix.contains("Answer: Redis"));

        assert!(resolution_suffix(&Outcome::TimedOut, at)
            .unwrap()
            .contains("Timed out"));
        assert!(resolution_suffix(&Outcome::Deferred, at).is_none());
    }
}
