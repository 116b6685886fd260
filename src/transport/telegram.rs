use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::Config;
use crate::decision::{ActionPayload, HumanDecision, Outcome};
use crate::error::{Result, StopkranError};
use crate::pending::PendingTable;
use crate::transport::format::{self, QuestionOption};
use crate::transport::{ChannelTransport, ReconnectPolicy};

/// Timeout for every call except the long poll.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const ALLOW_REPLIES: &[&str] = &["да", "yes", "ок", "ok", "👍", "✅"];
const DENY_REPLIES: &[&str] = &["нет", "no", "👎", "❌"];

// ---------------------------------------------------------------------------
// Bot API wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Decoded inline button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Allow(String),
    Deny(String),
    Answer { id: String, option: usize },
}

/// Parse `allow:<id>`, `deny:<id>` or `ans:<id>:<index>`.
pub fn parse_callback(data: &str) -> Option<CallbackAction> {
    let mut parts = data.splitn(3, ':');
    let action = parts.next()?;
    let id = parts.next().filter(|id| !id.is_empty())?.to_string();
    match (action, parts.next()) {
        ("allow", None) => Some(CallbackAction::Allow(id)),
        ("deny", None) => Some(CallbackAction::Deny(id)),
        ("ans", Some(index)) => index
            .parse()
            .ok()
            .map(|option| CallbackAction::Answer { id, option }),
        _ => None,
    }
}

/// Decoded free-text reply from the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickReply {
    Allow,
    Deny,
    /// 1-based option number for question prompts.
    Option(usize),
}

/// Map short replies (e.g. from a watch) to a decision on the oldest
/// pending request.
pub fn parse_quick_reply(text: &str) -> Option<QuickReply> {
    let normalized: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !('\u{1F3FB}'..='\u{1F3FF}').contains(c))
        .collect();

    if !normalized.is_empty() && normalized.chars().all(|c| c.is_ascii_digit()) {
        return normalized.parse().ok().map(QuickReply::Option);
    }
    if ALLOW_REPLIES.contains(&normalized.as_str()) {
        Some(QuickReply::Allow)
    } else if DENY_REPLIES.contains(&normalized.as_str()) {
        Some(QuickReply::Deny)
    } else {
        None
    }
}

/// Side effects produced by interpreting one update.
#[derive(Debug, Clone, PartialEq)]
pub enum BotAction {
    AnswerCallback {
        callback_id: String,
        text: String,
        alert: bool,
    },
    Reply {
        chat_id: i64,
        text: String,
    },
    ClearKeyboard {
        chat_id: i64,
        message_id: i64,
    },
    PersistOwner(i64),
}

struct SentPrompt {
    chat_id: i64,
    message_id: i64,
    text: String,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Telegram Bot API transport.
///
/// Prompts go out with `sendMessage` and carry the request id in the inline
/// button callback data (`allow:<id>`, `deny:<id>`, `ans:<id>:<index>`).
/// Decisions come back through a `getUpdates` long-poll loop that is
/// restarted with exponential backoff whenever the connection drops. The only
/// state kept here is the owner chat and the message ids of sent prompts.
pub struct TelegramTransport {
    client: Client,
    bot_url: String,
    owner: RwLock<Option<i64>>,
    config_path: Option<PathBuf>,
    prompts: DashMap<String, SentPrompt>,
    poll_timeout: Duration,
    reconnect: ReconnectPolicy,
}

impl TelegramTransport {
    /// Build from config. `config_path` is where `/start` persists the owner.
    pub fn from_config(config: &Config, config_path: Option<PathBuf>) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StopkranError::Config {
                reason: "no bot token configured".into(),
            })?;

        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION"),
            ))
            .build()?;

        Ok(Self {
            client,
            bot_url: format!("{}/bot{}", config.api_base_url.trim_end_matches('/'), token),
            owner: RwLock::new(config.chat_id),
            config_path,
            prompts: DashMap::new(),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            reconnect: ReconnectPolicy::default(),
        })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn owner(&self) -> Option<i64> {
        *self.owner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_owner(&self, chat_id: i64) {
        *self.owner.write().unwrap_or_else(|e| e.into_inner()) = Some(chat_id);
    }

    /// POST a Bot API method and unwrap its `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.bot_url, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let parsed: ApiResponse<T> =
            serde_json::from_str(&text).map_err(|_| StopkranError::Api {
                status,
                body: text.clone(),
            })?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(StopkranError::Api {
                status: parsed.error_code.unwrap_or(status),
                body: parsed.description.unwrap_or(text),
            }),
        }
    }

    /// One long-poll round. Returns the updates received.
    async fn poll_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body, self.poll_timeout + REQUEST_TIMEOUT)
            .await
    }

    /// Decide what one update means. Decisions are applied to `table`
    /// immediately; chat-side effects are returned for [`Self::perform`].
    pub fn interpret(&self, update: &Update, table: &PendingTable) -> Vec<BotAction> {
        if let Some(query) = &update.callback_query {
            return self.interpret_callback(query, table);
        }
        let Some(message) = &update.message else {
            return Vec::new();
        };
        let Some(text) = message.text.as_deref() else {
            return Vec::new();
        };
        let chat_id = message.chat.id;
        let command = text.split_whitespace().next().unwrap_or("");
        let command = command.split('@').next().unwrap_or("");

        match command {
            "/start" => self.interpret_start(chat_id),
            "/status" if self.owner() == Some(chat_id) => {
                let n = table.pending_count();
                let text = if n == 0 {
                    "No pending permission requests.".to_string()
                } else {
                    format!("⏳ {} pending permission request(s).", n)
                };
                vec![BotAction::Reply { chat_id, text }]
            }
            _ if self.owner() == Some(chat_id) => self.interpret_quick_reply(chat_id, text, table),
            _ => Vec::new(),
        }
    }

    fn interpret_start(&self, chat_id: i64) -> Vec<BotAction> {
        match self.owner() {
            None => {
                self.set_owner(chat_id);
                tracing::info!(chat_id, "owner registered");
                vec![
                    BotAction::PersistOwner(chat_id),
                    BotAction::Reply {
                        chat_id,
                        text: format!(
                            "✅ Registered! Chat ID: {}\n\
                             You will now receive permission requests here.",
                            chat_id
                        ),
                    },
                ]
            }
            Some(owner) if owner == chat_id => vec![BotAction::Reply {
                chat_id,
                text: "You are already registered as the owner.".into(),
            }],
            Some(_) => vec![BotAction::Reply {
                chat_id,
                text: "⛔ Another owner is already registered.".into(),
            }],
        }
    }

    fn interpret_callback(&self, query: &CallbackQuery, table: &PendingTable) -> Vec<BotAction> {
        let answer = |text: &str, alert: bool| BotAction::AnswerCallback {
            callback_id: query.id.clone(),
            text: text.to_string(),
            alert,
        };

        if self.owner() != Some(query.from.id) {
            return vec![answer("⛔ Not authorized", true)];
        }
        let Some(action) = query.data.as_deref().and_then(parse_callback) else {
            return vec![answer("Invalid action", false)];
        };

        let (resolved, ok_text) = match action {
            CallbackAction::Allow(id) => (
                table.resolve(&id, HumanDecision::approve()),
                "✅ Allowed".to_string(),
            ),
            CallbackAction::Deny(id) => (
                table.resolve(&id, HumanDecision::Deny),
                "❌ Denied".to_string(),
            ),
            CallbackAction::Answer { id, option } => match answer_decision(table, &id, option) {
                Some((decision, label)) => (table.resolve(&id, decision), format!("✅ {}", label)),
                None if table.contains(&id) => return vec![answer("Invalid option", false)],
                None => (false, String::new()),
            },
        };

        if resolved {
            return vec![answer(&ok_text, false)];
        }
        let mut actions = vec![answer("Request expired or already handled", false)];
        if let Some(message) = &query.message {
            actions.push(BotAction::ClearKeyboard {
                chat_id: message.chat.id,
                message_id: message.message_id,
            });
        }
        actions
    }

    fn interpret_quick_reply(
        &self,
        chat_id: i64,
        text: &str,
        table: &PendingTable,
    ) -> Vec<BotAction> {
        let Some(reply) = parse_quick_reply(text) else {
            return Vec::new();
        };
        let Some((id, payload)) = table.oldest_pending() else {
            return vec![BotAction::Reply {
                chat_id,
                text: "No pending requests.".into(),
            }];
        };

        let (decision, done) = match reply {
            QuickReply::Allow => (HumanDecision::approve(), "✅ Done".to_string()),
            QuickReply::Deny => (HumanDecision::Deny, "❌ Done".to_string()),
            QuickReply::Option(n) if payload.is_question() && n > 0 => {
                match answer_decision(table, &id, n - 1) {
                    Some((decision, label)) => (decision, format!("✅ {}", label)),
                    None => return Vec::new(),
                }
            }
            QuickReply::Option(_) => return Vec::new(),
        };

        let text = if table.resolve(&id, decision) {
            done
        } else {
            "Request already handled.".to_string()
        };
        vec![BotAction::Reply { chat_id, text }]
    }

    /// Carry out chat-side effects. Failures are logged; the decision has
    /// already been applied.
    pub async fn perform(&self, actions: Vec<BotAction>) {
        for action in actions {
            let result = match &action {
                BotAction::AnswerCallback {
                    callback_id,
                    text,
                    alert,
                } => self
                    .call::<Value>(
                        "answerCallbackQuery",
                        &json!({
                            "callback_query_id": callback_id,
                            "text": text,
                            "show_alert": alert,
                        }),
                        REQUEST_TIMEOUT,
                    )
                    .await
                    .map(|_| ()),
                BotAction::Reply { chat_id, text } => self
                    .call::<Value>(
                        "sendMessage",
                        &json!({"chat_id": chat_id, "text": text}),
                        REQUEST_TIMEOUT,
                    )
                    .await
                    .map(|_| ()),
                BotAction::ClearKeyboard {
                    chat_id,
                    message_id,
                } => self
                    .call::<Value>(
                        "editMessageReplyMarkup",
                        &json!({"chat_id": chat_id, "message_id": message_id}),
                        REQUEST_TIMEOUT,
                    )
                    .await
                    .map(|_| ()),
                BotAction::PersistOwner(chat_id) => self.persist_owner(*chat_id).await,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, action = ?action, "bot action failed");
            }
        }
    }

    /// Write the owner chat back to the config file, off the async workers.
    async fn persist_owner(&self, chat_id: i64) -> Result<()> {
        let Some(path) = self.config_path.clone() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            let mut config = Config::load_from(&path)?;
            config.chat_id = Some(chat_id);
            config.save_to(&path)
        })
        .await
        .map_err(|e| StopkranError::Config {
            reason: format!("saving owner failed: {}", e),
        })?
    }

    async fn listen_once(
        &self,
        table: &PendingTable,
        offset: &mut i64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let updates = tokio::select! {
                result = self.poll_updates(*offset) => result?,
                _ = shutdown.changed() => return Ok(()),
            };
            for update in updates {
                *offset = (*offset).max(update.update_id + 1);
                let actions = self.interpret(&update, table);
                self.perform(actions).await;
            }
            if *shutdown.borrow() {
                return Ok(());
            }
        }
    }
}

/// Resolve an option index of a question prompt to an approval carrying the
/// selected answer.
fn answer_decision(
    table: &PendingTable,
    id: &str,
    option: usize,
) -> Option<(HumanDecision, String)> {
    let payload = table.payload(id)?;
    let (question, options) = format::first_question(&payload.tool_input)?;
    let QuestionOption { label, .. } = options.get(option)?.clone();
    let decision = HumanDecision::Approve {
        updated_input: Some(format::answer_input(&question, &label)),
    };
    Some((decision, label))
}

fn prompt_keyboard(id: &str, payload: &ActionPayload) -> Value {
    if payload.is_question() {
        let mut rows: Vec<Value> = format::first_question(&payload.tool_input)
            .map(|(_, options)| options)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, option)| {
                json!([{
                    "text": format!("{}. {}", i + 1, option.label),
                    "callback_data": format!("ans:{}:{}", id, i),
                }])
            })
            .collect();
        rows.push(json!([{"text": "❌ Deny", "callback_data": format!("deny:{}", id)}]));
        json!({ "inline_keyboard": rows })
    } else {
        json!({ "inline_keyboard": [[
            {"text": "✅ Allow", "callback_data": format!("allow:{}", id)},
            {"text": "❌ Deny", "callback_data": format!("deny:{}", id)},
        ]]})
    }
}

#[async_trait]
impl ChannelTransport for TelegramTransport {
    async fn send_prompt(&self, id: &str, payload: &ActionPayload) -> Result<()> {
        let chat_id = self.owner().ok_or_else(|| StopkranError::TransportUnavailable {
            reason: "no owner registered, send /start to the bot".into(),
        })?;

        let text = if payload.is_question() {
            format::format_question_message(payload)
        } else {
            format::format_request_message(payload)
        };
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": prompt_keyboard(id, payload),
        });

        let message: Message = self
            .call("sendMessage", &body, REQUEST_TIMEOUT)
            .await
            .map_err(|e| StopkranError::TransportUnavailable {
                reason: e.to_string(),
            })?;

        self.prompts.insert(
            id.to_string(),
            SentPrompt {
                chat_id,
                message_id: message.message_id,
                text,
            },
        );
        tracing::debug!(request_id = %id, message_id = message.message_id, "prompt sent");
        Ok(())
    }

    async fn listen(&self, table: Arc<PendingTable>, mut shutdown: watch::Receiver<bool>) {
        // Skip updates that queued up while the daemon was down; they refer
        // to requests that no longer exist.
        if let Err(e) = self
            .call::<Value>(
                "deleteWebhook",
                &json!({"drop_pending_updates": true}),
                REQUEST_TIMEOUT,
            )
            .await
        {
            tracing::warn!(error = %e, "could not drop stale updates");
        }
        tracing::info!("telegram listener started");

        let mut offset = 0;
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = std::time::Instant::now();
            match self.listen_once(&table, &mut offset, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    if started.elapsed() > Duration::from_secs(60) {
                        attempt = 0;
                    }
                    let delay = self.reconnect.delay_for_attempt(attempt);
                    let degraded = StopkranError::TransportDegraded {
                        reason: e.to_string(),
                    };
                    tracing::warn!(
                        error = %degraded,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnecting"
                    );
                    tokio::select! {
                        () = sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
        tracing::info!("telegram listener stopped");
    }

    async fn finalize(&self, id: &str, outcome: &Outcome) {
        let Some((_, prompt)) = self.prompts.remove(id) else {
            return;
        };
        let Some(suffix) = format::resolution_suffix(outcome, Utc::now()) else {
            return;
        };
        let body = json!({
            "chat_id": prompt.chat_id,
            "message_id": prompt.message_id,
            "text": format!("{}\n\n{}", prompt.text, suffix),
        });
        let edited = self
            .call::<Value>("editMessageText", &body, REQUEST_TIMEOUT)
            .await;
        if let Err(e) = edited {
            tracing::debug!(request_id = %id, error = %e, "could not annotate prompt");
        }
    }

    fn forget(&self, id: &str) {
        if self.prompts.remove(id).is_some() {
            tracing::debug!(request_id = %id, "prompt forgotten");
        }
    }
}
