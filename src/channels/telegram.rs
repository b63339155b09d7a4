//! Telegram transport: long-polls the Bot API for updates.
//!
//! Text messages become commands, menu choices or free text; inline button
//! presses become `ButtonPress` events and are acknowledged right away so
//! the client stops its spinner.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::{Attachment, EventStream, Keyboard, OutgoingMessage, Transport};
use crate::error::ChannelError;
use crate::funnel::events::{ButtonTag, EventKind, InboundEvent, MenuChoice};
use crate::store::UserIdentity;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram transport: connects to the Bot API via long-polling.
pub struct TelegramTransport {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the transport at another Bot API server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.api_base, &self.bot_token, method)
    }

    fn send_error(reason: impl Into<String>) -> ChannelError {
        ChannelError::SendFailed {
            name: "telegram".into(),
            reason: reason.into(),
        }
    }

    /// Send a text message, HTML first with plain text fallback.
    /// Splits long messages; only the last chunk carries the keyboard.
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { keyboard } else { None };
            self.send_text_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    async fn send_text_chunk(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = reply_markup(keyboard);
        }

        let html_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::send_error(e.to_string()))?;

        if html_resp.status().is_success() {
            return Ok(());
        }

        let html_status = html_resp.status();
        tracing::warn!(
            status = ?html_status,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        // Retry without parse_mode
        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::send_error(e.to_string()))?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(Self::send_error(format!(
                "sendMessage failed (html: {html_status}, plain: {plain_err})"
            )));
        }
        Ok(())
    }

    /// Upload a file with `sendDocument` or `sendPhoto`.
    async fn send_file(
        &self,
        method: &str,
        field: &str,
        chat_id: &str,
        file: Attachment,
        caption: Option<String>,
        keyboard: Option<Keyboard>,
    ) -> Result<(), ChannelError> {
        let file_name = file.file_name.clone();
        let part = Part::bytes(file.bytes).file_name(file.file_name);

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field.to_string(), part);

        if let Some(cap) = caption {
            form = form
                .text("caption", cap)
                .text("parse_mode", "HTML".to_string());
        }
        if let Some(keyboard) = keyboard {
            form = form.text("reply_markup", reply_markup(keyboard).to_string());
        }

        let resp = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::send_error(e.to_string()))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(Self::send_error(format!("{method} failed: {err}")));
        }

        tracing::info!(chat_id, file_name = %file_name, "Telegram {field} sent");
        Ok(())
    }

    /// Drop any webhook so getUpdates is allowed. Best effort.
    async fn delete_webhook(&self) {
        let result = self
            .client
            .post(self.api_url("deleteWebhook"))
            .json(&json!({ "drop_pending_updates": true }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => tracing::warn!(status = ?resp.status(), "Telegram deleteWebhook refused"),
            Err(e) => tracing::warn!("Telegram deleteWebhook failed: {e}"),
        }
    }
}

// ── Transport trait implementation ──────────────────────────────────

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let me = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;
        if !me.status().is_success() {
            return Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", me.status()),
            });
        }

        self.delete_webhook().await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let updates_url = self.api_url("getUpdates");
        let answer_url = self.api_url("answerCallbackQuery");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram transport listening for updates...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&updates_url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    if let Some(query_id) = update
                        .get("callback_query")
                        .and_then(|q| q.get("id"))
                        .and_then(Value::as_str)
                    {
                        let answer = client
                            .post(&answer_url)
                            .json(&json!({ "callback_query_id": query_id }))
                            .send()
                            .await;
                        if let Err(e) = answer {
                            tracing::debug!("Telegram answerCallbackQuery failed: {e}");
                        }
                    }

                    let Some(event) = parse_update(update) else {
                        continue;
                    };

                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn send(&self, chat_id: &str, message: OutgoingMessage) -> Result<(), ChannelError> {
        match message {
            OutgoingMessage::Text { text, keyboard } => {
                self.send_text(chat_id, &text, keyboard).await
            }
            OutgoingMessage::Document { file, caption } => {
                self.send_file("sendDocument", "document", chat_id, file, caption, None)
                    .await
            }
            OutgoingMessage::Photo {
                file,
                caption,
                keyboard,
            } => {
                self.send_file("sendPhoto", "photo", chat_id, file, caption, keyboard)
                    .await
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(base: &str, token: &SecretString, method: &str) -> String {
    format!("{base}/bot{}/{method}", token.expose_secret())
}

/// Build the `UserIdentity` from a Telegram `from` object.
fn identity_from(from: &Value) -> Option<UserIdentity> {
    let id = from.get("id").and_then(Value::as_i64)?;
    let mut identity = UserIdentity::new(id.to_string());

    let first = from.get("first_name").and_then(Value::as_str);
    let last = from.get("last_name").and_then(Value::as_str);
    let full_name = match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(f), None) => Some(f.to_string()),
        (None, Some(l)) => Some(l.to_string()),
        (None, None) => None,
    };
    if let Some(name) = full_name {
        identity = identity.with_display_name(name);
    }
    if let Some(username) = from.get("username").and_then(Value::as_str) {
        identity = identity.with_handle(username);
    }
    Some(identity)
}

fn chat_id_of(message: &Value) -> Option<String> {
    message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
}

/// Convert one getUpdates entry into an event.
///
/// Returns `None` for updates the funnel does not handle (edits, channel
/// posts, unknown button payloads).
fn parse_update(update: &Value) -> Option<InboundEvent> {
    if let Some(message) = update.get("message") {
        let user = identity_from(message.get("from")?)?;
        let chat_id = chat_id_of(message).unwrap_or_else(|| user.user_id.clone());
        // Non-text messages (stickers, photos) read as empty free text
        let text = message
            .get("text")
            .or_else(|| message.get("caption"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Some(InboundEvent::new(user, chat_id, EventKind::from_text(text)));
    }

    if let Some(query) = update.get("callback_query") {
        let user = identity_from(query.get("from")?)?;
        let data = query.get("data").and_then(Value::as_str)?;
        let Some(tag) = ButtonTag::from_data(data) else {
            tracing::debug!(data, "Ignoring unknown button payload");
            return None;
        };
        let chat_id = query
            .get("message")
            .and_then(chat_id_of)
            .unwrap_or_else(|| user.user_id.clone());
        return Some(InboundEvent::new(user, chat_id, EventKind::ButtonPress(tag)));
    }

    None
}

/// Telegram `reply_markup` for a keyboard.
fn reply_markup(keyboard: Keyboard) -> Value {
    let inline = |tags: &[ButtonTag]| {
        let rows: Vec<Value> = tags
            .iter()
            .map(|tag| json!([{ "text": tag.caption(), "callback_data": tag.data() }]))
            .collect();
        json!({ "inline_keyboard": rows })
    };

    match keyboard {
        Keyboard::MainMenu => {
            let rows: Vec<Value> = MenuChoice::ALL
                .iter()
                .map(|choice| json!([{ "text": choice.label() }]))
                .collect();
            json!({ "keyboard": rows, "resize_keyboard": true })
        }
        Keyboard::ProblemChoices => inline(&ButtonTag::PROBLEM_CHOICES),
        Keyboard::SignupOffer => inline(&[ButtonTag::Signup]),
        Keyboard::Remove => json!({ "remove_keyboard": true }),
    }
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // Byte offset of the first character past the limit
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
