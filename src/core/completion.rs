//! OpenAI-compatible chat completion transport.
//!
//! Requests are sent with `stream: true`; server-sent `data:` chunks are
//! buffered into the full text. Plain JSON bodies are accepted too, and an
//! `error` object in a 2xx body becomes the text so semantic detection sees it.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::http::{self, COMPLETION_TIMEOUT};
use super::models::{Message, Role};
use crate::error::{Result, SwitchyardError};

/// An image attached to the current user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime: String,
    pub data_base64: String,
}

impl ImageAttachment {
    #[must_use]
    pub fn from_bytes(mime: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime: mime.into(),
            data_base64: STANDARD.encode(bytes),
        }
    }

    /// Read an image file; the MIME type comes from the extension.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let mime = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/png",
        };
        Ok(Self::from_bytes(mime, &bytes))
    }

    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data_base64)
    }
}

/// Token counters reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    #[serde(alias = "prompt_tokens")]
    pub prompt_tokens: u64,
    #[serde(alias = "completion_tokens")]
    pub completion_tokens: u64,
    #[serde(alias = "total_tokens")]
    pub total_tokens: u64,
}

/// Buffered result of one completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Where and how to send one completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionTarget<'a> {
    /// Full chat-completions URL.
    pub url: &'a str,
    pub key: Option<&'a str>,
    /// Provider name for errors and logs.
    pub provider: &'a str,
}

#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
    timeout: Duration,
}

impl CompletionClient {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_timeout(COMPLETION_TIMEOUT)
    }

    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::build_client(timeout)?,
            timeout,
        })
    }

    /// Send a chat request and buffer the whole answer.
    ///
    /// # Errors
    ///
    /// Transport failures and non-2xx statuses become typed errors. A 2xx
    /// answer is always `Ok`, even when it carries an error payload.
    pub async fn complete(
        &self,
        target: CompletionTarget<'_>,
        model: &str,
        messages: &[Message],
        images: &[ImageAttachment],
    ) -> Result<CompletionResponse> {
        let body = json!({
            "model": model,
            "messages": wire_messages(messages, images),
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        let mut request = self.client.post(target.url).timeout(self.timeout).json(&body);
        if let Some(key) = target.key.filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SwitchyardError::from_transport(target.provider, &e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SwitchyardError::from_status(
                target.provider,
                status.as_u16(),
                &text,
                self.timeout,
            ));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = StreamBuffer::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SwitchyardError::from_transport(target.provider, &e, self.timeout))?;
            buffer.push(&chunk);
            if buffer.done {
                break;
            }
        }
        let response = buffer.finish();
        tracing::debug!(
            provider = target.provider,
            model,
            chars = response.text.chars().count(),
            "Completion buffered"
        );
        Ok(response)
    }
}

/// Messages in wire form; images attach to the last user message.
fn wire_messages(messages: &[Message], images: &[ImageAttachment]) -> Vec<Value> {
    let last_user = messages.iter().rposition(|m| m.role == Role::User);
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            if !images.is_empty() && Some(i) == last_user {
                let mut parts = vec![json!({"type": "text", "text": m.content})];
                parts.extend(
                    images
                        .iter()
                        .map(|img| json!({"type": "image_url", "image_url": {"url": img.data_url()}})),
                );
                json!({"role": m.role, "content": parts})
            } else {
                json!({"role": m.role, "content": m.content})
            }
        })
        .collect()
}

/// Incremental parser for SSE or plain JSON bodies.
///
/// Bytes are held until a full line arrives, so a multi-byte character split
/// across network chunks decodes intact.
#[derive(Debug, Default)]
struct StreamBuffer {
    pending: Vec<u8>,
    raw: Vec<u8>,
    text: String,
    usage: Option<TokenUsage>,
    saw_events: bool,
    done: bool,
}

impl StreamBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.line(String::from_utf8_lossy(&line).trim());
        }
    }

    fn line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        self.saw_events = true;
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        if let Ok(value) = serde_json::from_str::<Value>(data) {
            self.absorb(&value, true);
        }
    }

    fn absorb(&mut self, value: &Value, streaming: bool) {
        if let Some(usage) = value
            .get("usage")
            .filter(|u| !u.is_null())
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok())
        {
            self.usage = Some(usage);
        }
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), ToString::to_string);
            self.text.push_str(&message);
            return;
        }
        let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
            return;
        };
        let field = if streaming { "delta" } else { "message" };
        let content = choice
            .get(field)
            .or_else(|| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str);
        if let Some(content) = content {
            self.text.push_str(content);
        }
    }

    fn finish(mut self) -> CompletionResponse {
        let rest = std::mem::take(&mut self.pending);
        self.line(String::from_utf8_lossy(&rest).trim());

        if !self.saw_events {
            let raw = String::from_utf8_lossy(&std::mem::take(&mut self.raw)).into_owned();
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => self.absorb(&value, false),
                Err(_) => self.text = raw,
            }
        }
        CompletionResponse {
            text: self.text,
            usage: self.usage,
        }
    }
}
