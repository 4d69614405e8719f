//! Per-conversation sliding-window history.

use serde::{Deserialize, Serialize};

use super::models::{Message, Role};

/// Default maximum number of messages kept per conversation.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Default maximum total characters kept per conversation.
pub const DEFAULT_MAX_CHARS: usize = 24_000;

/// Bounds applied to every window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimits {
    pub max_messages: usize,
    pub max_chars: usize,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

/// Ordered message history with at most one leading system message.
///
/// When either bound is exceeded the oldest non-system messages are dropped
/// first. The leading system message is never dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationWindow {
    messages: Vec<Message>,
}

impl ConversationWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Rebuild a window from stored messages, normalizing system messages.
    #[must_use]
    pub fn from_messages(messages: Vec<Message>, limits: WindowLimits) -> Self {
        let mut window = Self::new();
        for message in messages {
            window.push(message);
        }
        window.trim(limits);
        window
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.messages.iter().map(Message::char_len).sum()
    }

    fn has_system(&self) -> bool {
        self.messages.first().is_some_and(|m| m.role == Role::System)
    }

    /// Set or replace the leading system message.
    pub fn set_system(&mut self, content: impl Into<String>) {
        let message = Message::system(content);
        if self.has_system() {
            self.messages[0] = message;
        } else {
            self.messages.insert(0, message);
        }
    }

    /// Append a message. A system message replaces the leading one instead of
    /// being appended, so the window never holds two.
    pub fn push(&mut self, message: Message) {
        if message.role == Role::System {
            self.set_system(message.content);
        } else {
            self.messages.push(message);
        }
    }

    /// Drop the oldest non-system messages until both bounds hold.
    ///
    /// Returns the number of messages dropped.
    pub fn trim(&mut self, limits: WindowLimits) -> usize {
        let start = usize::from(self.has_system());
        let mut dropped = 0;
        while self.messages.len() > start
            && (self.messages.len() > limits.max_messages || self.total_chars() > limits.max_chars)
        {
            self.messages.remove(start);
            dropped += 1;
        }
        dropped
    }

    /// Messages to send for a new user turn, without recording the turn.
    #[must_use]
    pub fn with_pending(&self, pending: &Message) -> Vec<Message> {
        let mut out = self.messages.clone();
        out.push(pending.clone());
        out
    }
}
