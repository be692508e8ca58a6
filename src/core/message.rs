use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{ChatContent, ChatMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: ChatContent,
}

impl Message {
    pub fn new(role: Role, content: ChatContent) -> Self {
        Self { role, content }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, ChatContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, ChatContent::Text(text.into()))
    }

    pub fn user_parts(parts: Vec<crate::api::ContentPart>) -> Self {
        Self::new(Role::User, ChatContent::Parts(parts))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, ChatContent::Text(text.into()))
    }

    pub fn to_api(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.as_str().to_string(),
            content: self.content.clone(),
        }
    }
}

/// The ordered message list sent to a model on every call.
///
/// Index 0 is always the system message; the only mutations are replacing
/// it, appending a completed user/assistant exchange, and resetting back
/// to the system message alone. The length is therefore always `1 + 2N`
/// for N completed exchanges.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_text)],
        }
    }

    pub fn system_text(&self) -> String {
        self.messages[0].content.display_text()
    }

    pub fn set_system(&mut self, text: impl Into<String>) {
        self.messages[0] = Message::system(text);
    }

    /// Clears everything after the system message.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    /// Appends one completed exchange. Partial exchanges are never
    /// observable: callers commit the user and assistant turns together.
    pub fn push_exchange(&mut self, user_turn: Message, assistant_turn: Message) {
        debug_assert!(user_turn.role == Role::User);
        debug_assert!(assistant_turn.role == Role::Assistant);
        self.messages.push(user_turn);
        self.messages.push(assistant_turn);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn completed_exchanges(&self) -> usize {
        (self.messages.len() - 1) / 2
    }

    /// Wire payload for the running conversation, optionally extended with
    /// a not-yet-committed user turn.
    pub fn to_api_with(&self, pending_user_turn: Option<&Message>) -> Vec<ChatMessage> {
        let mut api_messages: Vec<ChatMessage> =
            self.messages.iter().map(Message::to_api).collect();
        if let Some(turn) = pending_user_turn {
            api_messages.push(turn.to_api());
        }
        api_messages
    }
}

/// One completed exchange kept for UI replay. Never sent back to the
/// model; the model sees the [`Conversation`].
#[derive(Debug, Clone)]
pub struct ChatHistoryEntry {
    pub user_turn: String,
    pub assistant_turn: String,
    pub recorded_at: DateTime<Utc>,
}

impl ChatHistoryEntry {
    pub fn new(user_turn: impl Into<String>, assistant_turn: impl Into<String>) -> Self {
        Self {
            user_turn: user_turn.into(),
            assistant_turn: assistant_turn.into(),
            recorded_at: Utc::now(),
        }
    }
}
