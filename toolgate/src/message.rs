// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Conversation types
//
// The loop engine appends assistant/user turns to the client's conversation
// and re-sends it upstream. Client messages are carried through untouched:
// multimodal `content` arrays and extra fields (name, tool_call_id, ...)
// survive the round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The role of a message participant.
///
/// Unknown roles (e.g. "developer") are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::System => "system".to_string(),
            Role::User => "user".to_string(),
            Role::Assistant => "assistant".to_string(),
            Role::Tool => "tool".to_string(),
            Role::Other(name) => name,
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create a plain-text message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }

    /// The text content, if it is a plain string.
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Ordered messages exchanged with upstream for one client request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Parse the `messages` array of a chat completion request body.
    pub fn from_request(body: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let raw = body.get("messages").cloned().unwrap_or(Value::Null);
        let messages: Vec<Message> = serde_json::from_value(raw)?;
        Ok(Self { messages })
    }

    /// Append a model turn followed by the tool results it triggered.
    pub fn push_tool_round(&mut self, assistant_turn: &str, results: String) {
        self.messages.push(Message::new(Role::Assistant, assistant_turn));
        self.messages.push(Message::new(Role::User, results));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.messages
                .iter()
                .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
                .collect(),
        )
    }
}
