//! Conversation context supplied by the host on every turn.
//!
//! `Context.messages` is the full chronological history for a chat. It is
//! read-only to the agent; new facts are persisted by emitting a
//! [`ContextMessage`] in `AgentResponse.memory`, which the host appends.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use super::json::{json_to_prost_value, json_to_struct, prost_value_to_json, struct_to_json};

/// Speaker of a context turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Parses a wire role. Returns `None` for roles outside the protocol.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversational turn.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ContextMessage {
    /// "user", "assistant" or "tool"
    #[prost(string, tag = "1")]
    pub role: String,
    #[prost(string, tag = "2")]
    pub content: String,
    /// ISO-8601 / RFC 3339
    #[prost(string, tag = "3")]
    pub timestamp: String,
    #[prost(string, optional, tag = "4")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub tool_call_id: Option<String>,
    #[prost(message, repeated, tag = "6")]
    pub tool_calls: Vec<prost_types::Struct>,
    #[prost(message, optional, tag = "7")]
    pub function_call: Option<prost_types::Struct>,
}

impl ContextMessage {
    /// Creates a message with the given role, stamped with the current time.
    pub fn new(role: Role, content: &str) -> Self {
        Self::at(role, content, Utc::now())
    }

    /// Creates a message with an explicit timestamp.
    pub fn at(role: Role, content: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.to_string(),
            timestamp: timestamp.to_rfc3339(),
            ..Default::default()
        }
    }

    /// Creates a user turn.
    ///
    /// # Example
    /// ```
    /// use anyagent::proto::{ContextMessage, Role};
    ///
    /// let msg = ContextMessage::user("Hi there");
    /// assert_eq!(msg.role_kind(), Some(Role::User));
    /// ```
    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant turn.
    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a tool result turn answering `tool_call_id`.
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.to_string());
        msg
    }

    /// Sets the speaker name (builder pattern).
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Appends an opaque tool-call payload (builder pattern).
    ///
    /// Non-object JSON values are wrapped as `{"value": ...}`.
    pub fn with_tool_call(mut self, call: serde_json::Value) -> Self {
        self.tool_calls.push(json_to_struct(call));
        self
    }

    /// Sets the opaque function-call payload (builder pattern).
    pub fn with_function_call(mut self, call: serde_json::Value) -> Self {
        self.function_call = Some(json_to_struct(call));
        self
    }

    /// Typed role, or `None` for roles outside the protocol.
    pub fn role_kind(&self) -> Option<Role> {
        Role::parse(&self.role)
    }

    /// Parsed timestamp, if well formed.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Tool-call payloads as JSON.
    pub fn tool_calls_json(&self) -> Vec<serde_json::Value> {
        self.tool_calls.iter().map(struct_to_json).collect()
    }
}

/// Chat history plus free-form metadata.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Context {
    #[prost(int64, tag = "1")]
    pub chat_id: i64,
    #[prost(message, repeated, tag = "2")]
    pub messages: Vec<ContextMessage>,
    #[prost(map = "string, message", tag = "3")]
    pub metadata: HashMap<String, prost_types::Value>,
}

impl Context {
    /// Creates an empty context for a chat.
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            ..Default::default()
        }
    }

    /// Sets the history (builder pattern). Order is kept as given.
    pub fn with_messages(mut self, messages: Vec<ContextMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Inserts a metadata entry from JSON (builder pattern). Keys are unique;
    /// a repeated key replaces the earlier value.
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata
            .insert(key.to_string(), json_to_prost_value(value));
        self
    }

    /// Metadata value as JSON.
    pub fn metadata_json(&self, key: &str) -> Option<serde_json::Value> {
        self.metadata.get(key).map(prost_value_to_json)
    }

    /// Most recent message with the given role.
    pub fn last_by_role(&self, role: Role) -> Option<&ContextMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role_kind() == Some(role))
    }

    /// Number of history entries.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// `true` when there is no history.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
