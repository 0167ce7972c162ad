//! Typed shapes for the `users` and `chat-histories` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A user account (`users`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Stored credential; opaque to this crate and never serialized.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub is_subscribed: bool,
    pub subscription: Option<Value>,
    pub free_plan_usage: Option<Value>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_status: String,
    pub plan: String,
    pub notifications: Option<Value>,
}

/// Fields for a new user. Unset fields take the storage defaults
/// (`isSubscribed = false`, `role = "admin"`, `paymentStatus = "inactive"`,
/// `plan = "free"`, blobs NULL).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub is_subscribed: Option<bool>,
    pub subscription: Option<Value>,
    pub free_plan_usage: Option<Value>,
    pub role: Option<String>,
    pub payment_status: Option<String>,
    pub plan: Option<String>,
    pub notifications: Option<Value>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    #[must_use]
    pub fn with_payment_status(mut self, status: impl Into<String>) -> Self {
        self.payment_status = Some(status.into());
        self
    }

    #[must_use]
    pub fn subscribed(mut self, subscribed: bool) -> Self {
        self.is_subscribed = Some(subscribed);
        self
    }
}

/// A partial update to a user. `None` leaves a field untouched; for the
/// blob fields `Some(Value::Null)` clears the stored document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub is_subscribed: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present_blob",
        skip_serializing_if = "Option::is_none"
    )]
    pub subscription: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present_blob",
        skip_serializing_if = "Option::is_none"
    )]
    pub free_plan_usage: Option<Value>,
    pub role: Option<String>,
    pub payment_status: Option<String>,
    pub plan: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_blob",
        skip_serializing_if = "Option::is_none"
    )]
    pub notifications: Option<Value>,
}

/// A blob key that is present, even as `null`, is `Some`; absent keys fall
/// back to `None` through `#[serde(default)]`.
fn present_blob<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl UserUpdate {
    /// True when no field is set; applying it only bumps `updatedAt`.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A chat session and its history (`chat-histories`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub history: Value,
}

impl ChatSession {
    /// Records in `history`, or an empty slice when it is not an array.
    pub fn entries(&self) -> &[Value] {
        match self.history.as_array() {
            Some(items) => items,
            None => &[],
        }
    }
}

/// Fields for a new chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChatSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub history: Value,
}

impl NewChatSession {
    /// A session whose history starts as an empty array.
    pub fn new(session_id: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            history: Value::Array(Vec::new()),
        }
    }

    /// A session with a freshly generated `session_id`.
    pub fn generated(user_id: Uuid) -> Self {
        Self::new(Uuid::new_v4().to_string(), user_id)
    }

    #[must_use]
    pub fn with_history(mut self, history: Value) -> Self {
        self.history = history;
        self
    }
}

/// One conversational record inside `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "role": self.role.to_string(), "content": self.content })
    }
}

/// Message roles in a chat history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
            MessageRole::Other => write!(f, "other"),
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "user" | "human" => MessageRole::User,
            "assistant" | "agent" | "ai" | "bot" => MessageRole::Assistant,
            "system" => MessageRole::System,
            "tool" | "function" => MessageRole::Tool,
            _ => MessageRole::Other,
        }
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
