use serde::{Deserialize, Serialize};

/// Speaker of a stored conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// Older history documents wrote the model turn as `"gemini"`.
    #[serde(alias = "gemini")]
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single entry of the conversation history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
}

impl ChatEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Blocked,
    Other,
}

/// Token usage reported by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of a single generation call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// `None` when the model produced no usable text.
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

impl Completion {
    /// Text of the completion if it is non-blank.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}
