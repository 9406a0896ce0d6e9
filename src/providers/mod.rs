//! Chat model abstraction for the assistant panel.
//!
//! The core never runs inference itself - it talks to a locally hosted
//! model server over HTTP. This module defines the message types and the
//! provider interface; [`ollama`] implements it against an
//! Ollama-compatible server.

pub mod ollama;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged message in a conversation, ordered oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

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

/// System prompt for the assistant panel.
pub const SYSTEM_PROMPT: &str = r#"You are Galaxy AI, a world-class Senior Software Engineer.
- You provide clean, modern, and efficient code.
- You think step-by-step and explain your logic briefly.
- If the user needs a file created, you MUST respond ONLY with this JSON: {"action": "create_file", "path": "filename.ext", "content": "..."}.
- You are professional, proactive, and always aim for production-grade quality."#;

/// Structured file-creation instruction an assistant reply may encode.
///
/// The core only parses this payload; validating the path and writing the
/// file is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAction {
    pub action: String,
    pub path: String,
    pub content: String,
}

/// Try to interpret an assistant reply as a file-creation instruction.
pub fn parse_file_action(content: &str) -> Option<FileAction> {
    let action: FileAction = serde_json::from_str(content.trim()).ok()?;
    if action.action == "create_file" {
        Some(action)
    } else {
        None
    }
}

/// Identity of the model a provider resolved for this conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Server-side model id, e.g. `deepseek-coder:6.7b`.
    pub id: String,
    /// Human-readable label for status lines.
    pub name: String,
}

/// Callback for streaming tokens; return `false` to stop the stream.
pub type StreamCallback = Box<dyn FnMut(&str) -> Result<bool> + Send>;

/// Interface the chat panel consumes: an ordered message list plus optional
/// free-text project context in, a single assistant message out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider name for display.
    fn name(&self) -> &'static str;

    /// Whether the model server is reachable right now.
    async fn is_available(&self) -> bool;

    /// The model this provider would use for the next request.
    async fn model_info(&self) -> ModelInfo;

    /// Run a chat completion and return the assistant's reply.
    async fn chat(&self, messages: &[Message], project_context: Option<&str>) -> Result<Message>;

    /// Run a chat completion, invoking `callback` for each generated token.
    /// Returns the complete reply after the stream finishes.
    async fn chat_streaming(
        &self,
        messages: &[Message],
        project_context: Option<&str>,
        callback: StreamCallback,
    ) -> Result<Message>;
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("model server unreachable at {0}")]
    Unreachable(String),

    #[error("model server error: {0}")]
    Api(String),

    #[error("invalid response from model server: {0}")]
    InvalidResponse(String),
}
