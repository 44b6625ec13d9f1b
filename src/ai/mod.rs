pub mod client;
pub mod models;
pub mod wire;

use serde::{Deserialize, Serialize};

use crate::entry::text::html_to_text;
use crate::entry::types::Entry;
use crate::error::Result;

pub use client::{AiClient, CompletionStream, Provider, StreamEvent};
pub use models::{ModelCatalog, ProviderKind, ServiceInfo};

pub const DEFAULT_PROMPT: &str = "You are an AI within a journaling app. Your job is to help the user reflect on their thoughts in a thoughtful and kind manner. The user can never directly address you or directly respond to you. Try not to repeat what the user said, instead try to seed new ideas, encourage or debate. Keep your responses concise, but meaningful. You can only respond in plaintext, do NOT use HTML.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Anything that can turn a conversation into a reply.
pub trait CompletionService: Send + Sync {
    fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
    fn stream_complete(&self, model: &str, messages: &[ChatMessage]) -> Result<CompletionStream>;
}

/// Anything that can embed a piece of text.
pub trait EmbeddingService: Send + Sync {
    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;
}

/// System prompt followed by one user message per thread entry, as plain text.
/// Entries whose text is empty are left out.
pub fn prepare_completion_context(prompt: &str, thread: &[Entry]) -> Vec<ChatMessage> {
    let prompt = if prompt.trim().is_empty() {
        DEFAULT_PROMPT
    } else {
        prompt
    };

    let mut messages = Vec::with_capacity(thread.len() + 1);
    messages.push(ChatMessage::new(Role::System, prompt));
    messages.extend(
        thread
            .iter()
            .map(|entry| html_to_text(&entry.content))
            .filter(|text| !text.is_empty())
            .map(|text| ChatMessage::new(Role::User, text)),
    );
    messages
}
