//! Append-only conversation log.
//!
//! The model is stateless between calls: the whole history is resent every
//! step, so the log is the single source of truth for what the model has
//! seen. It only ever grows within a task; a new task starts a new log.

use crate::llm::{ChatMessage, ContentPart};

/// Ordered role-tagged message history. The first message is always the
/// system instruction; after that, user observations and assistant replies
/// alternate.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    /// Append a user observation: text plus, when available, the screenshot
    /// as an image attachment.
    pub fn push_observation(&mut self, text: impl Into<String>, screenshot_b64: Option<&str>) {
        let mut parts = vec![ContentPart::text(text)];
        if let Some(b64) = screenshot_b64 {
            parts.push(ContentPart::screenshot(b64));
        }
        self.messages.push(ChatMessage::user_parts(parts));
    }

    /// Append the model's reply verbatim.
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(text));
    }

    /// The full history, for resending to the model each step.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
