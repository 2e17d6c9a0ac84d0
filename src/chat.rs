use crate::api::{ApiClient, ApiError};
use crate::models::ChatReply;
use tracing::warn;

pub const GREETING: &str =
    "Hi! I am your AEGRIS assistant. Ask me about stocks, market trends, or investment ideas.";
pub const EMPTY_REPLY: &str = "No response received.";
pub const FALLBACK_APOLOGY: &str = "Unable to connect to server. Please ensure backend is running.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub sources: Vec<String>,
}

impl ChatMessage {
    fn user(text: String) -> Self {
        Self {
            role: ChatRole::User,
            text,
            sources: Vec::new(),
        }
    }

    fn assistant(text: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
            sources,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatOutcome {
    /// Blank input, or a request was already pending.
    Ignored,
    Replied,
    Failed(String),
}

/// Append-only conversation log plus the "waiting for reply" flag.
#[derive(Clone, Debug)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    pending: bool,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::assistant(GREETING, Vec::new())],
            pending: false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Records the user's message and returns the text to send, or `None`
    /// when there is nothing to send.
    pub fn begin(&mut self, input: &str) -> Option<String> {
        let text = input.trim();
        if text.is_empty() || self.pending {
            return None;
        }
        self.messages.push(ChatMessage::user(text.to_string()));
        self.pending = true;
        Some(text.to_string())
    }

    pub fn finish(&mut self, result: Result<ChatReply, ApiError>) -> ChatOutcome {
        self.pending = false;
        match result {
            Ok(reply) => {
                let text = if reply.reply.trim().is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    reply.reply
                };
                self.messages.push(ChatMessage::assistant(text, reply.sources));
                ChatOutcome::Replied
            }
            Err(e) => {
                warn!("Chat error: {}", e);
                self.messages
                    .push(ChatMessage::assistant(FALLBACK_APOLOGY, Vec::new()));
                ChatOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn send(&mut self, client: &ApiClient, input: &str) -> ChatOutcome {
        let Some(text) = self.begin(input) else {
            return ChatOutcome::Ignored;
        };
        let result = client.send_chat_message(&text).await;
        self.finish(result)
    }
}
