//! Core types for the completion collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use devflow_utils::error::LlmError;
use devflow_utils::types::PhaseId;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Input to one completion call.
///
/// The phase's context travels as the system message and its prompt as the
/// user message.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub task_id: String,
    pub phase: PhaseId,
    pub model: String,
    /// Caller-supplied bound on the call.
    pub timeout: Duration,
    pub messages: Vec<Message>,
    /// Provider-specific parameters (e.g. `max_tokens`, `temperature`).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        phase: PhaseId,
        model: impl Into<String>,
        timeout: Duration,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            phase,
            model: model.into(),
            timeout,
            messages,
            metadata: HashMap::new(),
        }
    }

    /// Build a request from a context (system) and prompt (user) pair.
    #[must_use]
    pub fn from_prompt(
        task_id: impl Into<String>,
        phase: PhaseId,
        model: impl Into<String>,
        timeout: Duration,
        context: &str,
        prompt: &str,
    ) -> Self {
        let mut messages = Vec::with_capacity(2);
        if !context.is_empty() {
            messages.push(Message::system(context));
        }
        messages.push(Message::user(prompt));
        Self::new(task_id, phase, model, timeout, messages)
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Content of the last user message.
    #[must_use]
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Text returned by a completion backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Provider-reported confidence in [0, 1], when available.
    pub confidence: Option<f64>,
    pub provider: String,
    pub model_used: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

impl Completion {
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        provider: impl Into<String>,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            provider: provider.into(),
            model_used: model_used.into(),
            tokens_input: None,
            tokens_output: None,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = Some(input);
        self.tokens_output = Some(output);
        self
    }
}

/// Trait for completion backend implementations.
///
/// The orchestrator treats the backend as a black box: prompt and context in,
/// text and optional confidence out. Implementations must honor
/// [`CompletionRequest::timeout`]; the phase executor enforces it as well.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// # Errors
    ///
    /// Returns [`LlmError`] for transport, provider, timeout, or budget failures.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    /// Provider name recorded in logs.
    fn provider(&self) -> &str;
}
