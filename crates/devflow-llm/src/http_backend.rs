//! OpenAI-compatible chat completions backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use devflow_config::Config;
use devflow_utils::error::LlmError;

use crate::http_client::HttpClient;
use crate::types::{Completion, CompletionBackend, CompletionRequest, Message};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const PROVIDER: &str = "http";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

#[derive(Clone)]
pub struct HttpBackend {
    client: HttpClient,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the HTTP client cannot be built.
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: HttpClient::new()?,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params: HttpParams::default(),
        })
    }

    /// Build from the `[llm]` section, reading the API key from the
    /// environment variable named by `api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the key variable is unset or empty.
    pub fn new_from_config(config: &Config) -> Result<Self, LlmError> {
        let key_env = config
            .llm
            .api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                LlmError::Misconfiguration(format!(
                    "API key not found in environment variable '{key_env}'. \
                     Set it or configure a different [llm] api_key_env."
                ))
            })?;

        let mut backend = Self::new(
            api_key,
            config.llm.base_url.clone(),
            config
                .llm
                .model
                .clone()
                .unwrap_or_else(|| devflow_config::DEFAULT_MODEL.to_string()),
        )?;
        if let Some(max_tokens) = config.llm.max_tokens {
            backend.default_params.max_tokens = max_tokens;
        }
        if let Some(temperature) = config.llm.temperature {
            backend.default_params.temperature = temperature;
        }
        Ok(backend)
    }

    fn resolve_params(&self, request: &CompletionRequest) -> (String, HttpParams) {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };
        let max_tokens = request
            .metadata
            .get("max_tokens")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.default_params.max_tokens);
        #[allow(clippy::cast_possible_truncation)]
        let temperature = request
            .metadata
            .get("temperature")
            .and_then(serde_json::Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(self.default_params.temperature);

        (
            model,
            HttpParams {
                max_tokens,
                temperature,
            },
        )
    }

    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|msg| ChatMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let (model, params) = self.resolve_params(&request);

        debug!(
            provider = PROVIDER,
            task_id = %request.task_id,
            phase = %request.phase,
            model = %model,
            timeout_secs = request.timeout.as_secs(),
            "Invoking completion backend"
        );

        let body = ChatRequest {
            model: model.clone(),
            messages: Self::convert_messages(&request.messages),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream: false,
        };
        let builder = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body);

        let response = self
            .client
            .execute(builder, request.timeout, PROVIDER)
            .await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("invalid response body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))?;
        let text = choice
            .message
            .content
            .ok_or_else(|| LlmError::MalformedResponse("choice has no content".to_string()))?;

        let mut completion = Completion::new(text, PROVIDER, parsed.model.unwrap_or(model));
        if let Some(usage) = parsed.usage {
            completion = completion.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }

        debug!(
            provider = PROVIDER,
            tokens_input = ?completion.tokens_input,
            tokens_output = ?completion.tokens_output,
            "Completion finished"
        );

        Ok(completion)
    }

    fn provider(&self) -> &str {
        PROVIDER
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_utils::types::PhaseId;
    use std::time::Duration;

    fn backend() -> HttpBackend {
        HttpBackend::new("test-key".into(), None, "base-model".into()).unwrap()
    }

    #[test]
    fn resolve_params_prefers_request_values() {
        let request = CompletionRequest::from_prompt(
            "t-1",
            PhaseId::Analysis,
            "",
            Duration::from_secs(10),
            "ctx",
            "prompt",
        )
        .with_metadata("max_tokens", serde_json::json!(256))
        .with_metadata("temperature", serde_json::json!(0.7));

        let (model, params) = backend().resolve_params(&request);
        assert_eq!(model, "base-model");
        assert_eq!(params.max_tokens, 256);
        assert!((params.temperature - 0.7).abs() < 1e-6);
    }

    #[test]
    fn messages_keep_roles_in_order() {
        let converted = HttpBackend::convert_messages(&[
            Message::system("context"),
            Message::user("prompt"),
        ]);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[1].content, "prompt");
    }

    #[test]
    fn response_body_parses() {
        let body = r#"{"model":"m","choices":[{"message":{"role":"assistant","content":"hi"}}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, 1);
    }

    #[test]
    fn missing_api_key_is_misconfiguration() {
        let mut config = Config::minimal_for_testing();
        config.llm.api_key_env = Some("DEVFLOW_TEST_KEY_THAT_IS_NEVER_SET".into());
        assert!(matches!(
            HttpBackend::new_from_config(&config),
            Err(LlmError::Misconfiguration(_))
        ));
    }
}
