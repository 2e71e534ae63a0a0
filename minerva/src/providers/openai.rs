//! OpenAI-compatible chat completions (`/chat/completions`, `/models`).
//!
//! Works against OpenAI itself and the many servers that mimic it
//! (llama.cpp, vLLM, Ollama, OpenRouter, ...).

use super::sanitize::{self, network_error_message};
use super::sse::{self, SseLine, Step};
use super::{HEALTH_CHECK_TIMEOUT, ProviderAdapter, ProviderError, ProviderKind, TokenStream};
use crate::schema::{
    ConnectionField, FieldType, GenerationParameter, ModelSchema, ParameterOptions,
};
use crate::types::*;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Keys the adapter owns; the same names in the generation parameters are ignored.
const RESERVED_KEYS: [&str; 3] = ["messages", "stream", "model"];

/// Adapter for any server speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatibleAdapter {
    config: ConnectionConfig,
    base_url: String,
    client: Client,
    health_check_timeout: Duration,
}

impl OpenAiCompatibleAdapter {
    pub fn new(config: ConnectionConfig) -> Result<Self, ProviderError> {
        let base_url = config.url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderError::Config(
                "OpenAI-compatible connection requires a URL".into(),
            ));
        }
        url::Url::parse(&base_url).map_err(|e| {
            ProviderError::Config(format!("Invalid URL {:?}: {}", base_url, e))
        })?;

        Ok(Self {
            config,
            base_url,
            client: Client::new(),
            health_check_timeout: HEALTH_CHECK_TIMEOUT,
        })
    }

    /// Replace [`HEALTH_CHECK_TIMEOUT`] for this adapter's health checks.
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// Messages with roles preserved; the API accepts any order or repetition.
    pub fn prepare_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    pub fn adapter_schema() -> ModelSchema {
        ModelSchema {
            provider: "v1",
            label: "OpenAI-compatible",
            fields: vec![
                ConnectionField::required("url", "API URL", FieldType::Url)
                    .placeholder("https://api.openai.com/v1"),
                ConnectionField::optional("api_key", "API key", FieldType::Password),
                ConnectionField::optional("model", "Model", FieldType::Text)
                    .placeholder("gpt-4o-mini"),
            ],
        }
    }

    pub fn generation_parameters_schema() -> Vec<GenerationParameter> {
        vec![
            GenerationParameter::new(
                "temperature",
                "Temperature",
                FieldType::Range,
                ParameterOptions::range(0.0, 2.0, 0.05, 1.0),
            ),
            GenerationParameter::new(
                "top_p",
                "Top P",
                FieldType::Range,
                ParameterOptions::range(0.0, 1.0, 0.01, 1.0),
            ),
            GenerationParameter::new(
                "max_tokens",
                "Max tokens",
                FieldType::Number,
                ParameterOptions {
                    min: Some(1.0),
                    step: Some(1.0),
                    ..ParameterOptions::default()
                },
            ),
            GenerationParameter::new(
                "presence_penalty",
                "Presence penalty",
                FieldType::Range,
                ParameterOptions::range(-2.0, 2.0, 0.1, 0.0),
            ),
            GenerationParameter::new(
                "frequency_penalty",
                "Frequency penalty",
                FieldType::Range,
                ParameterOptions::range(-2.0, 2.0, 0.1, 0.0),
            ),
        ]
    }

    fn chat_completions_url(&self) -> String {
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn models_url(&self) -> String {
        let base = self
            .base_url
            .strip_suffix("/chat/completions")
            .unwrap_or(&self.base_url);
        format!("{}/models", base)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key() {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Request body: `{model?, messages, stream, ...parameters}`.
    fn build_request(&self, messages: &[Message], options: &GenerationOptions) -> ChatRequest {
        let mut chat = Vec::with_capacity(messages.len() + 1);
        if let Some(sys) = options.system_instruction() {
            chat.push(ChatMessage {
                role: Role::System,
                content: sys.to_string(),
            });
        }
        chat.extend(Self::prepare_chat_messages(messages));

        let model = options
            .parameters
            .get("model")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| self.config.model.clone());

        let parameters = options
            .parameters
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        ChatRequest {
            model,
            messages: chat,
            stream: options.stream,
            parameters,
        }
    }
}

// ---- Request/response types (OpenAI wire format) ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(flatten)]
    parameters: Map<String, Value>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<DeltaContent>,
}

#[derive(Deserialize)]
struct DeltaContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Decode one event-stream line of a streamed chat completion.
fn decode_line(line: SseLine<'_>) -> Step {
    match line {
        SseLine::Done => Step::Finish,
        SseLine::Ignored => Step::Skip,
        SseLine::Data(data) => match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
                .filter(|c| !c.is_empty())
                .map_or(Step::Skip, Step::Token),
            Err(e) => {
                tracing::warn!(provider = "v1", error = %e, "skipping malformed stream chunk");
                Step::Skip
            }
        },
    }
}

/// Turn a streamed chat completion body into tokens.
pub fn decode_stream<S, E>(body: S, signal: Option<CancellationToken>) -> TokenStream
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    sse::decode_body(body, signal, decode_line)
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn id(&self) -> &'static str {
        "v1"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn prompt(&self, messages: &[Message], options: &GenerationOptions) -> TokenStream {
        if messages.is_empty() {
            return Box::pin(stream::once(async {
                Err(ProviderError::InvalidRequest("message list is empty".into()))
            }));
        }

        let url = self.chat_completions_url();
        let body = self.build_request(messages, options);
        let req = self.apply_auth(self.client.post(&url)).json(&body);
        let signal = options.signal.clone();
        let streaming = options.stream;

        tracing::debug!(
            %url,
            model = body.model.as_deref().unwrap_or("-"),
            messages = body.messages.len(),
            streaming,
            "sending chat completion"
        );

        let s = async_stream::stream! {
            let resp = match sse::abortable(signal.as_ref(), req.send()).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => { yield Err(ProviderError::Network(e)); return; }
                Err(e) => { yield Err(e); return; }
            };

            let status = resp.status();
            if !status.is_success() {
                let body_text = match sse::abortable(signal.as_ref(), resp.text()).await {
                    Ok(text) => text.unwrap_or_default(),
                    Err(e) => { yield Err(e); return; }
                };
                yield Err(sanitize::api_error(status, &body_text));
                return;
            }

            if !streaming {
                let bytes = match sse::abortable(signal.as_ref(), resp.bytes()).await {
                    Ok(Ok(b)) => b,
                    Ok(Err(e)) => { yield Err(ProviderError::Network(e)); return; }
                    Err(e) => { yield Err(e); return; }
                };
                let parsed: ChatResponse = match serde_json::from_slice(&bytes) {
                    Ok(p) => p,
                    Err(e) => { yield Err(ProviderError::Json(e)); return; }
                };
                match parsed.choices.into_iter().next() {
                    Some(choice) => {
                        yield Ok(choice.message.content.unwrap_or_default());
                    }
                    None => {
                        yield Err(ProviderError::Other("Empty response".into()));
                    }
                }
                return;
            }

            let mut tokens = decode_stream(resp.bytes_stream(), signal);
            while let Some(token) = tokens.next().await {
                yield token;
            }
        };
        Box::pin(s)
    }

    async fn health_check(&self) -> HealthCheck {
        let url = self.models_url();
        let req = self
            .apply_auth(self.client.get(&url))
            .timeout(self.health_check_timeout);
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return HealthCheck::failed(network_error_message(&e)),
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return HealthCheck::failed(network_error_message(&e)),
        };
        if !status.is_success() {
            return HealthCheck::failed(sanitize::api_error(status, &body).to_string());
        }

        match serde_json::from_str::<ModelsResponse>(&body) {
            Ok(models) => {
                let ids: Vec<String> = models.data.into_iter().map(|m| m.id).collect();
                HealthCheck::healthy(
                    format!("Connection successful, {} models available", ids.len()),
                    Some(json!(ids)),
                )
            }
            // Some servers answer /models with something other than the OpenAI
            // list shape; the endpoint responding is enough.
            Err(_) => HealthCheck::healthy("Connection successful", None),
        }
    }

    fn prepare_messages(&self, messages: &[Message]) -> Value {
        json!(Self::prepare_chat_messages(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenAiCompatibleAdapter {
        OpenAiCompatibleAdapter::new(
            ConnectionConfig::new("v1", "https://api.example.com/v1/").with_model("gpt-test"),
        )
        .unwrap()
    }

    #[test]
    fn rejects_missing_or_bad_url() {
        assert!(matches!(
            OpenAiCompatibleAdapter::new(ConnectionConfig::new("v1", "  ")),
            Err(ProviderError::Config(_))
        ));
        assert!(matches!(
            OpenAiCompatibleAdapter::new(ConnectionConfig::new("v1", "not a url")),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn urls_are_derived_from_base() {
        let a = adapter();
        assert_eq!(a.chat_completions_url(), "https://api.example.com/v1/chat/completions");
        assert_eq!(a.models_url(), "https://api.example.com/v1/models");

        let full = OpenAiCompatibleAdapter::new(ConnectionConfig::new(
            "v1",
            "http://localhost:8080/v1/chat/completions",
        ))
        .unwrap();
        assert_eq!(full.chat_completions_url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(full.models_url(), "http://localhost:8080/v1/models");
    }

    #[test]
    fn prepare_messages_preserves_roles_and_order() {
        let msgs = vec![
            Message::system("be brief"),
            Message::assistant("hello"),
            Message::assistant("again"),
            Message::user(""),
        ];
        let out = OpenAiCompatibleAdapter::prepare_chat_messages(&msgs);
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[2].content, "again");
        assert_eq!(out[3].content, "");
    }

    #[test]
    fn request_body_prepends_system_and_passes_parameters() {
        let a = adapter();
        let opts = GenerationOptions::new()
            .with_system_instruction("You are Minerva.")
            .with_parameter("temperature", 0.5)
            .with_parameter("stream", false)
            .with_parameter("messages", "bogus");
        let body = serde_json::to_value(a.build_request(&[Message::user("hi")], &opts)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-test",
                "messages": [
                    {"role": "system", "content": "You are Minerva."},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true,
                "temperature": 0.5
            })
        );
    }

    #[test]
    fn model_parameter_overrides_config() {
        let a = adapter();
        let opts = GenerationOptions::new()
            .with_stream(false)
            .with_parameter("model", "other");
        let body = serde_json::to_value(a.build_request(&[Message::user("hi")], &opts)).unwrap();
        assert_eq!(body["model"], "other");
        assert_eq!(body["stream"], false);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn decode_line_extracts_delta_content() {
        assert_eq!(
            decode_line(SseLine::Data(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#)),
            Step::Token("Hi".into())
        );
        assert_eq!(
            decode_line(SseLine::Data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#)),
            Step::Skip
        );
        assert_eq!(
            decode_line(SseLine::Data(r#"{"choices":[{"delta":{"content":""}}]}"#)),
            Step::Skip
        );
        assert_eq!(decode_line(SseLine::Data(r#"{"choices":[]}"#)), Step::Skip);
        assert_eq!(decode_line(SseLine::Data("{not json")), Step::Skip);
        assert_eq!(decode_line(SseLine::Done), Step::Finish);
    }

    #[tokio::test]
    async fn empty_message_list_is_rejected() {
        let mut s = adapter().prompt(&[], &GenerationOptions::default());
        assert!(matches!(
            s.next().await,
            Some(Err(ProviderError::InvalidRequest(_)))
        ));
        assert!(s.next().await.is_none());
    }
}
