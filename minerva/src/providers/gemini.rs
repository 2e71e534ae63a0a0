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
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Separator placed between merged consecutive turns of the same role.
pub const MERGE_SEPARATOR: &str = "\n\n";

const HEALTH_CHECK_PROMPT: &str = "Respond with one test word.";

/// Every harm category switched off.
pub static SAFETY_SETTINGS: [SafetySetting; 5] = [
    SafetySetting::block_none("HARM_CATEGORY_HARASSMENT"),
    SafetySetting::block_none("HARM_CATEGORY_HATE_SPEECH"),
    SafetySetting::block_none("HARM_CATEGORY_SEXUALLY_EXPLICIT"),
    SafetySetting::block_none("HARM_CATEGORY_DANGEROUS_CONTENT"),
    SafetySetting::block_none("HARM_CATEGORY_CIVIC_INTEGRITY"),
];

/// Google Generative AI (Gemini API key) adapter.
pub struct GeminiAdapter {
    config: ConnectionConfig,
    base_url: String,
    model: String,
    api_key: String,
    client: Client,
    health_check_timeout: Duration,
}

impl GeminiAdapter {
    pub fn new(config: ConnectionConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key()
            .ok_or_else(|| ProviderError::Config("Gemini connection requires an API key".into()))?
            .to_string();

        let base_url = match config.url.trim().trim_end_matches('/') {
            "" => DEFAULT_BASE_URL.to_string(),
            url => url.to_string(),
        };
        Url::parse(&base_url)
            .map_err(|e| ProviderError::Config(format!("Invalid URL {:?}: {}", base_url, e)))?;

        let model = config
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();

        Ok(Self {
            config,
            base_url,
            model,
            api_key,
            client: Client::new(),
            health_check_timeout: HEALTH_CHECK_TIMEOUT,
        })
    }

    /// Replace [`HEALTH_CHECK_TIMEOUT`] for this adapter's health checks.
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// Render a conversation as Gemini `contents`.
    ///
    /// Assistant turns become `model`, everything else `user`. Empty messages
    /// are dropped, the conversation must open with a `user` turn, and
    /// consecutive turns of the same role are merged with [`MERGE_SEPARATOR`].
    pub fn prepare_contents(messages: &[Message]) -> Vec<Content> {
        let mut contents: Vec<Content> = Vec::new();
        let mut last_role: Option<GeminiRole> = None;

        for msg in messages {
            if msg.content.is_empty() {
                continue;
            }
            let role = match msg.role {
                Role::Assistant => GeminiRole::Model,
                Role::User | Role::System => GeminiRole::User,
            };

            if last_role.is_none() && role == GeminiRole::Model {
                continue;
            }

            if last_role == Some(role) {
                if let Some(last) = contents.last_mut() {
                    let text = &mut last.parts[0].text;
                    text.push_str(MERGE_SEPARATOR);
                    text.push_str(&msg.content);
                }
            } else {
                contents.push(Content {
                    role,
                    parts: vec![Part {
                        text: msg.content.clone(),
                    }],
                });
                last_role = Some(role);
            }
        }

        contents
    }

    pub fn adapter_schema() -> ModelSchema {
        ModelSchema {
            provider: "gemini",
            label: "Google Gemini",
            fields: vec![
                ConnectionField::required("api_key", "API key", FieldType::Password),
                ConnectionField::optional("url", "API URL", FieldType::Url)
                    .placeholder(DEFAULT_BASE_URL),
                ConnectionField::optional("model", "Model", FieldType::Text)
                    .placeholder(DEFAULT_MODEL),
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
                "topP",
                "Top P",
                FieldType::Range,
                ParameterOptions::range(0.0, 1.0, 0.01, 0.95),
            ),
            GenerationParameter::new(
                "topK",
                "Top K",
                FieldType::Number,
                ParameterOptions::range(1.0, 100.0, 1.0, 40),
            ),
            GenerationParameter::new(
                "maxOutputTokens",
                "Max output tokens",
                FieldType::Number,
                ParameterOptions {
                    min: Some(1.0),
                    step: Some(1.0),
                    ..ParameterOptions::default()
                },
            ),
        ]
    }

    /// `{base}/models/{model}:{method}?key=...` plus `&alt=sse` when streaming.
    fn endpoint(&self, streaming: bool) -> Result<Url, ProviderError> {
        let method = if streaming {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let mut url = Url::parse(&format!("{}/models/{}:{}", self.base_url, self.model, method))
            .map_err(|e| ProviderError::Config(format!("Invalid Gemini endpoint: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", &self.api_key);
            if streaming {
                query.append_pair("alt", "sse");
            }
        }
        Ok(url)
    }

    fn build_request(
        messages: &[Message],
        system_instruction: Option<&str>,
        generation_config: Map<String, Value>,
    ) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: Self::prepare_contents(messages),
            system_instruction: system_instruction.map(|text| SystemInstruction {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }),
            generation_config,
            safety_settings: &SAFETY_SETTINGS,
        }
    }

    fn error_stream(err: ProviderError) -> TokenStream {
        Box::pin(stream::once(async move { Err(err) }))
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeminiRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Content {
    pub role: GeminiRole,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

impl SafetySetting {
    const fn block_none(category: &'static str) -> Self {
        Self {
            category,
            threshold: "BLOCK_NONE",
        }
    }
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Map::is_empty")]
    generation_config: Map<String, Value>,
    #[serde(rename = "safetySettings")]
    safety_settings: &'static [SafetySetting],
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Why the prompt was refused, when Gemini says so.
    fn block_message(&self) -> Option<String> {
        let reason = self.prompt_feedback.as_ref()?.block_reason.as_deref()?;
        Some(format!("Prompt blocked by Gemini: {}", reason))
    }

    /// `candidates[0].content.parts[0].text`
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

fn decode_line(line: SseLine<'_>) -> Step {
    match line {
        SseLine::Data(data) => match serde_json::from_str::<GenerateContentResponse>(data) {
            Ok(chunk) if chunk.candidates.is_empty() => {
                chunk.block_message().map_or(Step::Skip, Step::Fail)
            }
            Ok(chunk) => chunk
                .first_text()
                .filter(|t| !t.is_empty())
                .map_or(Step::Skip, Step::Token),
            Err(e) => {
                tracing::warn!(provider = "gemini", error = %e, "skipping malformed stream chunk");
                Step::Skip
            }
        },
        SseLine::Done | SseLine::Ignored => Step::Skip,
    }
}

/// Turn a `streamGenerateContent?alt=sse` body into tokens.
pub fn decode_stream<S, E>(body: S, signal: Option<CancellationToken>) -> TokenStream
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    sse::decode_body(body, signal, decode_line)
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> &'static str {
        "gemini"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn prompt(&self, messages: &[Message], options: &GenerationOptions) -> TokenStream {
        let body = Self::build_request(
            messages,
            options.system_instruction(),
            options.parameters.clone(),
        );
        if body.contents.is_empty() {
            return Self::error_stream(ProviderError::InvalidRequest(
                "no user message with content to send".into(),
            ));
        }

        let streaming = options.stream;
        let url = match self.endpoint(streaming) {
            Ok(u) => u,
            Err(e) => return Self::error_stream(e),
        };
        let req = self.client.post(url).json(&body);
        let signal = options.signal.clone();

        tracing::debug!(
            model = %self.model,
            contents = body.contents.len(),
            streaming,
            "sending gemini request"
        );

        let s = async_stream::stream! {
            let resp = match sse::abortable(signal.as_ref(), req.send()).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => { yield Err(ProviderError::Network(e.without_url())); return; }
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
                    Ok(Err(e)) => { yield Err(ProviderError::Network(e.without_url())); return; }
                    Err(e) => { yield Err(e); return; }
                };
                match serde_json::from_slice::<GenerateContentResponse>(&bytes) {
                    Ok(parsed) => {
                        let blocked = parsed.block_message();
                        match (parsed.first_text(), blocked) {
                            (Some(text), _) => {
                                yield Ok(text);
                            }
                            (None, Some(message)) => {
                                yield Err(ProviderError::Other(message));
                            }
                            (None, None) => {
                                yield Err(ProviderError::Other("Empty response".into()));
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ProviderError::Json(e));
                    }
                }
                return;
            }

            let body = resp.bytes_stream().map(|chunk| chunk.map_err(|e| e.without_url()));
            let mut tokens = decode_stream(body, signal);
            while let Some(token) = tokens.next().await {
                yield token;
            }
        };
        Box::pin(s)
    }

    async fn health_check(&self) -> HealthCheck {
        let url = match self.endpoint(false) {
            Ok(u) => u,
            Err(e) => return HealthCheck::failed(e.to_string()),
        };
        let body = Self::build_request(
            &[Message::user(HEALTH_CHECK_PROMPT)],
            None,
            Map::new(),
        );

        let req = self
            .client
            .post(url)
            .json(&body)
            .timeout(self.health_check_timeout);
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return HealthCheck::failed(network_error_message(&e)),
        };
        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return HealthCheck::failed(network_error_message(&e)),
        };
        if !status.is_success() {
            return HealthCheck::failed(sanitize::api_error(status, &text).to_string());
        }

        let reply = serde_json::from_str::<GenerateContentResponse>(&text)
            .ok()
            .and_then(GenerateContentResponse::first_text);
        HealthCheck::healthy(
            format!("Connection successful ({})", self.model),
            reply.map(|r| json!({ "model": self.model, "reply": r.trim() })),
        )
    }

    fn prepare_messages(&self, messages: &[Message]) -> Value {
        json!(Self::prepare_contents(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new(ConnectionConfig::new("gemini", "").with_api_key("AIzaTest")).unwrap()
    }

    fn roles(contents: &[Content]) -> Vec<GeminiRole> {
        contents.iter().map(|c| c.role).collect()
    }

    #[test]
    fn requires_api_key() {
        assert!(matches!(
            GeminiAdapter::new(ConnectionConfig::new("gemini", "")),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn endpoint_puts_key_before_alt() {
        let a = adapter();
        assert_eq!(
            a.endpoint(true).unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?key=AIzaTest&alt=sse"
        );
        assert_eq!(
            a.endpoint(false).unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=AIzaTest"
        );
    }

    #[test]
    fn custom_url_and_model() {
        let a = GeminiAdapter::new(
            ConnectionConfig::new("gemini", "http://127.0.0.1:9000/v1beta/")
                .with_api_key("k")
                .with_model("gemini-1.5-pro"),
        )
        .unwrap();
        assert_eq!(
            a.endpoint(true).unwrap().as_str(),
            "http://127.0.0.1:9000/v1beta/models/gemini-1.5-pro:streamGenerateContent?key=k&alt=sse"
        );
    }

    #[test]
    fn maps_roles_and_skips_empty() {
        let out = GeminiAdapter::prepare_contents(&[
            Message::user("hi"),
            Message::assistant(""),
            Message::assistant("hello"),
            Message::system("note"),
        ]);
        assert_eq!(
            roles(&out),
            vec![GeminiRole::User, GeminiRole::Model, GeminiRole::User]
        );
        assert_eq!(out[2].parts[0].text, "note");
    }

    #[test]
    fn drops_leading_model_turns() {
        let out = GeminiAdapter::prepare_contents(&[
            Message::assistant("Greetings, traveller."),
            Message::assistant("Still here?"),
            Message::user("yes"),
            Message::assistant("good"),
        ]);
        assert_eq!(roles(&out), vec![GeminiRole::User, GeminiRole::Model]);
        assert_eq!(out[0].parts[0].text, "yes");
    }

    #[test]
    fn merges_consecutive_same_role() {
        let out = GeminiAdapter::prepare_contents(&[
            Message::system("setting"),
            Message::user("one"),
            Message::user(""),
            Message::user("two"),
            Message::assistant("a"),
            Message::assistant("b"),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].parts, vec![Part { text: "setting\n\none\n\ntwo".into() }]);
        assert_eq!(out[1].parts[0].text, "a\n\nb");
    }

    #[test]
    fn only_model_messages_yield_nothing() {
        assert!(GeminiAdapter::prepare_contents(&[Message::assistant("x")]).is_empty());
        assert!(GeminiAdapter::prepare_contents(&[]).is_empty());
    }

    #[test]
    fn alternation_and_content_hold_for_generated_conversations() {
        // Deterministic sweep over every user/assistant/empty pattern of length 6.
        let choices = [
            Message::user("u"),
            Message::assistant("a"),
            Message::user(""),
            Message::assistant(""),
        ];
        let n = 6u32;
        for code in 0..choices.len().pow(n) {
            let mut c = code;
            let mut msgs = Vec::new();
            for i in 0..n {
                let mut m = choices[c % choices.len()].clone();
                c /= choices.len();
                if !m.content.is_empty() {
                    m.content = format!("{}{}", m.content, i);
                }
                msgs.push(m);
            }

            let out = GeminiAdapter::prepare_contents(&msgs);
            if let Some(first) = out.first() {
                assert_eq!(first.role, GeminiRole::User, "{msgs:?}");
            }
            for pair in out.windows(2) {
                assert_ne!(pair[0].role, pair[1].role, "{msgs:?}");
            }

            // Everything from the first non-empty user message on survives, in order.
            let kept: Vec<&str> = msgs
                .iter()
                .skip_while(|m| m.role != Role::User || m.content.is_empty())
                .filter(|m| !m.content.is_empty())
                .map(|m| m.content.as_str())
                .collect();
            let rebuilt: Vec<String> = out
                .iter()
                .flat_map(|c| c.parts[0].text.split(MERGE_SEPARATOR))
                .map(String::from)
                .collect();
            assert_eq!(rebuilt, kept, "{msgs:?}");
        }
    }

    #[test]
    fn request_body_shape() {
        let mut params = Map::new();
        params.insert("temperature".into(), json!(0.4));
        params.insert("maxOutputTokens".into(), json!(256));
        let body = GeminiAdapter::build_request(&[Message::user("hi")], Some("Be kind."), params);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["contents"], json!([{"role": "user", "parts": [{"text": "hi"}]}]));
        assert_eq!(v["system_instruction"], json!({"parts": [{"text": "Be kind."}]}));
        assert_eq!(v["generationConfig"], json!({"temperature": 0.4, "maxOutputTokens": 256}));
        assert_eq!(v["safetySettings"].as_array().unwrap().len(), SAFETY_SETTINGS.len());
        assert_eq!(v["safetySettings"][0]["threshold"], "BLOCK_NONE");
    }

    #[test]
    fn request_body_omits_empty_optionals() {
        let body = GeminiAdapter::build_request(&[Message::user("hi")], None, Map::new());
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("system_instruction").is_none());
        assert!(v.get("generationConfig").is_none());
    }

    #[test]
    fn decode_line_extracts_first_part() {
        let line = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}],"role":"model"}}]}"#;
        assert_eq!(decode_line(SseLine::Data(line)), Step::Token("Hel".into()));
        assert_eq!(
            decode_line(SseLine::Data(r#"{"candidates":[{"finishReason":"STOP"}]}"#)),
            Step::Skip
        );
        assert_eq!(decode_line(SseLine::Data("{not json")), Step::Skip);
        assert_eq!(
            decode_line(SseLine::Data(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)),
            Step::Fail("Prompt blocked by Gemini: SAFETY".into())
        );
        assert_eq!(decode_line(SseLine::Done), Step::Skip);
    }

    #[tokio::test]
    async fn nothing_to_send_is_invalid_request() {
        let mut s = adapter().prompt(&[Message::assistant("only me")], &GenerationOptions::default());
        assert!(matches!(
            s.next().await,
            Some(Err(ProviderError::InvalidRequest(_)))
        ));
    }

    #[tokio::test]
    async fn split_chunks_decode_to_two_tokens() {
        let payload = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hello\"}]}}]}\n\n\
                       data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" world\"}]}}]}\n\n";
        let (a, rest) = payload.split_at(25);
        let (b, c) = rest.split_at(70);
        let chunks: Vec<Result<bytes::Bytes, ProviderError>> = [a, b, c]
            .iter()
            .map(|p| Ok(bytes::Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        let tokens: Vec<String> = decode_stream(stream::iter(chunks), None)
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Hello", " world"]);
    }
}
