//! DeepSeek connection type. Only its configuration surface exists so far.

use super::openai::OpenAiCompatibleAdapter;
use super::{ProviderAdapter, ProviderError, ProviderKind, TokenStream};
use crate::schema::{
    ConnectionField, FieldType, GenerationParameter, ModelSchema, ParameterOptions,
};
use crate::types::*;
use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

pub struct DeepSeekAdapter {
    config: ConnectionConfig,
}

impl DeepSeekAdapter {
    pub fn new(config: ConnectionConfig) -> Result<Self, ProviderError> {
        Ok(Self { config })
    }

    pub fn adapter_schema() -> ModelSchema {
        ModelSchema {
            provider: "deepseek",
            label: "DeepSeek",
            fields: vec![
                ConnectionField::required("api_key", "API key", FieldType::Password),
                ConnectionField::optional("url", "API URL", FieldType::Url)
                    .placeholder(DEFAULT_BASE_URL),
                ConnectionField::optional("model", "Model", FieldType::Text)
                    .placeholder("deepseek-chat"),
            ],
        }
    }

    pub fn generation_parameters_schema() -> Vec<GenerationParameter> {
        vec![
            GenerationParameter::new(
                "temperature",
                "Temperature",
                FieldType::Range,
                ParameterOptions::range(0.0, 2.0, 0.1, 1.0),
            ),
            GenerationParameter::new(
                "max_tokens",
                "Max tokens",
                FieldType::Number,
                ParameterOptions::range(1.0, 8192.0, 1.0, 4096),
            ),
        ]
    }
}

#[async_trait]
impl ProviderAdapter for DeepSeekAdapter {
    fn id(&self) -> &'static str {
        "deepseek"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn prompt(&self, _messages: &[Message], _options: &GenerationOptions) -> TokenStream {
        Box::pin(stream::once(async {
            Err(ProviderError::Unsupported(
                "DeepSeek adapter has no chat implementation yet".into(),
            ))
        }))
    }

    async fn health_check(&self) -> HealthCheck {
        HealthCheck::failed("DeepSeek adapter has no chat implementation yet")
    }

    fn prepare_messages(&self, messages: &[Message]) -> Value {
        json!(OpenAiCompatibleAdapter::prepare_chat_messages(messages))
    }
}
