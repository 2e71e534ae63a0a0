pub mod deepseek;
pub mod gemini;
pub mod openai;
pub mod sanitize;
pub mod sse;

use crate::schema::{GenerationParameter, ModelSchema};
use crate::types::{ConnectionConfig, GenerationOptions, HealthCheck, Message};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use deepseek::DeepSeekAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiCompatibleAdapter;

/// Upper bound on a whole health-check request, connect to last byte.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Ordered fragments of a model reply. Concatenated, they form the full text.
pub type TokenStream = BoxStream<'static, Result<String, ProviderError>>;

/// Errors from provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request aborted")]
    Aborted,

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// True when the call ended because its cancellation signal fired.
    pub fn is_abort(&self) -> bool {
        matches!(self, ProviderError::Aborted)
    }
}

/// A streaming chat backend bound to one [`ConnectionConfig`].
///
/// Adapters hold no state besides their configuration, so concurrent calls on
/// the same instance are independent.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider identifier this adapter was registered under.
    fn id(&self) -> &'static str;

    fn config(&self) -> &ConnectionConfig;

    /// Send the conversation and stream the reply.
    ///
    /// Dropping the returned stream releases the underlying connection.
    /// With `options.stream == false` the stream yields exactly one fragment.
    fn prompt(&self, messages: &[Message], options: &GenerationOptions) -> TokenStream;

    /// Check URL and credentials with a lightweight request. Never fails.
    async fn health_check(&self) -> HealthCheck;

    /// Provider-native rendering of the message list, as sent on the wire.
    fn prepare_messages(&self, messages: &[Message]) -> serde_json::Value;

    /// Variant, giving access to the static schema descriptions.
    fn kind(&self) -> ProviderKind;
}

/// Built-in provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "v1", alias = "openai")]
    OpenAiCompatible,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAiCompatible,
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenAiCompatible => "v1",
            ProviderKind::Gemini => "gemini",
            ProviderKind::DeepSeek => "deepseek",
        }
    }

    pub fn label(&self) -> &'static str {
        self.adapter_schema().label
    }

    pub fn adapter_schema(&self) -> ModelSchema {
        match self {
            ProviderKind::OpenAiCompatible => OpenAiCompatibleAdapter::adapter_schema(),
            ProviderKind::Gemini => GeminiAdapter::adapter_schema(),
            ProviderKind::DeepSeek => DeepSeekAdapter::adapter_schema(),
        }
    }

    pub fn generation_parameters_schema(&self) -> Vec<GenerationParameter> {
        match self {
            ProviderKind::OpenAiCompatible => {
                OpenAiCompatibleAdapter::generation_parameters_schema()
            }
            ProviderKind::Gemini => GeminiAdapter::generation_parameters_schema(),
            ProviderKind::DeepSeek => DeepSeekAdapter::generation_parameters_schema(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "openai" => Ok(ProviderKind::OpenAiCompatible),
            "gemini" => Ok(ProviderKind::Gemini),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            other => Err(ProviderError::Config(format!("Unknown provider: {}", other))),
        }
    }
}
