use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Conversation messages
// ---------------------------------------------------------------------------

/// Who authored a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single turn of a conversation, as handed over by the chat layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

// ---------------------------------------------------------------------------
// Connection configuration
// ---------------------------------------------------------------------------

/// Connection settings for one provider endpoint.
///
/// Owned by the configuration layer; adapters only ever read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Provider identifier, e.g. `v1` or `gemini`.
    pub provider: String,
    /// Base URL of the API. May be blank for providers with a fixed endpoint.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model to request when the generation parameters don't name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ConnectionConfig {
    pub fn new(provider: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            url: url.into(),
            api_key: None,
            model: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The API key, treating a blank string as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Generation options
// ---------------------------------------------------------------------------

/// Per-call options for [`crate::ProviderAdapter::prompt`].
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Instruction placed ahead of the conversation in whatever form the
    /// provider supports.
    pub system_instruction: Option<String>,
    /// Cancels the in-flight request when triggered.
    pub signal: Option<CancellationToken>,
    /// When false the reply arrives as a single fragment.
    pub stream: bool,
    /// Provider-specific generation parameters, forwarded verbatim.
    pub parameters: Map<String, Value>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            system_instruction: None,
            signal: None,
            stream: true,
            parameters: Map::new(),
        }
    }
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// System instruction with surrounding whitespace removed; `None` if blank.
    pub(crate) fn system_instruction(&self) -> Option<&str> {
        self.system_instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Health check result
// ---------------------------------------------------------------------------

/// Outcome of [`crate::ProviderAdapter::health_check`]. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HealthCheck {
    pub fn healthy(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roles_serialize_lowercase() {
        let msg = Message::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn blank_api_key_is_absent() {
        let cfg = ConnectionConfig::new("v1", "http://localhost").with_api_key("   ");
        assert_eq!(cfg.api_key(), None);
        let cfg = cfg.with_api_key(" sk-abc ");
        assert_eq!(cfg.api_key(), Some("sk-abc"));
    }

    #[test]
    fn generation_options_stream_by_default() {
        let opts = GenerationOptions::default();
        assert!(opts.stream);
        assert!(opts.parameters.is_empty());
        assert!(opts.signal.is_none());
    }

    #[test]
    fn connection_config_deserializes_without_optional_fields() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{"provider":"gemini"}"#).unwrap();
        assert_eq!(cfg.provider, "gemini");
        assert!(cfg.url.is_empty());
        assert!(cfg.api_key.is_none());
    }
}
