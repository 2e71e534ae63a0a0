//! Turn failed provider responses into short, secret-free error messages.

use super::ProviderError;
use reqwest::StatusCode;
use serde_json::Value;

const MAX_API_ERROR_CHARS: usize = 200;

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Redact API-key-looking tokens (`sk-...`, Google `AIza...`, `key=...`).
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 3] = ["sk-", "AIza", "key="];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            // Bare prefixes don't stop the scan.
            if end == content_start {
                search_from = content_start;
                continue;
            }

            let replacement = if prefix == "key=" {
                "key=[REDACTED]"
            } else {
                "[REDACTED]"
            };
            scrubbed.replace_range(start..end, replacement);
            search_from = start + replacement.len();
        }
    }

    scrubbed
}

/// Scrub secrets and truncate to a displayable length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input.trim());

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Pull the provider-reported message out of an error body.
///
/// Understands `{"error":{"message":..}}` (OpenAI and Gemini),
/// `{"error":".."}`, `{"message":".."}` and `{"detail":".."}`.
/// Gemini wraps the envelope in an array when streaming.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    let value = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };

    let message = match value.get("error") {
        Some(Value::Object(err)) => err.get("message").and_then(Value::as_str),
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
    .or_else(|| value.get("message").and_then(Value::as_str))
    .or_else(|| value.get("detail").and_then(Value::as_str))?;

    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}

/// Build the error for a non-success response: the provider's own message when
/// the body carries one, otherwise the status text.
pub fn api_error(status: StatusCode, body: &str) -> ProviderError {
    let message = extract_error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .map(String::from)
            .unwrap_or_else(|| format!("status {}", status.as_u16()))
    });
    ProviderError::Http {
        status: status.as_u16(),
        message: sanitize_api_error(&message),
    }
}

/// Convert a network error to text without leaking the request URL's query,
/// which carries the API key for some providers.
pub fn network_error_message(err: &reqwest::Error) -> String {
    let text = err.to_string();
    let text = match err.url() {
        Some(url) => text.replace(url.as_str(), &redact_query(url)),
        None => text,
    };
    sanitize_api_error(&text)
}

fn redact_query(url: &url::Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
