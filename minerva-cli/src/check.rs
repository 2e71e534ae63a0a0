use minerva::config::with_env_api_key;
use minerva::{ConnectionConfig, ConnectionStore, HealthCheck, create_adapter};
use serde_json::Value;

/// Check one connection. Returns whether it is healthy.
pub async fn run_check(config: ConnectionConfig) -> anyhow::Result<bool> {
    let target = describe(&config);
    let adapter = create_adapter(config)?;

    println!("\n📋 Checking {} ({})...", adapter.kind().label(), target);
    let result = adapter.health_check().await;
    print_result(&result);
    Ok(result.ok)
}

/// Check every saved connection. A broken one does not stop the rest.
pub async fn run_check_all(store: &ConnectionStore) -> anyhow::Result<bool> {
    let file = store.load()?;
    if file.connections.is_empty() {
        println!("No connections configured. Run `minerva add-connection` first.");
        return Ok(true);
    }

    let mut all_ok = true;
    for (name, config) in &file.connections {
        println!("\n[{}]", name);
        match run_check(with_env_api_key(config.clone())).await {
            Ok(ok) => all_ok &= ok,
            Err(e) => {
                println!("  ❌ {}", e);
                all_ok = false;
            }
        }
    }

    println!("\nCheck complete.");
    Ok(all_ok)
}

fn describe(config: &ConnectionConfig) -> String {
    let mut parts = Vec::new();
    if !config.url.is_empty() {
        parts.push(config.url.clone());
    }
    if let Some(model) = &config.model {
        parts.push(model.clone());
    }
    if parts.is_empty() {
        config.provider.clone()
    } else {
        parts.join(", ")
    }
}

fn print_result(result: &HealthCheck) {
    if !result.ok {
        println!("  ❌ {}", result.message);
        return;
    }
    println!("  ✅ {}", result.message);
    match &result.data {
        Some(Value::Array(models)) => {
            for model in models.iter().take(10).filter_map(Value::as_str) {
                println!("     - {}", model);
            }
            if models.len() > 10 {
                println!("     ... and {} more", models.len() - 10);
            }
        }
        Some(Value::Object(obj)) => {
            if let Some(reply) = obj.get("reply").and_then(Value::as_str) {
                println!("     reply: {}", reply);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_prefers_url_and_model() {
        let cfg = ConnectionConfig::new("v1", "http://localhost:1234/v1").with_model("llama");
        assert_eq!(describe(&cfg), "http://localhost:1234/v1, llama");
        assert_eq!(describe(&ConnectionConfig::new("gemini", "")), "gemini");
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error() {
        assert!(run_check(ConnectionConfig::new("nope", "")).await.is_err());
    }
}
