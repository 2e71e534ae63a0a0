use anyhow::bail;
use minerva::{AdapterRegistry, ConnectionConfig, ConnectionStore, ProviderKind};
use serde_json::json;

pub fn print_providers(as_json: bool) -> anyhow::Result<()> {
    if as_json {
        let schemas: Vec<_> = ProviderKind::ALL
            .iter()
            .map(|kind| {
                json!({
                    "connection": kind.adapter_schema(),
                    "parameters": kind.generation_parameters_schema(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        return Ok(());
    }

    for kind in ProviderKind::ALL {
        println!("{:<10} {}", kind.id(), kind.label());
        for field in kind.adapter_schema().fields {
            let marker = if field.required { "*" } else { " " };
            println!("  {}{:<10} {}", marker, field.name, field.label);
        }
        let params: Vec<&str> = kind
            .generation_parameters_schema()
            .iter()
            .map(|p| p.name)
            .collect();
        println!("  parameters: {}", params.join(", "));
    }
    Ok(())
}

pub fn print_connections(store: &ConnectionStore) -> anyhow::Result<()> {
    let file = store.load()?;
    if file.connections.is_empty() {
        println!("No connections in {}", store.path().display());
        return Ok(());
    }
    for (name, config) in &file.connections {
        let marker = if file.default.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        let key = if config.api_key().is_some() { "key set" } else { "no key" };
        println!(
            "{} {:<16} {:<9} {} [{}] {}",
            marker,
            name,
            config.provider,
            if config.url.is_empty() { "-" } else { config.url.as_str() },
            key,
            config.model.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

pub fn add_connection(
    store: &ConnectionStore,
    name: &str,
    config: ConnectionConfig,
    make_default: bool,
) -> anyhow::Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Connection name must not be empty");
    }
    if !AdapterRegistry::builtin().contains(&config.provider) {
        bail!("Unknown provider: {}", config.provider);
    }
    // Fail early on settings the adapter would reject.
    minerva::create_adapter(minerva::config::with_env_api_key(config.clone()))?;

    store.update(|file| {
        file.upsert(name, config);
        if make_default {
            file.default = Some(name.to_string());
        }
        Ok(())
    })?;
    tracing::info!(connection = name, path = %store.path().display(), "connection saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_connection_validates_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConnectionStore::new(dir.path().join("connections.json"));

        let bad = ConnectionConfig::new("claude", "");
        assert!(add_connection(&store, "x", bad, false).is_err());
        let no_url = ConnectionConfig::new("v1", "");
        assert!(add_connection(&store, "x", no_url, false).is_err());

        let local = ConnectionConfig::new("v1", "http://localhost:8080/v1");
        add_connection(&store, "local", local, false).unwrap();
        let other = ConnectionConfig::new("v1", "http://localhost:9090/v1");
        add_connection(&store, "other", other, true).unwrap();

        let file = store.load().unwrap();
        assert_eq!(file.connections.len(), 2);
        assert_eq!(file.default.as_deref(), Some("other"));
    }
}
