//! Named connection configurations stored as JSON on disk.

use crate::providers::ProviderKind;
use crate::types::ConnectionConfig;
use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "MINERVA_CONFIG";

/// Environment variable consulted for every provider before the provider's own.
pub const GENERIC_KEY_ENV: &str = "MINERVA_API_KEY";

/// The config file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionsFile {
    /// Connection used when none is named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl ConnectionsFile {
    /// Look up `name`, or the default connection when `name` is `None`.
    ///
    /// Without an explicit default, a file holding a single connection uses it.
    pub fn get(&self, name: Option<&str>) -> anyhow::Result<&ConnectionConfig> {
        let name = match name.or(self.default.as_deref()) {
            Some(n) => n,
            None => {
                let mut all = self.connections.values();
                return match (all.next(), all.next()) {
                    (Some(only), None) => Ok(only),
                    _ => anyhow::bail!(
                        "No connection named and no default set ({} configured)",
                        self.connections.len()
                    ),
                };
            }
        };
        self.connections
            .get(name)
            .with_context(|| format!("Connection not found: {}", name))
    }

    /// Insert or replace `name`. The first connection added becomes the default.
    pub fn upsert(&mut self, name: &str, config: ConnectionConfig) {
        self.connections.insert(name.to_string(), config);
        if self.default.is_none() {
            self.default = Some(name.to_string());
        }
    }
}

/// Reads and writes the connections file with atomic replacement.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    path: PathBuf,
}

impl ConnectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$MINERVA_CONFIG`, else `~/.minerva/connections.json`.
    pub fn default_path() -> Self {
        if let Some(p) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return Self::new(p);
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".minerva").join("connections.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file; a missing file is an empty configuration.
    pub fn load(&self) -> anyhow::Result<ConnectionsFile> {
        if !self.path.exists() {
            return Ok(ConnectionsFile::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let file: ConnectionsFile = serde_json::from_str(&content)
            .with_context(|| format!("Invalid connections file {}", self.path.display()))?;
        Ok(file)
    }

    /// Write to a temp file in the same directory, then rename over the target.
    pub fn save(&self, file: &ConnectionsFile) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
            }
        }

        let json = serde_json::to_string_pretty(file)?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }

        // Keys live in this file.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600));
        }

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Load, apply `f`, and save, holding an exclusive lock on a sidecar file
    /// so concurrent writers don't drop each other's changes.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut ConnectionsFile) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        self.with_exclusive_lock(|| {
            let mut file = self.load()?;
            let out = f(&mut file)?;
            self.save(&file)?;
            Ok(out)
        })
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn with_exclusive_lock<T>(&self, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = self.lock_path();
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock {}", lock_path.display()))?;

        lock_file.lock_exclusive()?;
        let out = f();
        let _ = lock_file.unlock();
        out
    }

    /// Load, fill in a missing API key from the environment, and return the connection.
    pub fn resolve(&self, name: Option<&str>) -> anyhow::Result<ConnectionConfig> {
        let file = self.load()?;
        Ok(with_env_api_key(file.get(name)?.clone()))
    }
}

// ---------------------------------------------------------------------------
// Environment variable sniffing
// ---------------------------------------------------------------------------

/// Provider-specific env var names, in lookup order.
pub fn provider_env_candidates(provider: &str) -> &'static [&'static str] {
    match provider.parse::<ProviderKind>() {
        Ok(ProviderKind::OpenAiCompatible) => &["OPENAI_API_KEY"],
        Ok(ProviderKind::Gemini) => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        Ok(ProviderKind::DeepSeek) => &["DEEPSEEK_API_KEY"],
        Err(_) => &[],
    }
}

/// First non-empty key found in the environment for `provider`.
pub fn env_api_key(provider: &str) -> Option<String> {
    std::iter::once(GENERIC_KEY_ENV)
        .chain(provider_env_candidates(provider).iter().copied())
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Keep an explicit key; otherwise try the environment.
pub fn with_env_api_key(mut config: ConnectionConfig) -> ConnectionConfig {
    if config.api_key().is_none() {
        if let Some(key) = env_api_key(&config.provider) {
            tracing::debug!(provider = %config.provider, "using API key from environment");
            config.api_key = Some(key);
        }
    }
    config
}
