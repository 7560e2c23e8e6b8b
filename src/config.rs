//! Configuration types and credential resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default project/channel slug.
pub const DEFAULT_PROJECT: &str = "claude-colab";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default poll interval: 5 minutes.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Environment variable holding the default API key.
pub const API_KEY_ENV: &str = "COLAB_API_KEY";

/// Runtime configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct ColabConfig {
    /// Backend base URL (`https://<project>.supabase.co` style).
    pub url: Option<String>,
    /// Project-level service key sent with every request.
    pub anon_key: SecretString,
    /// Identity used when no API key is validated.
    pub author: String,
    /// Project slug used until an assignment is loaded.
    pub project: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Stop polling after this many cycles.
    pub max_iterations: Option<u64>,
    /// Knowledge snapshot file.
    pub cache_path: PathBuf,
    /// Persisted credential file.
    pub config_path: PathBuf,
}

impl Default for ColabConfig {
    fn default() -> Self {
        let home = state_dir();
        Self {
            url: None,
            anon_key: SecretString::from(String::new()),
            author: "R".to_string(),
            project: DEFAULT_PROJECT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_iterations: None,
            cache_path: home.join("knowledge_cache.json"),
            config_path: home.join("config.json"),
        }
    }
}

impl ColabConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let url = std::env::var("COLAB_URL")
            .ok()
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let anon_key = std::env::var("COLAB_ANON_KEY")
            .map(SecretString::from)
            .unwrap_or(defaults.anon_key);

        let author = std::env::var("COLAB_AUTHOR").unwrap_or(defaults.author);
        let project = std::env::var("COLAB_PROJECT").unwrap_or(defaults.project);

        let request_timeout = parse_env::<u64>("COLAB_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let poll_interval = parse_env::<u64>("COLAB_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let max_iterations = parse_env::<u64>("COLAB_MAX_ITERATIONS")?;

        let cache_path = std::env::var("COLAB_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_path);
        let config_path = std::env::var("COLAB_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_path);

        Ok(Self {
            url,
            anon_key,
            author,
            project,
            request_timeout,
            poll_interval,
            max_iterations,
            cache_path,
            config_path,
        })
    }

    /// Backend URL, or an error naming the variable to set.
    pub fn require_url(&self) -> Result<&str, ConfigError> {
        self.url.as_deref().ok_or_else(|| ConfigError::MissingRequired {
            key: "COLAB_URL".to_string(),
            hint: "Set it to the backend base URL.".to_string(),
        })
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        _ => Ok(None),
    }
}

fn state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".agent-colab")
}

/// On-disk credential file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

/// Resolve an API key.
///
/// Order: explicit argument, `COLAB_API_KEY_<NAME>` (when `name` is given),
/// `COLAB_API_KEY`, then the config file. `None` means "not connected",
/// not a fault.
pub fn resolve_api_key(
    explicit: Option<&str>,
    name: Option<&str>,
    config_path: &Path,
) -> Option<SecretString> {
    if let Some(key) = explicit.filter(|k| !k.is_empty()) {
        return Some(SecretString::from(key.to_string()));
    }

    if let Some(name) = name {
        let var = format!("{API_KEY_ENV}_{}", name.to_uppercase());
        if let Ok(key) = std::env::var(&var)
            && !key.is_empty()
        {
            return Some(SecretString::from(key));
        }
    }

    if let Ok(key) = std::env::var(API_KEY_ENV)
        && !key.is_empty()
    {
        return Some(SecretString::from(key));
    }

    read_key_file(config_path)
}

fn read_key_file(path: &Path) -> Option<SecretString> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<CredentialFile>(&raw) {
        Ok(file) => file.api_key.filter(|k| !k.is_empty()).map(SecretString::from),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Ignoring unreadable credential file"
            );
            None
        }
    }
}

/// Persist an API key for later runs.
pub fn save_api_key(path: &Path, key: &SecretString) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = CredentialFile {
        api_key: Some(key.expose_secret().to_string()),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    std::fs::write(path, json)?;
    tracing::info!(path = %path.display(), "API key saved");
    Ok(())
}
