use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{rlog_debug, Error, Result};

pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 10_000;

/// Transport family of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cli,
    Api,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Cli => f.pad("cli"),
            ProviderKind::Api => f.pad("api"),
        }
    }
}

/// One backend provider as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Filled from the table key when loaded through [`Config`].
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default)]
    pub capabilities: Vec<String>,

    // cli
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,

    // api
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Environment variable holding the API key; read once at load time.
    pub api_key_env: Option<String>,

    pub timeout_ms: Option<u64>,
}

impl ProviderConfig {
    /// A subprocess provider running `command` with `args`.
    pub fn cli(name: &str, command: &str, args: &[&str], capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: ProviderKind::Cli,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
            url: None,
            model: None,
            api_key: None,
            api_key_env: None,
            timeout_ms: None,
        }
    }

    /// A chat-completions provider at `url`.
    pub fn api(name: &str, url: &str, model: Option<&str>, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: ProviderKind::Api,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            command: None,
            args: Vec::new(),
            cwd: None,
            url: Some(url.to_string()),
            model: model.map(String::from),
            api_key: None,
            api_key_env: None,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Provider timeout, or `default` when the provider sets none.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capabilities.is_empty() {
            return Err(Error::Validation(format!(
                "provider '{}' declares no capabilities",
                self.name
            )));
        }
        match self.kind {
            ProviderKind::Cli => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(Error::Validation(format!(
                        "cli provider '{}' needs a command",
                        self.name
                    )));
                }
            }
            ProviderKind::Api => {
                if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(Error::Validation(format!(
                        "api provider '{}' needs a url",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Top-level configuration. Provider table order is fallback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    #[serde(default)]
    pub multi_model: bool,
    /// Route transport calls through the bounded task queue.
    #[serde(default = "default_true")]
    pub queue: bool,
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_health_timeout_ms() -> u64 {
    DEFAULT_HEALTH_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            health_timeout_ms: DEFAULT_HEALTH_TIMEOUT_MS,
            multi_model: false,
            queue: true,
            providers: IndexMap::new(),
        }
    }
}

impl Config {
    pub fn relay_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".relay"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::relay_dir()?.join("relay.toml"))
    }

    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            rlog_debug!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        rlog_debug!("Config::load_from path={}", path.display());
        Self::from_toml(&fs::read_to_string(path)?)
    }

    /// Parse, fill provider names, resolve `api_key_env`, and validate.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        for (name, provider) in config.providers.iter_mut() {
            provider.name = name.clone();
            if provider.api_key.is_none() {
                if let Some(var) = &provider.api_key_env {
                    provider.api_key = std::env::var(var).ok();
                    if provider.api_key.is_none() {
                        rlog_debug!("Provider {} api_key_env {} is unset", name, var);
                    }
                }
            }
        }
        config.validate()?;
        rlog_debug!(
            "Config loaded: max_concurrent={}, multi_model={}, providers={:?}",
            config.max_concurrent,
            config.multi_model,
            config.providers.keys().collect::<Vec<_>>()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        for provider in self.providers.values() {
            provider.validate()?;
        }
        Ok(())
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.insert(provider.name.clone(), provider);
        self
    }

    /// Providers in configured order.
    pub fn provider_list(&self) -> Vec<ProviderConfig> {
        self.providers.values().cloned().collect()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}
