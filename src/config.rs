use crate::http_client::HttpTimeouts;
use crate::learning::LearningSettings;
use crate::transport::ProviderKind;
use anyhow::{Context, Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Credentials and endpoint for one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    /// Model used when a request names none.
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            probe_timeout_secs: 5,
        }
    }
}

impl HttpConfig {
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            request: Duration::from_secs(self.request_timeout_secs),
            connect: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend used when a command does not pick one.
    pub provider: ProviderKind,
    pub use_mock: bool,
    pub store_path: Option<PathBuf>,
    pub openai: BackendConfig,
    pub groq: BackendConfig,
    pub ollama: BackendConfig,
    pub http: HttpConfig,
    pub learning: LearningSettings,
}

impl Config {
    /// Load configuration from file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&Self::get_config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// The file's contents alone, or defaults when there is no file.
    pub fn load_file(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Environment variables override the config file. `lookup` is
    /// `std::env::var` outside of tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(model) = var("OPENAI_MODEL") {
            self.openai.model = Some(model);
        }
        if let Some(key) = var("GROQ_API_KEY") {
            self.groq.api_key = Some(key);
        }
        if let Some(model) = var("GROQ_MODEL") {
            self.groq.model = Some(model);
        }
        if let Some(url) = var("OLLAMA_BASE_URL") {
            self.ollama.base_url = Some(url);
        }
        if let Some(model) = var("OLLAMA_MODEL") {
            self.ollama.model = Some(model);
        }
        if let Some(provider) = var("CODESMITH_PROVIDER") {
            match provider.parse() {
                Ok(kind) => self.provider = kind,
                Err(err) => tracing::warn!("Ignoring CODESMITH_PROVIDER: {}", err),
            }
        }
        if let Some(flag) = var("CODESMITH_USE_MOCK") {
            self.use_mock = !matches!(flag.trim(), "0" | "false" | "no");
        }
        if let Some(path) = var("CODESMITH_STORE") {
            self.store_path = Some(PathBuf::from(path));
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    pub fn get_config_dir() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".codesmith"))
    }

    pub fn backend(&self, kind: ProviderKind) -> &BackendConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Groq => &self.groq,
            ProviderKind::Ollama => &self.ollama,
        }
    }

    fn backend_mut(&mut self, kind: ProviderKind) -> &mut BackendConfig {
        match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::Groq => &mut self.groq,
            ProviderKind::Ollama => &mut self.ollama,
        }
    }

    /// Stores a key in memory only; callers persist with [`Config::save`].
    pub fn with_api_key(mut self, kind: ProviderKind, api_key: String) -> Result<Self> {
        if kind == ProviderKind::Ollama {
            return Err(anyhow!("ollama does not use an API key"));
        }
        self.backend_mut(kind).api_key = Some(api_key);
        Ok(self)
    }

    /// Set API key and save config
    pub fn set_api_key(kind: ProviderKind, api_key: String) -> Result<()> {
        Self::set_api_key_in(&Self::get_config_path()?, kind, api_key)?;
        Ok(())
    }

    /// Rewrites the file at `path` with one key changed. Environment
    /// overrides are never read here, so they never reach the file.
    pub fn set_api_key_in(path: &Path, kind: ProviderKind, api_key: String) -> Result<Self> {
        let config = Self::load_file(path)?.with_api_key(kind, api_key)?;
        config.save_to(path)?;
        info!("{} API key saved to config file", kind);
        Ok(config)
    }

    pub fn is_mock_mode(&self) -> bool {
        self.use_mock
    }

    /// Where feedback and patterns are kept.
    pub fn resolved_store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::get_config_dir()?.join("store.json")),
        }
    }

    pub fn show_config_info() -> Result<()> {
        let config_path = Self::get_config_path()?;
        println!("Configuration file: {}", config_path.display());

        let config = Self::load()?;
        if config_path.exists() {
            println!("Status: Found");
        } else {
            println!("Status: Not found (using defaults)");
        }

        println!("Default provider: {}", config.provider);
        for kind in [ProviderKind::OpenAi, ProviderKind::Groq] {
            let backend = config.backend(kind);
            println!(
                "{} API key: {}",
                kind,
                if backend.api_key.is_some() { "Set" } else { "Not set" }
            );
        }
        println!(
            "ollama URL: {}",
            config
                .ollama
                .base_url
                .as_deref()
                .unwrap_or(crate::ollama::OLLAMA_BASE_URL)
        );
        println!("Mock mode: {}", config.use_mock);
        println!("Store: {}", config.resolved_store_path()?.display());

        println!("\nTo set an API key:");
        println!("  codesmith config --set-api-key <openai|groq> <your-key>");
        println!("\nOr set environment variables:");
        println!("  export OPENAI_API_KEY=<your-key>");
        println!("  export GROQ_API_KEY=<your-key>");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert!(!config.use_mock);
        assert_eq!(config.http.request_timeout_secs, 120);
        assert_eq!(config.http.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.learning, LearningSettings::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
provider = "groq"

[groq]
api_key = "gsk-test"

[learning]
success_threshold = 5
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.provider, ProviderKind::Groq);
        assert_eq!(config.groq.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(config.learning.success_threshold, 5);
        assert_eq!(config.learning.failure_threshold, 2);
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provider = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let mut config = Config::default();
        config.openai.model = Some("gpt-4".into());

        config.apply_env(env(&[
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("OLLAMA_BASE_URL", "http://gpu:11434"),
            ("CODESMITH_PROVIDER", "local"),
            ("CODESMITH_USE_MOCK", "1"),
            ("CODESMITH_STORE", "/tmp/store.json"),
            ("GROQ_API_KEY", "  "),
        ]));

        assert_eq!(config.openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.openai.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.ollama.base_url.as_deref(), Some("http://gpu:11434"));
        assert_eq!(config.provider, ProviderKind::Ollama);
        assert!(config.is_mock_mode());
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/store.json")));
        assert!(config.groq.api_key.is_none());
    }

    #[test]
    fn test_bad_provider_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("CODESMITH_PROVIDER", "bard"), ("CODESMITH_USE_MOCK", "false")]));
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert!(!config.use_mock);
    }

    #[test]
    fn test_save_round_trips_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::default()
            .with_api_key(ProviderKind::Groq, "gsk-saved".into())
            .unwrap();

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_set_api_key_keeps_file_values_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
provider = "groq"

[ollama]
base_url = "http://gpu:11434"
"#,
        )
        .unwrap();

        let saved = Config::set_api_key_in(&path, ProviderKind::Groq, "gsk-file".into()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("gsk-file"));
        assert!(!content.contains("use_mock = true"));
        assert!(!content.contains("store_path"));
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.provider, ProviderKind::Groq);
        assert_eq!(loaded.ollama.base_url.as_deref(), Some("http://gpu:11434"));
        assert!(loaded.openai.api_key.is_none());
    }

    #[test]
    fn test_set_api_key_without_file_starts_from_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new").join("config.toml");

        Config::set_api_key_in(&path, ProviderKind::OpenAi, "sk-file".into()).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.openai.api_key.as_deref(), Some("sk-file"));
        assert!(!loaded.use_mock);
        assert!(loaded.store_path.is_none());
    }

    #[test]
    fn test_ollama_has_no_api_key() {
        let err = Config::default()
            .with_api_key(ProviderKind::Ollama, "x".into())
            .unwrap_err();
        assert!(err.to_string().contains("does not use an API key"));
    }

    #[test]
    fn test_explicit_store_path_wins() {
        let config = Config {
            store_path: Some(PathBuf::from("/data/codesmith.json")),
            ..Config::default()
        };
        assert_eq!(
            config.resolved_store_path().unwrap(),
            PathBuf::from("/data/codesmith.json")
        );
    }
}
