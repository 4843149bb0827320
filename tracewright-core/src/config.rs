use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TracewrightConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub editor: EditorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Remote examples / execution / tools service.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.tracewright/saved_conversations.json".to_string(),
        }
    }
}

impl StoreConfig {
    /// Store path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EditorConfig {
    /// Tool name given to newly added tool_call chunks.
    pub default_tool_name: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            default_tool_name: "python_interpreter".to_string(),
        }
    }
}

impl TracewrightConfig {
    /// Load from an optional TOML file, then `TRACEWRIGHT__SECTION__KEY`
    /// environment overrides. A missing file means defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("TRACEWRIGHT").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = TracewrightConfig::load("/nonexistent/tracewright-test-config").unwrap();
        assert_eq!(config.backend.max_retries, 3);
        assert_eq!(config.editor.default_tool_name, "python_interpreter");
    }

    #[test]
    fn test_partial_file_overrides_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[backend]\nbase_url = \"http://example.test\"\ntimeout_seconds = 5\nmax_retries = 1\nretry_delay_ms = 10\n\n[store]\npath = \"~/saved.json\""
        )
        .unwrap();

        let config = TracewrightConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.backend.base_url, "http://example.test");
        assert_eq!(config.backend.timeout_seconds, 5);
        assert_eq!(config.service.log_level, "info");
        assert!(config.store.resolved_path().ends_with("saved.json"));
    }
}
