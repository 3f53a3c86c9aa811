//! Process-wide configuration, loaded once and passed explicitly.
//!
//! Precedence (lowest to highest): defaults → TOML file → environment.
//! Default file: `<config_dir>/natal-relay/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::chart::StorageLayout;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("API credentials missing: set OPENAI_API_KEY or [llm].api_key")]
    MissingApiKey,
    #[error("no chart engine configured: set NATAL_CHART_COMMAND or [chart].command")]
    MissingChartCommand,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub geo: GeoConfig,
    pub chart: ChartConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-3.5-turbo".into(),
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub nominatim_url: String,
    pub timezone_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub offline: bool,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            nominatim_url: "https://nominatim.openstreetmap.org/search".into(),
            timezone_url: "https://www.timeapi.io/api/timezone/coordinate".into(),
            user_agent: concat!("natal-relay/", env!("CARGO_PKG_VERSION")).into(),
            timeout_secs: 5,
            offline: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Program plus leading arguments, e.g. `["python3", "chart_engine.py"]`.
    pub command: Vec<String>,
    pub artifact_dir: PathBuf,
    pub layout: StorageLayout,
    pub theme: String,
    pub extension: String,
    pub timeout_secs: u64,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            artifact_dir: std::env::temp_dir().join("natal-relay"),
            layout: StorageLayout::Isolated,
            theme: "dark".into(),
            extension: "svg".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub persona: Option<String>,
}

impl Config {
    /// Load from `path` (or the default location if it exists) and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("natal-relay").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = non_empty("NATAL_MODEL") {
            self.llm.model = model;
        }
        if let Some(dir) = non_empty("NATAL_ARTIFACT_DIR") {
            self.chart.artifact_dir = PathBuf::from(dir);
        }
        if let Some(cmd) = non_empty("NATAL_CHART_COMMAND") {
            self.chart.command = cmd.split_whitespace().map(String::from).collect();
        }
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.llm
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// The chart program and its leading arguments.
    pub fn chart_command(&self) -> Result<(&str, &[String]), ConfigError> {
        match self.chart.command.split_first() {
            Some((program, args)) => Ok((program.as_str(), args)),
            None => Err(ConfigError::MissingChartCommand),
        }
    }
}

impl LlmConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ChartConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.chart.layout, StorageLayout::Isolated);
        assert_eq!(config.chart.theme, "dark");
        assert!(matches!(config.api_key(), Err(ConfigError::MissingApiKey)));
        assert!(matches!(config.chart_command(), Err(ConfigError::MissingChartCommand)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [llm]
            model = "gpt-4o-mini"

            [chart]
            command = ["python3", "engine.py"]
            layout = "shared"
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.chart.layout, StorageLayout::Shared);
        let (program, args) = config.chart_command().unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args, ["engine.py".to_string()]);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_toml("[llm]\napi_key = \"from-file\"\n").unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "from-env"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
            ("NATAL_CHART_COMMAND", "chart-engine --fast"),
            ("NATAL_MODEL", "  "),
        ]);
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key().unwrap(), "from-env");
        assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
        assert_eq!(config.llm.model, "gpt-3.5-turbo", "blank env values are ignored");
        assert_eq!(config.chart.command, vec!["chart-engine", "--fast"]);
    }

    #[test]
    fn test_from_file_errors_name_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm\nmodel=").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));

        let missing = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let config = Config::from_toml("[llm]\napi_key = \"  \"\n").unwrap();
        assert!(config.api_key().is_err());
    }
}
