use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default configuration file, read from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "dcurate.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub agreement: AgreementConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reads `path` when given. Otherwise reads [`DEFAULT_CONFIG_FILE`] if it
    /// exists and falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_session_share: f64,
    pub max_session_share: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_session_share: 0.10,
            max_session_share: 0.70,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgreementConfig {
    /// Lower bounds of slight, fair, moderate, substantial, almost perfect.
    pub bands: Vec<f64>,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            bands: vec![0.0, 0.2, 0.4, 0.6, 0.8],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub external_share: f64,
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            external_share: 0.3,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            model: None,
            api_key_env: None,
            timeout_ms: 30_000,
            temperature: 0.8,
            max_tokens: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    pub autosave_every: usize,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self { autosave_every: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("labels.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormatConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormatConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormatConfig {
    #[default]
    Pretty,
    Json,
}
