use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

use crate::core::settings::StorySettings;

const CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub settings: StorySettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5001".to_string()
}
fn default_retry_count() -> usize {
    2
}
fn default_retry_delay() -> u64 {
    2
}
fn default_request_timeout() -> u64 {
    300
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_PATH);
        if !path.exists() {
            log::info!("{} not found, writing defaults", CONFIG_PATH);
            let config = Config::default();
            config.save()?;
            return Ok(config);
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Url::parse(&config.backend.base_url)
            .with_context(|| format!("Invalid backend.base_url: {}", config.backend.base_url))?;
        config.settings = config.settings.normalized();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(CONFIG_PATH))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
