use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{GenerationParams, MAX_CONTEXT_LENGTH, MIN_MODEL_SIZE_MB};

const CONFIG_DIR: &str = ".dream-assistant";
const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    pub model: ModelConfig,
    pub generation: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub n_ctx: u32,
    pub n_threads: i32,
    pub n_threads_batch: i32,
    /// CPU only on phones
    pub n_gpu_layers: u32,
    pub min_model_size_mb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            n_ctx: MAX_CONTEXT_LENGTH,
            n_threads: 4,
            n_threads_batch: 2,
            n_gpu_layers: 0,
            min_model_size_mb: MIN_MODEL_SIZE_MB,
            sha256: None,
        }
    }
}

impl ModelConfig {
    pub fn min_model_size_bytes(&self) -> u64 {
        self.min_model_size_mb * 1024 * 1024
    }
}

impl AssistantConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: AssistantConfig =
            toml::from_str(&config_str).with_context(|| "Failed to parse config file")?;

        config
            .generation
            .validate()
            .with_context(|| format!("Invalid [generation] section in {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Explicit path wins, then the per-user file, then built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(default_path) if default_path.exists() => {
                info!("Using config file {:?}", default_path);
                Self::from_file(default_path)
            }
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.exists() {
                fs::create_dir_all(config_dir)?;
            }
        }

        let text = toml::to_string(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_uses_defaults() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[model]\npath = \"/sdcard/models/sister.gguf\"\n\n[generation]\ntemperature = 0.5\n",
        )?;

        let config = AssistantConfig::from_file(&config_path)?;
        assert_eq!(config.model.path.as_deref(), Some("/sdcard/models/sister.gguf"));
        assert_eq!(config.model.n_ctx, 2048);
        assert_eq!(config.model.n_threads, 4);
        assert_eq!(config.generation.temperature, 0.5);
        assert_eq!(config.generation.top_k, 40);
        Ok(())
    }

    #[test]
    fn test_invalid_generation_section_rejected() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[generation]\ntop_k = 500\n")?;

        let err = AssistantConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Invalid [generation]"));
        Ok(())
    }

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = AssistantConfig::default();
        config.model.n_gpu_layers = 8;
        config.model.sha256 = Some("abc123".to_string());
        config.save_to_file(&config_path)?;

        let loaded = AssistantConfig::load_or_default(Some(&config_path))?;
        assert_eq!(config, loaded);
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = AssistantConfig::load_or_default(Some(Path::new("/nonexistent/dream.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_min_model_size_bytes() {
        let config = ModelConfig::default();
        assert_eq!(config.min_model_size_bytes(), 50 * 1024 * 1024);
    }
}
