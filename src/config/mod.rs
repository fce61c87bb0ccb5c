use crate::models::{EngineConfig, RunRequest};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Name of the engine configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "sweeper.yaml";

/// Prefix of environment variables that override the config file
pub const ENV_PREFIX: &str = "SWEEPER";

/// Configuration manager for the engine config file and run requests.
///
/// `sweeper.yaml` is layered under `SWEEPER_*` environment variables, so
/// `SWEEPER_BATCH_SIZE=50` or `SWEEPER_LOGGING__DEBUG=true` override the file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    engine_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager, creating `config_dir` if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            engine_config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the engine configuration.
    ///
    /// # Returns
    /// The file's settings with environment overrides applied; every missing
    /// field (or a missing file) falls back to its default
    pub fn load_engine_config(&self) -> Result<EngineConfig> {
        self.load_engine_config_from(Environment::with_prefix(ENV_PREFIX))
    }

    fn load_engine_config_from(&self, environment: Environment) -> Result<EngineConfig> {
        if !self.engine_config_path.exists() {
            tracing::warn!(
                "Engine config not found at {}, using defaults",
                self.engine_config_path
            );
        }

        let settings = Config::builder()
            .add_source(
                File::from(self.engine_config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read engine config: {}", self.engine_config_path))?;

        let config: EngineConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse engine config: {}", self.engine_config_path))?;

        tracing::info!("Loaded engine config from {}", self.engine_config_path);
        Ok(config)
    }

    /// Save the engine configuration file.
    pub fn save_engine_config(&self, config: &EngineConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize engine config to YAML")?;

        fs::write(&self.engine_config_path, yaml_string)
            .with_context(|| format!("Failed to write engine config: {}", self.engine_config_path))?;

        tracing::info!("Saved engine config to {}", self.engine_config_path);
        Ok(())
    }

    /// Read a YAML run request (categories, options and optional file groups).
    pub fn load_request(&self, path: &Utf8Path) -> Result<RunRequest> {
        let file_contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run request: {}", path))?;

        let request: RunRequest = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse run request: {}", path))?;

        tracing::debug!(
            "Loaded run request from {}: {} categories, {} file groups",
            path,
            request.categories.len(),
            request.files.len()
        );
        Ok(request)
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn engine_config_path(&self) -> &Utf8Path {
        &self.engine_config_path
    }
}
