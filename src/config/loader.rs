//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Sources are layered in order, later sources overriding earlier ones:
//!
//! 1. `<config_dir>/tasker.toml` (optional)
//! 2. `<config_dir>/tasker.<environment>.toml` (optional)
//! 3. Environment variables prefixed `TASKER__`, nested with `__`
//!    (`TASKER__CIRCUIT_BREAKER__FAILURE_THRESHOLD=3`)

use super::error::{ConfigResult, ConfigurationError};
use super::TaskerConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "TASKER";
const BASE_FILE_NAME: &str = "tasker.toml";

/// Loaded, validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: TaskerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build_config(&config_directory, environment, ENV_PREFIX)?;
        config.validate()?;

        info!(
            environment = environment,
            service_name = %config.service_name,
            worker_concurrency = config.worker.concurrency,
            circuit_breakers_enabled = config.circuit_breaker.enabled,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: TaskerConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &TaskerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Layer file and environment sources and deserialize the result
    pub(crate) fn build_config(
        config_directory: &Path,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<TaskerConfig> {
        let base_path = config_directory.join(BASE_FILE_NAME);
        let overlay_path = config_directory.join(format!("tasker.{environment}.toml"));

        let settings = Config::builder()
            .add_source(
                File::from(base_path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(overlay_path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(config_directory.display().to_string(), e)
            })?;

        settings
            .try_deserialize::<TaskerConfig>()
            .map_err(|e| ConfigurationError::environment_config_error(environment, e))
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("TASKER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// `TASKER_CONFIG_DIR` when set, otherwise `./config`
    fn default_config_directory() -> PathBuf {
        env::var("TASKER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_config_toml() -> &'static str {
        r#"
service_name = "billing"

[task_defaults]
max_retries = 5
base_delay = 0.5
max_delay = 30
jitter = false

[circuit_breaker]
failure_threshold = 3
recovery_timeout = 10

[circuit_breaker.component_configs.charge_card]
failure_threshold = 2
recovery_timeout = 1.5

[worker]
concurrency = 8
"#
    }

    fn setup_test_config_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("tasker.toml"), create_test_config_toml()).unwrap();
        temp_dir
    }

    #[test]
    fn test_basic_config_loading() {
        let temp_dir = setup_test_config_dir();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(temp_dir.path().to_path_buf()), "test")
                .unwrap();
        let config = manager.config();

        assert_eq!(manager.environment(), "test");
        assert_eq!(config.service_name, "billing");
        assert_eq!(config.task_defaults.max_retries, 5);
        assert_eq!(config.task_defaults.base_delay, Duration::from_millis(500));
        assert!(!config.task_defaults.jitter);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(
            config
                .circuit_breaker
                .config_for_component("charge_card")
                .recovery_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(config.worker.concurrency, 8);
        // Untouched sections keep their defaults
        assert_eq!(config.cache.result_ttl_seconds, 3600);
    }

    #[test]
    fn test_environment_specific_overrides() {
        let temp_dir = setup_test_config_dir();
        fs::write(
            temp_dir.path().join("tasker.production.toml"),
            "[worker]\nconcurrency = 32\n",
        )
        .unwrap();

        let config =
            ConfigManager::build_config(temp_dir.path(), "production", "TASKERTESTOVERLAY")
                .unwrap();
        assert_eq!(config.worker.concurrency, 32);
        assert_eq!(config.service_name, "billing");
    }

    #[test]
    fn test_environment_variable_overrides() {
        let temp_dir = setup_test_config_dir();
        env::set_var("TASKERTESTENV__CIRCUIT_BREAKER__FAILURE_THRESHOLD", "7");

        let config =
            ConfigManager::build_config(temp_dir.path(), "test", "TASKERTESTENV").unwrap();
        env::remove_var("TASKERTESTENV__CIRCUIT_BREAKER__FAILURE_THRESHOLD");

        assert_eq!(config.circuit_breaker.failure_threshold, 7);
    }

    #[test]
    fn test_missing_directory_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            ConfigManager::build_config(&temp_dir.path().join("absent"), "test", "TASKERTESTNONE")
                .unwrap();

        assert_eq!(config.service_name, "tasker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("tasker.toml"),
            "[worker]\nconcurrency = 0\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(temp_dir.path().to_path_buf()), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }
}
