use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StateError};
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("stately.toml.example");

/// Environment the runtime is running in
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeEnv {
    #[default]
    Development,
    Test,
    Production,
}

impl RuntimeEnv {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(RuntimeEnv::Development),
            "test" => Some(RuntimeEnv::Test),
            "production" | "prod" => Some(RuntimeEnv::Production),
            _ => None,
        }
    }
}

/// Devtools mirroring settings
#[derive(Debug, Clone)]
pub struct DevtoolsConfig {
    /// Connect to an inspector when one is reachable
    pub enabled: bool,
    /// Instance name shown by the inspector
    pub instance_name: String,
    /// Attach the caller's source location to action events
    pub capture_call_sites: bool,
    /// Append dispatched events to this JSONL file
    pub tape_path: Option<PathBuf>,
}

impl Default for DevtoolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_name: "stately".to_string(),
            capture_call_sites: true,
            tape_path: None,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub env: RuntimeEnv,
    pub devtools: DevtoolsConfig,
    /// Prefix for generated module names (`<ANON#1>`)
    pub anonymous_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: RuntimeEnv::default(),
            devtools: DevtoolsConfig::default(),
            anonymous_prefix: "ANON".to_string(),
        }
    }
}

/// TOML representation of devtools configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlDevtoolsConfig {
    pub enabled: Option<bool>,
    pub instance_name: Option<String>,
    pub capture_call_sites: Option<bool>,
    pub tape_path: Option<PathBuf>,
}

/// TOML config file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub env: Option<RuntimeEnv>,
    pub anonymous_prefix: Option<String>,
    pub devtools: Option<TomlDevtoolsConfig>,
}

impl Config {
    /// Load from the default config path, creating the example file on first run.
    /// Falls back to defaults when the file cannot be read or parsed.
    pub fn load() -> Self {
        let config_file = config_path();

        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %config_file.display(),
                    error = %e,
                    "Failed to load config; using defaults"
                );
                Config::default()
            }
        }
    }

    /// Overlay the TOML file at `path` onto the defaults. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        if !path.exists() {
            return Ok(config);
        }

        let contents = fs::read_to_string(path)?;
        let toml_config: TomlConfig = toml::from_str(&contents)
            .map_err(|e| StateError::Config(format!("{}: {e}", path.display())))?;
        config.merge(toml_config);
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(env) = toml_config.env {
            self.env = env;
        }
        if let Some(prefix) = toml_config.anonymous_prefix {
            self.anonymous_prefix = prefix;
        }
        if let Some(devtools) = toml_config.devtools {
            if let Some(enabled) = devtools.enabled {
                self.devtools.enabled = enabled;
            }
            if let Some(instance_name) = devtools.instance_name {
                self.devtools.instance_name = instance_name;
            }
            if let Some(capture_call_sites) = devtools.capture_call_sites {
                self.devtools.capture_call_sites = capture_call_sites;
            }
            if devtools.tape_path.is_some() {
                self.devtools.tape_path = devtools.tape_path;
            }
        }
    }

    /// Apply `STATELY_ENV` and `STATELY_DEVTOOLS` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("STATELY_ENV") {
            match RuntimeEnv::parse(&value) {
                Some(env) => self.env = env,
                None => tracing::warn!(value = %value, "Ignoring unknown STATELY_ENV"),
            }
        }
        if let Some(value) = lookup("STATELY_DEVTOOLS") {
            let value = value.trim().to_ascii_lowercase();
            self.devtools.enabled = !matches!(value.as_str(), "0" | "false" | "off" | "no");
        }
        self
    }

    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create config directory");
                return;
            }
        }
        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write example config");
        }
    }

    pub fn with_env(mut self, env: RuntimeEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_tape_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.devtools.tape_path = Some(path.into());
        self
    }
}
