//! Configuration module for CloudPuff
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - User configuration (~/.config/cloudpuff/config.toml, ~/.cloudpuff.toml)
//! - Project configuration (./cloudpuff.toml)
//! - Environment variables
//! - Command-line arguments

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AWS settings
    pub aws: AwsConfig,

    /// Stack launch settings
    pub stacks: StacksConfig,

    /// AMI creation settings
    pub amis: AmisConfig,

    /// Colors and output settings
    pub output: OutputConfig,
}

/// AWS settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region used when --region is not given
    pub region: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// Stack launch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StacksConfig {
    /// Stack creation timeout, in minutes
    pub timeout_mins: u64,

    /// Delay between polls for stack events, in seconds
    pub poll_interval_secs: u64,

    /// Roll back stacks that fail to launch
    pub rollback: bool,
}

impl Default for StacksConfig {
    fn default() -> Self {
        Self {
            timeout_mins: 30,
            poll_interval_secs: 2,
            rollback: true,
        }
    }
}

/// AMI creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmisConfig {
    /// Delay between checks of pending AMIs, in seconds
    pub poll_interval_secs: u64,
}

impl Default for AmisConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
        }
    }
}

/// Colors and output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Enable colored output
    pub color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { color: true }
    }
}

/// The contents of one configuration file, keeping track of which keys
/// it sets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    aws: AwsFile,
    stacks: StacksFile,
    amis: AmisFile,
    output: OutputFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AwsFile {
    region: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StacksFile {
    timeout_mins: Option<u64>,
    poll_interval_secs: Option<u64>,
    rollback: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AmisFile {
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OutputFile {
    color: Option<bool>,
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Get the list of configuration file paths to check, lowest
    /// precedence first
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        // An explicit path replaces every other location
        if let Some(path) = explicit_path {
            return vec![path.to_path_buf()];
        }

        if let Ok(env_config) = std::env::var("CLOUDPUFF_CONFIG") {
            return vec![PathBuf::from(env_config)];
        }

        let mut paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cloudpuff").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".cloudpuff.toml"));
        }

        paths.push(PathBuf::from("cloudpuff.toml"));

        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: ConfigFile = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };

        self.merge(file_config);
        Ok(())
    }

    /// Merge a config file into this one. Only keys set in the file
    /// replace the current values.
    fn merge(&mut self, other: ConfigFile) {
        fn set<T>(current: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *current = value;
            }
        }

        set(&mut self.aws.region, other.aws.region);
        set(&mut self.stacks.timeout_mins, other.stacks.timeout_mins);
        set(&mut self.stacks.poll_interval_secs, other.stacks.poll_interval_secs);
        set(&mut self.stacks.rollback, other.stacks.rollback);
        set(&mut self.amis.poll_interval_secs, other.amis.poll_interval_secs);
        set(&mut self.output.color, other.output.color);
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // CLOUDPUFF_REGION
        if let Ok(region) = std::env::var("CLOUDPUFF_REGION") {
            if !region.is_empty() {
                self.aws.region = region;
            }
        }

        // CLOUDPUFF_TIMEOUT_MINS
        if let Ok(timeout) = std::env::var("CLOUDPUFF_TIMEOUT_MINS") {
            if let Ok(n) = timeout.parse() {
                self.stacks.timeout_mins = n;
            }
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() || std::env::var("CLOUDPUFF_NO_COLOR").is_ok() {
            self.output.color = false;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.aws.region.trim().is_empty() {
            return Err(Error::InvalidConfig {
                key: "aws.region".into(),
                message: "must not be empty".into(),
            });
        }

        if self.stacks.timeout_mins == 0 {
            return Err(Error::InvalidConfig {
                key: "stacks.timeout_mins".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(())
    }

    /// Delay between polls of a stack being launched
    pub fn stack_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stacks.poll_interval_secs.max(1))
    }

    /// Delay between checks of pending AMIs
    pub fn ami_poll_interval(&self) -> Duration {
        Duration::from_secs(self.amis.poll_interval_secs.max(1))
    }
}
