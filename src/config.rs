//! Agent configuration loaded via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::disk::{DEFAULT_BASE_DIR, DEFAULT_RUNTIME_GROUP, DirectoryLayout};
use crate::network::AnnouncementTiming;

/// Host preparation settings merged from defaults, `hostprep.toml` and
/// `HOSTPREP_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTPREP",
    discovery(
        app_name = "hostprep",
        env_var = "HOSTPREP_CONFIG_PATH",
        config_file_name = "hostprep.toml",
        dotfile_name = ".hostprep.toml",
        project_file_name = "hostprep.toml"
    )
)]
pub struct AgentConfig {
    /// Root of the agent's runtime directories.
    #[ortho_config(default = DEFAULT_BASE_DIR.to_owned())]
    pub base_dir: String,
    /// Group that owns runtime directories and `/tmp`.
    #[ortho_config(default = DEFAULT_RUNTIME_GROUP.to_owned())]
    pub runtime_group: String,
    /// Delay before each gratuitous ARP round, in milliseconds.
    #[ortho_config(default = 1000)]
    pub arp_announce_interval_ms: u64,
    /// Settle time after a network restart before announcing, in
    /// milliseconds.
    #[ortho_config(default = 500)]
    pub network_operation_delay_ms: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to hostprep.toml",
            self.env_var, self.toml_key
        )
    }
}

impl AgentConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hostprep")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that fix the problem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank strings and
    /// [`ConfigError::Invalid`] for a zero announcement interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.base_dir,
            &FieldMetadata::new("base directory", "HOSTPREP_BASE_DIR", "base_dir"),
        )?;
        Self::require_field(
            &self.runtime_group,
            &FieldMetadata::new("runtime group", "HOSTPREP_RUNTIME_GROUP", "runtime_group"),
        )?;
        if self.arp_announce_interval_ms == 0 {
            let metadata = FieldMetadata::new(
                "ARP announce interval",
                "HOSTPREP_ARP_ANNOUNCE_INTERVAL_MS",
                "arp_announce_interval_ms",
            );
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Directory layout derived from `base_dir` and `runtime_group`.
    #[must_use]
    pub fn layout(&self) -> DirectoryLayout {
        DirectoryLayout::new(self.base_dir.trim(), self.runtime_group.trim())
    }

    /// Gratuitous ARP timing derived from the millisecond settings.
    #[must_use]
    pub const fn announcement_timing(&self) -> AnnouncementTiming {
        AnnouncementTiming {
            settle_delay: Duration::from_millis(self.network_operation_delay_ms),
            interval: Duration::from_millis(self.arp_announce_interval_ms),
        }
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_dir: DEFAULT_BASE_DIR.to_owned(),
            runtime_group: DEFAULT_RUNTIME_GROUP.to_owned(),
            arp_announce_interval_ms: 1000,
            network_operation_delay_ms: 500,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
