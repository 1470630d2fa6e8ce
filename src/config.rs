//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poll::PollPolicy;

/// Default delay between two status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default time allowed for an instance to become usable after creation.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Default time allowed for each power or resize transition during updates.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Default time allowed for an instance to disappear after deletion.
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Largest interval or timeout accepted from configuration, in seconds.
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 60 * 60;

/// Convergence tuning derived from environment variables and configuration
/// files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ECC",
    discovery(
        app_name = "ecc",
        env_var = "ECC_CONFIG_PATH",
        config_file_name = "ecc.toml",
        dotfile_name = ".ecc.toml",
        project_file_name = "ecc.toml"
    )
)]
pub struct ConvergeConfig {
    /// Seconds between two status checks while waiting.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Seconds allowed for creation, shared by the status and network waits.
    #[ortho_config(default = 1200)]
    pub create_timeout_secs: u64,
    /// Seconds allowed for each wait during an update.
    #[ortho_config(default = 300)]
    pub update_timeout_secs: u64,
    /// Seconds allowed for the instance to disappear after deletion.
    #[ortho_config(default = 120)]
    pub delete_timeout_secs: u64,
    /// Stop polling on the first client (4xx) error instead of retrying until
    /// the deadline.
    #[ortho_config(default = false)]
    pub abort_on_client_error: bool,
}

/// Deadlines applied to each orchestrator operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Creation deadline.
    pub create: Duration,
    /// Deadline for each wait during an update.
    pub update: Duration,
    /// Deletion deadline.
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: DEFAULT_CREATE_TIMEOUT,
            update: DEFAULT_UPDATE_TIMEOUT,
            delete: DEFAULT_DELETE_TIMEOUT,
        }
    }
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
}

impl ConvergeConfig {
    fn require_in_range(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: set {} or {} in ecc.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        if value > MAX_WAIT_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "{} must not exceed {MAX_WAIT_SECS} seconds (got {value}): set {} or {} in ecc.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ecc")]).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key to fix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when an interval or timeout is
    /// zero or exceeds [`MAX_WAIT_SECS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_in_range(
            self.poll_interval_secs,
            &FieldMetadata::new("poll interval", "ECC_POLL_INTERVAL_SECS", "poll_interval_secs"),
        )?;
        Self::require_in_range(
            self.create_timeout_secs,
            &FieldMetadata::new("create timeout", "ECC_CREATE_TIMEOUT_SECS", "create_timeout_secs"),
        )?;
        Self::require_in_range(
            self.update_timeout_secs,
            &FieldMetadata::new("update timeout", "ECC_UPDATE_TIMEOUT_SECS", "update_timeout_secs"),
        )?;
        Self::require_in_range(
            self.delete_timeout_secs,
            &FieldMetadata::new("delete timeout", "ECC_DELETE_TIMEOUT_SECS", "delete_timeout_secs"),
        )?;
        Ok(())
    }

    /// Returns the delay between two status checks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the per-operation deadlines.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        Timeouts {
            create: Duration::from_secs(self.create_timeout_secs),
            update: Duration::from_secs(self.update_timeout_secs),
            delete: Duration::from_secs(self.delete_timeout_secs),
        }
    }

    /// Returns the treatment of client errors while polling.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        if self.abort_on_client_error {
            PollPolicy::AbortOnClientError
        } else {
            PollPolicy::RetryAll
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
