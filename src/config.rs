//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub credential: CredentialConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// JSON state file read by the local manager
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Interval between recovery queue refreshes when watching
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-fetch timeout, 0 disables it
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_millis(self.fetch_timeout_ms))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialConfig {
    /// How long to wait for the mnemonic, 0 waits forever
    #[serde(default)]
    pub timeout_secs: u64,
}

impl CredentialConfig {
    pub fn timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigningConfig {
    /// Auto-cancel a signing request left unanswered, 0 waits forever
    #[serde(default)]
    pub approval_timeout_secs: u64,
}

impl SigningConfig {
    pub fn approval_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_secs(self.approval_timeout_secs))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

fn default_state_path() -> String {
    "manager_state.json".to_string()
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("manager.state_path", default_state_path())?
            .set_default("queue.poll_interval_secs", default_poll_interval_secs() as i64)?
            .set_default("queue.fetch_timeout_ms", default_fetch_timeout_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix RECOVERY_)
            .add_source(
                config::Environment::with_prefix("RECOVERY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.manager.state_path.trim().is_empty() {
            anyhow::bail!("manager.state_path must not be empty");
        }

        if self.queue.poll_interval_secs == 0 {
            anyhow::bail!("queue.poll_interval_secs must be positive");
        }

        if self.credential.timeout().is_none() {
            tracing::debug!("No credential timeout configured - requests wait indefinitely");
        }

        Ok(())
    }

    /// Configuration for display
    pub fn display(&self) -> String {
        format!(
            r#"Configuration:
  Manager:
    state_path: {}
  Queue:
    poll_interval: {}s
    fetch_timeout: {}
  Credential:
    timeout: {}
  Signing:
    approval_timeout: {}
  Logging:
    json: {}
"#,
            self.manager.state_path,
            self.queue.poll_interval_secs,
            describe_timeout(self.queue.fetch_timeout()),
            describe_timeout(self.credential.timeout()),
            describe_timeout(self.signing.approval_timeout()),
            self.logging.json,
        )
    }
}

fn describe_timeout(timeout: Option<Duration>) -> String {
    match timeout {
        Some(d) => format!("{}ms", d.as_millis()),
        None => "none".to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            queue: QueueConfig::default(),
            credential: CredentialConfig::default(),
            signing: SigningConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
