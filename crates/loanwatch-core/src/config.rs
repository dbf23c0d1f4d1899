//! Configuration types for the loanwatch system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main loanwatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoanwatchConfig {
    /// Library service configuration (credential source)
    pub service: ServiceConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl LoanwatchConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.service.validate()?;
        self.state_store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Library service configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceConfig {
    /// bibliotheek.be portal
    Bibliotheek {
        /// Login e-mail or username
        username: String,
        /// Password (never logged)
        password: String,
        /// Portal base URL override
        #[serde(default)]
        base_url: Option<String>,
        /// Identity provider base URL override; follows `base_url` when unset
        #[serde(default)]
        auth_base_url: Option<String>,
        /// Fetch renewal forms but do not submit them
        #[serde(default)]
        dry_run: bool,
    },
}

impl ServiceConfig {
    /// Validate the service configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ServiceConfig::Bibliotheek {
                username,
                password,
                base_url,
                auth_base_url,
                ..
            } => {
                if username.trim().is_empty() {
                    return Err(crate::Error::config("Service username cannot be empty"));
                }
                if password.is_empty() {
                    return Err(crate::Error::config("Service password cannot be empty"));
                }
                for url in [base_url, auth_base_url].into_iter().flatten() {
                    if !url.starts_with("https://") && !url.starts_with("http://") {
                        return Err(crate::Error::config(format!(
                            "Service base URL must use HTTP or HTTPS scheme. Got: {}",
                            url
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Get the service type name
    pub fn type_name(&self) -> &str {
        match self {
            ServiceConfig::Bibliotheek { .. } => "bibliotheek",
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig::Bibliotheek {
            username: String::new(),
            password: String::new(),
            base_url: None,
            auth_base_url: None,
            dry_run: false,
        }
    }
}

// Keeps the password out of logs
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceConfig::Bibliotheek {
                username,
                base_url,
                auth_base_url,
                dry_run,
                ..
            } => f
                .debug_struct("Bibliotheek")
                .field("username", username)
                .field("password", &"<REDACTED>")
                .field("base_url", base_url)
                .field("auth_base_url", auth_base_url)
                .field("dry_run", dry_run)
                .finish(),
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("State file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between scheduled refreshes (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// A loan with at most this many days left is "expiring soon"
    #[serde(default = "default_warning_threshold_days")]
    pub warning_threshold_days: i64,

    /// Timeout applied to every HTTP request (in seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay between a successful extension and the follow-up refresh (in seconds)
    ///
    /// The portal updates its own loan state some time after the renewal
    /// form is posted.
    #[serde(default = "default_extension_settle_secs")]
    pub extension_settle_secs: u64,

    /// Capacity of the outgoing event channel
    ///
    /// When full, new events are dropped with a warning.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.warning_threshold_days < 0 {
            return Err(crate::Error::config("Warning threshold cannot be negative"));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settle delay as a duration
    pub fn extension_settle(&self) -> Duration {
        Duration::from_secs(self.extension_settle_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            warning_threshold_days: default_warning_threshold_days(),
            request_timeout_secs: default_request_timeout_secs(),
            extension_settle_secs: default_extension_settle_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30 * 60
}

fn default_warning_threshold_days() -> i64 {
    7
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_extension_settle_secs() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    1000
}
