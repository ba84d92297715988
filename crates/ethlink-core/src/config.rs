//! Configuration types for the link manager
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Main link manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Network interface to manage (e.g., "eth0")
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Link monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Link state tracker settings
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Where static addressing settings come from
    #[serde(default)]
    pub settings: SettingsConfig,
}

impl LinkConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            interface: default_interface(),
            monitor: MonitorConfig::default(),
            tracker: TrackerConfig::default(),
            settings: SettingsConfig::default(),
        }
    }

    /// Set the managed interface
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interface.is_empty() {
            return Err(crate::Error::config("Interface name cannot be empty"));
        }

        if self.interface.len() > MAX_INTERFACE_NAME_LEN {
            return Err(crate::Error::config(format!(
                "Interface name '{}' is longer than {} bytes",
                self.interface, MAX_INTERFACE_NAME_LEN
            )));
        }

        if self
            .interface
            .chars()
            .any(|c| c == '/' || c.is_whitespace())
        {
            return Err(crate::Error::config(format!(
                "Interface name '{}' contains invalid characters",
                self.interface
            )));
        }

        self.monitor.validate()?;
        self.tracker.validate()?;
        self.settings.validate()?;

        Ok(())
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Link monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Pause between two raw event reads (in milliseconds)
    ///
    /// This also bounds how long a stop request may take to be observed:
    /// the stop flag is checked once per poll iteration.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Prefix carried by every raw driver event
    #[serde(default = "default_event_prefix")]
    pub event_prefix: String,
}

impl MonitorConfig {
    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the monitor configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_ms == 0 {
            return Err(crate::Error::config("Monitor poll interval must be > 0"));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            event_prefix: default_event_prefix(),
        }
    }
}

/// Link state tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Capacity of the outbound notification channel
    ///
    /// When full, new notifications are dropped (with a warning log).
    /// The status snapshot is always current regardless.
    #[serde(default = "default_notification_channel_capacity")]
    pub notification_channel_capacity: usize,
}

impl TrackerConfig {
    /// Validate the tracker configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.notification_channel_capacity == 0 {
            return Err(crate::Error::config(
                "Notification channel capacity must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            notification_channel_capacity: default_notification_channel_capacity(),
        }
    }
}

/// Static addressing settings source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingsConfig {
    /// In-memory settings (lost on restart)
    #[default]
    Memory,

    /// JSON file-backed settings
    File {
        /// Path to the settings file
        path: String,
    },
}

impl SettingsConfig {
    /// Validate the settings configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SettingsConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("Settings file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_event_prefix() -> String {
    "CTRL-EVENT-".to_string()
}

fn default_notification_channel_capacity() -> usize {
    64
}
