// # Link State Types
//
// The small set of externally-visible states the link subsystem converges
// to, plus the addressing data model.
//
// - `RunState`: coarse lifecycle phase of the link
// - `DetailedState`: connectivity phase that drives broadcasts
// - `EnabledState`: administrative on/off state of the driver
// - `LinkStatus`: immutable snapshot published after every processing step

pub mod lease;

pub use lease::{AddressLease, StaticAddressConfig, StaticSettings};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tracker::EventKind;

/// Coarse lifecycle phase of the link subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl RunState {
    /// Whether the driver is (being) stopped
    pub fn is_driver_stopped(self) -> bool {
        matches!(self, RunState::Stopping | RunState::Stopped)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Starting => "Starting",
            RunState::Running => "Running",
            RunState::Stopping => "Stopping",
            RunState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Externally-visible connectivity phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailedState {
    Disconnected,
    Connecting,
    ObtainingAddress,
    Connected,
    Failed,
}

impl fmt::Display for DetailedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetailedState::Disconnected => "DISCONNECTED",
            DetailedState::Connecting => "CONNECTING",
            DetailedState::ObtainingAddress => "OBTAINING_IPADDR",
            DetailedState::Connected => "CONNECTED",
            DetailedState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Administrative state of the link driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnabledState {
    /// Never enabled, or pinned after a driver load/unload failure
    Unknown,
    Enabling,
    Enabled,
    Disabling,
    Disabled,
}

impl fmt::Display for EnabledState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnabledState::Unknown => "unknown",
            EnabledState::Enabling => "enabling",
            EnabledState::Enabled => "enabled",
            EnabledState::Disabling => "disabling",
            EnabledState::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Snapshot of the tracker state, safe to read from any thread
///
/// A fresh snapshot is published at the end of every processing step;
/// readers never observe a half-applied transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    /// Managed interface name
    pub interface: String,
    pub enabled_state: EnabledState,
    pub run_state: RunState,
    pub detailed_state: DetailedState,
    pub have_address: bool,
    pub obtaining_address: bool,
    /// Driver explicitly stopped through `teardown()`
    pub torn_down: bool,
    /// Current address lease (empty when no address is held)
    pub lease: AddressLease,
    /// Last event the state machine processed
    pub last_event: EventKind,
    /// When `detailed_state` last changed
    pub changed_at: DateTime<Utc>,
}

impl LinkStatus {
    /// Initial status of a freshly created tracker
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            enabled_state: EnabledState::Unknown,
            run_state: RunState::Starting,
            detailed_state: DetailedState::Disconnected,
            have_address: false,
            obtaining_address: false,
            torn_down: false,
            lease: AddressLease::default(),
            last_event: EventKind::INITIAL,
            changed_at: Utc::now(),
        }
    }

    /// Whether the driver is (being) stopped
    pub fn is_driver_stopped(&self) -> bool {
        self.run_state.is_driver_stopped()
    }

    /// Links are available while the driver runs, or when a teardown
    /// was requested explicitly (a reconnect brings them back).
    pub fn is_available(&self) -> bool {
        self.torn_down || !self.is_driver_stopped()
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "interface {} runState={} state={} enabled={} {}",
            self.interface, self.run_state, self.detailed_state, self.enabled_state, self.lease
        )?;
        write!(
            f,
            "haveIpAddress={}, obtainingIpAddress={}, explicitlyDisabled={}",
            self.have_address, self.obtaining_address, self.torn_down
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability() {
        let mut status = LinkStatus::new("eth0");
        assert!(status.is_available());

        status.run_state = RunState::Stopping;
        assert!(status.is_driver_stopped());
        assert!(!status.is_available());

        status.torn_down = true;
        assert!(status.is_available());
    }

    #[test]
    fn test_status_display() {
        let status = LinkStatus::new("eth0");
        let text = status.to_string();
        assert!(text.starts_with("interface eth0 runState=Starting state=DISCONNECTED"));
        assert!(text.contains("haveIpAddress=false"));
    }
}
