// # ethlink-core
//
// Core library for the wired link lifecycle manager.
//
// ## Architecture Overview
//
// This library keeps one wired interface connected:
// - **DriverControl**: Trait for the driver command surface and addressing primitives
// - **SettingsSource**: Trait for reading and watching static addressing settings
// - **LinkMonitor**: Turns raw driver events into deduplicated link events
// - **LinkStateTracker**: Single-threaded state machine that owns the link state
// - **AddressingWorker**: Runs DHCP off the processing path, applies static configuration
// - **SettingsWatcher**: Posts material static settings changes to the tracker
//
// ## Design Principles
//
// 1. **Single Owner**: Only the tracker mutates link state, one input at a time
// 2. **Event-Driven**: Every producer posts into the tracker's queue
// 3. **Tokens, not Locks**: Stale addressing results are recognized and dropped
// 4. **Library-First**: The daemon is a thin wrapper around this crate

pub mod addressing;
pub mod config;
pub mod error;
pub mod monitor;
pub mod settings;
pub mod state;
pub mod tracker;
pub mod traits;

// Re-export core types for convenience
pub use addressing::{AddressingOutcome, AddressingToken, AddressingWorker};
pub use config::{LinkConfig, MonitorConfig, SettingsConfig, TrackerConfig};
pub use error::{Error, Result};
pub use monitor::{LinkEvent, LinkMonitor, MonitorHandle};
pub use settings::{FileSettingsSource, MemorySettingsSource, SettingsWatcher};
pub use state::{
    AddressLease, DetailedState, EnabledState, LinkStatus, RunState, StaticAddressConfig,
    StaticSettings,
};
pub use tracker::{LinkNotification, LinkStateTracker, TrackerCommand, TrackerHandle, TrackerInput};
pub use traits::{DriverControl, SettingsSource};
