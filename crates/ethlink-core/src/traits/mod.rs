//! Collaborator traits for the link manager
//!
//! This module defines the abstract interfaces the core depends on.
//!
//! - [`DriverControl`]: Driver commands, raw status events and addressing primitives
//! - [`SettingsSource`]: Static addressing settings

pub mod driver;
pub mod settings_source;

pub use driver::DriverControl;
pub use settings_source::SettingsSource;
