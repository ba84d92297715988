//! Settings Source Trait
//!
//! Defines the interface for reading and observing the static addressing
//! settings.
//!
//! ## Purpose
//!
//! The settings source is owned by the platform (a settings database, a
//! file, an API). The link manager only reads the six static-address fields
//! and reacts when they change.
//!
//! ## Implementations
//!
//! - `MemorySettingsSource`: in-memory, for tests and embedded use
//! - `FileSettingsSource`: JSON file with atomic writes and backup recovery

use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::state::StaticSettings;

/// Trait for static addressing settings sources
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Get the current settings snapshot
    async fn current(&self) -> Result<StaticSettings, crate::Error>;

    /// Watch for settings changes
    ///
    /// Yields the full snapshot every time any of the six fields is
    /// written. The stream may yield snapshots that did not materially
    /// change; filtering is the watcher's job.
    ///
    /// # Returns
    ///
    /// A pinned boxed stream of `StaticSettings` snapshots
    fn watch(&self) -> Pin<Box<dyn Stream<Item = StaticSettings> + Send + 'static>>;

    /// Write one setting (`None` removes it)
    async fn set(&self, key: &str, value: Option<String>) -> Result<(), crate::Error>;
}
