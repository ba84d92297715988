// # Memory Settings Source
//
// In-memory implementation of SettingsSource.
//
// ## Purpose
//
// Holds the static addressing settings in a watch channel. Useful for
// tests, embedded deployments where the host application owns the
// settings, or setups that never use static addressing.
//
// ## Crash Behavior
//
// - All settings are lost on restart
// - The link falls back to dynamic addressing on the next start

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;

use crate::Error;
use crate::state::StaticSettings;
use crate::traits::SettingsSource;

/// In-memory settings source
///
/// Every write publishes the full snapshot to all watchers.
///
/// # Example
///
/// ```rust,no_run
/// use ethlink_core::settings::MemorySettingsSource;
/// use ethlink_core::traits::SettingsSource;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let source = MemorySettingsSource::new();
///
///     source.set("use_static_ip", Some("1".to_string())).await?;
///
///     let settings = source.current().await?;
///     assert_eq!(settings.get("use_static_ip"), Some("1"));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemorySettingsSource {
    inner: Arc<watch::Sender<StaticSettings>>,
}

impl MemorySettingsSource {
    /// Create a source with no settings
    pub fn new() -> Self {
        Self::with_settings(StaticSettings::default())
    }

    /// Create a source holding `settings`
    pub fn with_settings(settings: StaticSettings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Replace every setting at once and notify watchers
    pub fn replace(&self, settings: StaticSettings) {
        self.inner.send_replace(settings);
    }

    /// Current snapshot, without going through the async trait
    pub fn snapshot(&self) -> StaticSettings {
        self.inner.borrow().clone()
    }
}

impl Default for MemorySettingsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsSource for MemorySettingsSource {
    async fn current(&self) -> Result<StaticSettings, Error> {
        Ok(self.snapshot())
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = StaticSettings> + Send + 'static>> {
        Box::pin(WatchStream::from_changes(self.inner.subscribe()))
    }

    async fn set(&self, key: &str, value: Option<String>) -> Result<(), Error> {
        // Validate the key before touching the channel so watchers never see
        // a failed write.
        let mut updated = self.snapshot();
        updated.set(key, value)?;
        self.inner.send_replace(updated);
        Ok(())
    }
}
