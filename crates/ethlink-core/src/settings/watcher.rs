//! Settings watcher
//!
//! Observes the static addressing settings and posts a
//! `StaticConfigChanged` input to the tracker whenever the derived
//! [`StaticAddressConfig`] changes materially. Writes that leave the
//! configuration equivalent (for example editing the static address while
//! static mode is off) produce no input.

use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::error::Result;
use crate::state::{StaticAddressConfig, StaticSettings};
use crate::traits::SettingsSource;
use crate::tracker::TrackerInput;

/// Watches a [`SettingsSource`] on behalf of the tracker
pub struct SettingsWatcher {
    changes: Pin<Box<dyn Stream<Item = StaticSettings> + Send + 'static>>,
    inbox: mpsc::UnboundedSender<TrackerInput>,
    current: StaticAddressConfig,
}

impl SettingsWatcher {
    /// Create a watcher, loading the initial configuration from `source`
    ///
    /// Subscribes before reading the snapshot so no write in between is
    /// missed.
    pub async fn new(
        source: Arc<dyn SettingsSource>,
        inbox: mpsc::UnboundedSender<TrackerInput>,
    ) -> Result<Self> {
        let changes = source.watch();
        let settings = source.current().await?;
        let current = StaticAddressConfig::from_settings(&settings);
        debug!(
            "Initial addressing mode: {}",
            if current.use_static { "static" } else { "dynamic" }
        );
        Ok(Self {
            changes,
            inbox,
            current,
        })
    }

    /// Configuration derived from the last observed settings
    pub fn config(&self) -> StaticAddressConfig {
        self.current
    }

    /// Record a new settings snapshot
    ///
    /// Returns the new configuration only if it differs materially from the
    /// previous one.
    pub fn observe(&mut self, settings: &StaticSettings) -> Option<StaticAddressConfig> {
        let next = StaticAddressConfig::from_settings(settings);
        let previous = std::mem::replace(&mut self.current, next);
        next.differs_materially(&previous).then_some(next)
    }

    /// Start watching on a new task
    ///
    /// The task ends when the settings stream ends or the tracker's queue
    /// closes.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some(settings) = self.changes.next().await {
            let Some(config) = self.observe(&settings) else {
                debug!("Settings updated without a material change");
                continue;
            };

            info!("Static addressing settings changed");
            if self
                .inbox
                .send(TrackerInput::StaticConfigChanged(config))
                .is_err()
            {
                debug!("Tracker queue closed, stopping settings watcher");
                break;
            }
        }
    }
}
