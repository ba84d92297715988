//! Link monitor
//!
//! Turns the raw driver status stream into a deduplicated sequence of
//! [`LinkEvent`]s and forwards them to the link state tracker.
//!
//! ## Loop
//!
//! 1. Read the next raw event from the driver (blocking, off the async runtime)
//! 2. Strip the event prefix and extract the event name
//! 3. Discard empty names (logged, not fatal)
//! 4. Map the name to a [`LinkEvent`]; unrecognized names map to `Error`
//! 5. Suppress the event if it equals the previous one
//! 6. Sleep for the poll interval, then check the stop flag
//!
//! ## Shutdown latency
//!
//! Stopping is cooperative: the stop flag is read after every blocking read
//! and after every poll sleep. A stop request may therefore take up to one
//! poll interval (plus one blocking read) to be observed, but a reading that
//! completes after the request is never forwarded.
//!
//! ## Restarts
//!
//! A monitor started with [`LinkMonitor::spawn_after`] waits for the previous
//! loop to exit before its first read, so at most one raw event read is in
//! flight at any time. Each loop deduplicates its own event stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::traits::DriverControl;
use crate::tracker::TrackerInput;

/// Canonical link event produced by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkEvent {
    PluggedUp,
    PluggedDown,
    UnpluggedDown,
    UnpluggedUp,
    Unknown,
    Error,
    DriverStarted,
    DriverStopped,
    DriverHung,
}

impl LinkEvent {
    /// Map an event name (and its first argument) to a link event
    pub fn from_name(name: &str, argument: Option<&str>) -> Self {
        match name {
            "PLUGGED_AND_UP" => LinkEvent::PluggedUp,
            "PLUGGED_AND_DOWN" => LinkEvent::PluggedDown,
            "UNPLUGGED_AND_DOWN" => LinkEvent::UnpluggedDown,
            "UNPLUGGED_AND_UP" => LinkEvent::UnpluggedUp,
            "UNKNOWN" => LinkEvent::Unknown,
            "DRIVER-STATE" => match argument {
                Some("STARTED") => LinkEvent::DriverStarted,
                Some("STOPPED") => LinkEvent::DriverStopped,
                Some("HANGED") => LinkEvent::DriverHung,
                _ => LinkEvent::Error,
            },
            _ => LinkEvent::Error,
        }
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkEvent::PluggedUp => "PLUGGED_AND_UP",
            LinkEvent::PluggedDown => "PLUGGED_AND_DOWN",
            LinkEvent::UnpluggedDown => "UNPLUGGED_AND_DOWN",
            LinkEvent::UnpluggedUp => "UNPLUGGED_AND_UP",
            LinkEvent::Unknown => "UNKNOWN",
            LinkEvent::Error => "ERROR",
            LinkEvent::DriverStarted => "DRIVER_STARTED",
            LinkEvent::DriverStopped => "DRIVER_STOPPED",
            LinkEvent::DriverHung => "DRIVER_HUNG",
        };
        f.write_str(name)
    }
}

/// Classify one raw driver event
///
/// Returns `None` when the event name is empty.
pub fn classify(raw: &str, prefix: &str) -> Option<LinkEvent> {
    let raw = raw.trim();
    let body = raw.strip_prefix(prefix).unwrap_or(raw);
    let mut words = body.split_whitespace();
    let name = words.next()?;
    Some(LinkEvent::from_name(name, words.next()))
}

/// Suppresses immediately-repeated identical events
#[derive(Debug, Default, Clone)]
pub struct EventDeduplicator {
    last: Option<LinkEvent>,
}

impl EventDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `event` differs from the previous one and should
    /// be forwarded.
    pub fn admit(&mut self, event: LinkEvent) -> bool {
        if self.last == Some(event) {
            return false;
        }
        self.last = Some(event);
        true
    }

    /// Forget the previous event
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Link monitor task
pub struct LinkMonitor {
    driver: Arc<dyn DriverControl>,
    inbox: mpsc::UnboundedSender<TrackerInput>,
    event_prefix: String,
    poll_interval: Duration,
    dedup: EventDeduplicator,
}

impl LinkMonitor {
    /// Create a new link monitor
    ///
    /// # Parameters
    ///
    /// - `driver`: Driver to read raw events from
    /// - `inbox`: Tracker input queue accepted events are forwarded to
    /// - `config`: Poll interval and event prefix
    pub fn new(
        driver: Arc<dyn DriverControl>,
        inbox: mpsc::UnboundedSender<TrackerInput>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            driver,
            inbox,
            event_prefix: config.event_prefix.clone(),
            poll_interval: config.poll_interval(),
            dedup: EventDeduplicator::new(),
        }
    }

    /// Start the monitor loop on a new task
    pub fn spawn(self) -> MonitorHandle {
        self.spawn_after(None)
    }

    /// Start the monitor loop once `previous` has exited
    ///
    /// `previous` is stopped first.
    pub fn spawn_after(self, previous: Option<MonitorHandle>) -> MonitorHandle {
        if let Some(previous) = &previous {
            previous.stop();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!("Waiting for the previous link monitor to exit");
                previous.join().await;
            }
            self.run(loop_stop).await;
        });
        MonitorHandle { stop, task }
    }

    async fn run(mut self, stop: Arc<AtomicBool>) {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        info!("Link monitor started (poll interval {:?})", self.poll_interval);

        loop {
            let driver = Arc::clone(&self.driver);
            let read = tokio::task::spawn_blocking(move || driver.next_raw_event()).await;

            if stop.load(Ordering::SeqCst) {
                debug!("Link monitor stopped during a read, dropping it");
                break;
            }

            match read {
                Ok(Ok(raw)) => {
                    if !self.handle_raw(&raw) {
                        debug!("Tracker queue closed, stopping link monitor");
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!("Failed to read raw link event: {}", e);
                }
                Err(e) => {
                    error!("Raw event reader panicked: {}", e);
                }
            }

            tokio::time::sleep(self.poll_interval).await;

            if stop.load(Ordering::SeqCst) {
                break;
            }
        }

        info!("Link monitor stopped");
    }

    /// Classify, deduplicate and forward one raw event
    ///
    /// Returns `false` once the tracker queue is closed.
    fn handle_raw(&mut self, raw: &str) -> bool {
        let Some(event) = classify(raw, &self.event_prefix) else {
            debug!("Received driver event with empty event name: {:?}", raw);
            return true;
        };

        if !self.dedup.admit(event) {
            return true;
        }

        debug!("Link event {} (raw: {:?})", event, raw);
        self.inbox.send(TrackerInput::Link(event)).is_ok()
    }
}

/// Handle to a running link monitor
#[derive(Debug)]
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Request the loop to stop
    ///
    /// Returns immediately; the loop exits within one poll interval once its
    /// current raw read returns.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Link monitor task failed: {}", e);
        }
    }
}
