//! Link state tracker
//!
//! The tracker is the single consumer of everything that can change the
//! link state:
//! - classified link events from the [`LinkMonitor`](crate::monitor::LinkMonitor)
//! - addressing starts and completions from the [`AddressingWorker`]
//! - static settings changes from the [`SettingsWatcher`](crate::settings::SettingsWatcher)
//! - administrative commands from [`TrackerHandle`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   Link(event)
//! │ LinkMonitor  │──────────────────┐
//! └──────────────┘                  │
//! ┌──────────────┐   Addressing*    ▼
//! │  Addressing  │──────────► ┌──────────────────┐      ┌───────────────┐
//! │   Worker     │            │ LinkStateTracker │─────►│ DriverControl │
//! └──────────────┘      ┌───► │ (one input queue)│      └───────────────┘
//! ┌──────────────┐      │     └──────────────────┘
//! │  Settings    │──────┘              │
//! │  Watcher     │                     ▼
//! └──────────────┘          LinkNotification + LinkStatus snapshot
//! ```
//!
//! ## Processing model
//!
//! Inputs are processed strictly in arrival order, one at a time. Each
//! input is one atomic step: the transition table picks the new states and
//! actions, the actions run, and at the end of the step a single
//! `DetailedStateChanged` notification is emitted if and only if the
//! detailed state differs from where the step started. A fresh
//! [`LinkStatus`] snapshot is then published for concurrent readers.

pub mod transition;

pub use transition::{Action, EventKind, MachineState, Step, transition};

use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::addressing::{AddressingOutcome, AddressingToken, AddressingWorker};
use crate::config::{LinkConfig, MonitorConfig};
use crate::error::{Error, Result};
use crate::monitor::{LinkEvent, LinkMonitor, MonitorHandle};
use crate::state::{
    AddressLease, DetailedState, EnabledState, LinkStatus, RunState, StaticAddressConfig,
};
use crate::traits::DriverControl;

/// Inputs accepted by the tracker's serialized queue
#[derive(Debug)]
pub enum TrackerInput {
    /// Classified link event
    Link(LinkEvent),
    /// Explicit disable notification
    Disabled,
    /// A dynamic acquisition began
    AddressingStarted(AddressingToken),
    /// An acquisition finished
    AddressingCompleted {
        token: AddressingToken,
        outcome: AddressingOutcome,
    },
    /// Static addressing configuration changed materially
    StaticConfigChanged(StaticAddressConfig),
    /// Administrative command
    Command(TrackerCommand),
}

/// Administrative commands, answered through a one-shot reply
#[derive(Debug)]
pub enum TrackerCommand {
    Enable(oneshot::Sender<bool>),
    Disable(oneshot::Sender<bool>),
    Teardown(oneshot::Sender<bool>),
    Reconnect(oneshot::Sender<bool>),
    ResetConnections {
        disable_interface: bool,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Notifications emitted by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotification {
    /// The detailed state changed
    DetailedStateChanged {
        state: DetailedState,
        lease: AddressLease,
    },

    /// The lease was updated in place while staying connected
    ConfigurationChanged { lease: AddressLease },

    /// The administrative state changed
    EnabledStateChanged {
        state: EnabledState,
        previous: EnabledState,
    },
}

/// Link state tracker
///
/// Owns the run state, detailed state and addressing flags exclusively;
/// nothing outside [`run`](LinkStateTracker::run) mutates them.
///
/// ## Lifecycle
///
/// 1. Create with [`LinkStateTracker::new()`]
/// 2. Start with [`LinkStateTracker::run()`] (usually on its own task)
/// 3. Drive it through the returned [`TrackerHandle`]
/// 4. Stop with [`TrackerHandle::shutdown()`]
pub struct LinkStateTracker {
    interface: String,
    driver: Arc<dyn DriverControl>,

    machine: MachineState,
    enabled_state: EnabledState,
    torn_down: bool,
    lease: AddressLease,
    changed_at: DateTime<Utc>,
    static_config: StaticAddressConfig,

    addressing: AddressingWorker,
    monitor_config: MonitorConfig,
    monitor: Option<MonitorHandle>,

    inbox_tx: mpsc::UnboundedSender<TrackerInput>,
    inbox_rx: mpsc::UnboundedReceiver<TrackerInput>,
    notify_tx: mpsc::Sender<LinkNotification>,
    status: Arc<RwLock<LinkStatus>>,
}

impl LinkStateTracker {
    /// Create a new link state tracker
    ///
    /// # Parameters
    ///
    /// - `driver`: Driver control implementation
    /// - `static_config`: Static addressing configuration at startup
    /// - `config`: Link configuration
    ///
    /// # Returns
    ///
    /// A tuple of (tracker, handle, notification_receiver)
    pub fn new(
        driver: Arc<dyn DriverControl>,
        static_config: StaticAddressConfig,
        config: &LinkConfig,
    ) -> Result<(Self, TrackerHandle, mpsc::Receiver<LinkNotification>)> {
        config.validate()?;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::channel(config.tracker.notification_channel_capacity);
        let status = Arc::new(RwLock::new(LinkStatus::new(&config.interface)));

        let tracker = Self {
            interface: config.interface.clone(),
            addressing: AddressingWorker::new(
                Arc::clone(&driver),
                &config.interface,
                inbox_tx.clone(),
            ),
            driver,
            machine: MachineState::default(),
            enabled_state: EnabledState::Unknown,
            torn_down: false,
            lease: AddressLease::default(),
            changed_at: Utc::now(),
            static_config,
            monitor_config: config.monitor.clone(),
            monitor: None,
            inbox_tx,
            inbox_rx,
            notify_tx,
            status,
        };
        tracker.publish();

        let handle = tracker.handle();
        Ok((tracker, handle, notify_rx))
    }

    /// Get a new handle to this tracker
    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            inbox: self.inbox_tx.clone(),
            status: Arc::clone(&self.status),
        }
    }

    /// Run the tracker
    ///
    /// Consumes inputs until [`TrackerHandle::shutdown()`] is called.
    pub async fn run(mut self) -> Result<()> {
        info!("Link state tracker started on {}", self.interface);

        while let Some(input) = self.inbox_rx.recv().await {
            if matches!(input, TrackerInput::Command(TrackerCommand::Shutdown)) {
                info!("Shutdown requested");
                break;
            }
            self.process(input);
        }

        self.stop_monitor();
        self.addressing.cancel();
        info!("Link state tracker stopped on {}", self.interface);

        Ok(())
    }

    /// Process one input as a single atomic step
    fn process(&mut self, input: TrackerInput) {
        let before = self.machine.detailed_state;
        self.dispatch(input);
        self.finish_step(before);
    }

    fn dispatch(&mut self, input: TrackerInput) {
        match input {
            TrackerInput::Link(event) => {
                if matches!(
                    self.enabled_state,
                    EnabledState::Disabling | EnabledState::Disabled
                ) {
                    debug!("Ignoring {} while link is {}", event, self.enabled_state);
                    return;
                }
                self.apply(EventKind::Link(event), None);
            }

            TrackerInput::Disabled => self.apply(EventKind::Disabled, None),

            TrackerInput::AddressingStarted(token) => {
                if !self.addressing.is_live(token) {
                    debug!("Discarding start of stale addressing attempt {}", token);
                    return;
                }
                self.apply(EventKind::AddressingStarted, None);
            }

            TrackerInput::AddressingCompleted { token, outcome } => {
                if !self.addressing.complete(token) {
                    debug!("Discarding result of stale addressing attempt {}", token);
                    return;
                }
                match outcome {
                    Ok(lease) => self.apply(EventKind::AddressingSucceeded, Some(lease)),
                    Err(reason) => {
                        warn!("Addressing {} failed on {}: {}", token, self.interface, reason);
                        self.apply(EventKind::AddressingFailed, None);
                    }
                }
            }

            TrackerInput::StaticConfigChanged(config) => {
                info!(
                    "Static addressing {} on {}",
                    if config.use_static { "enabled" } else { "disabled" },
                    self.interface
                );
                self.static_config = config;
                self.apply(EventKind::SettingsChanged, None);
            }

            TrackerInput::Command(command) => self.handle_command(command),
        }
    }

    /// Evaluate the transition table and execute the resulting step
    fn apply(&mut self, event: EventKind, lease: Option<AddressLease>) {
        let step = transition(&self.machine, event);
        debug!(
            "Processing {} (last: {}) in {}/{}",
            event, self.machine.last_event, self.machine.run_state, self.machine.detailed_state
        );

        if let Some(run_state) = step.run_state {
            self.machine.run_state = run_state;
        }
        if let Some(detailed_state) = step.detailed_state {
            self.machine.detailed_state = detailed_state;
        }
        for action in step.actions {
            self.execute(*action, lease);
        }

        self.machine.last_event = event;
    }

    fn execute(&mut self, action: Action, lease: Option<AddressLease>) {
        match action {
            Action::ClearAddress => {
                self.machine.have_address = false;
                self.machine.obtaining_address = false;
            }
            Action::LinkUp => {
                if !self.driver.link_up() {
                    warn!("Failed to bring {} up", self.interface);
                }
            }
            Action::ResetConnections { disable_interface } => {
                self.reset_connections(disable_interface);
            }
            Action::EnsureAddress => self.ensure_address(),
            Action::Reconfigure => self.begin_addressing(),
            Action::StoreLease => {
                if let Some(lease) = lease {
                    self.lease = lease;
                }
                self.machine.have_address = true;
                self.machine.obtaining_address = false;
                info!("IP configuration of {}: {}", self.interface, self.lease);
            }
            Action::ConfigurationChanged => {
                self.emit(LinkNotification::ConfigurationChanged { lease: self.lease });
            }
        }
    }

    fn ensure_address(&mut self) {
        if self.machine.obtaining_address {
            debug!("Address acquisition already in flight on {}", self.interface);
            return;
        }

        if self.machine.have_address || self.driver.has_address() {
            self.machine.have_address = true;
            self.machine.detailed_state = DetailedState::Connected;
            return;
        }

        info!("Requesting an address for {}", self.interface);
        self.begin_addressing();
    }

    fn begin_addressing(&mut self) {
        if self.static_config.use_static {
            self.addressing.configure_static(&self.static_config);
        } else {
            self.addressing.start();
            self.machine.obtaining_address = true;
        }
    }

    /// Reset connections
    ///
    /// Clears cached addressing state, flushes link-layer state, cancels
    /// any live addressing attempt and optionally disables the interface.
    /// Idempotent with respect to tracker state.
    fn reset_connections(&mut self, disable_interface: bool) {
        debug!("Reset connections and stopping DHCP on {}", self.interface);

        self.machine.have_address = false;
        self.machine.obtaining_address = false;
        self.lease = AddressLease::default();

        self.driver.reset_link_state(&self.interface);
        self.addressing.cancel();
        if !self.driver.stop_addressing(&self.interface) {
            error!("Could not stop DHCP on {}", self.interface);
        }

        if disable_interface {
            debug!("Disabling interface {}", self.interface);
            self.driver.disable_interface(&self.interface);
        }
    }

    fn handle_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Enable(reply) => {
                let _ = reply.send(self.enable());
            }
            TrackerCommand::Disable(reply) => {
                let _ = reply.send(self.disable());
            }
            TrackerCommand::Teardown(reply) => {
                let _ = reply.send(self.teardown());
            }
            TrackerCommand::Reconnect(reply) => {
                let _ = reply.send(self.reconnect());
            }
            TrackerCommand::ResetConnections {
                disable_interface,
                reply,
            } => {
                self.reset_connections(disable_interface);
                let _ = reply.send(());
            }
            // Handled by the run loop
            TrackerCommand::Shutdown => {}
        }
    }

    fn enable(&mut self) -> bool {
        if self.enabled_state == EnabledState::Enabled {
            return true;
        }

        self.set_enabled_state(EnabledState::Enabling);

        if !self.driver.load_driver() {
            error!("Failed to load link driver for {}", self.interface);
            self.set_enabled_state(EnabledState::Unknown);
            self.machine.detailed_state = DetailedState::Failed;
            return false;
        }

        self.start_monitor();
        self.set_enabled_state(EnabledState::Enabled);
        true
    }

    fn disable(&mut self) -> bool {
        if self.enabled_state == EnabledState::Disabled {
            return true;
        }

        self.set_enabled_state(EnabledState::Disabling);
        self.stop_monitor();
        self.reset_connections(true);
        self.apply(EventKind::Disabled, None);

        if !self.driver.unload_driver() {
            error!("Failed to unload link driver for {}", self.interface);
            self.set_enabled_state(EnabledState::Unknown);
            return false;
        }

        self.set_enabled_state(EnabledState::Disabled);
        true
    }

    /// Stop the driver after disconnecting; remembered until `reconnect`
    fn teardown(&mut self) -> bool {
        if self.torn_down {
            return true;
        }
        if self.disconnect_and_stop() {
            self.torn_down = true;
            true
        } else {
            false
        }
    }

    /// Restart a driver stopped by `teardown`
    fn reconnect(&mut self) -> bool {
        if !self.torn_down {
            return true;
        }
        if self.restart() {
            self.torn_down = false;
            true
        } else {
            false
        }
    }

    fn disconnect_and_stop(&mut self) -> bool {
        if self.machine.run_state.is_driver_stopped() {
            return true;
        }
        self.reset_connections(false);
        let stopped = self.stop_driver();
        self.machine.run_state = RunState::Stopping;
        stopped
    }

    fn restart(&mut self) -> bool {
        if !self.machine.run_state.is_driver_stopped() {
            return true;
        }
        self.machine.run_state = RunState::Starting;
        self.reset_connections(false);
        self.start_driver()
    }

    fn start_driver(&self) -> bool {
        if self.enabled_state != EnabledState::Enabled {
            warn!("Refusing to start driver while link is {}", self.enabled_state);
            return false;
        }
        self.driver.start_driver()
    }

    fn stop_driver(&self) -> bool {
        if self.enabled_state != EnabledState::Enabled
            || self.machine.run_state == RunState::Stopped
        {
            warn!(
                "Refusing to stop driver while link is {} / {}",
                self.enabled_state, self.machine.run_state
            );
            return false;
        }
        self.driver.stop_driver()
    }

    /// Start a fresh monitor; it reads only after the previous one exited
    fn start_monitor(&mut self) {
        self.machine.last_event = EventKind::INITIAL;
        let monitor = LinkMonitor::new(
            Arc::clone(&self.driver),
            self.inbox_tx.clone(),
            &self.monitor_config,
        );
        self.monitor = Some(monitor.spawn_after(self.monitor.take()));
    }

    /// Stop the monitor, keeping its handle for the next `start_monitor`
    fn stop_monitor(&mut self) {
        if let Some(monitor) = &self.monitor {
            monitor.stop();
        }
    }

    fn set_enabled_state(&mut self, state: EnabledState) {
        let previous = self.enabled_state;
        if previous == state {
            return;
        }
        self.enabled_state = state;
        info!("Link {} {} -> {}", self.interface, previous, state);
        self.emit(LinkNotification::EnabledStateChanged { state, previous });
    }

    /// Close a processing step: broadcast once if the detailed state moved,
    /// then publish the snapshot
    fn finish_step(&mut self, before: DetailedState) {
        let state = self.machine.detailed_state;
        if state != before {
            self.changed_at = Utc::now();
            info!("Link {} {} -> {}", self.interface, before, state);
            self.emit(LinkNotification::DetailedStateChanged {
                state,
                lease: self.lease,
            });
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = LinkStatus {
            interface: self.interface.clone(),
            enabled_state: self.enabled_state,
            run_state: self.machine.run_state,
            detailed_state: self.machine.detailed_state,
            have_address: self.machine.have_address,
            obtaining_address: self.machine.obtaining_address,
            torn_down: self.torn_down,
            lease: self.lease,
            last_event: self.machine.last_event,
            changed_at: self.changed_at,
        };
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Emit a notification
    fn emit(&self, notification: LinkNotification) {
        // Never block the processing path; the snapshot stays current.
        if self.notify_tx.try_send(notification).is_err() {
            warn!(
                "Notification channel full, dropping notification. \
                Consider increasing notification_channel_capacity."
            );
        }
    }
}

/// Cloneable handle to a running tracker
///
/// Every mutating call is posted into the tracker's queue; accessors read
/// the last published [`LinkStatus`] snapshot and never wait on processing.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    inbox: mpsc::UnboundedSender<TrackerInput>,
    status: Arc<RwLock<LinkStatus>>,
}

impl TrackerHandle {
    /// Post a classified link event
    pub fn post(&self, event: LinkEvent) -> Result<()> {
        self.send(TrackerInput::Link(event))
    }

    /// Post an explicit disable notification
    pub fn notify_disabled(&self) -> Result<()> {
        self.send(TrackerInput::Disabled)
    }

    /// Sender for components feeding the tracker's queue
    pub fn sender(&self) -> mpsc::UnboundedSender<TrackerInput> {
        self.inbox.clone()
    }

    fn send(&self, input: TrackerInput) -> Result<()> {
        self.inbox
            .send(input)
            .map_err(|_| Error::channel_closed("link state tracker is not running"))
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<bool>) -> TrackerCommand) -> bool {
        let (reply, response) = oneshot::channel();
        if self.send(TrackerInput::Command(command(reply))).is_err() {
            warn!("Link state tracker is not running");
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Load the driver and start monitoring the link
    pub async fn enable(&self) -> bool {
        self.request(TrackerCommand::Enable).await
    }

    /// Stop monitoring, tear the link down and unload the driver
    pub async fn disable(&self) -> bool {
        self.request(TrackerCommand::Disable).await
    }

    /// Disconnect and stop the driver
    pub async fn teardown(&self) -> bool {
        self.request(TrackerCommand::Teardown).await
    }

    /// Restart a driver stopped by [`teardown`](Self::teardown)
    pub async fn reconnect(&self) -> bool {
        self.request(TrackerCommand::Reconnect).await
    }

    /// Reset connections, optionally disabling the interface
    pub async fn reset_connections(&self, disable_interface: bool) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(TrackerInput::Command(TrackerCommand::ResetConnections {
            disable_interface,
            reply,
        }))?;
        done.await
            .map_err(|_| Error::channel_closed("link state tracker stopped before replying"))
    }

    /// Ask the tracker to stop after the inputs already queued
    pub fn shutdown(&self) {
        let _ = self.send(TrackerInput::Command(TrackerCommand::Shutdown));
    }

    /// Last published status snapshot
    pub fn status(&self) -> LinkStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current address lease
    pub fn lease(&self) -> AddressLease {
        self.status().lease
    }

    /// Current detailed state
    pub fn detailed_state(&self) -> DetailedState {
        self.status().detailed_state
    }

    /// Current administrative state
    pub fn enabled_state(&self) -> EnabledState {
        self.status().enabled_state
    }

    /// Whether the link has acquired an address
    pub fn has_address(&self) -> bool {
        self.status().have_address
    }

    /// Whether link connections are possible
    pub fn is_available(&self) -> bool {
        self.status().is_available()
    }

    /// Whether the driver is (being) stopped
    pub fn is_driver_stopped(&self) -> bool {
        self.status().is_driver_stopped()
    }
}
