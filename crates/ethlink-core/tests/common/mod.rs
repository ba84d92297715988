//! Test doubles and common utilities for link manager contract tests
//!
//! The scripted driver records every command it receives and replays a
//! queue of raw events, so tests can drive the full monitor → tracker →
//! addressing path without touching a real interface.

#![allow(dead_code)]

use ethlink_core::error::{Error, Result};
use ethlink_core::tracker::{LinkNotification, LinkStateTracker, TrackerHandle};
use ethlink_core::{AddressLease, DriverControl, LinkConfig, LinkStatus, StaticAddressConfig};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const IFACE: &str = "eth0";

/// Commands the scripted driver has seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    LoadDriver,
    UnloadDriver,
    StartDriver,
    StopDriver,
    LinkUp,
    LinkDown,
    ConfigureStatic,
    AcquireLease,
    StopAddressing,
    ResetLinkState,
    DisableInterface,
}

/// A scripted DriverControl
pub struct ScriptedDriver {
    calls: Mutex<Vec<DriverCall>>,
    raw_events: Mutex<VecDeque<String>>,
    lease: Mutex<Option<AddressLease>>,
    lease_delay_ms: AtomicU64,
    has_address: AtomicBool,
    load_fails: AtomicBool,
    unload_fails: AtomicBool,
    static_fails: AtomicBool,
    acquire_count: AtomicUsize,
    raw_delay_ms: AtomicU64,
    readers: AtomicUsize,
    max_readers: AtomicUsize,
}

impl ScriptedDriver {
    /// A driver whose DHCP requests succeed with [`dhcp_lease`]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            raw_events: Mutex::new(VecDeque::new()),
            lease: Mutex::new(Some(dhcp_lease())),
            lease_delay_ms: AtomicU64::new(0),
            has_address: AtomicBool::new(false),
            load_fails: AtomicBool::new(false),
            unload_fails: AtomicBool::new(false),
            static_fails: AtomicBool::new(false),
            acquire_count: AtomicUsize::new(0),
            raw_delay_ms: AtomicU64::new(0),
            readers: AtomicUsize::new(0),
            max_readers: AtomicUsize::new(0),
        })
    }

    /// Queue raw events for the monitor to read
    pub fn push_raw<I, S>(&self, events: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queue = self.raw_events.lock().unwrap();
        queue.extend(events.into_iter().map(Into::into));
    }

    /// Make every DHCP request fail
    pub fn fail_dhcp(&self) {
        *self.lease.lock().unwrap() = None;
    }

    /// Delay every DHCP request
    pub fn delay_dhcp(&self, delay: Duration) {
        self.lease_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_has_address(&self, value: bool) {
        self.has_address.store(value, Ordering::SeqCst);
    }

    pub fn fail_load(&self) {
        self.load_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_unload(&self) {
        self.unload_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_static(&self) {
        self.static_fails.store(true, Ordering::SeqCst);
    }

    /// Make every raw event read block for `delay` after dequeuing
    pub fn delay_raw(&self, delay: Duration) {
        self.raw_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Highest number of raw event reads seen in flight at once
    pub fn max_concurrent_readers(&self) -> usize {
        self.max_readers.load(Ordering::SeqCst)
    }

    /// Number of DHCP requests started
    pub fn acquire_count(&self) -> usize {
        self.acquire_count.load(Ordering::SeqCst)
    }

    /// Every command received so far, in order
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    /// How often `call` was received
    pub fn count(&self, call: DriverCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DriverControl for ScriptedDriver {
    fn load_driver(&self) -> bool {
        self.record(DriverCall::LoadDriver);
        !self.load_fails.load(Ordering::SeqCst)
    }

    fn unload_driver(&self) -> bool {
        self.record(DriverCall::UnloadDriver);
        !self.unload_fails.load(Ordering::SeqCst)
    }

    fn start_driver(&self) -> bool {
        self.record(DriverCall::StartDriver);
        true
    }

    fn stop_driver(&self) -> bool {
        self.record(DriverCall::StopDriver);
        true
    }

    fn link_up(&self) -> bool {
        self.record(DriverCall::LinkUp);
        true
    }

    fn link_down(&self) -> bool {
        self.record(DriverCall::LinkDown);
        true
    }

    fn has_address(&self) -> bool {
        self.has_address.load(Ordering::SeqCst)
    }

    fn next_raw_event(&self) -> Result<String> {
        let in_flight = self.readers.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_readers.fetch_max(in_flight, Ordering::SeqCst);

        let next = self.raw_events.lock().unwrap().pop_front();
        let delay = self.raw_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        } else if next.is_none() {
            // Behave like a driver with nothing to report
            std::thread::sleep(Duration::from_millis(5));
        }

        self.readers.fetch_sub(1, Ordering::SeqCst);
        Ok(next.unwrap_or_default())
    }

    fn configure_static(&self, _interface: &str, _config: &StaticAddressConfig) -> bool {
        self.record(DriverCall::ConfigureStatic);
        !self.static_fails.load(Ordering::SeqCst)
    }

    fn acquire_lease(&self, _interface: &str) -> Result<AddressLease> {
        self.record(DriverCall::AcquireLease);
        self.acquire_count.fetch_add(1, Ordering::SeqCst);

        let delay = self.lease_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        let lease = *self.lease.lock().unwrap();
        lease.ok_or_else(|| Error::addressing("no DHCP offer received"))
    }

    fn stop_addressing(&self, _interface: &str) -> bool {
        self.record(DriverCall::StopAddressing);
        true
    }

    fn reset_link_state(&self, _interface: &str) {
        self.record(DriverCall::ResetLinkState);
    }

    fn disable_interface(&self, _interface: &str) {
        self.record(DriverCall::DisableInterface);
    }

    fn last_error(&self) -> Option<String> {
        self.static_fails
            .load(Ordering::SeqCst)
            .then(|| "SIOCSIFADDR: Invalid argument".to_string())
    }
}

/// Lease handed out by the scripted DHCP server
pub fn dhcp_lease() -> AddressLease {
    AddressLease {
        address: Some(Ipv4Addr::new(10, 0, 0, 42)),
        gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
        netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
        dns1: Some(Ipv4Addr::new(10, 0, 0, 1)),
        dns2: None,
    }
}

/// A complete static configuration
pub fn static_config() -> StaticAddressConfig {
    StaticAddressConfig {
        use_static: true,
        lease: AddressLease {
            address: Some(Ipv4Addr::new(192, 168, 1, 20)),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            dns1: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns2: Some(Ipv4Addr::UNSPECIFIED),
        },
    }
}

/// Configuration with a fast monitor poll
pub fn test_config() -> LinkConfig {
    let mut config = LinkConfig::new().with_interface(IFACE);
    config.monitor.poll_interval_ms = 10;
    config
}

/// A tracker running on its own task
pub struct RunningTracker {
    pub handle: TrackerHandle,
    pub notifications: mpsc::Receiver<LinkNotification>,
    pub task: JoinHandle<Result<()>>,
}

impl RunningTracker {
    /// Drain every notification emitted so far
    pub fn drain(&mut self) -> Vec<LinkNotification> {
        let mut seen = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            seen.push(notification);
        }
        seen
    }

    /// Stop the tracker and wait for it
    pub async fn stop(self) {
        self.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("tracker stops within timeout")
            .expect("tracker task does not panic")
            .expect("tracker run succeeds");
    }
}

/// Start a tracker over `driver`
pub fn start_tracker(
    driver: &Arc<ScriptedDriver>,
    static_config: StaticAddressConfig,
) -> RunningTracker {
    let driver: Arc<dyn DriverControl> = driver.clone();
    let (tracker, handle, notifications) =
        LinkStateTracker::new(driver, static_config, &test_config())
            .expect("tracker construction succeeds");
    let task = tokio::spawn(tracker.run());

    RunningTracker {
        handle,
        notifications,
        task,
    }
}

/// Poll the status snapshot until `predicate` holds
pub async fn wait_for<F>(handle: &TrackerHandle, predicate: F) -> LinkStatus
where
    F: Fn(&LinkStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = handle.status();
        if predicate(&status) {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached, last status:\n{}", status);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give queued inputs time to be processed
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Detailed states carried by the broadcast notifications, in order
pub fn detailed_states(notifications: &[LinkNotification]) -> Vec<ethlink_core::DetailedState> {
    notifications
        .iter()
        .filter_map(|n| match n {
            LinkNotification::DetailedStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}
