//! Minimal embedding example for ethlink-core
//!
//! Runs the link manager against a simulated cable: plug, DHCP, a switch
//! to static addressing, unplug, and finally disable. The tracker lifecycle
//! is fully managed by the application.

use ethlink_core::settings::{MemorySettingsSource, SettingsWatcher};
use ethlink_core::state::{AddressLease, StaticAddressConfig};
use ethlink_core::tracker::LinkStateTracker;
use ethlink_core::{DriverControl, LinkConfig, Result, SettingsSource};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Driver that replays a scripted cable and answers DHCP after a delay
struct SimulatedCable {
    events: Mutex<VecDeque<&'static str>>,
}

impl SimulatedCable {
    fn new(events: &[&'static str]) -> Self {
        Self {
            events: Mutex::new(events.iter().copied().collect()),
        }
    }

    fn plug(&self, event: &'static str) {
        if let Ok(mut events) = self.events.lock() {
            events.push_back(event);
        }
    }
}

impl DriverControl for SimulatedCable {
    fn load_driver(&self) -> bool {
        println!("[Driver] load");
        true
    }

    fn unload_driver(&self) -> bool {
        println!("[Driver] unload");
        true
    }

    fn start_driver(&self) -> bool {
        true
    }

    fn stop_driver(&self) -> bool {
        true
    }

    fn link_up(&self) -> bool {
        println!("[Driver] link up");
        true
    }

    fn link_down(&self) -> bool {
        true
    }

    fn has_address(&self) -> bool {
        false
    }

    fn next_raw_event(&self) -> Result<String> {
        let next = self.events.lock().ok().and_then(|mut e| e.pop_front());
        Ok(next.map(|e| format!("CTRL-EVENT-{}", e)).unwrap_or_default())
    }

    fn configure_static(&self, interface: &str, config: &StaticAddressConfig) -> bool {
        println!("[Driver] static {} on {}", config.lease, interface);
        true
    }

    fn acquire_lease(&self, interface: &str) -> Result<AddressLease> {
        println!("[Driver] DHCP on {}...", interface);
        std::thread::sleep(Duration::from_millis(200));
        Ok(AddressLease {
            address: Some(Ipv4Addr::new(10, 0, 0, 42)),
            gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            dns1: Some(Ipv4Addr::new(10, 0, 0, 1)),
            dns2: None,
        })
    }

    fn stop_addressing(&self, _interface: &str) -> bool {
        true
    }

    fn reset_link_state(&self, interface: &str) {
        println!("[Driver] reset {}", interface);
    }

    fn disable_interface(&self, interface: &str) {
        println!("[Driver] disable {}", interface);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Embedded ethlink-core Example ===\n");

    let cable = Arc::new(SimulatedCable::new(&[
        "UNPLUGGED_AND_DOWN",
        "PLUGGED_AND_DOWN",
        "PLUGGED_AND_UP",
    ]));
    let settings = Arc::new(MemorySettingsSource::new());

    let mut config = LinkConfig::new().with_interface("eth0");
    config.monitor.poll_interval_ms = 100;

    println!("1. Creating tracker...");
    let (tracker, handle, mut notifications) =
        LinkStateTracker::new(cable.clone(), StaticAddressConfig::dynamic(), &config)?;
    let watcher = SettingsWatcher::new(settings.clone(), handle.sender()).await?;

    let listener = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            println!("[Notification] {:?}", notification);
        }
    });
    let tracker_task = tokio::spawn(tracker.run());
    let watcher_task = watcher.spawn();

    println!("2. Enabling link...");
    handle.enable().await;
    tokio::time::sleep(Duration::from_millis(800)).await;
    println!("\n{}\n", handle.status());

    println!("3. Switching to static addressing...");
    for (key, value) in [
        ("static_ip", "192.168.1.20"),
        ("static_gateway", "192.168.1.1"),
        ("static_netmask", "255.255.255.0"),
        ("static_dns1", "192.168.1.1"),
        ("use_static_ip", "1"),
    ] {
        settings.set(key, Some(value.to_string())).await?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("\n{}\n", handle.status());

    println!("4. Unplugging cable...");
    cable.plug("UNPLUGGED_AND_DOWN");
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("\n{}\n", handle.status());

    println!("5. Disabling link...");
    handle.disable().await;
    handle.shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(1), tracker_task).await;
    watcher_task.abort();
    listener.abort();

    println!("\n=== Embedding Successful ===");
    Ok(())
}
