//! Contract Test: Link Lifecycle
//!
//! Drives the tracker with link events and verifies the resulting state
//! transitions, driver commands and broadcasts.
//!
//! Constraints verified:
//! - A plugged link walks Connecting → ObtainingAddress → Connected
//! - Every processing step broadcasts at most once
//! - Losing the link resets addressing state and the lease
//! - Results of superseded addressing attempts are discarded
//! - The meaning of PluggedDown / Unknown depends on the previous event

mod common;

use common::*;
use ethlink_core::tracker::{LinkNotification, TrackerInput};
use ethlink_core::{AddressLease, DetailedState, LinkEvent, RunState, StaticAddressConfig};
use std::time::Duration;

#[tokio::test]
async fn plugged_up_acquires_address_and_connects() {
    let driver = ScriptedDriver::new();
    let mut tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();

    let status = wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::Connected
    })
    .await;

    assert!(status.have_address);
    assert!(!status.obtaining_address);
    assert_eq!(status.run_state, RunState::Running);
    assert_eq!(status.lease, dhcp_lease());
    assert_eq!(driver.acquire_count(), 1);
    assert!(driver.calls().contains(&DriverCall::LinkUp));

    let notifications = tracker.drain();
    assert_eq!(
        detailed_states(&notifications),
        vec![
            DetailedState::Connecting,
            DetailedState::ObtainingAddress,
            DetailedState::Connected
        ]
    );
    assert_eq!(
        notifications.last(),
        Some(&LinkNotification::DetailedStateChanged {
            state: DetailedState::Connected,
            lease: dhcp_lease(),
        })
    );

    tracker.stop().await;
}

#[tokio::test]
async fn unplugging_a_connected_link_broadcasts_exactly_once() {
    let driver = ScriptedDriver::new();
    let mut tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Connected).await;
    tracker.drain();

    tracker.handle.post(LinkEvent::UnpluggedDown).unwrap();
    let status = wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::Disconnected
    })
    .await;
    settle().await;

    assert!(!status.have_address);
    assert!(!status.obtaining_address);
    assert!(status.lease.is_empty());
    assert_eq!(status.run_state, RunState::Stopped);

    assert_eq!(
        tracker.drain(),
        vec![LinkNotification::DetailedStateChanged {
            state: DetailedState::Disconnected,
            lease: AddressLease::default(),
        }]
    );
    assert_eq!(driver.count(DriverCall::ResetLinkState), 1);
    assert_eq!(driver.count(DriverCall::StopAddressing), 1);

    tracker.stop().await;
}

#[tokio::test]
async fn existing_address_connects_without_dhcp() {
    let driver = ScriptedDriver::new();
    driver.set_has_address(true);
    let mut tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    let status = wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::Connected
    })
    .await;
    settle().await;

    assert!(status.have_address);
    assert_eq!(driver.acquire_count(), 0);
    // Connecting and Connected happened in one step: one broadcast
    assert_eq!(
        detailed_states(&tracker.drain()),
        vec![DetailedState::Connected]
    );

    tracker.stop().await;
}

#[tokio::test]
async fn dhcp_failure_lands_in_failed() {
    let driver = ScriptedDriver::new();
    driver.fail_dhcp();
    let mut tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    let status = wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Failed).await;

    assert!(!status.have_address);
    assert!(!status.obtaining_address);
    assert_eq!(status.run_state, RunState::Stopped);
    assert_eq!(
        detailed_states(&tracker.drain()),
        vec![
            DetailedState::Connecting,
            DetailedState::ObtainingAddress,
            DetailedState::Failed
        ]
    );

    tracker.stop().await;
}

#[tokio::test]
async fn static_configuration_skips_dhcp() {
    let driver = ScriptedDriver::new();
    let mut tracker = start_tracker(&driver, static_config());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    let status = wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::Connected
    })
    .await;

    assert_eq!(status.lease, static_config().lease);
    assert_eq!(driver.count(DriverCall::ConfigureStatic), 1);
    assert_eq!(driver.acquire_count(), 0);
    assert_eq!(
        detailed_states(&tracker.drain()),
        vec![DetailedState::Connecting, DetailedState::Connected]
    );

    tracker.stop().await;
}

#[tokio::test]
async fn rejected_static_configuration_fails() {
    let driver = ScriptedDriver::new();
    driver.fail_static();
    let tracker = start_tracker(&driver, static_config());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    let status = wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Failed).await;

    assert!(!status.have_address);
    assert!(status.lease.is_empty());

    tracker.stop().await;
}

#[tokio::test]
async fn completion_of_cancelled_attempt_is_discarded() {
    let driver = ScriptedDriver::new();
    driver.delay_dhcp(Duration::from_millis(200));
    let mut tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    // Both land in the queue before the DHCP thread can report back
    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    tracker.handle.post(LinkEvent::UnpluggedDown).unwrap();

    wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::Disconnected && s.run_state == RunState::Stopped
    })
    .await;

    // Let the superseded request finish
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = tracker.handle.status();
    assert_eq!(status.detailed_state, DetailedState::Disconnected);
    assert!(!status.have_address);
    assert!(status.lease.is_empty());
    assert_eq!(driver.acquire_count(), 1);
    assert_eq!(
        detailed_states(&tracker.drain()),
        vec![DetailedState::Connecting, DetailedState::Disconnected]
    );

    tracker.stop().await;
}

#[tokio::test]
async fn only_the_latest_attempt_may_connect() {
    let driver = ScriptedDriver::new();
    driver.delay_dhcp(Duration::from_millis(100));
    let mut tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::ObtainingAddress
    })
    .await;

    // A settings change on a running link restarts addressing
    tracker
        .handle
        .sender()
        .send(TrackerInput::StaticConfigChanged(StaticAddressConfig::dynamic()))
        .unwrap();

    wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Connected).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(driver.acquire_count(), 2);
    let connected = detailed_states(&tracker.drain())
        .into_iter()
        .filter(|s| *s == DetailedState::Connected)
        .count();
    assert_eq!(connected, 1);

    tracker.stop().await;
}

#[tokio::test]
async fn plugged_down_right_after_unplug_brings_link_up() {
    let driver = ScriptedDriver::new();
    let tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedDown).unwrap();
    let status = wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::Connecting
    })
    .await;

    assert_eq!(status.run_state, RunState::Stopped);
    assert_eq!(driver.count(DriverCall::LinkUp), 1);
    assert_eq!(driver.count(DriverCall::ResetLinkState), 0);

    tracker.stop().await;
}

#[tokio::test]
async fn plugged_down_on_a_live_link_tears_down() {
    let driver = ScriptedDriver::new();
    let tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Connected).await;

    tracker.handle.post(LinkEvent::PluggedDown).unwrap();
    let status = wait_for(&tracker.handle, |s| {
        s.detailed_state == DetailedState::Disconnected
    })
    .await;

    assert_eq!(status.run_state, RunState::Stopped);
    assert!(!status.have_address);
    assert_eq!(driver.count(DriverCall::LinkUp), 1);
    assert_eq!(driver.count(DriverCall::ResetLinkState), 1);

    tracker.stop().await;
}

#[tokio::test]
async fn driver_error_fails_a_connected_link() {
    let driver = ScriptedDriver::new();
    let tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Connected).await;

    tracker.handle.post(LinkEvent::Error).unwrap();
    let status = wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Failed).await;

    assert!(!status.have_address);
    assert!(status.lease.is_empty());

    tracker.stop().await;
}

#[tokio::test]
async fn reset_connections_is_idempotent() {
    let driver = ScriptedDriver::new();
    let tracker = start_tracker(&driver, StaticAddressConfig::dynamic());

    tracker.handle.post(LinkEvent::PluggedUp).unwrap();
    wait_for(&tracker.handle, |s| s.detailed_state == DetailedState::Connected).await;

    tracker.handle.reset_connections(false).await.unwrap();
    let first = tracker.handle.status();
    tracker.handle.reset_connections(false).await.unwrap();
    let second = tracker.handle.status();

    assert!(!first.have_address);
    assert!(!first.obtaining_address);
    assert!(first.lease.is_empty());
    assert_eq!(first, second);
    assert_eq!(driver.count(DriverCall::DisableInterface), 0);

    tracker.handle.reset_connections(true).await.unwrap();
    assert_eq!(driver.count(DriverCall::DisableInterface), 1);

    tracker.stop().await;
}
