// # Driver Control Trait
//
// Defines the opaque command surface of the link driver and the
// addressing primitives the link manager orchestrates.
//
// ## Implementations
//
// - Linux sysfs + rtnetlink: `ethlink-sysfs` crate
// - Test doubles: `tests/common/mod.rs`
//
// ## Usage
//
// ```rust,ignore
// use ethlink_core::DriverControl;
//
// fn bring_up(driver: &dyn DriverControl) -> bool {
//     driver.load_driver() && driver.start_driver() && driver.link_up()
// }
// ```

use crate::state::{AddressLease, StaticAddressConfig};

/// Trait for link driver implementations
///
/// All methods are synchronous and may block briefly. Callers must not
/// issue commands concurrently from more than one context: the tracker
/// serializes its own calls on its processing path. Two calls are
/// independent of that serialization:
///
/// - [`next_raw_event`](DriverControl::next_raw_event), read by the link
///   monitor on its own task
/// - [`acquire_lease`](DriverControl::acquire_lease), run by the addressing
///   worker on a blocking thread
///
/// Command failures are reported as `false` and never panic.
pub trait DriverControl: Send + Sync {
    /// Load the driver and firmware
    fn load_driver(&self) -> bool;

    /// Unload the driver and firmware
    fn unload_driver(&self) -> bool;

    /// Start the driver
    fn start_driver(&self) -> bool;

    /// Stop the driver
    fn stop_driver(&self) -> bool;

    /// Bring the link up
    fn link_up(&self) -> bool;

    /// Bring the link down
    fn link_down(&self) -> bool;

    /// Whether the interface already carries an address
    fn has_address(&self) -> bool;

    /// Block until the next raw status event is available
    ///
    /// Raw events look like `CTRL-EVENT-PLUGGED_AND_UP` or
    /// `CTRL-EVENT-DRIVER-STATE STOPPED`. An empty string is a valid
    /// (discarded) reading.
    fn next_raw_event(&self) -> crate::Result<String>;

    /// Apply a static address configuration synchronously
    fn configure_static(&self, interface: &str, config: &StaticAddressConfig) -> bool;

    /// Run the dynamic address acquisition protocol (blocking)
    fn acquire_lease(&self, interface: &str) -> crate::Result<AddressLease>;

    /// Stop any dynamic addressing client running on the interface
    fn stop_addressing(&self, interface: &str) -> bool;

    /// Flush link-layer and socket state bound to the interface
    fn reset_link_state(&self, interface: &str);

    /// Administratively disable the interface
    fn disable_interface(&self, interface: &str);

    /// Description of the last failure, if the driver keeps one
    fn last_error(&self) -> Option<String> {
        None
    }
}
