// # sysfs Link Driver
//
// This crate provides a `DriverControl` implementation for Linux wired
// interfaces built on plain kernel interfaces:
//
// - Link state is read from `/sys/class/net/<interface>/{flags,carrier,operstate}`
//   and reported as raw `CTRL-EVENT-*` lines
// - Link, address, route and neighbour changes are rtnetlink requests
// - An optional kernel module is loaded and unloaded with `modprobe(8)`
// - Dynamic addressing runs an external one-shot DHCP client and reads
//   the resulting address and default route back over rtnetlink, and the
//   name servers from resolv.conf
//
// ## Platform Support
//
// The driver only works on Linux; construction fails elsewhere.

pub mod inspect;
mod netlink;

use ethlink_core::state::{AddressLease, StaticAddressConfig};
use ethlink_core::{DriverControl, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use netlink::Netlink;
use inspect::{classify_sysfs, parse_resolv_conf, read_ifindex, read_link};

/// How often a running DHCP client is checked for exit
const DHCP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// sysfs driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysfsConfig {
    /// Interface to drive
    pub interface: String,

    /// Root of the network class directory
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Kernel module to load on enable (none: the driver is built in)
    #[serde(default)]
    pub driver_module: Option<String>,

    /// One-shot DHCP client; the interface name is appended
    #[serde(default = "default_dhcp_command")]
    pub dhcp_command: Vec<String>,

    /// Resolver configuration written by static setup and read after DHCP
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,

    /// Prefix prepended to every raw event
    #[serde(default = "default_event_prefix")]
    pub event_prefix: String,
}

impl SysfsConfig {
    /// Configuration with defaults for `interface`
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            sysfs_root: default_sysfs_root(),
            driver_module: None,
            dhcp_command: default_dhcp_command(),
            resolv_conf: default_resolv_conf(),
            event_prefix: default_event_prefix(),
        }
    }
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/net")
}

fn default_dhcp_command() -> Vec<String> {
    ["udhcpc", "-n", "-q", "-f", "-i"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_resolv_conf() -> PathBuf {
    PathBuf::from("/etc/resolv.conf")
}

fn default_event_prefix() -> String {
    "CTRL-EVENT-".to_string()
}

/// A DHCP client process, keyed by the acquisition that started it
struct DhcpClient {
    attempt: u64,
    child: Child,
}

/// Link driver backed by sysfs and rtnetlink
pub struct SysfsDriver {
    config: SysfsConfig,
    netlink: Netlink,
    // Driver state changes reported ahead of the next sysfs reading
    pending: Mutex<VecDeque<&'static str>>,
    // Clients are reaped and removed under this lock only
    dhcp_clients: Mutex<Vec<DhcpClient>>,
    next_attempt: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl SysfsDriver {
    /// Create a driver for `config.interface`
    pub fn new(config: SysfsConfig) -> Result<Self> {
        if !cfg!(target_os = "linux") {
            return Err(Error::config("The sysfs link driver is only supported on Linux"));
        }
        if config.dhcp_command.is_empty() {
            return Err(Error::config("DHCP command cannot be empty"));
        }

        Ok(Self {
            config,
            netlink: Netlink::spawn()?,
            pending: Mutex::new(VecDeque::new()),
            dhcp_clients: Mutex::new(Vec::new()),
            next_attempt: AtomicU64::new(0),
            last_error: Mutex::new(None),
        })
    }

    /// The driven interface
    pub fn interface(&self) -> &str {
        &self.config.interface
    }

    fn interface_exists(&self) -> bool {
        self.config.sysfs_root.join(&self.config.interface).exists()
    }

    fn ifindex(&self, interface: &str) -> Result<u32> {
        read_ifindex(&self.config.sysfs_root, interface)
            .map_err(|e| Error::driver(format!("No interface index for {}: {}", interface, e)))
    }

    fn set_link(&self, interface: &str, up: bool) -> Result<()> {
        self.netlink.set_link(self.ifindex(interface)?, up)
    }

    fn dhcp_clients(&self) -> MutexGuard<'_, Vec<DhcpClient>> {
        self.dhcp_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Report a command outcome as `bool`, remembering the failure
    fn check<T>(&self, what: &str, result: Result<T>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("{} failed on {}: {}", what, self.config.interface, e);
                *self
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                false
            }
        }
    }

    fn push_pending(&self, event: &'static str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    fn apply_static(&self, config: &StaticAddressConfig) -> Result<()> {
        let lease = &config.lease;
        let (Some(address), Some(gateway), Some(prefix)) =
            (lease.address, lease.gateway, lease.prefix_len())
        else {
            return Err(Error::invalid_input(format!(
                "Incomplete static configuration: {}",
                lease
            )));
        };
        let index = self.ifindex(&self.config.interface)?;

        self.netlink.flush_addresses(index)?;
        self.netlink.add_address(index, address, prefix)?;
        self.netlink.replace_default_route(index, gateway)?;

        let resolv: String = lease
            .name_servers()
            .iter()
            .map(|ns| format!("nameserver {}\n", ns))
            .collect();
        fs::write(&self.config.resolv_conf, resolv)?;
        Ok(())
    }

    fn read_lease(&self, interface: &str) -> Result<AddressLease> {
        let index = self.ifindex(interface)?;

        let (address, prefix) = self.netlink.ipv4_address(index)?.ok_or_else(|| {
            Error::addressing(format!("No IPv4 address on {} after DHCP", interface))
        })?;
        let gateway = self.netlink.default_gateway(index)?;

        let name_servers = fs::read_to_string(&self.config.resolv_conf)
            .map(|content| parse_resolv_conf(&content))
            .unwrap_or_default();

        Ok(AddressLease {
            address: Some(address),
            gateway,
            netmask: Some(inspect::prefix_to_netmask(prefix)),
            dns1: name_servers.first().copied(),
            dns2: name_servers.get(1).copied(),
        })
    }

    /// Wait for the DHCP client of `attempt` to exit, reaping it
    fn wait_for_client(&self, attempt: u64) -> Result<ExitStatus> {
        loop {
            {
                let mut clients = self.dhcp_clients();
                let Some(position) = clients.iter().position(|c| c.attempt == attempt) else {
                    return Err(Error::addressing("DHCP client is no longer tracked"));
                };
                match clients[position].child.try_wait() {
                    Ok(Some(status)) => {
                        clients.remove(position);
                        return Ok(status);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        clients.remove(position);
                        return Err(e.into());
                    }
                }
            }
            thread::sleep(DHCP_POLL_INTERVAL);
        }
    }
}

impl DriverControl for SysfsDriver {
    fn load_driver(&self) -> bool {
        if let Some(module) = &self.config.driver_module {
            if !self.check("modprobe", run("modprobe", &[module.as_str()])) {
                return false;
            }
        }
        if !self.interface_exists() {
            let reason = format!("interface {} not present", self.config.interface);
            return self.check::<()>("load driver", Err(Error::driver(reason)));
        }
        true
    }

    fn unload_driver(&self) -> bool {
        match &self.config.driver_module {
            Some(module) => self.check("modprobe -r", run("modprobe", &["-r", module.as_str()])),
            None => true,
        }
    }

    fn start_driver(&self) -> bool {
        let started = self.check("start driver", self.set_link(&self.config.interface, true));
        if started {
            self.push_pending("DRIVER-STATE STARTED");
        }
        started
    }

    fn stop_driver(&self) -> bool {
        let stopped = self.check("stop driver", self.set_link(&self.config.interface, false));
        if stopped {
            self.push_pending("DRIVER-STATE STOPPED");
        }
        stopped
    }

    fn link_up(&self) -> bool {
        self.check("link up", self.set_link(&self.config.interface, true))
    }

    fn link_down(&self) -> bool {
        self.check("link down", self.set_link(&self.config.interface, false))
    }

    fn has_address(&self) -> bool {
        self.ifindex(&self.config.interface)
            .and_then(|index| self.netlink.ipv4_address(index))
            .is_ok_and(|address| address.is_some())
    }

    fn next_raw_event(&self) -> Result<String> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let name = match pending {
            Some(name) => name,
            None => {
                let link = read_link(&self.config.sysfs_root, &self.config.interface)?;
                classify_sysfs(link.as_ref())
            }
        };
        Ok(format!("{}{}", self.config.event_prefix, name))
    }

    fn configure_static(&self, interface: &str, config: &StaticAddressConfig) -> bool {
        info!("Applying static configuration to {}: {}", interface, config.lease);
        self.check("static configuration", self.apply_static(config))
    }

    fn acquire_lease(&self, interface: &str) -> Result<AddressLease> {
        let (program, args) = self
            .config
            .dhcp_command
            .split_first()
            .ok_or_else(|| Error::config("DHCP command cannot be empty"))?;

        let child = Command::new(program)
            .args(args)
            .arg(interface)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| Error::addressing(format!("Failed to run {}: {}", program, e)))?;

        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
        debug!("DHCP client {} started on {} (pid {})", attempt, interface, child.id());
        self.dhcp_clients().push(DhcpClient { attempt, child });

        let status = self.wait_for_client(attempt)?;
        if !status.success() {
            return Err(Error::addressing(format!("{} exited with {}", program, status)));
        }

        self.read_lease(interface)
    }

    fn stop_addressing(&self, interface: &str) -> bool {
        // Tracked clients are running or not yet reaped, so their pids
        // cannot have been reused
        self.dhcp_clients().iter().fold(true, |stopped, client| {
            debug!(
                "Stopping DHCP client {} on {} (pid {})",
                client.attempt,
                interface,
                client.child.id()
            );
            terminate(client.child.id()) && stopped
        })
    }

    fn reset_link_state(&self, interface: &str) {
        let flushed = self.ifindex(interface).and_then(|index| {
            self.netlink.flush_addresses(index)?;
            self.netlink.flush_neighbours(index)
        });
        let _ = self.check("link state flush", flushed);
    }

    fn disable_interface(&self, interface: &str) {
        let _ = self.check("disable", self.set_link(interface, false));
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run a command, returning its stdout
fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::driver(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(Error::driver(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(target_os = "linux")]
fn terminate(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory safety requirements
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(target_os = "linux"))]
fn terminate(_pid: u32) -> bool {
    false
}
