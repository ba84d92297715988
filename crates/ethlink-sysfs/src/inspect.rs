//! Readers and parsers for the kernel's view of a link
//!
//! Everything here is pure or reads plain files, so it is testable against
//! a fake sysfs tree.

use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;

/// `IFF_UP` from `<net/if.h>`
const IFF_UP: u32 = 0x1;

/// Link state as exposed under `/sys/class/net/<interface>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// Administratively up
    pub admin_up: bool,
    /// Carrier detected; `None` when the kernel refuses to say (link down)
    pub carrier: Option<bool>,
    /// Contents of `operstate`
    pub operstate: String,
}

/// Read the link state of `interface` below `root`
///
/// Returns `Ok(None)` when the interface does not exist.
pub fn read_link(root: &Path, interface: &str) -> io::Result<Option<LinkSnapshot>> {
    let dir = root.join(interface);
    if !dir.exists() {
        return Ok(None);
    }

    let flags = fs::read_to_string(dir.join("flags"))?;
    let flags = u32::from_str_radix(flags.trim().trim_start_matches("0x"), 16)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    // Reading carrier on a down link fails with EINVAL
    let carrier = fs::read_to_string(dir.join("carrier"))
        .ok()
        .and_then(|c| match c.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        });

    let operstate = fs::read_to_string(dir.join("operstate"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    Ok(Some(LinkSnapshot {
        admin_up: flags & IFF_UP != 0,
        carrier,
        operstate,
    }))
}

/// Map a snapshot to a raw event name understood by the link monitor
pub fn classify_sysfs(snapshot: Option<&LinkSnapshot>) -> &'static str {
    let Some(link) = snapshot else {
        return "DRIVER-STATE STOPPED";
    };

    match (link.admin_up, link.carrier) {
        (true, Some(true)) => "PLUGGED_AND_UP",
        (true, Some(false)) => "UNPLUGGED_AND_UP",
        (false, Some(false)) => "UNPLUGGED_AND_DOWN",
        (false, _) => "PLUGGED_AND_DOWN",
        (true, None) if link.operstate == "unknown" => "UNKNOWN",
        (true, None) => "UNPLUGGED_AND_UP",
    }
}

/// Netmask for a prefix length
pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    let bits = u32::MAX.checked_shl(32 - u32::from(prefix.min(32))).unwrap_or(0);
    Ipv4Addr::from(bits)
}

/// Kernel interface index of `interface` below `root`
pub fn read_ifindex(root: &Path, interface: &str) -> io::Result<u32> {
    let index = fs::read_to_string(root.join(interface).join("ifindex"))?;
    index
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// IPv4 name servers listed in a resolv.conf
pub fn parse_resolv_conf(content: &str) -> Vec<Ipv4Addr> {
    content
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            if words.next()? != "nameserver" {
                return None;
            }
            words.next()?.parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_link(root: &Path, iface: &str, flags: &str, carrier: Option<&str>, operstate: &str) {
        let dir = root.join(iface);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("flags"), flags).unwrap();
        if let Some(carrier) = carrier {
            fs::write(dir.join("carrier"), carrier).unwrap();
        }
        fs::write(dir.join("operstate"), operstate).unwrap();
    }

    #[test]
    fn test_read_link_from_fake_sysfs() {
        let root = tempdir().unwrap();
        write_link(root.path(), "eth0", "0x1003\n", Some("1\n"), "up\n");

        let link = read_link(root.path(), "eth0").unwrap().unwrap();
        assert!(link.admin_up);
        assert_eq!(link.carrier, Some(true));
        assert_eq!(link.operstate, "up");
        assert_eq!(classify_sysfs(Some(&link)), "PLUGGED_AND_UP");

        assert_eq!(read_link(root.path(), "eth1").unwrap(), None);
    }

    #[test]
    fn test_classify_sysfs() {
        let link = |admin_up, carrier, operstate: &str| LinkSnapshot {
            admin_up,
            carrier,
            operstate: operstate.to_string(),
        };

        assert_eq!(classify_sysfs(None), "DRIVER-STATE STOPPED");
        assert_eq!(
            classify_sysfs(Some(&link(true, Some(false), "down"))),
            "UNPLUGGED_AND_UP"
        );
        assert_eq!(
            classify_sysfs(Some(&link(false, None, "down"))),
            "PLUGGED_AND_DOWN"
        );
        assert_eq!(
            classify_sysfs(Some(&link(false, Some(false), "down"))),
            "UNPLUGGED_AND_DOWN"
        );
        assert_eq!(
            classify_sysfs(Some(&link(true, None, "unknown"))),
            "UNKNOWN"
        );
    }

    #[test]
    fn test_prefix_to_netmask() {
        assert_eq!(prefix_to_netmask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix_to_netmask(0), Ipv4Addr::UNSPECIFIED);
        assert_eq!(prefix_to_netmask(32), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_read_ifindex() {
        let root = tempdir().unwrap();
        write_link(root.path(), "eth0", "0x1003\n", Some("1\n"), "up\n");
        fs::write(root.path().join("eth0").join("ifindex"), "2\n").unwrap();

        assert_eq!(read_ifindex(root.path(), "eth0").unwrap(), 2);
        assert!(read_ifindex(root.path(), "eth1").is_err());

        fs::write(root.path().join("eth0").join("ifindex"), "two\n").unwrap();
        assert_eq!(
            read_ifindex(root.path(), "eth0").unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_parse_resolv_conf() {
        let content = "# generated\nsearch lan\n\
                       nameserver 10.0.0.1\nnameserver fe80::1\nnameserver 1.1.1.1\n";
        assert_eq!(
            parse_resolv_conf(content),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(1, 1, 1, 1)]
        );
    }
}
