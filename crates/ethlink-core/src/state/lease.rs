//! Addressing data model
//!
//! [`AddressLease`] is what a successful acquisition yields, whether it came
//! from DHCP or from static configuration. [`StaticSettings`] is the raw
//! key/value view of the six static-address settings, and
//! [`StaticAddressConfig`] is the validated form derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// IPv4 configuration of the link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressLease {
    pub address: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
}

impl AddressLease {
    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Prefix length of the netmask, if it is a contiguous mask
    pub fn prefix_len(&self) -> Option<u8> {
        let mask = u32::from(self.netmask?);
        let ones = mask.leading_ones();
        if mask.checked_shl(ones).unwrap_or(0) != 0 {
            return None;
        }
        Some(ones as u8)
    }

    /// DNS servers present in the lease, in order, with no holes
    pub fn name_servers(&self) -> Vec<Ipv4Addr> {
        [self.dns1, self.dns2]
            .into_iter()
            .flatten()
            .filter(|addr| !addr.is_unspecified())
            .collect()
    }
}

impl fmt::Display for AddressLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(addr: Option<Ipv4Addr>) -> String {
            addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
        }
        write!(
            f,
            "ipaddr {} gateway {} netmask {} dns1 {} dns2 {}",
            show(self.address),
            show(self.gateway),
            show(self.netmask),
            show(self.dns1),
            show(self.dns2)
        )
    }
}

/// Raw static addressing settings as stored by the settings source
///
/// Every field is an optional string; absent or unparsable values mean
/// "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_static_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_netmask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dns1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dns2: Option<String>,
}

impl StaticSettings {
    /// Setting keys, in storage order
    pub const KEYS: [&'static str; 6] = [
        "use_static_ip",
        "static_ip",
        "static_gateway",
        "static_netmask",
        "static_dns1",
        "static_dns2",
    ];

    /// Read one setting by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.slot(key).and_then(|v| v.as_deref())
    }

    /// Write one setting by key; `None` removes it
    pub fn set(&mut self, key: &str, value: Option<String>) -> Result<(), crate::Error> {
        let slot = self
            .slot_mut(key)
            .ok_or_else(|| crate::Error::invalid_input(format!("Unknown setting key: {}", key)))?;
        *slot = value;
        Ok(())
    }

    fn slot(&self, key: &str) -> Option<&Option<String>> {
        match key {
            "use_static_ip" => Some(&self.use_static_ip),
            "static_ip" => Some(&self.static_ip),
            "static_gateway" => Some(&self.static_gateway),
            "static_netmask" => Some(&self.static_netmask),
            "static_dns1" => Some(&self.static_dns1),
            "static_dns2" => Some(&self.static_dns2),
            _ => None,
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "use_static_ip" => Some(&mut self.use_static_ip),
            "static_ip" => Some(&mut self.static_ip),
            "static_gateway" => Some(&mut self.static_gateway),
            "static_netmask" => Some(&mut self.static_netmask),
            "static_dns1" => Some(&mut self.static_dns1),
            "static_dns2" => Some(&mut self.static_dns2),
            _ => None,
        }
    }
}

/// Validated static addressing configuration
///
/// Invariant: when `use_static` is true, `address`, `gateway`, `netmask`
/// and `dns1` of the lease are all present; `dns2` defaults to `0.0.0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAddressConfig {
    pub use_static: bool,
    pub lease: AddressLease,
}

impl StaticAddressConfig {
    /// Dynamic addressing (no static override)
    pub fn dynamic() -> Self {
        Self::default()
    }

    /// Derive the configuration from raw settings
    ///
    /// Falls back to dynamic addressing when the flag is off, when any of
    /// the four mandatory fields is missing or unparsable, or when `dns2`
    /// is present but unparsable.
    pub fn from_settings(settings: &StaticSettings) -> Self {
        Self::parse(settings).unwrap_or_default()
    }

    fn parse(settings: &StaticSettings) -> Option<Self> {
        if !parse_flag(settings.use_static_ip.as_deref()) {
            return None;
        }

        let address = parse_ipv4(settings.static_ip.as_deref())?;
        let gateway = parse_ipv4(settings.static_gateway.as_deref())?;
        let netmask = parse_ipv4(settings.static_netmask.as_deref())?;
        let dns1 = parse_ipv4(settings.static_dns1.as_deref())?;
        let dns2 = match settings.static_dns2.as_deref() {
            None => Ipv4Addr::UNSPECIFIED,
            value => parse_ipv4(value)?,
        };

        Some(Self {
            use_static: true,
            lease: AddressLease {
                address: Some(address),
                gateway: Some(gateway),
                netmask: Some(netmask),
                dns1: Some(dns1),
                dns2: Some(dns2),
            },
        })
    }

    /// Whether switching from `previous` to `self` requires reconfiguring
    /// the link.
    ///
    /// A flip of the static flag always counts; field changes only count
    /// while static mode was active.
    pub fn differs_materially(&self, previous: &StaticAddressConfig) -> bool {
        self.use_static != previous.use_static
            || (previous.use_static && self.lease != previous.lease)
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .is_some_and(|v| v != 0)
}

fn parse_ipv4(value: Option<&str>) -> Option<Ipv4Addr> {
    value?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_settings() -> StaticSettings {
        StaticSettings {
            use_static_ip: Some("1".to_string()),
            static_ip: Some("192.168.1.20".to_string()),
            static_gateway: Some("192.168.1.1".to_string()),
            static_netmask: Some("255.255.255.0".to_string()),
            static_dns1: Some("192.168.1.1".to_string()),
            static_dns2: Some("8.8.8.8".to_string()),
        }
    }

    #[test]
    fn test_complete_settings_enable_static() {
        let config = StaticAddressConfig::from_settings(&full_settings());
        assert!(config.use_static);
        assert_eq!(config.lease.address, Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(config.lease.dns2, Some(Ipv4Addr::new(8, 8, 8, 8)));
        assert_eq!(config.lease.prefix_len(), Some(24));
    }

    #[test]
    fn test_missing_dns2_defaults_to_zero() {
        let mut settings = full_settings();
        settings.static_dns2 = None;

        let config = StaticAddressConfig::from_settings(&settings);
        assert!(config.use_static);
        assert_eq!(config.lease.dns2, Some(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.lease.name_servers(), vec![Ipv4Addr::new(192, 168, 1, 1)]);
    }

    #[test]
    fn test_unparsable_dns2_forces_dynamic() {
        let mut settings = full_settings();
        settings.static_dns2 = Some("8.8.8".to_string());

        let config = StaticAddressConfig::from_settings(&settings);
        assert!(!config.use_static);
        assert!(config.lease.is_empty());
    }

    #[test]
    fn test_missing_mandatory_field_forces_dynamic() {
        for key in ["static_ip", "static_gateway", "static_netmask", "static_dns1"] {
            let mut settings = full_settings();
            settings.set(key, None).unwrap();
            let config = StaticAddressConfig::from_settings(&settings);
            assert!(!config.use_static, "missing {} must disable static mode", key);
            assert!(config.lease.is_empty());
        }
    }

    #[test]
    fn test_unparsable_values_force_dynamic() {
        let mut settings = full_settings();
        settings.static_gateway = Some("192.168.1".to_string());
        assert!(!StaticAddressConfig::from_settings(&settings).use_static);

        let mut settings = full_settings();
        settings.use_static_ip = Some("yes".to_string());
        assert!(!StaticAddressConfig::from_settings(&settings).use_static);

        let mut settings = full_settings();
        settings.use_static_ip = Some("0".to_string());
        assert!(!StaticAddressConfig::from_settings(&settings).use_static);
    }

    #[test]
    fn test_material_difference() {
        let dynamic = StaticAddressConfig::dynamic();
        let static_cfg = StaticAddressConfig::from_settings(&full_settings());

        assert!(static_cfg.differs_materially(&dynamic));
        assert!(dynamic.differs_materially(&static_cfg));
        assert!(!static_cfg.differs_materially(&static_cfg));
        assert!(!dynamic.differs_materially(&dynamic));

        let mut changed = static_cfg;
        changed.lease.gateway = Some(Ipv4Addr::new(192, 168, 1, 254));
        assert!(changed.differs_materially(&static_cfg));
    }

    #[test]
    fn test_settings_key_access() {
        let mut settings = StaticSettings::default();
        settings
            .set("static_netmask", Some("255.255.0.0".to_string()))
            .unwrap();
        assert_eq!(settings.get("static_netmask"), Some("255.255.0.0"));
        assert!(settings.set("static_mtu", Some("1500".to_string())).is_err());
        assert_eq!(settings.get("static_mtu"), None);
    }

    #[test]
    fn test_non_contiguous_netmask_has_no_prefix() {
        let lease = AddressLease {
            netmask: Some(Ipv4Addr::new(255, 0, 255, 0)),
            ..Default::default()
        };
        assert_eq!(lease.prefix_len(), None);

        let lease = AddressLease {
            netmask: Some(Ipv4Addr::new(255, 255, 255, 255)),
            ..Default::default()
        };
        assert_eq!(lease.prefix_len(), Some(32));
    }
}
