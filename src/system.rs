//! Host inspection
//!
//! Live interface state comes from `/sys/class/net` and is never cached
//! across operations. The sysfs root is relocatable so everything above it
//! can run against a fake tree.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{ControlError, Result};
use crate::mac::MacAddress;

/// ARPHRD value for a raw 802.11 interface
pub const ARPHRD_IEEE80211: u32 = 801;
/// ARPHRD value for a monitor-mode interface with radiotap headers
pub const ARPHRD_IEEE80211_RADIOTAP: u32 = 803;

const DEFAULT_NET_ROOT: &str = "/sys/class/net";
const DEFAULT_STATE_ROOT: &str = "/var/lib/shroud";
const ROOT_ENV: &str = "SHROUD_ROOT";

/// Reader for per-interface kernel state
#[derive(Debug, Clone)]
pub struct NetSysfs {
    root: PathBuf,
}

impl Default for NetSysfs {
    fn default() -> Self {
        Self::new()
    }
}

impl NetSysfs {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_NET_ROOT),
        }
    }

    /// Use a different tree root (fake sysfs in tests)
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn iface_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.iface_dir(name).is_dir()
    }

    /// Current hardware address of the interface
    pub fn mac(&self, name: &str) -> Result<MacAddress> {
        let dir = self.iface_dir(name);
        if !dir.is_dir() {
            return Err(ControlError::InterfaceNotFound(name.to_string()));
        }
        let content = fs::read_to_string(dir.join("address"))?;
        content.trim().parse()
    }

    /// Raw ARPHRD type of the interface
    ///
    /// 801/803 mean the interface is in monitor mode; unparsable content is
    /// treated as 0.
    pub fn arphrd_type(&self, name: &str) -> Result<u32> {
        let dir = self.iface_dir(name);
        if !dir.is_dir() {
            return Err(ControlError::InterfaceNotFound(name.to_string()));
        }
        let content = fs::read_to_string(dir.join("type"))?;
        Ok(content.trim().parse().unwrap_or(0))
    }

    #[must_use]
    pub fn is_wireless(&self, name: &str) -> bool {
        let dir = self.iface_dir(name);
        dir.join("wireless").exists() || dir.join("phy80211").exists()
    }

    fn oper_state(&self, name: &str) -> String {
        fs::read_to_string(self.iface_dir(name).join("operstate"))
            .unwrap_or_else(|_| "unknown".into())
            .trim()
            .to_string()
    }

    /// Interface names only, for before/after set comparisons
    pub fn names(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                names.insert(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }

    /// Enumerate interfaces, name-sorted
    pub fn list(&self) -> Result<Vec<InterfaceSummary>> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = if self.is_wireless(&name) {
                "wireless".to_string()
            } else {
                "wired".to_string()
            };
            let mode = match self.arphrd_type(&name) {
                Ok(ARPHRD_IEEE80211 | ARPHRD_IEEE80211_RADIOTAP) => "monitor".to_string(),
                _ => "managed".to_string(),
            };
            let mac = self.mac(&name).map(|m| m.to_string()).ok();
            summaries.push(InterfaceSummary {
                oper_state: self.oper_state(&name),
                name,
                kind,
                mode,
                mac,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[derive(Debug, Serialize)]
pub struct InterfaceSummary {
    pub name: String,
    pub kind: String,
    pub mode: String,
    pub mac: Option<String>,
    pub oper_state: String,
}

/// Resolve the state directory: explicit flag, then `SHROUD_ROOT`, then the
/// packaged default
#[must_use]
pub fn resolve_root(input: Option<PathBuf>) -> PathBuf {
    if let Some(path) = input {
        return path;
    }
    if let Ok(env_path) = env::var(ROOT_ENV) {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_STATE_ROOT)
}

#[must_use]
pub fn euid_is_root() -> bool {
    // SAFETY: geteuid cannot fail and touches no memory.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
pub(crate) fn write_fake_iface(
    root: &std::path::Path,
    name: &str,
    mac: &str,
    arphrd: u32,
    wireless: bool,
) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("address"), format!("{mac}\n")).unwrap();
    fs::write(dir.join("type"), format!("{arphrd}\n")).unwrap();
    fs::write(dir.join("operstate"), "up\n").unwrap();
    if wireless {
        fs::create_dir_all(dir.join("wireless")).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mac_and_type_reads() {
        let dir = TempDir::new().unwrap();
        write_fake_iface(dir.path(), "wlan0", "aa:bb:cc:dd:ee:ff", 1, true);

        let net = NetSysfs::with_root(dir.path());
        assert_eq!(net.mac("wlan0").unwrap().to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(net.arphrd_type("wlan0").unwrap(), 1);
        assert!(net.is_wireless("wlan0"));
    }

    #[test]
    fn test_missing_interface() {
        let dir = TempDir::new().unwrap();
        let net = NetSysfs::with_root(dir.path());
        let err = net.mac("wlan9").unwrap_err();
        assert!(matches!(err, ControlError::InterfaceNotFound(_)));
    }

    #[test]
    fn test_list_sorted_with_modes() {
        let dir = TempDir::new().unwrap();
        write_fake_iface(dir.path(), "wlan0", "aa:bb:cc:dd:ee:ff", 803, true);
        write_fake_iface(dir.path(), "eth0", "00:11:22:33:44:55", 1, false);

        let net = NetSysfs::with_root(dir.path());
        let list = net.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "eth0");
        assert_eq!(list[0].kind, "wired");
        assert_eq!(list[0].mode, "managed");
        assert_eq!(list[1].name, "wlan0");
        assert_eq!(list[1].kind, "wireless");
        assert_eq!(list[1].mode, "monitor");
        assert_eq!(list[1].mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_resolve_root_explicit_wins() {
        let root = resolve_root(Some(PathBuf::from("/tmp/somewhere")));
        assert_eq!(root, PathBuf::from("/tmp/somewhere"));
    }
}
