//! Capability detection
//!
//! Discovers which backend binary serves each logical operation by probing
//! ordered candidate paths. Probing is read-only: a candidate is usable when
//! it is a regular file with an execute bit, and nothing is ever spawned
//! here. The resulting table is fixed for the session.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::error::{ControlError, Result};

/// A logical privileged operation that needs an external backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ModeSwitch,
    MacSpoof,
    LogVacuum,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::ModeSwitch => "mode_switch",
            Capability::MacSpoof => "mac_spoof",
            Capability::LogVacuum => "log_vacuum",
        };
        f.write_str(name)
    }
}

/// Which concrete tool a backend resolves to
///
/// The invocation templates in the state machine and sanitizer key off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    AirmonNg,
    Iw,
    Macchanger,
    IpLink,
    Journalctl,
    Systemctl,
}

impl BackendKind {
    #[must_use]
    pub fn program_name(&self) -> &'static str {
        match self {
            BackendKind::AirmonNg => "airmon-ng",
            BackendKind::Iw => "iw",
            BackendKind::Macchanger => "macchanger",
            BackendKind::IpLink => "ip",
            BackendKind::Journalctl => "journalctl",
            BackendKind::Systemctl => "systemctl",
        }
    }
}

/// A selected backend: the tool kind plus its resolved path
#[derive(Debug, Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub program: PathBuf,
}

const AIRMON_CANDIDATES: &[&str] = &[
    "/usr/sbin/airmon-ng",
    "/usr/bin/airmon-ng",
    "/usr/local/sbin/airmon-ng",
];

const IW_CANDIDATES: &[&str] = &["/usr/sbin/iw", "/sbin/iw", "/usr/bin/iw"];

const MACCHANGER_CANDIDATES: &[&str] = &["/usr/bin/macchanger", "/usr/local/bin/macchanger"];

const IP_CANDIDATES: &[&str] = &["/usr/sbin/ip", "/sbin/ip", "/usr/bin/ip", "/bin/ip"];

const JOURNALCTL_CANDIDATES: &[&str] = &["/usr/bin/journalctl", "/bin/journalctl"];

const SYSTEMCTL_CANDIDATES: &[&str] = &["/usr/bin/systemctl", "/bin/systemctl"];

/// The immutable per-session mapping of capabilities to backends
///
/// `link_tool` and `service_tool` are auxiliaries, not capabilities: `ip`
/// brackets spoof and mode sequences with link down/up, `systemctl` stops
/// interfering services. Their absence degrades the plans instead of
/// refusing the operation.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    pub mode_switch: Option<Backend>,
    pub mac_spoof: Option<Backend>,
    pub log_vacuum: Option<Backend>,
    pub link_tool: Option<Backend>,
    pub service_tool: Option<Backend>,
}

impl CapabilityTable {
    /// Backend for a capability, or [`ControlError::Unavailable`]
    pub fn backend(&self, capability: Capability) -> Result<&Backend> {
        self.get(capability)
            .ok_or(ControlError::Unavailable(capability))
    }

    #[must_use]
    pub fn get(&self, capability: Capability) -> Option<&Backend> {
        match capability {
            Capability::ModeSwitch => self.mode_switch.as_ref(),
            Capability::MacSpoof => self.mac_spoof.as_ref(),
            Capability::LogVacuum => self.log_vacuum.as_ref(),
        }
    }

    /// Rows for the `status` command
    #[must_use]
    pub fn describe(&self) -> Vec<CapabilityStatus> {
        [
            Capability::ModeSwitch,
            Capability::MacSpoof,
            Capability::LogVacuum,
        ]
        .iter()
        .map(|cap| CapabilityStatus {
            capability: cap.to_string(),
            backend: self.get(*cap).map(|b| b.kind.program_name().to_string()),
            program: self.get(*cap).map(|b| b.program.clone()),
        })
        .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct CapabilityStatus {
    pub capability: String,
    pub backend: Option<String>,
    pub program: Option<PathBuf>,
}

/// Inspect the host once and build the session capability table
#[must_use]
pub fn detect() -> CapabilityTable {
    let table = CapabilityTable {
        mode_switch: detect_ordered(&[
            (BackendKind::AirmonNg, AIRMON_CANDIDATES),
            (BackendKind::Iw, IW_CANDIDATES),
        ]),
        mac_spoof: detect_ordered(&[
            (BackendKind::Macchanger, MACCHANGER_CANDIDATES),
            (BackendKind::IpLink, IP_CANDIDATES),
        ]),
        log_vacuum: detect_ordered(&[(BackendKind::Journalctl, JOURNALCTL_CANDIDATES)]),
        link_tool: detect_ordered(&[(BackendKind::IpLink, IP_CANDIDATES)]),
        service_tool: detect_ordered(&[(BackendKind::Systemctl, SYSTEMCTL_CANDIDATES)]),
    };

    for row in table.describe() {
        match row.program {
            Some(program) => info!("{}: using {}", row.capability, program.display()),
            None => info!("{}: no backend found", row.capability),
        }
    }

    table
}

/// First usable candidate wins; groups are ordered primary then fallback
fn detect_ordered(groups: &[(BackendKind, &[&str])]) -> Option<Backend> {
    for (kind, candidates) in groups {
        for candidate in *candidates {
            let path = Path::new(candidate);
            if is_executable(path) {
                debug!("located {}", candidate);
                return Some(Backend {
                    kind: *kind,
                    program: path.to_path_buf(),
                });
            }
        }
    }
    None
}

pub(crate) fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match fs::metadata(path) {
            Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
