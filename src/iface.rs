//! Interface state machine
//!
//! Owns the per-interface lifecycle: managed <-> monitor transitions and MAC
//! changes, sequenced through the capability table and the command executor.
//! Live state is read from sysfs before and after every operation; the
//! ledger is written only after the external command succeeded and the
//! read-back verified, so a failed operation never moves recorded state.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::capability::{Backend, BackendKind, Capability, CapabilityTable};
use crate::error::{ControlError, Result};
use crate::exec;
use crate::guard::RollbackGuard;
use crate::ledger::{Ledger, RestoreEntry};
use crate::mac::MacAddress;
use crate::system::{NetSysfs, ARPHRD_IEEE80211, ARPHRD_IEEE80211_RADIOTAP};

/// Services that grab wireless interfaces back while we work
const INTERFERING_SERVICES: &[&str] = &["NetworkManager", "wpa_supplicant"];

/// Drivers need a moment before a read-back reflects the change
const VERIFY_DELAY: Duration = Duration::from_millis(100);

/// Interface operating mode as the controller models it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Managed,
    Monitor,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Managed => f.write_str("managed"),
            Mode::Monitor => f.write_str("monitor"),
        }
    }
}

/// Live kernel state for one interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveState {
    pub mode: Mode,
    pub mac: MacAddress,
}

/// Options for entering monitor mode
#[derive(Debug, Clone, Default)]
pub struct MonitorOptions {
    /// Stop NetworkManager/wpa_supplicant first
    pub kill_interfering: bool,
    /// Proceed although a restore entry is pending
    pub force: bool,
}

/// How the replacement MAC is chosen
#[derive(Debug, Clone)]
pub enum MacRequest {
    Explicit(MacAddress),
    Random { preserve_vendor: bool },
}

/// Result of a mode transition
#[derive(Debug, Serialize)]
pub struct ModeChange {
    pub interface: String,
    pub mode: Mode,
    /// Name the interface answers to now, when the backend renamed it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_name: Option<String>,
    pub changed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services_stopped: Vec<String>,
}

/// Result of a MAC change
#[derive(Debug, Serialize)]
pub struct MacChange {
    pub interface: String,
    pub previous: MacAddress,
    pub current: MacAddress,
    pub changed: bool,
}

/// Sequences privileged operations on interfaces
///
/// One operation at a time per interface; an in-flight set refuses
/// re-entrant calls while a transition is underway.
pub struct Controller {
    caps: CapabilityTable,
    ledger: Ledger,
    net: NetSysfs,
    timeout: Duration,
    in_flight: RefCell<HashSet<String>>,
}

struct TransitionGuard<'a> {
    in_flight: &'a RefCell<HashSet<String>>,
    name: String,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.borrow_mut().remove(&self.name);
    }
}

impl Controller {
    #[must_use]
    pub fn new(caps: CapabilityTable, ledger: Ledger, net: NetSysfs, timeout: Duration) -> Self {
        Self {
            caps,
            ledger,
            net,
            timeout,
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.caps
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn net(&self) -> &NetSysfs {
        &self.net
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current mode and MAC straight from sysfs
    pub fn live_state(&self, name: &str) -> Result<LiveState> {
        let mac = self.net.mac(name)?;
        let mode = match self.net.arphrd_type(name)? {
            ARPHRD_IEEE80211 | ARPHRD_IEEE80211_RADIOTAP => Mode::Monitor,
            _ => Mode::Managed,
        };
        Ok(LiveState { mode, mac })
    }

    /// Put an interface into monitor mode
    ///
    /// On first success this captures the interface's original mode and MAC
    /// in the restore ledger; later successes update the existing entry
    /// without touching the captured originals.
    pub fn enter_monitor(&self, name: &str, opts: &MonitorOptions) -> Result<ModeChange> {
        let _transition = self.begin_transition(name)?;
        let live = self.live_state(name)?;
        let pending = self.ledger.get(name)?;
        if let Some(entry) = &pending {
            if !opts.force {
                return Err(ControlError::PendingRestoreBlocks(name.to_string()));
            }
            debug!(
                "{name}: proceeding despite pending restore (version {})",
                entry.version
            );
        }
        let backend = self.caps.backend(Capability::ModeSwitch)?.clone();

        if !self.net.is_wireless(name) {
            debug!("{name}: no wireless/phy80211 node; the backend may refuse it");
        }

        if live.mode == Mode::Monitor {
            debug!("{name}: already in monitor mode");
            return Ok(ModeChange {
                interface: name.to_string(),
                mode: Mode::Monitor,
                monitor_name: pending.and_then(|e| e.monitor_name),
                changed: false,
                services_stopped: Vec::new(),
            });
        }

        let services_stopped = if opts.kill_interfering {
            self.stop_interfering(&backend)?
        } else {
            Vec::new()
        };

        // airmon-ng may rename the interface under a scheme of its own;
        // only a before/after set comparison finds those.
        let before = if backend.kind == BackendKind::AirmonNg {
            Some(self.net.names()?)
        } else {
            None
        };

        self.switch_mode(&backend, name, name, Mode::Monitor)?;

        let monitor_name = self.detect_monitor_name(name, before.as_ref());
        let effective = monitor_name.as_deref().unwrap_or(name);
        self.verify_mode(effective, Mode::Monitor)?;

        let observed = pending.as_ref().map(|e| e.version);
        if let Err(e) = self.ledger.upsert(name, observed, |existing| {
            let mut entry = match existing {
                Some(current) => current.clone(),
                None => RestoreEntry::new(name, live.mode, live.mac),
            };
            entry.monitor_name = monitor_name.clone();
            entry
        }) {
            warn!(
                "{name}: monitor mode is active but recording it failed; original mode was {} with MAC {}",
                live.mode, live.mac
            );
            return Err(e);
        }

        info!("{name}: monitor mode enabled");
        Ok(ModeChange {
            interface: name.to_string(),
            mode: Mode::Monitor,
            monitor_name,
            changed: true,
            services_stopped,
        })
    }

    /// Bring an interface back to managed mode
    ///
    /// Never blocked by a pending entry: it moves the interface toward its
    /// recorded original state. The entry is deleted when live state matches
    /// the captured originals afterwards, updated otherwise.
    pub fn exit_monitor(&self, name: &str) -> Result<ModeChange> {
        let _transition = self.begin_transition(name)?;
        let pending = self.ledger.get(name)?;
        let backend = self.caps.backend(Capability::ModeSwitch)?.clone();

        let current = self.effective_name(name, pending.as_ref())?;
        let live = self.live_state(&current)?;

        if live.mode == Mode::Managed {
            debug!("{name}: already in managed mode");
            self.settle_after_mode_restore(name, &pending, &live)?;
            return Ok(ModeChange {
                interface: name.to_string(),
                mode: Mode::Managed,
                monitor_name: None,
                changed: false,
                services_stopped: Vec::new(),
            });
        }

        self.switch_mode(&backend, &current, name, Mode::Managed)?;

        let check = if self.net.exists(name) {
            name.to_string()
        } else {
            current
        };
        self.verify_mode(&check, Mode::Managed)?;
        let live_now = self.live_state(&check)?;
        self.settle_after_mode_restore(name, &pending, &live_now)?;

        info!("{name}: managed mode restored");
        Ok(ModeChange {
            interface: name.to_string(),
            mode: Mode::Managed,
            monitor_name: None,
            changed: true,
            services_stopped: Vec::new(),
        })
    }

    /// Change the interface's MAC address
    ///
    /// The original address is captured in the ledger on first use only;
    /// repeat changes bump the entry version and leave the originals alone.
    pub fn spoof_mac(&self, name: &str, request: &MacRequest, force: bool) -> Result<MacChange> {
        let _transition = self.begin_transition(name)?;
        let live = self.live_state(name)?;
        let pending = self.ledger.get(name)?;
        if pending.is_some() && !force {
            return Err(ControlError::PendingRestoreBlocks(name.to_string()));
        }
        let backend = self.caps.backend(Capability::MacSpoof)?.clone();

        let target = match request {
            MacRequest::Explicit(mac) => {
                if !mac.is_unicast() {
                    return Err(ControlError::InvalidMac(format!(
                        "{mac} has the multicast bit set"
                    )));
                }
                *mac
            }
            MacRequest::Random { preserve_vendor } => {
                if *preserve_vendor {
                    MacAddress::random_with_oui(live.mac.oui())?
                } else {
                    MacAddress::random()?
                }
            }
        };

        if target == live.mac {
            debug!("{name}: MAC already {target}");
            return Ok(MacChange {
                interface: name.to_string(),
                previous: live.mac,
                current: live.mac,
                changed: false,
            });
        }

        self.apply_mac(&backend, name, &target)?;
        self.verify_mac(name, &target)?;

        let observed = pending.as_ref().map(|e| e.version);
        if let Err(e) = self.ledger.upsert(name, observed, |existing| match existing {
            Some(current) => current.clone(),
            None => RestoreEntry::new(name, live.mode, live.mac),
        }) {
            warn!(
                "{name}: MAC was changed but recording it failed; original is {}",
                live.mac
            );
            return Err(e);
        }

        info!("{name}: MAC set to {target}");
        Ok(MacChange {
            interface: name.to_string(),
            previous: live.mac,
            current: target,
            changed: true,
        })
    }

    /// Drive one interface back to its recorded originals
    ///
    /// Used by the restore orchestrator: same plans, same executor, no
    /// pending-entry refusal, and the entry is removed (version-checked)
    /// once live state matches. Returns the steps actually performed.
    pub(crate) fn restore_to_original(&self, entry: &RestoreEntry) -> Result<Vec<String>> {
        let name = entry.interface.clone();
        let _transition = self.begin_transition(&name)?;
        let mut steps = Vec::new();

        let mut current = self.effective_name(&name, Some(entry))?;
        let mut live = self.live_state(&current)?;

        if live.mode != entry.original_mode {
            let backend = self.caps.backend(Capability::ModeSwitch)?.clone();
            self.switch_mode(&backend, &current, &name, entry.original_mode)?;
            current = self.effective_name(&name, Some(entry))?;
            self.verify_mode(&current, entry.original_mode)?;
            steps.push(format!("mode restored to {}", entry.original_mode));
            live = self.live_state(&current)?;
        }

        if live.mac != entry.original_mac {
            let backend = self.caps.backend(Capability::MacSpoof)?.clone();
            self.apply_mac(&backend, &current, &entry.original_mac)?;
            self.verify_mac(&current, &entry.original_mac)?;
            steps.push(format!("MAC restored to {}", entry.original_mac));
        }

        self.ledger.remove(&name, entry.version)?;
        if steps.is_empty() {
            debug!("{name}: already at recorded originals");
        } else {
            info!("{name}: restored ({})", steps.join(", "));
        }
        Ok(steps)
    }

    fn begin_transition(&self, name: &str) -> Result<TransitionGuard<'_>> {
        let mut set = self.in_flight.borrow_mut();
        if !set.insert(name.to_string()) {
            return Err(ControlError::operation_failed(
                format!("operate on {name}"),
                "another operation is in progress for this interface",
            ));
        }
        drop(set);
        Ok(TransitionGuard {
            in_flight: &self.in_flight,
            name: name.to_string(),
        })
    }

    /// Find the name the backend left the monitor interface under
    ///
    /// The `<name>mon` convention is checked first; when the backend used
    /// some other scheme, a single new name in the interface set is taken
    /// as the rename. Anything else means no rename happened.
    fn detect_monitor_name(&self, base: &str, before: Option<&BTreeSet<String>>) -> Option<String> {
        let conventional = format!("{base}mon");
        if self.net.exists(&conventional) {
            info!("{base}: backend renamed the interface to {conventional}");
            return Some(conventional);
        }
        let before = before?;
        let after = self.net.names().ok()?;
        let mut created = after.difference(before).filter(|n| n.as_str() != base);
        match (created.next(), created.next()) {
            (Some(new_name), None) => {
                info!("{base}: backend renamed the interface to {new_name}");
                Some(new_name.clone())
            }
            _ => None,
        }
    }

    /// Resolve the name the interface currently answers to
    ///
    /// Tries the managed name, then the recorded monitor alias, then the
    /// `<name>mon` convention.
    fn effective_name(&self, name: &str, entry: Option<&RestoreEntry>) -> Result<String> {
        if self.net.exists(name) {
            return Ok(name.to_string());
        }
        if let Some(monitor) = entry.and_then(|e| e.monitor_name.as_deref()) {
            if self.net.exists(monitor) {
                return Ok(monitor.to_string());
            }
        }
        let conventional = format!("{name}mon");
        if self.net.exists(&conventional) {
            return Ok(conventional);
        }
        Err(ControlError::InterfaceNotFound(name.to_string()))
    }

    fn switch_mode(&self, backend: &Backend, current: &str, base: &str, target: Mode) -> Result<()> {
        match (backend.kind, target) {
            (BackendKind::AirmonNg, Mode::Monitor) => {
                let action = format!("enable monitor mode on {base}");
                exec::run_ok(&backend.program, &["start", current], self.timeout, &action)?;
            }
            (BackendKind::AirmonNg, Mode::Managed) => {
                let action = format!("disable monitor mode on {base}");
                exec::run_ok(&backend.program, &["stop", current], self.timeout, &action)?;
            }
            (_, Mode::Monitor) => self.iw_set_type(backend, current, "monitor")?,
            (_, Mode::Managed) => self.iw_set_type(backend, current, "managed")?,
        }
        Ok(())
    }

    /// `iw` refuses type changes while the link is up, so the sequence is
    /// down, set type, up, with the link re-raised if the middle step fails
    fn iw_set_type(&self, backend: &Backend, name: &str, mode_arg: &str) -> Result<()> {
        let mut guard = RollbackGuard::new(format!("set type {mode_arg} on {name}"));
        self.link_set(name, "down")?;
        self.register_link_up(&mut guard, name);

        let action = format!("set {name} type {mode_arg}");
        exec::run_ok(
            &backend.program,
            &["dev", name, "set", "type", mode_arg],
            self.timeout,
            &action,
        )?;

        self.link_set(name, "up")?;
        guard.commit();
        Ok(())
    }

    fn apply_mac(&self, backend: &Backend, name: &str, target: &MacAddress) -> Result<()> {
        let mac_str = target.to_string();
        let action = format!("set MAC on {name}");

        let mut guard = RollbackGuard::new(format!("MAC change on {name}"));
        self.link_set(name, "down")?;
        self.register_link_up(&mut guard, name);

        match backend.kind {
            BackendKind::Macchanger => {
                exec::run_ok(
                    &backend.program,
                    &["-m", &mac_str, name],
                    self.timeout,
                    &action,
                )?;
            }
            _ => {
                exec::run_ok(
                    &backend.program,
                    &["link", "set", "dev", name, "address", &mac_str],
                    self.timeout,
                    &action,
                )?;
            }
        }

        self.link_set(name, "up")?;
        guard.commit();
        Ok(())
    }

    fn link_set(&self, name: &str, state: &str) -> Result<()> {
        let link = match &self.caps.link_tool {
            Some(backend) => backend,
            None => {
                debug!("no link tool; skipping link {state} for {name}");
                return Ok(());
            }
        };
        let action = format!("bring {name} {state}");
        exec::run_ok(
            &link.program,
            &["link", "set", name, state],
            self.timeout,
            &action,
        )?;
        Ok(())
    }

    fn register_link_up(&self, guard: &mut RollbackGuard, name: &str) {
        if let Some(link) = &self.caps.link_tool {
            let program = link.program.clone();
            let iface = name.to_string();
            let timeout = self.timeout;
            guard.register(move || {
                exec::run(&program, &["link", "set", &iface, "up"], timeout)?;
                Ok(())
            });
        }
    }

    fn verify_mode(&self, name: &str, expected: Mode) -> Result<()> {
        thread::sleep(VERIFY_DELAY);
        let live = self.live_state(name)?;
        if live.mode != expected {
            return Err(ControlError::operation_failed(
                format!("verify {name} mode"),
                format!("expected {expected}, found {}", live.mode),
            ));
        }
        Ok(())
    }

    fn verify_mac(&self, name: &str, expected: &MacAddress) -> Result<()> {
        thread::sleep(VERIFY_DELAY);
        let live = self.live_state(name)?;
        if live.mac != *expected {
            return Err(ControlError::operation_failed(
                format!("verify {name} MAC"),
                format!("expected {expected}, found {}", live.mac),
            ));
        }
        Ok(())
    }

    /// Delete the entry when live state matches its originals, update it
    /// (clearing the monitor alias) when it does not
    fn settle_after_mode_restore(
        &self,
        name: &str,
        pending: &Option<RestoreEntry>,
        live: &LiveState,
    ) -> Result<()> {
        let entry = match pending {
            Some(entry) => entry,
            None => return Ok(()),
        };
        if live.mode == entry.original_mode && live.mac == entry.original_mac {
            self.ledger.remove(name, entry.version)?;
            info!("{name}: restore entry cleared");
            return Ok(());
        }
        if let Err(e) = self.ledger.upsert(name, Some(entry.version), |existing| {
            let mut updated = existing.cloned().unwrap_or_else(|| entry.clone());
            updated.monitor_name = None;
            updated
        }) {
            warn!("{name}: mode restored but the ledger update failed");
            return Err(e);
        }
        Ok(())
    }

    fn stop_interfering(&self, backend: &Backend) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        if let Some(systemctl) = &self.caps.service_tool {
            for service in INTERFERING_SERVICES {
                let outcome =
                    exec::run(&systemctl.program, &["stop", service], self.timeout)?;
                if outcome.success() {
                    info!("stopped {service}");
                    stopped.push((*service).to_string());
                } else {
                    debug!("could not stop {service}: {}", outcome.describe_failure());
                }
            }
        }
        if backend.kind == BackendKind::AirmonNg {
            // sweep up anything still holding the radio
            let outcome = exec::run(&backend.program, &["check", "kill"], self.timeout)?;
            if !outcome.success() {
                debug!("airmon-ng check kill: {}", outcome.describe_failure());
            }
        }
        Ok(stopped)
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::system::write_fake_iface;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub const ORIG_MAC: &str = "AA:BB:CC:DD:EE:FF";

    /// A fake host: sysfs tree, tool scripts that mutate it, state dir
    pub struct World {
        pub dir: TempDir,
        pub net_root: PathBuf,
        pub state_root: PathBuf,
        pub tool_dir: PathBuf,
    }

    impl World {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let net_root = dir.path().join("net");
            let state_root = dir.path().join("state");
            let tool_dir = dir.path().join("tools");
            fs::create_dir_all(&net_root).unwrap();
            fs::create_dir_all(&state_root).unwrap();
            fs::create_dir_all(&tool_dir).unwrap();
            write_fake_iface(&net_root, "wlan0", ORIG_MAC, 1, true);
            Self {
                dir,
                net_root,
                state_root,
                tool_dir,
            }
        }

        pub fn script(&self, name: &str, body: &str) -> PathBuf {
            let path = self.tool_dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn net(&self) -> String {
            self.net_root.display().to_string()
        }

        /// `iw dev <iface> set type monitor|managed` against the fake tree
        pub fn fake_iw(&self) -> Backend {
            let net = self.net();
            let body = format!(
                "iface=\"$2\"\nwanted=\"$5\"\ncase \"$wanted\" in\n\
                 monitor) echo 803 > {net}/$iface/type ;;\n\
                 managed) echo 1 > {net}/$iface/type ;;\n\
                 esac"
            );
            Backend {
                kind: BackendKind::Iw,
                program: self.script("iw", &body),
            }
        }

        /// `ip link set ...`; records every call and applies address changes
        pub fn fake_ip(&self) -> Backend {
            let net = self.net();
            let log = self.calls_path().display().to_string();
            let body = format!(
                "echo \"$@\" >> {log}\n\
                 if [ \"$3\" = dev ]; then\n\
                 if [ \"$5\" = address ]; then printf %s \"$6\" > {net}/$4/address; fi\n\
                 fi\n\
                 exit 0"
            );
            Backend {
                kind: BackendKind::IpLink,
                program: self.script("ip", &body),
            }
        }

        /// `macchanger -m <mac> <iface>` against the fake tree
        pub fn fake_macchanger(&self) -> Backend {
            let net = self.net();
            let body = format!("printf %s \"$2\" > {net}/$3/address");
            Backend {
                kind: BackendKind::Macchanger,
                program: self.script("macchanger", &body),
            }
        }

        /// `airmon-ng start|stop|check`; start renames wlan0 -> wlan0mon
        pub fn fake_airmon(&self) -> Backend {
            let net = self.net();
            let log = self.calls_path().display().to_string();
            let body = format!(
                "echo airmon-ng \"$@\" >> {log}\n\
                 case \"$1\" in\n\
                 start)\n\
                 iface=\"$2\"\n\
                 mkdir -p {net}/\"$iface\"mon/wireless\n\
                 cp {net}/\"$iface\"/address {net}/\"$iface\"mon/address\n\
                 echo 803 > {net}/\"$iface\"mon/type\n\
                 rm -rf {net}/\"$iface\"\n\
                 ;;\n\
                 stop)\n\
                 mon=\"$2\"\n\
                 base=\"${{mon%mon}}\"\n\
                 mkdir -p {net}/\"$base\"/wireless\n\
                 cp {net}/\"$mon\"/address {net}/\"$base\"/address\n\
                 echo 1 > {net}/\"$base\"/type\n\
                 rm -rf {net}/\"$mon\"\n\
                 ;;\n\
                 esac\n\
                 exit 0"
            );
            Backend {
                kind: BackendKind::AirmonNg,
                program: self.script("airmon-ng", &body),
            }
        }

        /// An airmon-ng that parks the monitor interface at `mon0` instead
        /// of the `<iface>mon` convention
        pub fn fake_airmon_mon0(&self) -> Backend {
            let net = self.net();
            let body = format!(
                "case \"$1\" in\n\
                 start)\n\
                 iface=\"$2\"\n\
                 mkdir -p {net}/mon0/wireless\n\
                 cp {net}/\"$iface\"/address {net}/mon0/address\n\
                 echo 803 > {net}/mon0/type\n\
                 rm -rf {net}/\"$iface\"\n\
                 ;;\n\
                 stop)\n\
                 mkdir -p {net}/wlan0/wireless\n\
                 cp {net}/mon0/address {net}/wlan0/address\n\
                 echo 1 > {net}/wlan0/type\n\
                 rm -rf {net}/mon0\n\
                 ;;\n\
                 esac\n\
                 exit 0"
            );
            Backend {
                kind: BackendKind::AirmonNg,
                program: self.script("airmon-ng", &body),
            }
        }

        /// `systemctl stop <unit>`; records calls and succeeds
        pub fn fake_systemctl(&self) -> Backend {
            let log = self.calls_path().display().to_string();
            Backend {
                kind: BackendKind::Systemctl,
                program: self.script("systemctl", &format!("echo systemctl \"$@\" >> {log}\nexit 0")),
            }
        }

        pub fn failing(&self, name: &str, kind: BackendKind) -> Backend {
            Backend {
                kind,
                program: self.script(name, "echo doomed >&2\nexit 1"),
            }
        }

        pub fn calls_path(&self) -> PathBuf {
            self.dir.path().join("calls.log")
        }

        pub fn calls(&self) -> String {
            fs::read_to_string(self.calls_path()).unwrap_or_default()
        }

        pub fn controller(&self, caps: CapabilityTable) -> Controller {
            Controller::new(
                caps,
                Ledger::new(&self.state_root),
                NetSysfs::with_root(&self.net_root),
                Duration::from_secs(5),
            )
        }

        /// iw for mode switching, ip for MAC changes
        pub fn iw_controller(&self) -> Controller {
            self.controller(CapabilityTable {
                mode_switch: Some(self.fake_iw()),
                mac_spoof: Some(self.fake_ip()),
                log_vacuum: None,
                link_tool: Some(self.fake_ip()),
                service_tool: None,
            })
        }

        /// airmon-ng for mode switching, macchanger for MAC changes
        pub fn airmon_controller(&self) -> Controller {
            self.controller(CapabilityTable {
                mode_switch: Some(self.fake_airmon()),
                mac_spoof: Some(self.fake_macchanger()),
                log_vacuum: None,
                link_tool: Some(self.fake_ip()),
                service_tool: None,
            })
        }

        pub fn arphrd(&self, name: &str) -> String {
            fs::read_to_string(self.net_root.join(name).join("type"))
                .unwrap()
                .trim()
                .to_string()
        }

        pub fn address(&self, name: &str) -> String {
            fs::read_to_string(self.net_root.join(name).join("address"))
                .unwrap()
                .trim()
                .to_uppercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testkit::{World, ORIG_MAC};
    use super::*;
    use crate::capability::CapabilityTable;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_enter_monitor_creates_entry() {
        let world = World::new();
        let ctl = world.iw_controller();

        let change = ctl.enter_monitor("wlan0", &MonitorOptions::default()).unwrap();
        assert!(change.changed);
        assert_eq!(change.mode, Mode::Monitor);
        assert_eq!(world.arphrd("wlan0"), "803");

        let entry = ctl.ledger().get("wlan0").unwrap().unwrap();
        assert_eq!(entry.original_mode, Mode::Managed);
        assert_eq!(entry.original_mac, mac(ORIG_MAC));
        assert_eq!(entry.version, 1);
        assert!(entry.monitor_name.is_none());
    }

    #[test]
    fn test_enter_monitor_already_monitor_is_noop() {
        let world = World::new();
        std::fs::write(world.net_root.join("wlan0").join("type"), "803\n").unwrap();
        let ctl = world.iw_controller();

        let change = ctl.enter_monitor("wlan0", &MonitorOptions::default()).unwrap();
        assert!(!change.changed);
        assert!(ctl.ledger().get("wlan0").unwrap().is_none());
    }

    #[test]
    fn test_enter_monitor_blocked_by_pending_entry() {
        let world = World::new();
        let ctl = world.iw_controller();
        ctl.enter_monitor("wlan0", &MonitorOptions::default()).unwrap();

        let err = ctl
            .enter_monitor("wlan0", &MonitorOptions::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::PendingRestoreBlocks(_)));

        let opts = MonitorOptions {
            force: true,
            ..Default::default()
        };
        assert!(ctl.enter_monitor("wlan0", &opts).is_ok());
    }

    #[test]
    fn test_enter_monitor_unavailable_touches_nothing() {
        let world = World::new();
        let ctl = world.controller(CapabilityTable::default());

        let err = ctl
            .enter_monitor("wlan0", &MonitorOptions::default())
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(world.arphrd("wlan0"), "1");
        assert!(ctl.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn test_enter_monitor_missing_interface() {
        let world = World::new();
        let ctl = world.iw_controller();
        let err = ctl
            .enter_monitor("wlan9", &MonitorOptions::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::InterfaceNotFound(_)));
    }

    #[test]
    fn test_spoof_mac_captures_original_once() {
        let world = World::new();
        let ctl = world.iw_controller();

        let first = ctl
            .spoof_mac(
                "wlan0",
                &MacRequest::Explicit(mac("02:11:22:33:44:55")),
                false,
            )
            .unwrap();
        assert!(first.changed);
        assert_eq!(world.address("wlan0"), "02:11:22:33:44:55");

        let entry = ctl.ledger().get("wlan0").unwrap().unwrap();
        assert_eq!(entry.original_mac, mac(ORIG_MAC));
        assert_eq!(entry.version, 1);

        // second change needs force and must not recapture the original
        let second = ctl
            .spoof_mac(
                "wlan0",
                &MacRequest::Explicit(mac("02:AA:AA:AA:AA:AA")),
                true,
            )
            .unwrap();
        assert!(second.changed);

        let entry = ctl.ledger().get("wlan0").unwrap().unwrap();
        assert_eq!(entry.original_mac, mac(ORIG_MAC));
        assert_eq!(entry.version, 2);
    }

    #[test]
    fn test_spoof_mac_blocked_without_force() {
        let world = World::new();
        let ctl = world.iw_controller();
        ctl.spoof_mac(
            "wlan0",
            &MacRequest::Explicit(mac("02:11:22:33:44:55")),
            false,
        )
        .unwrap();

        let err = ctl
            .spoof_mac(
                "wlan0",
                &MacRequest::Explicit(mac("02:AA:AA:AA:AA:AA")),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::PendingRestoreBlocks(_)));
    }

    #[test]
    fn test_spoof_mac_rejects_multicast() {
        let world = World::new();
        let ctl = world.iw_controller();
        let err = ctl
            .spoof_mac(
                "wlan0",
                &MacRequest::Explicit(mac("01:00:5E:00:00:01")),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidMac(_)));
        assert_eq!(world.address("wlan0"), ORIG_MAC);
    }

    #[test]
    fn test_spoof_mac_same_address_is_noop() {
        let world = World::new();
        let ctl = world.iw_controller();
        let change = ctl
            .spoof_mac("wlan0", &MacRequest::Explicit(mac(ORIG_MAC)), false)
            .unwrap();
        assert!(!change.changed);
        assert!(ctl.ledger().get("wlan0").unwrap().is_none());
    }

    #[test]
    fn test_spoof_mac_random_is_local_unicast() {
        let world = World::new();
        let ctl = world.iw_controller();
        let change = ctl
            .spoof_mac(
                "wlan0",
                &MacRequest::Random {
                    preserve_vendor: false,
                },
                false,
            )
            .unwrap();
        assert!(change.current.is_local());
        assert!(change.current.is_unicast());
        assert_eq!(world.address("wlan0"), change.current.to_string());
    }

    #[test]
    fn test_exit_monitor_clears_entry_when_originals_match() {
        let world = World::new();
        let ctl = world.iw_controller();
        ctl.enter_monitor("wlan0", &MonitorOptions::default()).unwrap();

        let change = ctl.exit_monitor("wlan0").unwrap();
        assert!(change.changed);
        assert_eq!(world.arphrd("wlan0"), "1");
        assert!(ctl.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn test_exit_monitor_keeps_entry_when_mac_still_spoofed() {
        let world = World::new();
        let ctl = world.iw_controller();
        ctl.enter_monitor("wlan0", &MonitorOptions::default()).unwrap();
        ctl.spoof_mac(
            "wlan0",
            &MacRequest::Explicit(mac("02:11:22:33:44:55")),
            true,
        )
        .unwrap();

        ctl.exit_monitor("wlan0").unwrap();
        assert_eq!(world.arphrd("wlan0"), "1");

        let entry = ctl.ledger().get("wlan0").unwrap().unwrap();
        assert_eq!(entry.original_mac, mac(ORIG_MAC));
    }

    #[test]
    fn test_airmon_rename_cycle() {
        let world = World::new();
        let ctl = world.airmon_controller();

        let change = ctl.enter_monitor("wlan0", &MonitorOptions::default()).unwrap();
        assert_eq!(change.monitor_name.as_deref(), Some("wlan0mon"));
        assert!(!world.net_root.join("wlan0").exists());
        assert_eq!(world.arphrd("wlan0mon"), "803");

        let entry = ctl.ledger().get("wlan0").unwrap().unwrap();
        assert_eq!(entry.monitor_name.as_deref(), Some("wlan0mon"));

        let change = ctl.exit_monitor("wlan0").unwrap();
        assert!(change.changed);
        assert_eq!(world.arphrd("wlan0"), "1");
        assert_eq!(world.address("wlan0"), ORIG_MAC);
        assert!(ctl.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn test_airmon_nonstandard_rename_detected() {
        let world = World::new();
        let ctl = world.controller(CapabilityTable {
            mode_switch: Some(world.fake_airmon_mon0()),
            mac_spoof: Some(world.fake_macchanger()),
            log_vacuum: None,
            link_tool: Some(world.fake_ip()),
            service_tool: None,
        });

        let change = ctl.enter_monitor("wlan0", &MonitorOptions::default()).unwrap();
        assert_eq!(change.monitor_name.as_deref(), Some("mon0"));
        assert!(!world.net_root.join("wlan0").exists());
        assert_eq!(world.arphrd("mon0"), "803");

        let entry = ctl.ledger().get("wlan0").unwrap().unwrap();
        assert_eq!(entry.monitor_name.as_deref(), Some("mon0"));

        let change = ctl.exit_monitor("wlan0").unwrap();
        assert!(change.changed);
        assert_eq!(world.arphrd("wlan0"), "1");
        assert!(ctl.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn test_kill_interfering_stops_services() {
        let world = World::new();
        let ctl = world.controller(CapabilityTable {
            mode_switch: Some(world.fake_airmon()),
            mac_spoof: Some(world.fake_macchanger()),
            log_vacuum: None,
            link_tool: Some(world.fake_ip()),
            service_tool: Some(world.fake_systemctl()),
        });

        let opts = MonitorOptions {
            kill_interfering: true,
            ..Default::default()
        };
        let change = ctl.enter_monitor("wlan0", &opts).unwrap();
        assert!(change.changed);
        assert_eq!(
            change.services_stopped,
            vec!["NetworkManager", "wpa_supplicant"]
        );

        let calls = world.calls();
        assert!(calls.contains("systemctl stop NetworkManager"));
        assert!(calls.contains("systemctl stop wpa_supplicant"));
        // the radio sweep runs before the mode switch
        let check = calls.find("airmon-ng check kill").unwrap();
        let start = calls.find("airmon-ng start wlan0").unwrap();
        assert!(check < start);
    }

    #[test]
    fn test_kill_interfering_skips_refusing_service() {
        let world = World::new();
        let log = world.calls_path().display().to_string();
        let systemctl = Backend {
            kind: BackendKind::Systemctl,
            program: world.script(
                "systemctl",
                &format!(
                    "echo systemctl \"$@\" >> {log}\n\
                     if [ \"$2\" = wpa_supplicant ]; then exit 5; fi\n\
                     exit 0"
                ),
            ),
        };
        let ctl = world.controller(CapabilityTable {
            mode_switch: Some(world.fake_iw()),
            mac_spoof: Some(world.fake_ip()),
            log_vacuum: None,
            link_tool: Some(world.fake_ip()),
            service_tool: Some(systemctl),
        });

        let opts = MonitorOptions {
            kill_interfering: true,
            ..Default::default()
        };
        let change = ctl.enter_monitor("wlan0", &opts).unwrap();
        assert_eq!(change.services_stopped, vec!["NetworkManager"]);
        // the refusing unit was still attempted
        assert!(world.calls().contains("systemctl stop wpa_supplicant"));
    }

    #[test]
    fn test_kill_interfering_without_service_tool() {
        let world = World::new();
        let ctl = world.iw_controller();
        let opts = MonitorOptions {
            kill_interfering: true,
            ..Default::default()
        };
        let change = ctl.enter_monitor("wlan0", &opts).unwrap();
        assert!(change.changed);
        assert!(change.services_stopped.is_empty());
    }

    #[test]
    fn test_failed_switch_leaves_state_untouched() {
        let world = World::new();
        let ctl = world.controller(CapabilityTable {
            mode_switch: Some(world.failing("iw", BackendKind::Iw)),
            mac_spoof: Some(world.fake_ip()),
            log_vacuum: None,
            link_tool: Some(world.fake_ip()),
            service_tool: None,
        });

        let err = ctl
            .enter_monitor("wlan0", &MonitorOptions::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::OperationFailed { .. }));
        assert!(err.to_string().contains("doomed"));
        assert_eq!(world.arphrd("wlan0"), "1");
        assert!(ctl.ledger().load().unwrap().is_empty());
    }

    #[test]
    fn test_failed_mac_change_reraises_link() {
        let world = World::new();
        let ctl = world.controller(CapabilityTable {
            mode_switch: Some(world.fake_iw()),
            mac_spoof: Some(world.failing("macchanger", BackendKind::Macchanger)),
            log_vacuum: None,
            link_tool: Some(world.fake_ip()),
            service_tool: None,
        });

        let err = ctl
            .spoof_mac(
                "wlan0",
                &MacRequest::Explicit(mac("02:11:22:33:44:55")),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::OperationFailed { .. }));
        assert_eq!(world.address("wlan0"), ORIG_MAC);

        // the rollback guard brought the link back up after the failure
        let calls = world.calls();
        let mut lines = calls.lines().rev();
        assert_eq!(lines.next(), Some("link set wlan0 up"));
        assert!(calls.contains("link set wlan0 down"));
    }

    #[test]
    fn test_reentrant_operation_refused() {
        let world = World::new();
        let ctl = world.iw_controller();
        let _guard = ctl.begin_transition("wlan0").unwrap();
        let err = ctl
            .enter_monitor("wlan0", &MonitorOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("in progress"));
    }
}
