// This crate targets Linux only: it drives sysfs, iw/airmon-ng and
// journalctl, none of which exist elsewhere. Fail early instead of
// surprising anyone at runtime.
#[cfg(not(target_os = "linux"))]
compile_error!(
    "shroud is intended to be built on Linux only. Build with a Linux target or develop on a Linux machine."
);

pub mod capability;
pub mod cli;
pub mod error;
pub mod exec;
pub mod guard;
pub mod iface;
pub mod ledger;
pub mod mac;
pub mod operations;
pub mod restore;
pub mod sanitize;
pub mod system;

pub use capability::{Backend, BackendKind, Capability, CapabilityTable};
pub use cli::{Cli, Commands, OutputFormat};
pub use error::{ControlError, Result};
pub use iface::{Controller, LiveState, MacChange, MacRequest, Mode, ModeChange, MonitorOptions};
pub use ledger::{Ledger, RestoreEntry};
pub use mac::MacAddress;
pub use operations::{dispatch_command, HandlerResult};
pub use restore::{RestoreReport, RestoreStatus};
pub use sanitize::{JournalReport, SanitizeOptions, TruncateReport};
pub use system::{resolve_root, InterfaceSummary, NetSysfs};
