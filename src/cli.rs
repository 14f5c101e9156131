use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::exec::DEFAULT_TIMEOUT;

#[derive(Parser, Debug)]
#[command(
    name = "shroud",
    author,
    version,
    about = "Reversible interface control and log hygiene for assessment hosts"
)]
pub struct Cli {
    /// Override the state directory holding the restore ledger
    /// (defaults to $SHROUD_ROOT or /var/lib/shroud)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format for command responses
    #[arg(
        long = "output",
        value_enum,
        default_value_t = OutputFormat::Json,
        global = true
    )]
    pub output_format: OutputFormat,

    /// Seconds to wait for each external command before killing it
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT.as_secs(), value_name = "SECS")]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Put an interface into monitor mode, recording how to undo it
    Monitor(MonitorArgs),
    /// Bring an interface back to managed mode
    Managed(InterfaceArg),
    /// Change an interface's MAC address, recording the original
    Mac(MacArgs),
    /// Undo recorded changes, one interface or everything pending
    Restore(RestoreArgs),
    /// List restore entries still recorded
    Pending,
    /// Acknowledge pending entries and leave them for a later restore
    Defer,
    /// Truncate host logs and vacuum the systemd journal
    Sanitize(SanitizeArgs),
    /// Enumerate network interfaces with their live state
    List,
    /// Show detected backends, live state and recorded entries
    Status(StatusArgs),
}

impl Commands {
    /// Whether this command mutates system state and therefore needs euid 0
    pub fn requires_root(&self) -> bool {
        matches!(
            self,
            Commands::Monitor(_)
                | Commands::Managed(_)
                | Commands::Mac(_)
                | Commands::Restore(_)
                | Commands::Sanitize(_)
        )
    }
}

#[derive(Args, Debug)]
pub struct InterfaceArg {
    /// Interface name, e.g. wlan0
    pub interface: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Wireless interface to switch, e.g. wlan0
    pub interface: String,

    /// Stop NetworkManager and wpa_supplicant before switching
    #[arg(long = "kill-interfering")]
    pub kill_interfering: bool,

    /// Proceed although a restore entry is already pending
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct MacArgs {
    /// Interface whose MAC to change
    pub interface: String,

    /// Explicit replacement address, e.g. 02:11:22:33:44:55
    #[arg(long, conflicts_with = "random", required_unless_present = "random")]
    pub address: Option<String>,

    /// Pick a random locally administered address instead
    #[arg(long)]
    pub random: bool,

    /// Keep the current vendor prefix when randomizing
    #[arg(long = "preserve-vendor", conflicts_with = "address")]
    pub preserve_vendor: bool,

    /// Proceed although a restore entry is already pending
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Interface to restore; omit to restore everything recorded
    pub interface: Option<String>,
}

#[derive(Args, Debug)]
pub struct SanitizeArgs {
    /// Log file to empty instead of the default /var/log set (repeatable)
    #[arg(long = "path", value_name = "FILE")]
    pub paths: Vec<PathBuf>,

    /// Journal retention window, e.g. 1s, 30m, 12h, 7d
    #[arg(long, default_value = "1s", value_name = "WINDOW")]
    pub journal_retention: String,

    /// Also empty the invoking user's shell history
    #[arg(long)]
    pub history: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Limit the report to one interface
    pub interface: Option<String>,
}
