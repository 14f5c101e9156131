//! Command handlers behind the CLI
//!
//! Each handler maps one subcommand onto a controller, orchestrator or
//! sanitizer call and folds the outcome into a message plus JSON payload
//! for the output envelope.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use log::warn;
use serde_json::{json, Value};

use crate::capability::{self, CapabilityTable};
use crate::cli::{
    Commands, InterfaceArg, MacArgs, MonitorArgs, RestoreArgs, SanitizeArgs, StatusArgs,
};
use crate::error::ControlError;
use crate::iface::{Controller, MacRequest, ModeChange, MonitorOptions};
use crate::ledger::Ledger;
use crate::mac::MacAddress;
use crate::restore::{self, RestoreStatus};
use crate::sanitize::{self, SanitizeOptions};
use crate::system::{self, NetSysfs};

pub type HandlerResult = (String, Value);

pub fn dispatch_command(root: &Path, timeout: Duration, command: Commands) -> Result<HandlerResult> {
    if command.requires_root() && !system::euid_is_root() {
        bail!("this command changes system state; run it as root");
    }
    match command {
        Commands::Monitor(args) => handle_monitor(root, timeout, args),
        Commands::Managed(args) => handle_managed(root, timeout, args),
        Commands::Mac(args) => handle_mac(root, timeout, args),
        Commands::Restore(args) => handle_restore(root, timeout, args),
        Commands::Pending => handle_pending(root),
        Commands::Defer => handle_defer(root),
        Commands::Sanitize(args) => handle_sanitize(&capability::detect(), timeout, args),
        Commands::List => handle_list(),
        Commands::Status(args) => handle_status(root, args),
    }
}

fn controller(root: &Path, timeout: Duration) -> Controller {
    Controller::new(
        capability::detect(),
        Ledger::new(root),
        NetSysfs::new(),
        timeout,
    )
}

fn describe_mode_change(change: &ModeChange) -> String {
    let mut message = if !change.changed {
        format!("{} was already in {} mode", change.interface, change.mode)
    } else if let Some(monitor) = &change.monitor_name {
        format!("{} is in {} mode as {monitor}", change.interface, change.mode)
    } else {
        format!("{} is in {} mode", change.interface, change.mode)
    };
    if !change.services_stopped.is_empty() {
        message.push_str(&format!(
            " (stopped {}; restart them by hand when done)",
            change.services_stopped.join(", ")
        ));
    }
    message
}

fn handle_monitor(root: &Path, timeout: Duration, args: MonitorArgs) -> Result<HandlerResult> {
    let ctl = controller(root, timeout);
    let opts = MonitorOptions {
        kill_interfering: args.kill_interfering,
        force: args.force,
    };
    let change = ctl.enter_monitor(&args.interface, &opts)?;
    let message = describe_mode_change(&change);
    Ok((message, serde_json::to_value(&change)?))
}

fn handle_managed(root: &Path, timeout: Duration, args: InterfaceArg) -> Result<HandlerResult> {
    let ctl = controller(root, timeout);
    let change = ctl.exit_monitor(&args.interface)?;
    let message = describe_mode_change(&change);
    Ok((message, serde_json::to_value(&change)?))
}

fn handle_mac(root: &Path, timeout: Duration, args: MacArgs) -> Result<HandlerResult> {
    let ctl = controller(root, timeout);
    let request = match &args.address {
        Some(raw) => MacRequest::Explicit(raw.parse::<MacAddress>()?),
        None => MacRequest::Random {
            preserve_vendor: args.preserve_vendor,
        },
    };
    let change = ctl.spoof_mac(&args.interface, &request, args.force)?;
    let message = if change.changed {
        format!(
            "MAC on {} changed from {} to {}",
            change.interface, change.previous, change.current
        )
    } else {
        format!("MAC on {} is already {}", change.interface, change.current)
    };
    Ok((message, serde_json::to_value(&change)?))
}

fn handle_restore(root: &Path, timeout: Duration, args: RestoreArgs) -> Result<HandlerResult> {
    let ctl = controller(root, timeout);
    match args.interface {
        Some(name) => {
            let report = restore::apply(&ctl, &name)?;
            let message = match report.status {
                RestoreStatus::Restored => {
                    format!("{name} restored ({})", report.steps.join(", "))
                }
                _ => format!("{name} had nothing to restore"),
            };
            Ok((message, serde_json::to_value(&report)?))
        }
        None => {
            let reports = restore::apply_all(&ctl)?;
            let failed: Vec<&str> = reports
                .iter()
                .filter(|r| r.status == RestoreStatus::Failed)
                .map(|r| r.interface.as_str())
                .collect();
            if !failed.is_empty() {
                bail!(
                    "restore incomplete: {} of {} interfaces failed ({}); their entries remain recorded",
                    failed.len(),
                    reports.len(),
                    failed.join(", ")
                );
            }
            let message = if reports.is_empty() {
                "Nothing to restore".to_string()
            } else {
                format!("Restored {} interface(s)", reports.len())
            };
            Ok((message, json!({ "reports": reports })))
        }
    }
}

fn handle_pending(root: &Path) -> Result<HandlerResult> {
    let entries = restore::pending(&Ledger::new(root))?;
    let message = if entries.is_empty() {
        "No restore entries recorded".to_string()
    } else {
        format!("{} restore entr{} recorded", entries.len(), plural_y(entries.len()))
    };
    Ok((message, json!({ "entries": entries })))
}

fn handle_defer(root: &Path) -> Result<HandlerResult> {
    let entries = restore::defer(&Ledger::new(root))?;
    let message = if entries.is_empty() {
        "No restore entries recorded".to_string()
    } else {
        format!(
            "Left {} restore entr{} in place; restore before teardown",
            entries.len(),
            plural_y(entries.len())
        )
    };
    Ok((message, json!({ "entries": entries })))
}

fn handle_sanitize(
    caps: &CapabilityTable,
    timeout: Duration,
    args: SanitizeArgs,
) -> Result<HandlerResult> {
    let opts = SanitizeOptions {
        paths: args.paths,
        include_history: args.history,
    };
    let report = sanitize::truncate_logs(&opts);

    let journal = match sanitize::vacuum_journal(caps, &args.journal_retention, timeout) {
        Ok(journal) => Some(journal),
        Err(e) if e.is_unavailable() => {
            warn!("journal vacuum skipped: {e}");
            None
        }
        Err(e) => {
            // truncation already ran; its result must survive the bail
            let mut partial = format!(
                "journal vacuum failed; {} log file(s) were already truncated",
                report.truncated.len()
            );
            if !report.errors.is_empty() {
                partial.push_str(&format!(" and {} failed", report.errors.len()));
            }
            return Err(anyhow::Error::new(e).context(partial));
        }
    };

    if !report.is_clean() {
        bail!(
            "log sweep hit {} error(s): {}",
            report.errors.len(),
            report.errors.join("; ")
        );
    }

    let message = match &journal {
        Some(journal) => format!(
            "Truncated {} log file(s); journal vacuumed to {}",
            report.truncated.len(),
            journal.retention
        ),
        None => format!(
            "Truncated {} log file(s); no journal tooling found",
            report.truncated.len()
        ),
    };
    Ok((message, json!({ "logs": report, "journal": journal })))
}

fn handle_list() -> Result<HandlerResult> {
    let interfaces = NetSysfs::new().list()?;
    let message = format!("Found {} interface(s)", interfaces.len());
    Ok((message, json!({ "interfaces": interfaces })))
}

fn handle_status(root: &Path, args: StatusArgs) -> Result<HandlerResult> {
    let caps = capability::detect();
    let net = NetSysfs::new();
    let ledger = Ledger::new(root);
    let entries = ledger.load()?;

    let mut summaries = net.list()?;
    if let Some(name) = &args.interface {
        summaries.retain(|s| &s.name == name);
        if summaries.is_empty() {
            return Err(ControlError::InterfaceNotFound(name.clone()).into());
        }
    }

    let interfaces: Vec<Value> = summaries
        .into_iter()
        .map(|summary| {
            let recorded = entries.get(&summary.name);
            json!({ "live": summary, "recorded": recorded })
        })
        .collect();

    let message = format!(
        "{} interface(s), {} restore entr{} recorded",
        interfaces.len(),
        entries.len(),
        plural_y(entries.len())
    );
    Ok((
        message,
        json!({ "capabilities": caps.describe(), "interfaces": interfaces }),
    ))
}

fn plural_y(count: usize) -> &'static str {
    if count == 1 {
        "y"
    } else {
        "ies"
    }
}
