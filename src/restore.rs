//! Restore orchestrator
//!
//! Walks the ledger and drives interfaces back to their recorded originals,
//! mode first, then MAC. Restoring an interface with no entry is a clean
//! no-op, and a batch restore keeps going when one interface fails so the
//! others still come back.

use log::{error, info, warn};
use serde::Serialize;

use crate::error::Result;
use crate::iface::Controller;
use crate::ledger::{Ledger, RestoreEntry};

/// Per-interface result of a restore pass
#[derive(Debug, Serialize)]
pub struct RestoreReport {
    pub interface: String,
    pub status: RestoreStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    /// Commands ran and the interface is back at its originals
    Restored,
    /// Nothing to do: no entry, or live state already matched
    Clean,
    /// The attempt failed; the entry stays recorded
    Failed,
}

impl RestoreReport {
    fn restored(interface: &str, steps: Vec<String>) -> Self {
        let status = if steps.is_empty() {
            RestoreStatus::Clean
        } else {
            RestoreStatus::Restored
        };
        Self {
            interface: interface.to_string(),
            status,
            steps,
            error: None,
        }
    }

    fn clean(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            status: RestoreStatus::Clean,
            steps: Vec::new(),
            error: None,
        }
    }

    fn failed(interface: &str, error: String) -> Self {
        Self {
            interface: interface.to_string(),
            status: RestoreStatus::Failed,
            steps: Vec::new(),
            error: Some(error),
        }
    }
}

/// Entries still recorded, sorted by interface name
pub fn pending(ledger: &Ledger) -> Result<Vec<RestoreEntry>> {
    Ok(ledger.load()?.into_values().collect())
}

/// Restore one interface to its recorded originals
///
/// No entry means nothing to undo; that is success, not an error.
pub fn apply(controller: &Controller, interface: &str) -> Result<RestoreReport> {
    let entry = match controller.ledger().get(interface)? {
        Some(entry) => entry,
        None => {
            info!("{interface}: no pending restore");
            return Ok(RestoreReport::clean(interface));
        }
    };
    let steps = controller.restore_to_original(&entry)?;
    Ok(RestoreReport::restored(interface, steps))
}

/// Restore every recorded interface, continuing past individual failures
///
/// Failed interfaces keep their entries so a later pass can pick them up.
pub fn apply_all(controller: &Controller) -> Result<Vec<RestoreReport>> {
    let entries = pending(controller.ledger())?;
    if entries.is_empty() {
        info!("nothing to restore");
        return Ok(Vec::new());
    }

    let mut reports = Vec::with_capacity(entries.len());
    for entry in entries {
        match controller.restore_to_original(&entry) {
            Ok(steps) => reports.push(RestoreReport::restored(&entry.interface, steps)),
            Err(e) => {
                error!("{}: restore failed: {e}", entry.interface);
                reports.push(RestoreReport::failed(&entry.interface, e.to_string()));
            }
        }
    }
    Ok(reports)
}

/// Acknowledge the pending entries without touching anything
///
/// The ledger file stays exactly as it is; the entries outlive this process
/// and any crash, which is the whole point of recording them.
pub fn defer(ledger: &Ledger) -> Result<Vec<RestoreEntry>> {
    let entries = pending(ledger)?;
    if entries.is_empty() {
        info!("no restore entries recorded");
    } else {
        warn!(
            "leaving {} restore entr{} in place; run a restore before teardown",
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" }
        );
    }
    Ok(entries)
}
