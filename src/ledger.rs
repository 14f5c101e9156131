//! Crash-durable restore ledger
//!
//! The single source of truth for reversible changes that have not been
//! undone yet. Every mutation rewrites the whole document to a temporary
//! file, fsyncs it, renames it into place, and fsyncs the parent directory,
//! so a reader never observes a half-written ledger. Per-entry versions
//! guard against a second instance of the tool racing on the same
//! interface.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::iface::Mode;
use crate::mac::MacAddress;

/// On-disk format marker; unknown values are rejected, never reinterpreted
pub const SCHEMA_VERSION: u32 = 1;

const LEDGER_FILE: &str = "ledger.json";
const MAX_UPSERT_ATTEMPTS: usize = 3;

/// One interface's recorded original state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreEntry {
    pub interface: String,
    pub original_mode: Mode,
    pub original_mac: MacAddress,
    /// Unix seconds, UTC
    pub created_at: i64,
    /// Present when the mode-switch backend renamed the interface
    /// (`wlan0` -> `wlan0mon`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_name: Option<String>,
    /// Bumped on every write; detects concurrent writers
    pub version: u64,
}

impl RestoreEntry {
    /// Fresh entry with originals from a live read; the ledger assigns the
    /// version on write
    #[must_use]
    pub fn new(interface: impl Into<String>, original_mode: Mode, original_mac: MacAddress) -> Self {
        Self {
            interface: interface.into(),
            original_mode,
            original_mac,
            created_at: Utc::now().timestamp(),
            monitor_name: None,
            version: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDoc {
    schema: u32,
    entries: BTreeMap<String, RestoreEntry>,
}

impl LedgerDoc {
    fn empty() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Handle to the persisted ledger file
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(LEDGER_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All pending entries; a missing file is an empty ledger
    pub fn load(&self) -> Result<BTreeMap<String, RestoreEntry>> {
        Ok(self.read_doc()?.entries)
    }

    pub fn get(&self, interface: &str) -> Result<Option<RestoreEntry>> {
        Ok(self.read_doc()?.entries.remove(interface))
    }

    /// Create or update the entry for an interface
    ///
    /// `observed` is the version the caller saw when it read the entry at
    /// the start of its operation (`None` when it saw no entry). The ledger
    /// re-reads immediately before writing; when the version moved
    /// underneath the caller it adopts the newer record and re-runs `build`
    /// against it, a bounded number of times, so a concurrent writer's
    /// captured originals are preserved rather than overwritten.
    ///
    /// # Errors
    ///
    /// [`ControlError::ConcurrentModification`] when the entry keeps moving
    /// across all attempts.
    pub fn upsert<F>(&self, interface: &str, observed: Option<u64>, build: F) -> Result<RestoreEntry>
    where
        F: Fn(Option<&RestoreEntry>) -> RestoreEntry,
    {
        let mut observed = observed;
        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let mut doc = self.read_doc()?;
            let current_version = doc.entries.get(interface).map(|e| e.version);
            if current_version != observed {
                debug!(
                    "ledger: {interface} at version {current_version:?}, expected {observed:?} (attempt {attempt})"
                );
                if attempt == MAX_UPSERT_ATTEMPTS {
                    return Err(ControlError::ConcurrentModification(interface.to_string()));
                }
                observed = current_version;
                continue;
            }

            let mut entry = build(doc.entries.get(interface));
            entry.interface = interface.to_string();
            entry.version = current_version.unwrap_or(0) + 1;
            doc.entries.insert(interface.to_string(), entry.clone());
            self.write_doc(&doc)?;
            return Ok(entry);
        }
        Err(ControlError::ConcurrentModification(interface.to_string()))
    }

    /// Delete the entry after a fully-applied restore
    ///
    /// Removing an absent entry is a no-op. A version mismatch surfaces
    /// immediately: the restore was derived from a record another process
    /// has since changed.
    pub fn remove(&self, interface: &str, observed: u64) -> Result<()> {
        let mut doc = self.read_doc()?;
        match doc.entries.get(interface) {
            None => Ok(()),
            Some(entry) if entry.version != observed => {
                Err(ControlError::ConcurrentModification(interface.to_string()))
            }
            Some(_) => {
                doc.entries.remove(interface);
                self.write_doc(&doc)
            }
        }
    }

    fn read_doc(&self) -> Result<LedgerDoc> {
        if !self.path.exists() {
            return Ok(LedgerDoc::empty());
        }
        let data = fs::read_to_string(&self.path)?;
        let doc: LedgerDoc = serde_json::from_str(&data).map_err(|e| ControlError::LedgerCorrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        if doc.schema != SCHEMA_VERSION {
            return Err(ControlError::LedgerCorrupt {
                path: self.path.clone(),
                detail: format!("unsupported schema {}", doc.schema),
            });
        }
        Ok(doc)
    }

    fn write_doc(&self, doc: &LedgerDoc) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            ControlError::operation_failed("write ledger", "ledger path has no parent directory")
        })?;
        // 0700 applies only to directories this tool creates; a pre-existing
        // root keeps whatever mode the operator gave it.
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
            }
        }

        let data = serde_json::to_vec_pretty(doc)
            .map_err(|e| ControlError::operation_failed("serialize ledger", e.to_string()))?;

        let tmp = temp_path(&self.path);
        {
            let mut options = OpenOptions::new();
            options.create(true).truncate(true).write(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }

        fs::rename(&tmp, &self.path)?;
        File::open(parent)?.sync_all()?;
        Ok(())
    }
}

fn temp_path(dest: &Path) -> PathBuf {
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("ledger");
    dest.with_file_name(format!("{file_name}.new"))
}
