//! Rollback stack for multi-step link sequences
//!
//! A down/modify/up sequence that fails in the middle must not leave the
//! link down. Each completed step registers its undo; `commit` disarms the
//! guard once the whole sequence verified. Undo actions run in reverse
//! order on drop.

use log::{debug, warn};

type RollbackAction = Box<dyn FnOnce() -> anyhow::Result<()>>;

pub struct RollbackGuard {
    name: String,
    rollback_stack: Vec<RollbackAction>,
    committed: bool,
}

impl RollbackGuard {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rollback_stack: Vec::new(),
            committed: false,
        }
    }

    /// Register the undo for a step that just succeeded
    pub fn register<F>(&mut self, action: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        self.rollback_stack.push(Box::new(action));
    }

    /// Disarm the guard; the sequence is complete
    pub fn commit(mut self) {
        debug!("{}: committed", self.name);
        self.committed = true;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if self.committed || self.rollback_stack.is_empty() {
            return;
        }
        warn!(
            "{}: rolling back {} step(s)",
            self.name,
            self.rollback_stack.len()
        );
        while let Some(action) = self.rollback_stack.pop() {
            if let Err(e) = action() {
                warn!("{}: rollback step failed: {e}", self.name);
            }
        }
    }
}
