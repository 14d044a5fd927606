//! # Resource Ledger
//!
//! LIFO stack of release actions. Every GPU object is registered here right
//! after it is created, before anything else that can fail, and destroyed in
//! exact reverse order of registration.
//!
//! Two ledgers live at once: the process-lifetime one owned by the device
//! context (instance, device, pools, fence, query pool) and a local one per
//! test (pipeline, buffers). The local one is drained only after the device
//! is confirmed idle.

use std::panic::{self, AssertUnwindSafe};

/// Zero-argument release action.
pub type ReleaseFn = Box<dyn FnOnce()>;

struct DeletionEntry {
    label: String,
    action: ReleaseFn,
}

pub struct ResourceLedger {
    scope: String,
    entries: Vec<DeletionEntry>,
}

impl ResourceLedger {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            entries: Vec::new(),
        }
    }

    /// Register `release` for `resource` and hand the resource back.
    pub fn acquire<T>(
        &mut self,
        label: impl Into<String>,
        resource: T,
        release: impl FnOnce() + 'static,
    ) -> T {
        self.defer(label, release);
        resource
    }

    /// Register a release action with no resource to hand back.
    pub fn defer(&mut self, label: impl Into<String>, release: impl FnOnce() + 'static) {
        let label = label.into();
        tracing::debug!("[{}] acquired {}", self.scope, label);
        self.entries.push(DeletionEntry {
            label,
            action: Box::new(release),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Pop and invoke every action, newest first.
    ///
    /// A panicking action does not stop the remaining ones from running; once
    /// the stack is empty the process is aborted, since a teardown-time device
    /// error leaves nothing worth recovering.
    pub fn release_all(&mut self) {
        let mut failed = Vec::new();

        while let Some(entry) = self.entries.pop() {
            tracing::debug!("[{}] releasing {}", self.scope, entry.label);
            let action = entry.action;
            if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                failed.push(entry.label);
            }
        }

        if !failed.is_empty() {
            tracing::error!(
                "[{}] release actions failed: {}",
                self.scope,
                failed.join(", ")
            );
            std::process::abort();
        }
    }
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        // Reached only on a fatal error path: the device may still be using
        // these objects, so they are leaked rather than destroyed.
        if !self.entries.is_empty() {
            tracing::warn!(
                "[{}] dropped with {} unreleased resource(s), leaking them",
                self.scope,
                self.entries.len()
            );
        }
    }
}

impl std::fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLedger")
            .field("scope", &self.scope)
            .field(
                "entries",
                &self.entries.iter().map(|e| e.label.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
