//! Single-flight admission for script executions.
//!
//! [`ExecutionRegistry`] holds at most one running execution per script id.
//! [`ExecutionRegistry::try_admit`] is the only way in, and the returned
//! [`Admission`] releases the slot when dropped, whichever way the monitor
//! task ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use scriptd_core::types::{DbId, Timestamp};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Slot {
    execution_id: Option<DbId>,
    cancel: CancellationToken,
    started_at: Timestamp,
    pid: Option<u32>,
}

/// Snapshot of a running execution.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub script_id: DbId,
    /// `None` until the log row has been created.
    pub execution_id: Option<DbId>,
    pub cancel: CancellationToken,
    pub started_at: Timestamp,
    /// `None` until the process has been spawned.
    pub pid: Option<u32>,
}

#[derive(Default)]
pub struct ExecutionRegistry {
    running: Mutex<HashMap<DbId, Slot>>,
    idle: Notify,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DbId, Slot>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `script_id`, or `None` if a run is in flight.
    pub fn try_admit(self: &Arc<Self>, script_id: DbId) -> Option<Admission> {
        let cancel = CancellationToken::new();
        {
            let mut running = self.lock();
            if running.contains_key(&script_id) {
                return None;
            }
            running.insert(
                script_id,
                Slot {
                    execution_id: None,
                    cancel: cancel.clone(),
                    started_at: Utc::now(),
                    pid: None,
                },
            );
        }
        Some(Admission {
            registry: Arc::clone(self),
            script_id,
            cancel,
        })
    }

    pub fn lookup(&self, script_id: DbId) -> Option<ExecutionHandle> {
        self.lock().get(&script_id).map(|slot| handle(script_id, slot))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Request cancellation of every running execution.
    ///
    /// Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let running = self.lock();
        for slot in running.values() {
            slot.cancel.cancel();
        }
        running.len()
    }

    /// Wait until no execution is running. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_empty();
            }
        }
    }

    fn release(&self, script_id: DbId) {
        let mut running = self.lock();
        running.remove(&script_id);
        if running.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

fn handle(script_id: DbId, slot: &Slot) -> ExecutionHandle {
    ExecutionHandle {
        script_id,
        execution_id: slot.execution_id,
        cancel: slot.cancel.clone(),
        started_at: slot.started_at,
        pid: slot.pid,
    }
}

/// Ownership of a script's running slot. Dropping it releases the slot.
pub struct Admission {
    registry: Arc<ExecutionRegistry>,
    script_id: DbId,
    cancel: CancellationToken,
}

impl Admission {
    /// Token cancelled by [`ExecutionRegistry::cancel_all`] or a lookup holder.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn bind_execution(&self, execution_id: DbId) {
        if let Some(slot) = self.registry.lock().get_mut(&self.script_id) {
            slot.execution_id = Some(execution_id);
        }
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        if let Some(slot) = self.registry.lock().get_mut(&self.script_id) {
            slot.pid = pid;
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.registry.release(self.script_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
