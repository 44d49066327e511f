//! # Process Registry
//!
//! Maps a [`CommandId`] to the one live process running for it, so stop
//! requests and shutdown can reach processes they did not spawn.
//!
//! Owned by whoever builds the runner and passed in explicitly; there is no
//! global map.
//!
//! [`ProcessRegistry::kill_all`] is a shutdown: it also closes the registry,
//! so a sequence that is between steps cannot start another process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::CommandError;
use crate::events::CommandId;

/// Reference to a live process, held by the registry for its lifetime
///
/// Killing is cooperative: the handle cancels a token that the owning runner
/// watches, and the runner terminates the OS process and does the final
/// bookkeeping. Clones share the same token.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    command_id: CommandId,
    pid: Option<u32>,
    serial: u64,
    cancel: CancellationToken,
}

impl ProcessHandle {
    pub fn new(command_id: CommandId, pid: Option<u32>) -> Self {
        static SERIAL: AtomicU64 = AtomicU64::new(1);
        Self {
            command_id,
            pid,
            serial: SERIAL.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        }
    }

    pub fn command_id(&self) -> &CommandId {
        &self.command_id
    }

    /// OS process id, if the platform reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Distinguishes successive processes registered under the same id
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Ask the owning runner to terminate the process
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token the owning runner waits on
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Debug, Default)]
struct Inner {
    processes: HashMap<CommandId, ProcessHandle>,
    closed: bool,
}

/// Registry of running processes keyed by command id
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<Inner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a freshly spawned process
    ///
    /// Fails if a live process is already registered under the same id, or
    /// with [`CommandError::Cancelled`] once the registry has been shut down.
    pub fn register(&self, handle: ProcessHandle) -> Result<(), CommandError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(CommandError::Cancelled);
        }
        if inner.processes.contains_key(handle.command_id()) {
            return Err(CommandError::AlreadyRunning(handle.command_id().clone()));
        }
        tracing::debug!(command_id = %handle.command_id(), pid = ?handle.pid(), "process registered");
        inner.processes.insert(handle.command_id().clone(), handle);
        Ok(())
    }

    /// Whether [`kill_all`](Self::kill_all) has run
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn get(&self, command_id: &CommandId) -> Option<ProcessHandle> {
        self.lock().processes.get(command_id).cloned()
    }

    pub fn remove(&self, command_id: &CommandId) -> Option<ProcessHandle> {
        self.lock().processes.remove(command_id)
    }

    /// Remove the entry only if it is still the process with `serial`
    ///
    /// Used by runners on completion so they never drop a handle that a
    /// later registration put in place.
    pub fn release(&self, command_id: &CommandId, serial: u64) -> bool {
        let mut inner = self.lock();
        match inner.processes.get(command_id) {
            Some(handle) if handle.serial() == serial => {
                inner.processes.remove(command_id);
                tracing::debug!(command_id = %command_id, "process released");
                true
            }
            _ => false,
        }
    }

    /// Kill and forget the process running for `command_id`
    pub fn stop(&self, command_id: &CommandId) -> Result<(), CommandError> {
        let handle = self
            .remove(command_id)
            .ok_or_else(|| CommandError::ProcessNotFound(command_id.clone()))?;
        tracing::info!(command_id = %command_id, pid = ?handle.pid(), "stopping process");
        handle.kill();
        Ok(())
    }

    /// Kill every tracked process, clear the registry and refuse any further
    /// registrations
    ///
    /// Returns how many processes were signalled.
    pub fn kill_all(&self) -> usize {
        let drained: Vec<ProcessHandle> = {
            let mut inner = self.lock();
            inner.closed = true;
            let drained = inner.processes.drain().map(|(_, handle)| handle).collect();
            drained
        };
        for handle in &drained {
            handle.kill();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "killed all running processes");
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().processes.is_empty()
    }

    pub fn ids(&self) -> Vec<CommandId> {
        self.lock().processes.keys().cloned().collect()
    }
}
