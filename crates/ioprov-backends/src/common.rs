//! Shared state machine and pending-operation bookkeeping used by every
//! provider variant: the same CAS lifecycle state and pending-operation
//! map each variant would otherwise duplicate, pulled up into one
//! place.

use ioprov_core::entry::{OpId, OpIdGenerator, PendingOperation, ProviderStats};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// `Uninitialised -> Initialised -> ShuttingDown -> Uninitialised`,
/// driven by a single `AtomicBool` the way
/// `mInitialized.compare_exchange_strong` does in the original.
#[derive(Default)]
pub struct LifecycleState {
    initialised: AtomicBool,
    shutting_down: AtomicBool,
}

impl LifecycleState {
    pub fn try_initialise(&self) -> bool {
        self.initialised
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire) && !self.is_shutting_down()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Enter the shutting-down state. Returns `false` if the provider
    /// was never initialised (shutdown is idempotent, not an error).
    pub fn begin_shutdown(&self) -> bool {
        if !self.initialised.load(Ordering::Acquire) {
            return false;
        }
        self.shutting_down.store(true, Ordering::Release);
        true
    }

    pub fn finish_shutdown(&self) {
        self.initialised.store(false, Ordering::Release);
        self.shutting_down.store(false, Ordering::Release);
    }
}

/// The pending-operation table plus cumulative counters, all guarded by
/// one lock. Short critical sections only: insert/remove/snapshot.
#[derive(Default)]
pub struct PendingTable {
    op_ids: OpIdGenerator,
    inner: Mutex<HashMap<u64, PendingOperation>>,
    total_submissions: AtomicU64,
    total_completions: AtomicU64,
    error_count: AtomicU64,
}

impl PendingTable {
    pub fn next_op_id(&self) -> OpId {
        self.op_ids.next()
    }

    pub fn insert(&self, op: PendingOperation) {
        let id = op.op_id.0;
        self.inner.lock().unwrap().insert(id, op);
        self.total_submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove(&self, op_id: OpId) -> Option<PendingOperation> {
        let removed = self.inner.lock().unwrap().remove(&op_id.0);
        if removed.is_some() {
            self.total_completions.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pending_count(&self) -> u64 {
        self.inner.lock().unwrap().len() as u64
    }

    /// Drain everything still pending, e.g. during shutdown. Order is
    /// unspecified; callers that need to notify waiters do so per entry.
    pub fn drain_all(&self) -> Vec<PendingOperation> {
        self.inner.lock().unwrap().drain().map(|(_, v)| v).collect()
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            total_submissions: self.total_submissions.load(Ordering::Relaxed),
            total_completions: self.total_completions.load(Ordering::Relaxed),
            pending: self.pending_count(),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

/// A `last_error` string holder shared by every variant: a `Mutex<String>`
/// updated on the failure path and read back by `last_error()`.
#[derive(Default)]
pub struct LastError(Mutex<String>);

impl LastError {
    pub fn set(&self, msg: impl Into<String>) {
        *self.0.lock().unwrap() = msg.into();
    }

    pub fn get(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}
