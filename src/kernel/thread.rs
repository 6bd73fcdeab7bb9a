//! Kernel thread management.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread as host;

use log::{debug, error};
use thiserror::Error;

use super::status::OsStatus;
use super::{bind_current, Caller, Kernel, KernelInner, ThreadRetired};

/// Thread priorities, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Idle,
    Low,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Realtime,
}

/// Opaque thread handle. [`ThreadId::NULL`] never names a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    pub const NULL: Self = Self(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Thread table index; only meaningful for ids handed out by a kernel.
    pub(crate) fn index(self) -> usize {
        (self.0 as usize).wrapping_sub(1)
    }
}

/// Static description of a thread to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadDef {
    pub name: &'static str,
    pub priority: Priority,
}

impl ThreadDef {
    pub const fn new(name: &'static str, priority: Priority) -> Self {
        Self { name, priority }
    }
}

#[derive(Debug, Error)]
pub enum SpawnError {
    /// Thread creation is not allowed in interrupt context.
    #[error("thread creation from interrupt context")]
    Isr,

    /// Caller is not a running thread of this kernel, or the kernel stopped.
    #[error("kernel is not running for this caller")]
    NotRunning,

    /// The thread table is full.
    #[error("thread table full ({0} live threads)")]
    CapacityExceeded(usize),

    /// The backing host thread could not be started.
    #[error("failed to spawn host thread")]
    Host(#[source] std::io::Error),
}

impl Kernel {
    /// Creates a thread running `body`. A thread with higher priority than
    /// the caller runs before this returns.
    pub fn thread_create<F>(&self, def: &ThreadDef, body: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (mut state, caller) = self.inner.enter();
        match caller {
            Caller::Isr => return Err(SpawnError::Isr),
            Caller::Inactive => return Err(SpawnError::NotRunning),
            Caller::Thread(_) => {}
        }

        let live = state.live_threads();
        if live >= self.inner.config.max_threads {
            return Err(SpawnError::CapacityExceeded(live));
        }

        let idx = state.add_thread(def.name, def.priority);
        let id = state.threads[idx].id;
        let inner = Arc::clone(&self.inner);
        let spawned = host::Builder::new()
            .name(format!("{}#{}", def.name, id.raw()))
            .spawn(move || run_thread(inner, id, body));

        if let Err(err) = spawned {
            state.terminate(idx);
            return Err(SpawnError::Host(err));
        }

        debug!(
            target: "kernel::thread",
            "created {} (id {}, {:?})",
            def.name,
            id.raw(),
            def.priority
        );
        self.inner.leave(state, caller);
        Ok(id)
    }

    /// Id of the calling thread, `None` outside thread context.
    pub fn thread_get_id(&self) -> Option<ThreadId> {
        let (state, caller) = self.inner.enter();
        let Caller::Thread(idx) = caller else {
            return None;
        };
        let id = state.threads[idx].id;
        self.inner.leave(state, caller);
        Some(id)
    }

    /// Terminates a thread. A terminated thread never runs again: wherever
    /// its body is parked, it unwinds at its next scheduling point, and a
    /// thread terminating itself does not return from this call. Only the
    /// adopted `main` thread survives termination; its kernel calls then
    /// fail with `ErrorOs`.
    pub fn thread_terminate(&self, id: ThreadId) -> OsStatus {
        let (mut state, caller) = self.inner.enter();
        match caller {
            Caller::Isr => return OsStatus::ErrorIsr,
            Caller::Inactive => return OsStatus::ErrorOs,
            Caller::Thread(_) => {}
        }
        let Some(target) = state.thread_index(id) else {
            return OsStatus::ErrorParameter;
        };

        debug!(target: "kernel::thread", "terminate {}", state.threads[target].name);
        state.terminate(target);
        self.inner.notify();
        self.inner.leave(state, caller);
        OsStatus::Ok
    }

    /// Priority of a live thread.
    pub fn thread_priority(&self, id: ThreadId) -> Option<Priority> {
        let state = self.inner.lock();
        state
            .thread_index(id)
            .map(|idx| state.threads[idx].priority)
    }
}

/// Host-thread entry of every created kernel thread.
fn run_thread<F: FnOnce()>(inner: Arc<KernelInner>, id: ThreadId, body: F) {
    bind_current(inner.id, id);
    let idx = id.index();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        {
            let mut state = inner.lock();
            inner.wait_for_cpu(&mut state, idx);
            if state.stopped {
                return;
            }
        }
        body();
    }));

    match outcome {
        Ok(()) => {}
        Err(payload) if payload.is::<ThreadRetired>() => {
            debug!(target: "kernel::thread", "thread {} retired after termination", id.raw());
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic>".to_string());
            error!(target: "kernel::thread", "thread {} panicked: {}", id.raw(), msg);
        }
    }

    inner.thread_exit(idx);
}
