//! Simulated uniprocessor RTOS kernel.
//!
//! A [`Kernel`] is a cheap, cloneable handle. [`Kernel::start`] adopts the
//! calling host thread as the `main` kernel thread and launches the tick
//! service that drives timeouts and software timers.
//!
//! Calling context is resolved per host thread:
//! - inside an interrupt handler (see [`crate::arch::interrupts::in_isr`])
//!   every call takes the non-blocking interrupt path,
//! - on a thread created by this kernel the call waits for the CPU first,
//! - anywhere else the kernel refuses to act (`ErrorOs` / `None`).

pub mod msgqueue;
mod sched;
pub mod signal;
pub mod status;
pub mod thread;
pub mod timer;

use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;

use crate::arch::interrupts;
use crate::config::{ConfigError, KernelConfig};

use sched::{KernelState, ThreadState, Wait, WaitOutcome, MAIN_THREAD};
use status::{OsEvent, OsStatus, WAIT_FOREVER};
use thread::{Priority, ThreadId};

pub use msgqueue::{MessageQDef, MessageQId};
pub use status::{EventValue, SIGNAL_ERROR};
pub use thread::{SpawnError, ThreadDef};
pub use timer::{TimerId, TimerKind};

/// Errors raised while bringing a kernel up.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid kernel configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("calling thread already belongs to a running kernel")]
    AlreadyAttached,
    #[error("failed to spawn the tick service")]
    TickService(#[source] io::Error),
}

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Kernel thread bound to this host thread: (kernel id, thread id).
    static CURRENT: Cell<Option<(u64, ThreadId)>> = const { Cell::new(None) };
}

fn bind_current(kernel_id: u64, id: ThreadId) {
    CURRENT.with(|c| c.set(Some((kernel_id, id))));
}

fn unbind_current(kernel_id: u64) {
    CURRENT.with(|c| {
        if matches!(c.get(), Some((k, _)) if k == kernel_id) {
            c.set(None);
        }
    });
}

fn current_thread(kernel_id: u64) -> Option<ThreadId> {
    CURRENT.with(|c| match c.get() {
        Some((k, id)) if k == kernel_id => Some(id),
        _ => None,
    })
}

/// Who issued a kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Caller {
    Isr,
    /// A kernel thread that now owns the CPU (table index).
    Thread(usize),
    /// Foreign host thread, terminated thread or stopped kernel.
    Inactive,
}

/// Unwind payload that ends a created thread after it was terminated.
pub(crate) struct ThreadRetired;

pub(crate) struct KernelInner {
    id: u64,
    config: KernelConfig,
    state: Mutex<KernelState>,
    cpu: Condvar,
    /// Held by whoever executes an interrupt handler; one interrupt context
    /// per kernel, nesting allowed on the holding host thread.
    isr: ReentrantMutex<()>,
    tick: AtomicU32,
    stopped: AtomicBool,
}

impl KernelInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock()
    }

    pub(crate) fn isr_token(&self) -> ReentrantMutexGuard<'_, ()> {
        self.isr.lock()
    }

    pub(crate) fn now(&self) -> u32 {
        self.tick.load(Ordering::Acquire)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Locks the kernel and resolves the calling context. Thread callers
    /// return only once they own the CPU.
    pub(crate) fn enter(&self) -> (MutexGuard<'_, KernelState>, Caller) {
        let mut state = self.state.lock();
        if interrupts::in_isr() {
            return (state, Caller::Isr);
        }
        let Some(id) = current_thread(self.id) else {
            return (state, Caller::Inactive);
        };
        let idx = id.index();
        self.wait_for_cpu(&mut state, idx);
        let caller = if state.stopped || state.threads[idx].state != ThreadState::Running {
            Caller::Inactive
        } else {
            Caller::Thread(idx)
        };
        (state, caller)
    }

    /// Scheduling point at the end of a kernel call. Interrupt callers defer
    /// to the interrupt exit path.
    pub(crate) fn leave(&self, mut state: MutexGuard<'_, KernelState>, caller: Caller) {
        if let Caller::Thread(idx) = caller {
            if state.dispatch() {
                self.cpu.notify_all();
            }
            self.wait_for_cpu(&mut state, idx);
        }
    }

    /// Parks the calling host thread until `idx` runs, dies, or the kernel
    /// stops.
    ///
    /// This is the scheduling point of a thread that owns the CPU: a pending
    /// timer interrupt is taken here, on the owner's host thread, and a
    /// thread readied meanwhile with higher priority preempts the owner.
    /// A created thread that finds itself terminated never returns; its host
    /// thread unwinds with [`ThreadRetired`].
    pub(crate) fn wait_for_cpu(&self, state: &mut MutexGuard<'_, KernelState>, idx: usize) {
        loop {
            while !state.stopped
                && !matches!(
                    state.threads[idx].state,
                    ThreadState::Running | ThreadState::Terminated
                )
            {
                self.cpu.wait(state);
            }
            if idx != MAIN_THREAD && state.threads[idx].state == ThreadState::Terminated {
                panic::resume_unwind(Box::new(ThreadRetired));
            }
            if state.stopped
                || state.threads[idx].state != ThreadState::Running
                || interrupts::in_isr()
            {
                return;
            }
            if !state.pending_timers.is_empty() {
                self.take_timer_interrupt(state);
                continue;
            }
            if !state.dispatch() {
                return;
            }
            self.cpu.notify_all();
        }
    }

    /// Runs the pending timer callbacks in interrupt context with the kernel
    /// lock released. The caller must own the CPU, or the CPU must be idle.
    pub(crate) fn take_timer_interrupt(&self, state: &mut MutexGuard<'_, KernelState>) {
        let due = std::mem::take(&mut state.pending_timers);
        MutexGuard::unlocked(state, || {
            let _token = self.isr_token();
            let _isr = interrupts::enter_isr();
            for callback in &due {
                if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                    error!(target: "kernel::timer", "timer callback panicked");
                }
            }
        });
    }

    /// Blocks the running thread `idx` on `wait` for at most `timeout` ticks.
    pub(crate) fn block_current(
        &self,
        state: &mut MutexGuard<'_, KernelState>,
        idx: usize,
        wait: Wait,
        timeout: u32,
    ) -> WaitOutcome {
        let wake_at = if timeout == WAIT_FOREVER || timeout > i32::MAX as u32 {
            None
        } else {
            Some(self.now().wrapping_add(timeout))
        };
        state.block(idx, wait, wake_at);
        state.dispatch();
        self.cpu.notify_all();
        self.wait_for_cpu(state, idx);
        state.threads[idx]
            .outcome
            .take()
            .unwrap_or(WaitOutcome::Terminated)
    }

    /// Interrupt exit: reschedule, then let the interrupted thread (if it is
    /// one of ours) wait for the CPU again. Only the CPU owner, or anyone
    /// while the CPU is idle, may hand the CPU on.
    pub(crate) fn isr_exit(&self) {
        let mut state = self.state.lock();
        let current = current_thread(self.id).map(ThreadId::index);
        let owns_cpu = state.running.is_none() || state.running == current;
        if owns_cpu && state.dispatch() {
            self.cpu.notify_all();
        }
        if let Some(idx) = current {
            self.wait_for_cpu(&mut state, idx);
        }
    }

    /// Called on the host thread of a kernel thread whose body returned.
    pub(crate) fn thread_exit(&self, idx: usize) {
        let mut state = self.state.lock();
        if !state.threads[idx].is_alive() {
            // Terminated by someone else, who already rescheduled.
            return;
        }
        debug!(target: "kernel::thread", "{} exited", state.threads[idx].name);
        state.terminate(idx);
        state.dispatch();
        self.cpu.notify_all();
    }

    pub(crate) fn notify(&self) {
        self.cpu.notify_all();
    }
}

/// Handle to one simulated kernel instance.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Starts a kernel and adopts the calling host thread as `main`
    /// (priority `Normal`).
    pub fn start(config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        if CURRENT.with(|c| c.get()).is_some() {
            return Err(KernelError::AlreadyAttached);
        }

        let id = NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed);
        let mut state = KernelState::new();
        let main = state.add_thread("main", Priority::Normal);
        state.dispatch();
        let main_id = state.threads[main].id;

        let kernel = Self {
            inner: Arc::new(KernelInner {
                id,
                config,
                state: Mutex::new(state),
                cpu: Condvar::new(),
                isr: ReentrantMutex::new(()),
                tick: AtomicU32::new(0),
                stopped: AtomicBool::new(false),
            }),
        };

        timer::spawn_tick_service(&kernel.inner).map_err(KernelError::TickService)?;
        bind_current(id, main_id);
        info!(
            target: "kernel",
            "kernel {} started: {} Hz tick, {} signal flags, {} threads max",
            id,
            config.tick_hz,
            config.signal_count,
            config.max_threads
        );
        Ok(kernel)
    }

    /// Stops the kernel: all threads are terminated and timers are dropped.
    /// Created threads unwind out of their bodies, a blocking call of `main`
    /// returns `ErrorOs`, and the tick service exits.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        if state.stopped {
            return;
        }
        for idx in 0..state.threads.len() {
            if state.threads[idx].is_alive() {
                state.terminate(idx);
            }
        }
        state.stopped = true;
        state.running = None;
        // Timer callbacks usually hold kernel handles.
        let timers = std::mem::take(&mut state.timers);
        let pending = std::mem::take(&mut state.pending_timers);
        self.inner.stopped.store(true, Ordering::Release);
        drop(state);
        drop(timers);
        drop(pending);

        self.inner.notify();
        unbind_current(self.inner.id);
        info!(target: "kernel", "kernel {} stopped at tick {}", self.inner.id, self.sys_tick());
    }

    pub fn is_running(&self) -> bool {
        !self.inner.is_stopped()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    /// Mask of all user-settable signal flags.
    pub fn signal_mask(&self) -> u32 {
        self.inner.config.signal_mask()
    }

    /// Tick rate in Hz.
    pub fn sys_tick_freq(&self) -> u32 {
        self.inner.config.tick_hz
    }

    /// Monotonic tick counter (wraps at `u32::MAX`).
    pub fn sys_tick(&self) -> u32 {
        self.inner.now()
    }

    /// Suspends the calling thread for `ticks` ticks.
    ///
    /// Returns `EventTimeout` when the delay elapsed, `ErrorIsr` from
    /// interrupt context and `ErrorOs` for callers the kernel does not run.
    /// A zero delay yields to ready threads of equal priority.
    pub fn delay(&self, ticks: u32) -> OsStatus {
        self.timed_wait(ticks)
    }

    /// Waits for any event for `ticks` ticks. No event source is wired to
    /// this call, so it behaves like [`Kernel::delay`] with an event result.
    pub fn wait(&self, ticks: u32) -> OsEvent {
        OsEvent::status(self.timed_wait(ticks))
    }

    fn timed_wait(&self, ticks: u32) -> OsStatus {
        let (mut state, caller) = self.inner.enter();
        let idx = match caller {
            Caller::Isr => return OsStatus::ErrorIsr,
            Caller::Inactive => return OsStatus::ErrorOs,
            Caller::Thread(idx) => idx,
        };

        if ticks == 0 {
            state.make_ready(idx);
            state.dispatch();
            self.inner.notify();
            self.inner.wait_for_cpu(&mut state, idx);
            return if state.stopped || state.threads[idx].state != ThreadState::Running {
                OsStatus::ErrorOs
            } else {
                OsStatus::EventTimeout
            };
        }

        match self.inner.block_current(&mut state, idx, Wait::Delay, ticks) {
            WaitOutcome::Timeout => OsStatus::EventTimeout,
            _ => OsStatus::ErrorOs,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<KernelInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.inner.id)
            .field("tick", &self.sys_tick())
            .field("stopped", &self.inner.is_stopped())
            .finish()
    }
}
