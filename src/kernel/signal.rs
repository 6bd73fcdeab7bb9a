//! Per-thread signal flags.
//!
//! Each thread owns `signal_count` flags. The most significant bit of the
//! word is reserved: it doubles as [`SIGNAL_ERROR`], the sentinel returned by
//! rejected `set`/`clear` requests.
//!
//! A wait mask of 0 is satisfied by any flag and consumes all of them; a
//! nonzero mask needs every flag in the mask and consumes exactly those.

use log::trace;

use super::sched::{Wait, WaitOutcome};
use super::status::{OsEvent, OsStatus, SIGNAL_ERROR};
use super::thread::ThreadId;
use super::{Caller, Kernel};

/// Flags a wait on `mask` takes from `flags`, or `None` if not satisfied.
fn satisfied(flags: u32, mask: u32) -> Option<u32> {
    if mask == 0 {
        (flags != 0).then_some(flags)
    } else {
        (flags & mask == mask).then_some(mask)
    }
}

impl Kernel {
    /// Sets `signals` on `thread` and returns the flags held before.
    ///
    /// Allowed from interrupt context. Returns [`SIGNAL_ERROR`] for an
    /// unknown thread or bits outside the flag range.
    pub fn signal_set(&self, thread: ThreadId, signals: u32) -> u32 {
        let (mut state, caller) = self.inner.enter();
        if caller == Caller::Inactive || signals & !self.signal_mask() != 0 {
            return SIGNAL_ERROR;
        }
        let Some(idx) = state.thread_index(thread) else {
            return SIGNAL_ERROR;
        };

        let tcb = &mut state.threads[idx];
        let prior = tcb.signals;
        tcb.signals |= signals;
        trace!(target: "kernel::signal", "{}: {:#x} | {:#x}", tcb.name, prior, signals);

        if let Wait::Signal(mask) = tcb.wait {
            if let Some(taken) = satisfied(tcb.signals, mask) {
                tcb.signals &= !taken;
                state.wake(idx, WaitOutcome::Signals(taken));
            }
        }
        self.inner.leave(state, caller);
        prior
    }

    /// Clears `signals` on `thread` and returns the flags held before.
    ///
    /// Not allowed from interrupt context ([`SIGNAL_ERROR`]).
    pub fn signal_clear(&self, thread: ThreadId, signals: u32) -> u32 {
        let (mut state, caller) = self.inner.enter();
        if !matches!(caller, Caller::Thread(_)) || signals & !self.signal_mask() != 0 {
            return SIGNAL_ERROR;
        }
        let Some(idx) = state.thread_index(thread) else {
            return SIGNAL_ERROR;
        };

        let prior = state.threads[idx].signals;
        state.threads[idx].signals &= !signals;
        self.inner.leave(state, caller);
        prior
    }

    /// Waits up to `timeout` ticks for flags of the calling thread.
    ///
    /// `EventSignal` with the consumed flags on success, `Ok` when nothing
    /// matched and `timeout` is 0, `EventTimeout` at the deadline,
    /// `ErrorValue` for a mask outside the flag range, `ErrorIsr` from
    /// interrupt context.
    pub fn signal_wait(&self, mask: u32, timeout: u32) -> OsEvent {
        let (mut state, caller) = self.inner.enter();
        let idx = match caller {
            Caller::Isr => return OsEvent::status(OsStatus::ErrorIsr),
            Caller::Inactive => return OsEvent::status(OsStatus::ErrorOs),
            Caller::Thread(idx) => idx,
        };
        if mask & !self.signal_mask() != 0 {
            return OsEvent::status(OsStatus::ErrorValue);
        }

        if let Some(taken) = satisfied(state.threads[idx].signals, mask) {
            state.threads[idx].signals &= !taken;
            self.inner.leave(state, caller);
            return OsEvent::signals(taken);
        }
        if timeout == 0 {
            self.inner.leave(state, caller);
            return OsEvent::status(OsStatus::Ok);
        }

        match self
            .inner
            .block_current(&mut state, idx, Wait::Signal(mask), timeout)
        {
            WaitOutcome::Signals(taken) => OsEvent::signals(taken),
            WaitOutcome::Timeout => OsEvent::status(OsStatus::EventTimeout),
            _ => OsEvent::status(OsStatus::ErrorOs),
        }
    }
}
