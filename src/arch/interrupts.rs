//! Simulated interrupt controller and interrupt-context tracking.
//!
//! [`Nvic`] models a small vectored interrupt controller: each line has an
//! installed handler, an enable bit, a pending bit and a selector word that
//! is handed to the handler on delivery. Raising a line that is enabled runs
//! its handler synchronously on the raising host thread, which stands in for
//! "the CPU took the interrupt right now". A disabled line keeps the request
//! pending until it is enabled again.
//!
//! While a handler runs, [`in_isr`] reports `true` on that host thread, so
//! kernel calls take their interrupt-context path. Every handler, timer
//! callbacks included, holds the kernel's interrupt token, so at most one
//! interrupt context per kernel is active; nesting on the holding host thread
//! (e.g. a timer callback raising a line) is allowed. Leaving the outermost
//! handler is a scheduling point.

use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{error, trace, warn};
use parking_lot::Mutex;

use crate::kernel::Kernel;

/// Default number of lines of a freshly created controller.
pub const DEFAULT_IRQ_LINES: usize = 4;

thread_local! {
    static ISR_NESTING: Cell<u32> = const { Cell::new(0) };
}

/// Returns whether the calling host thread is executing an interrupt handler.
#[inline]
pub fn in_isr() -> bool {
    ISR_NESTING.with(|n| n.get() > 0)
}

/// Current handler nesting depth of the calling host thread.
pub fn nesting_depth() -> u32 {
    ISR_NESTING.with(Cell::get)
}

/// Interrupt context marker; the context ends when the guard drops.
pub struct IsrContext {
    _not_send: PhantomData<*const ()>,
}

/// Enters interrupt context on the calling host thread.
pub fn enter_isr() -> IsrContext {
    ISR_NESTING.with(|n| n.set(n.get() + 1));
    IsrContext {
        _not_send: PhantomData,
    }
}

impl Drop for IsrContext {
    fn drop(&mut self) {
        ISR_NESTING.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// Interrupt handler. Closures taking the selector implement it.
pub trait IsrHandler: Send + Sync {
    fn handle(&self, selector: u32);
}

impl<F> IsrHandler for F
where
    F: Fn(u32) + Send + Sync,
{
    fn handle(&self, selector: u32) {
        self(selector)
    }
}

#[derive(Default)]
struct IrqLine {
    handler: Option<Arc<dyn IsrHandler>>,
    selector: u32,
    enabled: bool,
    pending: bool,
    delivered: u64,
}

/// Interrupt controller bound to one kernel.
pub struct Nvic {
    kernel: Kernel,
    lines: Mutex<Vec<IrqLine>>,
}

impl Nvic {
    pub fn new(kernel: &Kernel, lines: usize) -> Self {
        Self {
            kernel: kernel.clone(),
            lines: Mutex::new((0..lines).map(|_| IrqLine::default()).collect()),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.lock().len()
    }

    fn with_line<R>(&self, line: usize, f: impl FnOnce(&mut IrqLine) -> R) -> Option<R> {
        let mut lines = self.lines.lock();
        match lines.get_mut(line) {
            Some(l) => Some(f(l)),
            None => {
                warn!(target: "arch::interrupts", "IRQ line {} does not exist", line);
                None
            }
        }
    }

    /// Installs (or replaces) the handler of `line`.
    pub fn install(&self, line: usize, handler: impl IsrHandler + 'static) {
        let handler: Arc<dyn IsrHandler> = Arc::new(handler);
        self.with_line(line, |l| l.handler = Some(handler));
    }

    /// Sets the selector word the next delivery on `line` passes to its handler.
    pub fn set_selector(&self, line: usize, selector: u32) {
        self.with_line(line, |l| l.selector = selector);
    }

    pub fn selector(&self, line: usize) -> Option<u32> {
        self.with_line(line, |l| l.selector)
    }

    /// Enables `line`; a pending request is delivered immediately.
    pub fn enable(&self, line: usize) {
        let deliver = self.with_line(line, |l| {
            l.enabled = true;
            l.pending
        });
        if deliver == Some(true) {
            self.deliver(line);
        }
    }

    /// Disables `line`. Requests raised meanwhile stay pending.
    pub fn disable(&self, line: usize) {
        self.with_line(line, |l| l.enabled = false);
    }

    pub fn is_enabled(&self, line: usize) -> bool {
        self.with_line(line, |l| l.enabled).unwrap_or(false)
    }

    /// Raises `line`. Delivered at once when enabled, otherwise latched.
    pub fn set_pending(&self, line: usize) {
        let deliver = self.with_line(line, |l| {
            l.pending = true;
            l.enabled
        });
        if deliver == Some(true) {
            self.deliver(line);
        }
    }

    /// Drops a latched request without running the handler.
    pub fn clear_pending(&self, line: usize) {
        self.with_line(line, |l| l.pending = false);
    }

    pub fn is_pending(&self, line: usize) -> bool {
        self.with_line(line, |l| l.pending).unwrap_or(false)
    }

    /// Number of completed handler entries on `line`.
    pub fn delivered(&self, line: usize) -> u64 {
        self.with_line(line, |l| l.delivered).unwrap_or(0)
    }

    fn deliver(&self, line: usize) {
        let inner = self.kernel.inner();
        let token = inner.isr_token();
        let taken = self.with_line(line, |l| {
            if !(l.enabled && l.pending) {
                return None;
            }
            l.pending = false;
            match &l.handler {
                Some(handler) => {
                    l.delivered += 1;
                    Some((Arc::clone(handler), l.selector))
                }
                None => {
                    warn!(target: "arch::interrupts", "IRQ {} raised without handler", line);
                    None
                }
            }
        });
        let Some((handler, selector)) = taken.flatten() else {
            return;
        };

        trace!(target: "arch::interrupts", "IRQ {} enter (selector {})", line, selector);
        {
            let _isr = enter_isr();
            if panic::catch_unwind(AssertUnwindSafe(|| handler.handle(selector))).is_err() {
                error!(target: "arch::interrupts", "IRQ {} handler panicked", line);
            }
        }
        drop(token);

        if !in_isr() {
            inner.isr_exit();
        }
    }
}
