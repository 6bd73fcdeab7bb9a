//! Software timers and the tick service.
//!
//! The tick service is the simulated timer interrupt: a host thread that
//! advances the tick counter at the configured rate, expires timed waits and
//! pends due timer callbacks. The callbacks run in interrupt context either
//! on the tick service (CPU idle) or on the host thread of the CPU owner at
//! its next kernel call, never next to running thread code. The service
//! holds only a weak reference and exits once the kernel stops or is dropped.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread as host;
use std::time::{Duration, Instant};

use log::debug;

use super::sched::tick_reached;
use super::status::OsStatus;
use super::{Caller, Kernel, KernelInner};

/// Callback run in interrupt context when a timer fires.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Ticks the service may fall behind before it stops catching up.
const MAX_TICK_BACKLOG: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Once,
    Periodic,
}

/// Opaque timer handle. [`TimerId::NULL`] never names a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

impl TimerId {
    pub const NULL: Self = Self(0);

    pub const fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

pub(crate) struct SoftTimer {
    kind: TimerKind,
    callback: TimerCallback,
    period: u32,
    /// Tick of the next expiry, `None` while stopped.
    next_fire: Option<u32>,
}

fn timer_slot(timers: &mut [Option<SoftTimer>], timer: TimerId) -> Option<&mut Option<SoftTimer>> {
    timers.get_mut(timer.index()?)
}

impl Kernel {
    /// Creates a stopped timer. `None` outside thread context.
    pub fn timer_create<F>(&self, kind: TimerKind, callback: F) -> Option<TimerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (mut state, caller) = self.inner.enter();
        if !matches!(caller, Caller::Thread(_)) {
            return None;
        }
        state.timers.push(Some(SoftTimer {
            kind,
            callback: Arc::new(callback),
            period: 0,
            next_fire: None,
        }));
        let id = TimerId(state.timers.len() as u32);
        self.inner.leave(state, caller);
        Some(id)
    }

    /// (Re)arms `timer` to fire `ticks` ticks from now (and every `ticks`
    /// ticks after that for periodic timers).
    pub fn timer_start(&self, timer: TimerId, ticks: u32) -> OsStatus {
        let (mut state, caller) = self.inner.enter();
        match caller {
            Caller::Isr => return OsStatus::ErrorIsr,
            Caller::Inactive => return OsStatus::ErrorOs,
            Caller::Thread(_) => {}
        }
        if ticks == 0 {
            return OsStatus::ErrorParameter;
        }
        let now = self.inner.now();
        let Some(slot) = timer_slot(&mut state.timers, timer).and_then(Option::as_mut) else {
            return OsStatus::ErrorParameter;
        };
        slot.period = ticks;
        slot.next_fire = Some(now.wrapping_add(ticks));
        debug!(target: "kernel::timer", "timer {} armed: {:?} every {} ticks", timer.0, slot.kind, ticks);
        self.inner.leave(state, caller);
        OsStatus::Ok
    }

    /// Disarms `timer`; `ErrorResource` if it was not running.
    pub fn timer_stop(&self, timer: TimerId) -> OsStatus {
        let (mut state, caller) = self.inner.enter();
        match caller {
            Caller::Isr => return OsStatus::ErrorIsr,
            Caller::Inactive => return OsStatus::ErrorOs,
            Caller::Thread(_) => {}
        }
        let Some(slot) = timer_slot(&mut state.timers, timer).and_then(Option::as_mut) else {
            return OsStatus::ErrorParameter;
        };
        if slot.next_fire.take().is_none() {
            return OsStatus::ErrorResource;
        }
        debug!(target: "kernel::timer", "timer {} stopped", timer.0);
        self.inner.leave(state, caller);
        OsStatus::Ok
    }

    /// Stops and releases `timer`. A callback already collected for the
    /// current tick may still run once.
    pub fn timer_delete(&self, timer: TimerId) -> OsStatus {
        let (mut state, caller) = self.inner.enter();
        match caller {
            Caller::Isr => return OsStatus::ErrorIsr,
            Caller::Inactive => return OsStatus::ErrorOs,
            Caller::Thread(_) => {}
        }
        let Some(slot) = timer_slot(&mut state.timers, timer) else {
            return OsStatus::ErrorParameter;
        };
        let Some(removed) = slot.take() else {
            return OsStatus::ErrorParameter;
        };
        debug!(target: "kernel::timer", "timer {} deleted", timer.0);
        self.inner.leave(state, caller);
        // Dropped after the lock: the callback may own kernel handles.
        drop(removed);
        OsStatus::Ok
    }
}

impl KernelInner {
    /// Timer interrupt: advances the tick, expires waits and pends due timer
    /// callbacks.
    ///
    /// A thread that owns the CPU may be executing its own code right now,
    /// so the interrupt is left pending for its next scheduling point (see
    /// [`KernelInner::wait_for_cpu`]). With the CPU idle the tick service
    /// takes the interrupt itself and hands the CPU to any thread it readied.
    fn on_tick(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        let now = self.tick.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        state.expire_waits(now);

        let state = &mut *state;
        for timer in state.timers.iter_mut().flatten() {
            let Some(at) = timer.next_fire else {
                continue;
            };
            if tick_reached(now, at) {
                state.pending_timers.push(Arc::clone(&timer.callback));
                timer.next_fire = match timer.kind {
                    TimerKind::Periodic => Some(at.wrapping_add(timer.period)),
                    TimerKind::Once => None,
                };
            }
        }
    }

    fn on_tick_idle(&self) {
        let mut state = self.lock();
        if state.stopped || state.running.is_some() {
            return;
        }
        if !state.pending_timers.is_empty() {
            self.take_timer_interrupt(&mut state);
        }
        if state.running.is_none() && state.dispatch() {
            self.notify();
        }
    }
}

pub(crate) fn spawn_tick_service(inner: &Arc<KernelInner>) -> io::Result<()> {
    let weak = Arc::downgrade(inner);
    let period = Duration::from_nanos(1_000_000_000 / u64::from(inner.config.tick_hz));
    host::Builder::new()
        .name(format!("kaos-tick-{}", inner.id))
        .spawn(move || tick_service(weak, period))
        .map(|_| ())
}

fn tick_service(kernel: Weak<KernelInner>, period: Duration) {
    let mut next = Instant::now() + period;
    loop {
        let now = Instant::now();
        if next > now {
            host::sleep(next - now);
        } else if now - next > period * MAX_TICK_BACKLOG {
            next = now;
        }
        next += period;

        let Some(inner) = kernel.upgrade() else {
            break;
        };
        if inner.is_stopped() {
            break;
        }
        inner.on_tick();
        inner.on_tick_idle();
    }
    debug!(target: "kernel::timer", "tick service stopped");
}
