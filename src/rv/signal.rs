//! Signal flag cases.

use std::sync::Arc;

use crate::arch::interrupts::Nvic;
use crate::kernel::status::{EventValue, OsStatus, SIGNAL_ERROR, WAIT_FOREVER};
use crate::kernel::thread::{Priority, ThreadId};
use crate::kernel::{Kernel, ThreadDef};
use crate::rv_assert;
use crate::sync::channel::{EventCell, ThreadIdCell, WordCell, UNSET};
use crate::testing::{Checker, TestContext};

use super::calibrate::{elapsed_ticks, CalibrationWindow, REFERENCE_EVENT};
use super::{TEST_IRQ, TEST_IRQ_LINES};

// Runs to completion on creation, so the parent sees its checks finished.
const TH_CHILD_SIGNALS: ThreadDef = ThreadDef::new("Th_ChildSignals", Priority::AboveNormal);
const TH_SIG: ThreadDef = ThreadDef::new("Th_Sig", Priority::Normal);
const TH_SIG_WAKEUP: ThreadDef = ThreadDef::new("Th_Sig_Wakeup", Priority::BelowNormal);
const TH_SIG_CHILD_0: ThreadDef = ThreadDef::new("Th_Sig_Child_0", Priority::BelowNormal);
const TH_SIG_CHILD_1: ThreadDef = ThreadDef::new("Th_Sig_Child_1", Priority::BelowNormal);
const TH_SIGNAL_SET: ThreadDef = ThreadDef::new("Th_SignalSet", Priority::Normal);

const ISR_SET: u32 = 0;
const ISR_CLEAR: u32 = 1;
const ISR_WAIT_NO_WAIT: u32 = 2;
const ISR_WAIT_TIMEOUT: u32 = 3;
const ISR_WAIT_FOREVER: u32 = 4;

/// Sets every flag of `id` one by one, then clears them from the top.
/// Each call must report the flags accumulated so far.
fn set_clear_walk(kernel: &Kernel, c: &Checker, id: ThreadId) {
    let mask = kernel.signal_mask();
    let mut flags = 0u32;
    let mut set = 1u32;
    while set <= mask {
        rv_assert!(c, kernel.signal_set(id, set) == flags, "set {:#x}", set);
        flags = (flags << 1) | 1;
        set <<= 1;
    }

    flags = mask;
    let mut clr = 1u32 << (kernel.config().signal_count - 1);
    while clr != 0 {
        rv_assert!(c, kernel.signal_clear(id, clr) == flags, "clear {:#x}", clr);
        clr >>= 1;
        flags >>= 1;
    }
}

/// Next mask of the sibling relay: shift, filling the low bit every other step.
fn relay_next(flags: u32) -> u32 {
    let shifted = flags << 1;
    if shifted & 2 != 0 {
        shifted
    } else {
        shifted | 1
    }
}

/// Flag walk on the main thread.
pub fn tc_signal_main_thread(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(id) = rv_some!(c, kernel.thread_get_id()) else {
            return;
        };
        kernel.signal_clear(id, kernel.signal_mask());
        set_clear_walk(kernel, c, id);
    });
}

/// Flag walk on a child thread, plus the reserved-bit rejection.
pub fn tc_signal_child_thread(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let done = Arc::new(WordCell::new(0));
        let (th_kernel, th_checker, th_done) = (kernel.clone(), c.clone(), Arc::clone(&done));
        let created = kernel.thread_create(&TH_CHILD_SIGNALS, move || {
            let c = &th_checker;
            if let Some(id) = rv_some!(c, th_kernel.thread_get_id()) {
                rv_assert!(c, th_kernel.signal_clear(id, 0) == 0, "child starts with flags");
                set_clear_walk(&th_kernel, c, id);
                rv_assert!(c, th_kernel.signal_set(id, SIGNAL_ERROR) == SIGNAL_ERROR);
                rv_assert!(c, th_kernel.signal_clear(id, 0) == 0);
            }
            th_done.store(1);
        });
        rv_assert!(c, created.is_ok());
        rv_assert!(c, done.load() == 1, "child did not run to completion");
    });
}

/// Parent and child exchange every flag bit by bit.
pub fn tc_signal_child_to_parent(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(parent) = rv_some!(c, kernel.thread_get_id()) else {
            return;
        };
        let mask = kernel.signal_mask();

        let (th_kernel, th_checker) = (kernel.clone(), c.clone());
        let created = kernel.thread_create(&TH_SIG, move || {
            let (k, c) = (&th_kernel, &th_checker);
            let mut flag = 1u32;
            loop {
                let evt = k.signal_wait(flag, 100);
                if !rv_assert!(c, evt.status == OsStatus::EventSignal, "child wait {:#x}", flag) {
                    break;
                }
                rv_assert!(c, evt.raw_value() & flag != 0);
                rv_assert!(c, k.signal_set(parent, flag) != SIGNAL_ERROR);
                flag <<= 1;
                if flag > mask {
                    break;
                }
            }
            // Park until the parent terminates us.
            k.signal_wait(mask, WAIT_FOREVER);
        });
        let Some(child) = rv_some!(c, created.ok()) else {
            return;
        };

        let mut flag = 1u32;
        while flag <= mask {
            rv_assert!(c, kernel.signal_set(child, flag) != SIGNAL_ERROR);
            let evt = kernel.signal_wait(flag, 100);
            if rv_assert!(c, evt.status == OsStatus::EventSignal, "parent wait {:#x}", flag) {
                rv_assert!(c, evt.raw_value() & flag != 0);
            }
            flag <<= 1;
        }
        rv_assert!(c, kernel.thread_terminate(child) == OsStatus::Ok);
    });
}

/// Two siblings relay a growing flag pattern back and forth, then report
/// to the parent on bits 0 and 1.
pub fn tc_signal_child_to_child(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(parent) = rv_some!(c, kernel.thread_get_id()) else {
            return;
        };
        let mask = kernel.signal_mask();
        let peer_of_0 = Arc::new(ThreadIdCell::default());
        let peer_of_1 = Arc::new(ThreadIdCell::default());

        let (k0, c0, p0) = (kernel.clone(), c.clone(), Arc::clone(&peer_of_0));
        let id0 = kernel.thread_create(&TH_SIG_CHILD_0, move || {
            let peer = p0.load();
            let mut flags = 1u32;
            loop {
                k0.signal_set(peer, flags);
                let evt = k0.signal_wait(flags, 100);
                if !rv_assert!(c0, evt.status == OsStatus::EventSignal) {
                    break;
                }
                rv_assert!(c0, evt.value == EventValue::Signals(flags));
                flags = relay_next(flags);
                if flags > mask {
                    break;
                }
            }
            k0.signal_set(parent, 0x01);
        });

        let (k1, c1, p1) = (kernel.clone(), c.clone(), Arc::clone(&peer_of_1));
        let id1 = kernel.thread_create(&TH_SIG_CHILD_1, move || {
            let peer = p1.load();
            let mut flags = 1u32;
            loop {
                let evt = k1.signal_wait(flags, 100);
                let ok = rv_assert!(c1, evt.status == OsStatus::EventSignal);
                if ok {
                    rv_assert!(c1, evt.value == EventValue::Signals(flags));
                }
                k1.signal_set(peer, flags);
                flags = relay_next(flags);
                if !ok || flags > mask {
                    break;
                }
            }
            k1.signal_set(parent, 0x02);
        });

        // Siblings are lower priority: they start once the parent waits.
        let (Some(id0), Some(id1)) = (rv_some!(c, id0.ok()), rv_some!(c, id1.ok())) else {
            return;
        };
        peer_of_0.store(id1);
        peer_of_1.store(id0);

        let evt = kernel.signal_wait(0x03, 100);
        if rv_assert!(c, evt.status == OsStatus::EventSignal) {
            rv_assert!(c, evt.raw_value() & 0x03 == 0x03);
        }
        kernel.thread_terminate(id0);
        kernel.thread_terminate(id1);
    });
}

/// Zero and finite timeouts with and without a signaling thread.
pub fn tc_signal_wait_timeout(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(id) = rv_some!(c, kernel.thread_get_id()) else {
            return;
        };
        let mask = kernel.signal_mask();
        kernel.signal_clear(id, mask);

        rv_assert!(c, kernel.signal_wait(0, 0).status == OsStatus::Ok);
        rv_assert!(c, kernel.signal_wait(0, 5).status == OsStatus::EventTimeout);
        rv_assert!(c, kernel.signal_wait(mask, 0).status == OsStatus::Ok);
        rv_assert!(c, kernel.signal_wait(mask, 5).status == OsStatus::EventTimeout);

        for (flags, wait_for) in [(3u32, 1u32), (5, 2)] {
            let th_kernel = kernel.clone();
            let created = kernel.thread_create(&TH_SIGNAL_SET, move || {
                th_kernel.signal_set(id, flags);
            });
            if rv_assert!(c, created.is_ok()) {
                kernel.delay(5);
                let evt = kernel.signal_wait(wait_for, 10);
                rv_assert!(c, evt.status == OsStatus::EventSignal, "flags {:#x}", flags);
            }
            kernel.delay(10);
        }

        kernel.signal_clear(id, mask);
        kernel.delay(10);
    });
}

/// A signal set by a helper after the reference delay releases the wait
/// inside the calibrated window.
pub fn tc_signal_check_timeout(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(parent) = rv_some!(c, kernel.thread_get_id()) else {
            return;
        };
        let window = CalibrationWindow::reference(kernel);

        for timeout in [100, WAIT_FOREVER] {
            let (th_kernel, th_checker) = (kernel.clone(), c.clone());
            let created = kernel.thread_create(&TH_SIG_WAKEUP, move || {
                th_kernel.delay(REFERENCE_EVENT);
                rv_assert!(th_checker, th_kernel.signal_set(parent, 0x01) != SIGNAL_ERROR);
            });
            if rv_assert!(c, created.is_ok()) {
                let (evt, t_10) = elapsed_ticks(kernel, || kernel.signal_wait(1, timeout));
                rv_assert!(c, evt.status == OsStatus::EventSignal, "timeout {}", timeout);
                rv_assert!(c, window.contains(t_10), "{} ticks, window {:?}", t_10, window);
            }
            kernel.delay(REFERENCE_EVENT);
        }
    });
}

/// Invalid handles and the reserved bit are rejected.
pub fn tc_signal_param(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        rv_assert!(c, kernel.signal_set(ThreadId::NULL, 0) == SIGNAL_ERROR);
        rv_assert!(c, kernel.signal_clear(ThreadId::NULL, 0) == SIGNAL_ERROR);
        rv_assert!(c, kernel.signal_wait(SIGNAL_ERROR, 0).status == OsStatus::ErrorValue);

        if let Some(id) = rv_some!(c, kernel.thread_get_id()) {
            rv_assert!(c, kernel.signal_set(id, SIGNAL_ERROR) == SIGNAL_ERROR);
            // The rejected bit was not stored.
            rv_assert!(c, kernel.signal_clear(id, 0) & SIGNAL_ERROR == 0);
            rv_assert!(c, kernel.signal_wait(SIGNAL_ERROR | 1, 0).status == OsStatus::ErrorValue);
        }
        rv_assert!(
            c,
            kernel.signal_set(ThreadId::from_raw(0x7FFF), 1) == SIGNAL_ERROR,
            "unknown thread"
        );
    });
}

/// Signal calls from interrupt context: set works, clear and every wait
/// variant are refused.
pub fn tc_signal_interrupts(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(main) = rv_some!(c, kernel.thread_get_id()) else {
            return;
        };
        let sign = Arc::new(WordCell::new(0));
        let event = Arc::new(EventCell::new());
        let nvic = Nvic::new(kernel, TEST_IRQ_LINES);

        let (isr_kernel, isr_sign, isr_event) =
            (kernel.clone(), Arc::clone(&sign), Arc::clone(&event));
        nvic.install(TEST_IRQ, move |selector: u32| match selector {
            ISR_SET => isr_sign.store(isr_kernel.signal_set(main, 0x01)),
            ISR_CLEAR => isr_sign.store(isr_kernel.signal_clear(main, 0x01)),
            ISR_WAIT_NO_WAIT => isr_event.store(isr_kernel.signal_wait(0x01, 0)),
            ISR_WAIT_TIMEOUT => isr_event.store(isr_kernel.signal_wait(0x01, 100)),
            ISR_WAIT_FOREVER => isr_event.store(isr_kernel.signal_wait(0x01, WAIT_FOREVER)),
            _ => {}
        });
        nvic.enable(TEST_IRQ);
        let raise = |selector: u32| {
            nvic.set_selector(TEST_IRQ, selector);
            nvic.set_pending(TEST_IRQ);
        };

        sign.store(UNSET);
        raise(ISR_SET);
        let evt = kernel.signal_wait(0x01, 100);
        rv_assert!(c, evt.status == OsStatus::EventSignal);
        rv_assert!(c, evt.raw_value() == 0x01);
        rv_assert!(c, sign.load() == 0);

        rv_assert!(c, kernel.signal_set(main, 0x01) == 0);
        sign.store(0);
        raise(ISR_CLEAR);
        rv_assert!(c, sign.load() == SIGNAL_ERROR);
        rv_assert!(c, kernel.signal_clear(main, 0x01) == 0x01);

        for selector in [ISR_WAIT_NO_WAIT, ISR_WAIT_TIMEOUT, ISR_WAIT_FOREVER] {
            event.reset();
            raise(selector);
            let status = event.load().map(|e| e.status);
            rv_assert!(c, status == Some(OsStatus::ErrorIsr), "selector {}", selector);
        }

        nvic.disable(TEST_IRQ);
    });
}
