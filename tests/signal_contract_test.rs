//! Signal flag contract tests.

use std::sync::Arc;

use kaos_rtos_rv::arch::interrupts::Nvic;
use kaos_rtos_rv::config::KernelConfig;
use kaos_rtos_rv::kernel::status::{EventValue, OsEvent, OsStatus, SIGNAL_ERROR, WAIT_FOREVER};
use kaos_rtos_rv::kernel::thread::{Priority, ThreadId};
use kaos_rtos_rv::kernel::ThreadDef;
use kaos_rtos_rv::sync::channel::{EventCell, WordCell};
use kaos_rtos_rv::Kernel;
use serial_test::serial;

const TH_WAITER: ThreadDef = ThreadDef::new("Th_Waiter", Priority::AboveNormal);
const TH_LATE: ThreadDef = ThreadDef::new("Th_Late", Priority::BelowNormal);

fn start(config: KernelConfig) -> Kernel {
    Kernel::start(config).expect("kernel should start")
}

/// Contract: `set` and `clear` return the flags held before the call.
#[test]
fn test_set_and_clear_return_prior_flags() {
    let kernel = start(KernelConfig::default());
    let me = kernel.thread_get_id().expect("main should have an id");

    assert!(kernel.signal_set(me, 0x01) == 0, "no flags before the first set");
    assert!(kernel.signal_set(me, 0x06) == 0x01, "set returns the prior flags");
    assert!(kernel.signal_clear(me, 0x02) == 0x07, "clear returns the prior flags");
    assert!(kernel.signal_clear(me, 0) == 0x05, "clear(0) reads the flags");
    kernel.shutdown();
}

/// Contract: flags outside the configured width and unknown threads are
/// rejected with `SIGNAL_ERROR`, and nothing is stored.
#[test]
fn test_out_of_range_flags_are_rejected() {
    let kernel = start(KernelConfig {
        signal_count: 4,
        ..KernelConfig::default()
    });
    let me = kernel.thread_get_id().expect("main should have an id");
    assert!(kernel.signal_mask() == 0x0F, "4 flags give mask 0x0F");

    assert!(kernel.signal_set(me, 0x10) == SIGNAL_ERROR, "flag 4 is out of range");
    assert!(kernel.signal_set(me, SIGNAL_ERROR) == SIGNAL_ERROR, "bit 31 is reserved");
    assert!(kernel.signal_clear(me, 0) == 0, "rejected sets must not store flags");
    assert!(
        kernel.signal_set(ThreadId::NULL, 1) == SIGNAL_ERROR,
        "NULL thread must be rejected"
    );
    assert!(
        kernel.signal_wait(0x10, 0).status == OsStatus::ErrorValue,
        "wait on an out-of-range mask must fail with ErrorValue"
    );
    kernel.shutdown();
}

/// Contract: a zero mask takes any flag and consumes all of them; a nonzero
/// mask needs every bit and consumes exactly the mask.
#[test]
fn test_wait_mask_semantics() {
    let kernel = start(KernelConfig::default());
    let me = kernel.thread_get_id().expect("main should have an id");

    kernel.signal_set(me, 0x0B);
    assert!(
        kernel.signal_wait(0x03, 0) == OsEvent::signals(0x03),
        "nonzero mask consumes exactly the mask"
    );
    assert!(
        kernel.signal_wait(0x0C, 0).status == OsStatus::Ok,
        "partial match does not satisfy a nonzero mask"
    );
    assert!(
        kernel.signal_wait(0, 0) == OsEvent::signals(0x08),
        "zero mask consumes all remaining flags"
    );
    assert!(
        kernel.signal_wait(0, 0).status == OsStatus::Ok,
        "no flags left after a zero-mask wait"
    );
    kernel.shutdown();
}

/// Contract: setting the awaited flags on a blocked higher-priority thread
/// wakes it before `set` returns.
#[test]
fn test_set_wakes_blocked_waiter() {
    let kernel = start(KernelConfig::default());
    let event = Arc::new(EventCell::new());

    let (th_kernel, th_event) = (kernel.clone(), Arc::clone(&event));
    let waiter = kernel
        .thread_create(&TH_WAITER, move || {
            th_event.store(th_kernel.signal_wait(0x05, WAIT_FOREVER));
        })
        .expect("waiter should spawn");

    assert!(kernel.signal_set(waiter, 0x01) == 0, "first flag stored");
    assert!(event.load().is_none(), "one of two flags must not release the waiter");

    assert!(kernel.signal_set(waiter, 0x04) == 0x01, "second flag stored");
    let evt = event.load().expect("waiter must have completed");
    assert!(
        evt.status == OsStatus::EventSignal && evt.value == EventValue::Signals(0x05),
        "waiter should report the consumed flags, got {:?}",
        evt
    );
    kernel.shutdown();
}

/// Contract: interrupt handlers may set flags but not clear or wait.
#[test]
fn test_interrupt_context_rules() {
    let kernel = start(KernelConfig::default());
    let me = kernel.thread_get_id().expect("main should have an id");
    let nvic = Nvic::new(&kernel, 1);
    let word = Arc::new(WordCell::new(0));
    let event = Arc::new(EventCell::new());

    let (isr_kernel, isr_word, isr_event) =
        (kernel.clone(), Arc::clone(&word), Arc::clone(&event));
    nvic.install(0, move |selector: u32| match selector {
        0 => isr_word.store(isr_kernel.signal_set(me, 0x02)),
        1 => isr_word.store(isr_kernel.signal_clear(me, 0x02)),
        _ => isr_event.store(isr_kernel.signal_wait(0x02, 0)),
    });
    nvic.enable(0);

    nvic.set_selector(0, 0);
    nvic.set_pending(0);
    assert!(word.load() == 0, "ISR set should return the prior flags");

    nvic.set_selector(0, 1);
    nvic.set_pending(0);
    assert!(word.load() == SIGNAL_ERROR, "ISR clear must be refused");

    nvic.set_selector(0, 2);
    nvic.set_pending(0);
    assert!(
        event.load().map(|e| e.status) == Some(OsStatus::ErrorIsr),
        "ISR wait must be refused"
    );

    assert!(
        kernel.signal_clear(me, 0) == 0x02,
        "flag set from the ISR must still be pending"
    );
    kernel.shutdown();
}

/// Contract: a wait whose flags never arrive ends with `EventTimeout`.
#[test]
#[serial]
fn test_wait_times_out() {
    let kernel = start(KernelConfig::default());
    let before = kernel.sys_tick();
    assert!(
        kernel.signal_wait(0x01, 5).status == OsStatus::EventTimeout,
        "wait should time out"
    );
    let elapsed = kernel.sys_tick().wrapping_sub(before);
    assert!(elapsed >= 5, "wait(5) returned after {} ticks", elapsed);
    kernel.shutdown();
}

/// Contract: a flag set after a wait timed out is not consumed by that
/// wait; it stays pending on the thread.
/// Given: A lower-priority helper that sets flag 0x01 on `main` five ticks
/// after it starts.
/// When: `main` waits for 0x01 with a 3-tick timeout, then sleeps past the set.
/// Then: The wait timed out and the flag is still set afterwards.
#[test]
#[serial]
fn test_late_set_after_timeout_stays_pending() {
    let kernel = start(KernelConfig::default());
    let me = kernel.thread_get_id().expect("main should have an id");

    let th_kernel = kernel.clone();
    kernel
        .thread_create(&TH_LATE, move || {
            th_kernel.delay(5);
            th_kernel.signal_set(me, 0x01);
        })
        .expect("helper should spawn");

    let evt = kernel.signal_wait(0x01, 3);
    assert!(evt.status == OsStatus::EventTimeout, "wait should time out, got {:?}", evt);
    assert!(kernel.delay(10) == OsStatus::EventTimeout, "delay should time out");

    assert!(kernel.signal_clear(me, 0) == 0x01, "late flag must still be pending");
    assert!(
        kernel.signal_wait(0x01, 0) == OsEvent::signals(0x01),
        "a later wait consumes the late flag"
    );
    kernel.shutdown();
}
