//! Software timer and tick service integration tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kaos_rtos_rv::arch::interrupts;
use kaos_rtos_rv::config::KernelConfig;
use kaos_rtos_rv::kernel::status::OsStatus;
use kaos_rtos_rv::kernel::{TimerId, TimerKind};
use kaos_rtos_rv::sync::channel::WordCell;
use kaos_rtos_rv::Kernel;
use serial_test::serial;

fn start() -> Kernel {
    Kernel::start(KernelConfig::default()).expect("kernel should start")
}

fn counting_timer(kernel: &Kernel, kind: TimerKind) -> (TimerId, Arc<WordCell>) {
    let fired = Arc::new(WordCell::new(0));
    let cb_fired = Arc::clone(&fired);
    let id = kernel
        .timer_create(kind, move || {
            cb_fired.increment();
        })
        .expect("timer should be created");
    (id, fired)
}

/// Contract: the tick counter advances on its own while the kernel runs.
#[test]
#[serial]
fn test_tick_counter_advances() {
    let kernel = start();
    let first = kernel.sys_tick();
    kernel.delay(10);
    let second = kernel.sys_tick();
    assert!(
        second.wrapping_sub(first) >= 10,
        "tick went from {} to {} across delay(10)",
        first,
        second
    );
    kernel.shutdown();
}

/// Contract: a one-shot timer fires exactly once.
#[test]
#[serial]
fn test_one_shot_fires_once() {
    let kernel = start();
    let (id, fired) = counting_timer(&kernel, TimerKind::Once);

    assert!(kernel.timer_start(id, 5) == OsStatus::Ok, "start should succeed");
    kernel.delay(20);
    assert!(fired.load() == 1, "one-shot fired {} times", fired.load());
    assert!(
        kernel.timer_stop(id) == OsStatus::ErrorResource,
        "an expired one-shot is no longer running"
    );
    kernel.shutdown();
}

/// Contract: a periodic timer keeps firing until stopped.
#[test]
#[serial]
fn test_periodic_fires_until_stopped() {
    let kernel = start();
    let (id, fired) = counting_timer(&kernel, TimerKind::Periodic);

    assert!(kernel.timer_start(id, 2) == OsStatus::Ok, "start should succeed");
    kernel.delay(21);
    let count = fired.load();
    assert!(
        (5..=11).contains(&count),
        "periodic(2) fired {} times in 21 ticks",
        count
    );

    assert!(kernel.timer_stop(id) == OsStatus::Ok, "stop should succeed");
    kernel.delay(10);
    assert!(
        fired.load() <= count + 1,
        "stopped timer kept firing: {} -> {}",
        count,
        fired.load()
    );
    kernel.shutdown();
}

/// Contract: callbacks run in interrupt context.
#[test]
#[serial]
fn test_callback_runs_in_interrupt_context() {
    let kernel = start();
    let saw_isr = Arc::new(AtomicBool::new(false));

    let cb_saw_isr = Arc::clone(&saw_isr);
    let id = kernel
        .timer_create(TimerKind::Once, move || {
            cb_saw_isr.store(interrupts::in_isr(), Ordering::Release);
        })
        .expect("timer should be created");
    kernel.timer_start(id, 1);
    kernel.delay(5);
    assert!(saw_isr.load(Ordering::Acquire), "callback must see in_isr() == true");
    kernel.shutdown();
}

/// Contract: parameter and lifecycle errors of the timer calls.
#[test]
fn test_timer_parameter_errors() {
    let kernel = start();
    let (id, _fired) = counting_timer(&kernel, TimerKind::Once);

    assert!(
        kernel.timer_start(id, 0) == OsStatus::ErrorParameter,
        "zero period must be rejected"
    );
    assert!(
        kernel.timer_start(TimerId::NULL, 5) == OsStatus::ErrorParameter,
        "NULL timer must be rejected"
    );
    assert!(
        kernel.timer_stop(id) == OsStatus::ErrorResource,
        "stopping an idle timer reports ErrorResource"
    );
    assert!(kernel.timer_delete(id) == OsStatus::Ok, "delete should succeed");
    assert!(
        kernel.timer_delete(id) == OsStatus::ErrorParameter,
        "a deleted timer is gone"
    );
    assert!(
        kernel.timer_start(id, 5) == OsStatus::ErrorParameter,
        "a deleted timer cannot be started"
    );
    kernel.shutdown();
}

/// Contract: timers can only be created by kernel threads.
#[test]
fn test_foreign_thread_cannot_create_timer() {
    let kernel = start();
    let foreign = kernel.clone();
    let created = thread::spawn(move || foreign.timer_create(TimerKind::Once, || {}).is_some())
        .join()
        .expect("foreign thread should not panic");
    assert!(!created, "foreign host thread must not create timers");
    kernel.shutdown();
}

/// Contract: a timer interrupt never runs next to thread code. While the
/// callback runs, the thread that owns the CPU makes no progress.
/// Given: `main` spins, bumping a counter around kernel calls, with a
/// one-shot timer armed for the next tick.
/// When: The callback samples the counter, sleeps 30 ms, and samples again.
/// Then: Both samples are equal.
#[test]
#[serial]
fn test_timer_interrupt_excludes_thread_code() {
    const UNSEEN: u32 = u32::MAX;
    let kernel = start();
    let progress = Arc::new(WordCell::new(0));
    let moved = Arc::new(AtomicU32::new(UNSEEN));

    let (cb_progress, cb_moved) = (Arc::clone(&progress), Arc::clone(&moved));
    let id = kernel
        .timer_create(TimerKind::Once, move || {
            let before = cb_progress.load();
            thread::sleep(Duration::from_millis(30));
            cb_moved.store(cb_progress.load().wrapping_sub(before), Ordering::Release);
        })
        .expect("timer should be created");
    assert!(kernel.timer_start(id, 1) == OsStatus::Ok, "start should succeed");

    let deadline = Instant::now() + Duration::from_secs(2);
    while moved.load(Ordering::Acquire) == UNSEEN && Instant::now() < deadline {
        progress.increment();
        kernel.thread_get_id();
    }
    let moved = moved.load(Ordering::Acquire);
    assert!(moved != UNSEEN, "timer callback never ran");
    assert!(moved == 0, "main advanced {} steps during the callback", moved);
    kernel.shutdown();
}
