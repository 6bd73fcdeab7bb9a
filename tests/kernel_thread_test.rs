//! Kernel lifecycle and thread management integration tests.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kaos_rtos_rv::config::{ConfigError, KernelConfig};
use kaos_rtos_rv::kernel::status::{OsStatus, WAIT_FOREVER};
use kaos_rtos_rv::kernel::thread::{Priority, ThreadId};
use kaos_rtos_rv::kernel::{KernelError, SpawnError, ThreadDef};
use kaos_rtos_rv::sync::channel::{StatusCell, WordCell};
use kaos_rtos_rv::Kernel;
use serial_test::serial;

const TH_HIGH: ThreadDef = ThreadDef::new("Th_High", Priority::AboveNormal);
const TH_PEER: ThreadDef = ThreadDef::new("Th_Peer", Priority::Normal);
const TH_LOW: ThreadDef = ThreadDef::new("Th_Low", Priority::BelowNormal);

fn start(config: KernelConfig) -> Kernel {
    Kernel::start(config).expect("kernel should start with a valid configuration")
}

/// Polls `cond` on the host for up to two seconds.
fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Contract: an invalid configuration is rejected before anything starts.
#[test]
fn test_start_rejects_invalid_config() {
    let config = KernelConfig {
        tick_hz: 0,
        ..KernelConfig::default()
    };
    let err = Kernel::start(config).expect_err("zero tick rate must be rejected");
    assert!(
        matches!(err, KernelError::Config(ConfigError::TickRate(0))),
        "expected a tick rate error, got {:?}",
        err
    );

    let config = KernelConfig {
        signal_count: 32,
        ..KernelConfig::default()
    };
    assert!(
        matches!(
            Kernel::start(config),
            Err(KernelError::Config(ConfigError::SignalCount(32)))
        ),
        "bit 31 is reserved, 32 flags must be rejected"
    );
}

/// Contract: the starting host thread becomes `main` at `Normal` priority
/// and loses its kernel identity at shutdown.
#[test]
fn test_start_adopts_caller_as_main() {
    let kernel = start(KernelConfig::default());
    assert!(kernel.is_running(), "kernel should run after start");
    assert!(
        kernel.sys_tick_freq() == KernelConfig::default().tick_hz,
        "tick frequency should match the configuration"
    );

    let main = kernel.thread_get_id().expect("main should have a thread id");
    assert!(!main.is_null(), "main id must not be NULL");
    assert!(
        kernel.thread_priority(main) == Some(Priority::Normal),
        "main should run at Normal priority"
    );

    kernel.shutdown();
    assert!(!kernel.is_running(), "kernel should be stopped after shutdown");
    assert!(
        kernel.thread_get_id().is_none(),
        "a stopped kernel has no current thread"
    );
    assert!(
        kernel.delay(1) == OsStatus::ErrorOs,
        "delay on a stopped kernel must fail with ErrorOs"
    );
}

/// Contract: one host thread can belong to one running kernel only.
#[test]
fn test_second_start_on_same_thread_fails() {
    let kernel = start(KernelConfig::default());
    assert!(
        matches!(
            Kernel::start(KernelConfig::default()),
            Err(KernelError::AlreadyAttached)
        ),
        "second start on the same host thread must fail"
    );
    kernel.shutdown();

    let again = start(KernelConfig::default());
    again.shutdown();
}

/// Contract: a higher-priority thread runs to completion before
/// `thread_create` returns to a lower-priority creator.
#[test]
fn test_higher_priority_child_preempts_creator() {
    let kernel = start(KernelConfig::default());
    let ran = Arc::new(WordCell::new(0));

    let th_ran = Arc::clone(&ran);
    let id = kernel
        .thread_create(&TH_HIGH, move || {
            th_ran.store(1);
        })
        .expect("child should spawn");

    assert!(ran.load() == 1, "AboveNormal child must run before create returns");
    assert!(
        kernel.thread_priority(id).is_none(),
        "a finished thread is no longer live"
    );
    kernel.shutdown();
}

/// Contract: equal priorities do not preempt; `delay(0)` yields to a ready
/// peer of the same priority.
#[test]
fn test_equal_priority_runs_after_yield() {
    let kernel = start(KernelConfig::default());
    let ran = Arc::new(WordCell::new(0));

    let th_ran = Arc::clone(&ran);
    kernel
        .thread_create(&TH_PEER, move || {
            th_ran.store(1);
        })
        .expect("peer should spawn");
    assert!(ran.load() == 0, "equal-priority peer must not run on create");

    assert!(
        kernel.delay(0) == OsStatus::EventTimeout,
        "yield should complete with EventTimeout"
    );
    assert!(ran.load() == 1, "peer must have run during the yield");
    kernel.shutdown();
}

/// Sets its cell when dropped; thread bodies own one to report that their
/// host thread has finished, by return or by unwinding.
struct ExitFlag(Arc<WordCell>);

impl Drop for ExitFlag {
    fn drop(&mut self) {
        self.0.store(1);
    }
}

/// Contract: a terminated thread never runs again. Its blocking call does
/// not return, its host thread unwinds, and dead or NULL handles are
/// rejected with `ErrorParameter`.
#[test]
fn test_terminate_blocked_thread() {
    let kernel = start(KernelConfig::default());
    let stat = Arc::new(StatusCell::new());
    let exited = Arc::new(WordCell::new(0));

    let (th_kernel, th_stat) = (kernel.clone(), Arc::clone(&stat));
    let flag = ExitFlag(Arc::clone(&exited));
    let id = kernel
        .thread_create(&TH_HIGH, move || {
            let _flag = flag;
            th_stat.store(th_kernel.delay(WAIT_FOREVER));
        })
        .expect("child should spawn");
    assert!(stat.load().is_none(), "child should still be blocked");

    assert!(
        kernel.thread_terminate(id) == OsStatus::Ok,
        "terminating a live thread should succeed"
    );
    assert!(eventually(|| exited.load() == 1), "terminated thread's host must finish");
    assert!(
        stat.load().is_none(),
        "code after the blocking call ran with {:?}",
        stat.load()
    );
    assert!(
        kernel.thread_terminate(id) == OsStatus::ErrorParameter,
        "a dead thread cannot be terminated again"
    );
    assert!(
        kernel.thread_terminate(ThreadId::NULL) == OsStatus::ErrorParameter,
        "NULL thread id must be rejected"
    );
    kernel.shutdown();
}

/// Contract: a thread terminated while waiting forever for a signal does not
/// resume, even when the awaited flag is set afterwards.
#[test]
fn test_terminated_signal_waiter_stays_dead() {
    let kernel = start(KernelConfig::default());
    let after = Arc::new(WordCell::new(0));
    let exited = Arc::new(WordCell::new(0));

    let (th_kernel, th_after) = (kernel.clone(), Arc::clone(&after));
    let flag = ExitFlag(Arc::clone(&exited));
    let id = kernel
        .thread_create(&TH_HIGH, move || {
            let _flag = flag;
            let evt = th_kernel.signal_wait(0x01, WAIT_FOREVER);
            th_after.store(0x100 | evt.status.code());
        })
        .expect("child should spawn");

    assert!(kernel.thread_terminate(id) == OsStatus::Ok, "terminate should succeed");
    kernel.signal_set(id, 0x01);
    kernel.delay(2);
    assert!(eventually(|| exited.load() == 1), "terminated thread's host must finish");
    assert!(after.load() == 0, "terminated waiter resumed and stored {:#x}", after.load());
    kernel.shutdown();
}

/// Contract: a created thread terminating itself does not return from the
/// call, and the CPU goes back to the next ready thread.
#[test]
fn test_self_terminate_does_not_return() {
    let kernel = start(KernelConfig::default());
    let progress = Arc::new(WordCell::new(0));

    let (th_kernel, th_progress) = (kernel.clone(), Arc::clone(&progress));
    kernel
        .thread_create(&TH_HIGH, move || {
            th_progress.store(1);
            if let Some(me) = th_kernel.thread_get_id() {
                th_kernel.thread_terminate(me);
            }
            th_progress.store(2);
        })
        .expect("child should spawn");

    assert!(progress.load() == 1, "child must stop at its own termination");
    assert!(kernel.delay(1) == OsStatus::EventTimeout, "main keeps running");
    assert!(progress.load() == 1, "child must never resume");
    kernel.shutdown();
}

/// Contract: thread creation fails once the configured table is full.
#[test]
fn test_thread_capacity_limit() {
    let kernel = start(KernelConfig {
        max_threads: 2,
        ..KernelConfig::default()
    });

    let th_kernel = kernel.clone();
    kernel
        .thread_create(&TH_HIGH, move || {
            th_kernel.delay(WAIT_FOREVER);
        })
        .expect("first child fits the table");

    let err = kernel
        .thread_create(&TH_LOW, || {})
        .expect_err("table of two is full");
    assert!(
        matches!(err, SpawnError::CapacityExceeded(2)),
        "expected CapacityExceeded(2), got {:?}",
        err
    );
    kernel.shutdown();
}

/// Contract: host threads that are not kernel threads cannot create threads.
#[test]
fn test_foreign_host_thread_is_not_running() {
    let kernel = start(KernelConfig::default());

    let foreign = kernel.clone();
    let result = thread::spawn(move || foreign.thread_create(&TH_LOW, || {}).map(|_| ()))
        .join()
        .expect("foreign host thread should not panic");
    assert!(
        matches!(result, Err(SpawnError::NotRunning)),
        "foreign caller must get NotRunning"
    );
    kernel.shutdown();
}

/// Contract: `delay(n)` blocks for at least `n` ticks.
#[test]
#[serial]
fn test_delay_waits_requested_ticks() {
    let kernel = start(KernelConfig::default());
    let before = kernel.sys_tick();
    assert!(kernel.delay(10) == OsStatus::EventTimeout, "delay should time out");
    let elapsed = kernel.sys_tick().wrapping_sub(before);
    assert!(elapsed >= 10, "delay(10) returned after {} ticks", elapsed);

    assert!(
        kernel.wait(3).status == OsStatus::EventTimeout,
        "wait without events should time out"
    );
    kernel.shutdown();
}

/// Contract: shutdown releases threads blocked forever; their host threads
/// unwind without running the code after the blocking call.
#[test]
fn test_shutdown_releases_blocked_threads() {
    let kernel = start(KernelConfig::default());
    let stat = Arc::new(StatusCell::new());
    let exited = Arc::new(WordCell::new(0));

    let (th_kernel, th_stat) = (kernel.clone(), Arc::clone(&stat));
    let flag = ExitFlag(Arc::clone(&exited));
    kernel
        .thread_create(&TH_HIGH, move || {
            let _flag = flag;
            th_stat.store(th_kernel.delay(WAIT_FOREVER));
        })
        .expect("child should spawn");

    kernel.shutdown();
    assert!(
        eventually(|| exited.load() == 1),
        "blocked thread's host must finish after shutdown"
    );
    assert!(stat.load().is_none(), "released thread must not resume its body");
}

/// Contract: `main` survives being terminated by a child; its blocking call
/// then fails with `ErrorOs` instead of unwinding the test thread.
#[test]
fn test_terminated_main_gets_error_os() {
    let kernel = start(KernelConfig::default());
    let main = kernel.thread_get_id().expect("main should have a thread id");

    let th_kernel = kernel.clone();
    kernel
        .thread_create(&TH_LOW, move || {
            th_kernel.thread_terminate(main);
        })
        .expect("child should spawn");

    assert!(
        kernel.delay(WAIT_FOREVER) == OsStatus::ErrorOs,
        "terminated main must see ErrorOs"
    );
    assert!(kernel.thread_get_id().is_none(), "terminated main is not running");
    kernel.shutdown();
}
