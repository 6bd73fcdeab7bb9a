//! RTOS validation cases.
//!
//! Each case drives one kernel primitive from thread and interrupt context
//! and records every observation on the case's checker. [`CASES`] lists them
//! in suite order.

/// Records that an `Option` is `Some` and evaluates to the option.
macro_rules! rv_some {
    ($checker:expr, $value:expr) => {{
        let value = $value;
        $checker.check(
            value.is_some(),
            concat!(stringify!($value), ".is_some()"),
            file!(),
            line!(),
        );
        value
    }};
}

pub mod calibrate;
pub mod genwait;
pub mod msgqueue;
pub mod signal;

use crate::testing::TestCase;

/// Interrupt line the cases raise.
pub const TEST_IRQ: usize = 0;

/// Lines of the controller each case builds.
pub const TEST_IRQ_LINES: usize = 1;

/// Signal raised on the main thread when a stream's tick budget runs out.
pub const SIGNAL_TIMER_TOUT: u32 = 0x04;

const fn case(name: &'static str, description: &'static str, run: crate::testing::CaseFn) -> TestCase {
    TestCase {
        name,
        description,
        run,
    }
}

/// Every validation case, in the order the suite runs them.
pub static CASES: &[TestCase] = &[
    case(
        "TC_GenWaitBasic",
        "delay and wait time out after the requested ticks",
        genwait::tc_gen_wait_basic,
    ),
    case(
        "TC_GenWaitInterrupts",
        "delay and wait are refused in interrupt context",
        genwait::tc_gen_wait_interrupts,
    ),
    case(
        "TC_MsgQBasic",
        "fill, overflow, drain in order, underflow",
        msgqueue::tc_msgq_basic,
    ),
    case(
        "TC_MsgQWait",
        "blocked put and get are released by a higher priority peer",
        msgqueue::tc_msgq_wait,
    ),
    case(
        "TC_MsgQCheckTimeout",
        "get released by a delayed put lands in the calibrated window",
        msgqueue::tc_msgq_check_timeout,
    ),
    case(
        "TC_MsgQParam",
        "null queue handles are rejected",
        msgqueue::tc_msgq_param,
    ),
    case(
        "TC_MsgQInterrupts",
        "queue calls from interrupt context",
        msgqueue::tc_msgq_interrupts,
    ),
    case(
        "TC_MsgFromThreadToISR",
        "thread feeds a queue drained by a periodic interrupt",
        msgqueue::tc_msg_from_thread_to_isr,
    ),
    case(
        "TC_MsgFromISRToThread",
        "periodic interrupt feeds a queue drained by a thread",
        msgqueue::tc_msg_from_isr_to_thread,
    ),
    case(
        "TC_SignalMainThread",
        "set and clear every flag of the main thread",
        signal::tc_signal_main_thread,
    ),
    case(
        "TC_SignalChildThread",
        "set and clear every flag of a child thread",
        signal::tc_signal_child_thread,
    ),
    case(
        "TC_SignalChildToParent",
        "parent and child exchange flags",
        signal::tc_signal_child_to_parent,
    ),
    case(
        "TC_SignalChildToChild",
        "two siblings relay flags and report to the parent",
        signal::tc_signal_child_to_child,
    ),
    case(
        "TC_SignalWaitTimeout",
        "signal waits with zero and finite timeouts",
        signal::tc_signal_wait_timeout,
    ),
    case(
        "TC_SignalCheckTimeout",
        "wait released by a delayed set lands in the calibrated window",
        signal::tc_signal_check_timeout,
    ),
    case(
        "TC_SignalParam",
        "invalid threads and the reserved bit are rejected",
        signal::tc_signal_param,
    ),
    case(
        "TC_SignalInterrupts",
        "signal calls from interrupt context",
        signal::tc_signal_interrupts,
    ),
];

/// Looks up a case by its exact name.
pub fn find(name: &str) -> Option<&'static TestCase> {
    CASES.iter().find(|case| case.name == name)
}
