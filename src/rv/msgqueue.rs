//! Message queue cases.

use std::sync::Arc;

use crate::arch::interrupts::Nvic;
use crate::kernel::status::{EventValue, OsEvent, OsStatus, WAIT_FOREVER};
use crate::kernel::thread::{Priority, ThreadId};
use crate::kernel::{Kernel, MessageQDef, MessageQId, ThreadDef, TimerId, TimerKind};
use crate::rv_assert;
use crate::sync::channel::{EventCell, QueueIdCell, StatusCell, WordCell};
use crate::testing::{Checker, TestContext};

use super::calibrate::{elapsed_ticks, CalibrationWindow, REFERENCE_EVENT};
use super::{SIGNAL_TIMER_TOUT, TEST_IRQ, TEST_IRQ_LINES};

pub const MSGQ_SZ: usize = 16;

const MSGQ: MessageQDef = MessageQDef::new("MsgQ", MSGQ_SZ);
const MSGQ_ISR: MessageQDef = MessageQDef::new("MsgQ_Isr", MSGQ_SZ);

const TH_MSGQ_WAIT: ThreadDef = ThreadDef::new("Th_MsgQWait", Priority::AboveNormal);
const TH_MSGQ_WAKEUP: ThreadDef = ThreadDef::new("Th_MsgQWakeup", Priority::AboveNormal);

// Interrupt handler selectors.
const ISR_CREATE: u32 = 0;
const ISR_PUT_NO_WAIT: u32 = 1;
const ISR_PUT_TIMEOUT: u32 = 2;
const ISR_GET_NO_WAIT: u32 = 3;
const ISR_GET_TIMEOUT: u32 = 4;
const ISR_PUT_FOREVER: u32 = 5;
const ISR_GET_FOREVER: u32 = 6;
const ISR_STREAM_RECEIVE: u32 = 7;
const ISR_STREAM_SEND: u32 = 8;

/// Timer period of the continuous streams, in ticks.
const STREAM_PERIOD: u32 = 2;
/// Ticks of interrupt traffic before the completion signal is raised.
const STREAM_BUDGET: u32 = 50;
/// Loop passes after which a stream counts as hung.
const STREAM_ITERATION_CAP: u32 = 2_000;

/// Fill to capacity, overflow, drain in order, underflow.
pub fn tc_msgq_basic(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(q) = rv_some!(c, kernel.message_create(&MSGQ)) else {
            return;
        };

        for txi in 0..MSGQ_SZ as u32 {
            rv_assert!(c, kernel.message_put(q, txi, 0) == OsStatus::Ok, "put {}", txi);
        }
        let txi = MSGQ_SZ as u32;
        rv_assert!(c, kernel.message_put(q, txi, 0) == OsStatus::ErrorResource);
        let (stat, waited) = elapsed_ticks(kernel, || kernel.message_put(q, txi, 10));
        rv_assert!(c, stat == OsStatus::ErrorTimeoutResource);
        rv_assert!(c, waited >= 10, "put gave up after {} ticks", waited);

        for txi in 0..MSGQ_SZ as u32 {
            let evt = kernel.message_get(q, 0);
            if rv_assert!(c, evt.status == OsStatus::EventMessage) {
                rv_assert!(c, evt.value == EventValue::Message(txi), "got {:?}", evt.value);
            }
        }

        rv_assert!(c, kernel.message_get(q, 0).status == OsStatus::Ok);
        rv_assert!(c, kernel.message_get(q, 10).status == OsStatus::EventTimeout);

        // FIFO order holds for every fill level.
        for fill in 0..=MSGQ_SZ as u32 {
            let base = fill * 100;
            for i in 0..fill {
                rv_assert!(c, kernel.message_put(q, base + i, 0) == OsStatus::Ok);
            }
            for i in 0..fill {
                rv_assert!(c, kernel.message_get(q, 0) == OsEvent::message(base + i));
            }
            rv_assert!(c, kernel.message_get(q, 0).status == OsStatus::Ok, "fill {}", fill);
        }
    });
}

/// A higher-priority consumer blocks on an empty queue and receives the
/// next put directly.
pub fn tc_msgq_wait(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(q) = rv_some!(c, kernel.message_create(&MSGQ)) else {
            return;
        };
        let wait_cnt = Arc::new(WordCell::new(0));
        let received = Arc::new(WordCell::new(0));

        let th_kernel = kernel.clone();
        let th_checker = c.clone();
        let th_cnt = Arc::clone(&wait_cnt);
        let th_received = Arc::clone(&received);
        let created = kernel.thread_create(&TH_MSGQ_WAIT, move || {
            th_cnt.increment();
            let evt = th_kernel.message_get(q, WAIT_FOREVER);
            rv_assert!(th_checker, evt.status == OsStatus::EventMessage);
            th_cnt.increment();
            if evt.status == OsStatus::EventMessage {
                th_received.store(evt.raw_value());
            }
        });
        rv_assert!(c, created.is_ok());

        rv_assert!(c, wait_cnt.load() == 1);
        rv_assert!(c, kernel.message_put(q, 2, WAIT_FOREVER) == OsStatus::Ok);
        rv_assert!(c, wait_cnt.load() == 2);
        rv_assert!(c, received.load() == wait_cnt.load());
    });
}

/// A get blocked on an empty queue returns inside the calibrated window
/// when a helper puts after the reference delay.
pub fn tc_msgq_check_timeout(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(q) = rv_some!(c, kernel.message_create(&MSGQ)) else {
            return;
        };
        let window = CalibrationWindow::reference(kernel);

        for timeout in [100, WAIT_FOREVER] {
            let th_kernel = kernel.clone();
            let th_checker = c.clone();
            let created = kernel.thread_create(&TH_MSGQ_WAKEUP, move || {
                th_kernel.delay(REFERENCE_EVENT);
                rv_assert!(th_checker, th_kernel.message_put(q, 1, 0) == OsStatus::Ok);
            });
            if !rv_assert!(c, created.is_ok()) {
                continue;
            }

            let (evt, t_10) = elapsed_ticks(kernel, || kernel.message_get(q, timeout));
            rv_assert!(c, evt.status == OsStatus::EventMessage, "timeout {}", timeout);
            rv_assert!(c, window.contains(t_10), "{} ticks, window {:?}", t_10, window);
            kernel.delay(REFERENCE_EVENT);
        }
    });
}

/// Null and unknown handles are parameter errors.
pub fn tc_msgq_param(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let info = 0;
        rv_assert!(c, kernel.message_create(&MessageQDef::new("MsgQ_Empty", 0)).is_none());
        rv_assert!(c, kernel.message_get(MessageQId::NULL, 0).status == OsStatus::ErrorParameter);
        rv_assert!(c, kernel.message_put(MessageQId::NULL, info, 0) == OsStatus::ErrorParameter);

        let unknown = MessageQId::from_raw(0x7FFF);
        rv_assert!(c, kernel.message_get(unknown, 0).status == OsStatus::ErrorParameter);
        rv_assert!(c, kernel.message_put(unknown, info, 0) == OsStatus::ErrorParameter);
    });
}

/// Queue calls from interrupt context: non-blocking variants work, every
/// blocking variant is refused.
pub fn tc_msgq_interrupts(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let queue = Arc::new(QueueIdCell::new());
        let stat = Arc::new(StatusCell::new());
        let event = Arc::new(EventCell::new());
        let nvic = Nvic::new(kernel, TEST_IRQ_LINES);

        let isr_kernel = kernel.clone();
        let (isr_queue, isr_stat, isr_event) =
            (Arc::clone(&queue), Arc::clone(&stat), Arc::clone(&event));
        nvic.install(TEST_IRQ, move |selector: u32| {
            let q = isr_queue.load().unwrap_or(MessageQId::NULL);
            match selector {
                ISR_CREATE => isr_queue.store(isr_kernel.message_create(&MSGQ_ISR)),
                ISR_PUT_NO_WAIT => isr_stat.store(isr_kernel.message_put(q, 0x01, 0)),
                ISR_PUT_TIMEOUT => isr_stat.store(isr_kernel.message_put(q, 0x02, 10)),
                ISR_GET_NO_WAIT => isr_event.store(isr_kernel.message_get(q, 0)),
                ISR_GET_TIMEOUT => isr_event.store(isr_kernel.message_get(q, 10)),
                ISR_PUT_FOREVER => isr_stat.store(isr_kernel.message_put(q, 0x02, WAIT_FOREVER)),
                ISR_GET_FOREVER => isr_event.store(isr_kernel.message_get(q, WAIT_FOREVER)),
                _ => {}
            }
        });
        nvic.enable(TEST_IRQ);
        let raise = |selector: u32| {
            nvic.set_selector(TEST_IRQ, selector);
            nvic.set_pending(TEST_IRQ);
        };

        raise(ISR_CREATE);
        rv_assert!(c, !queue.is_unset() && queue.load().is_none());

        if let Some(q) = rv_some!(c, kernel.message_create(&MSGQ_ISR)) {
            queue.store(Some(q));

            stat.store(OsStatus::ErrorOs);
            raise(ISR_PUT_NO_WAIT);
            rv_assert!(c, stat.load() == Some(OsStatus::Ok));

            for selector in [ISR_PUT_TIMEOUT, ISR_PUT_FOREVER] {
                stat.store(OsStatus::Ok);
                raise(selector);
                rv_assert!(c, stat.load() == Some(OsStatus::ErrorIsr), "selector {}", selector);
            }

            event.store(OsEvent::status(OsStatus::Ok));
            raise(ISR_GET_NO_WAIT);
            rv_assert!(c, event.load() == Some(OsEvent::message(0x01)));

            for selector in [ISR_GET_TIMEOUT, ISR_GET_FOREVER] {
                event.store(OsEvent::status(OsStatus::Ok));
                raise(selector);
                let status = event.load().map(|e| e.status);
                rv_assert!(c, status == Some(OsStatus::ErrorIsr), "selector {}", selector);
            }

            // Empty queue, no wait: neutral "no data".
            event.store(OsEvent::status(OsStatus::ErrorOs));
            raise(ISR_GET_NO_WAIT);
            rv_assert!(c, event.load() == Some(OsEvent::status(OsStatus::Ok)));
            rv_assert!(c, kernel.message_count(q) == Some(0));
        }

        nvic.disable(TEST_IRQ);
    });
}

/// Thread puts continuously, a periodic interrupt consumes and checks order.
pub fn tc_msg_from_thread_to_isr(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(rig) = StreamRig::start(kernel, c, ISR_STREAM_RECEIVE) else {
            return;
        };
        let q = rig.state.queue;

        let mut cnt = 0u32;
        let completed = (0..STREAM_ITERATION_CAP).any(|_| {
            let stat = kernel.message_put(q, cnt, 0);
            if stat == OsStatus::Ok {
                cnt += 1;
            } else {
                rv_assert!(c, stat == OsStatus::ErrorResource, "put returned {:?}", stat);
            }
            kernel.signal_wait(SIGNAL_TIMER_TOUT, 1).status == OsStatus::EventSignal
        });
        rv_assert!(c, completed, "no completion signal after {} passes", STREAM_ITERATION_CAP);
        rig.stop(kernel, c);

        // Whatever the interrupt did not consume is still queued, in order.
        let consumed = rig.state.counter.load();
        let mut leftover = 0;
        loop {
            let evt = kernel.message_get(q, 0);
            if evt.status != OsStatus::EventMessage {
                break;
            }
            rv_assert!(c, evt.raw_value() == consumed + leftover);
            leftover += 1;
        }
        rv_assert!(c, consumed > 0, "interrupt never received a message");
        rv_assert!(c, consumed + leftover == cnt, "{} + {} != {}", consumed, leftover, cnt);
    });
}

/// A periodic interrupt puts continuously, the thread consumes and checks order.
pub fn tc_msg_from_isr_to_thread(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let Some(rig) = StreamRig::start(kernel, c, ISR_STREAM_SEND) else {
            return;
        };
        let q = rig.state.queue;

        let mut cnt = 0u32;
        let receive = |cnt: &mut u32| {
            let evt = kernel.message_get(q, 0);
            if evt.status == OsStatus::EventMessage {
                rv_assert!(c, evt.raw_value() == *cnt, "got {} expected {}", evt.raw_value(), cnt);
                *cnt += 1;
                true
            } else {
                rv_assert!(c, evt.status == OsStatus::Ok, "get returned {:?}", evt.status);
                false
            }
        };
        let completed = (0..STREAM_ITERATION_CAP).any(|_| {
            receive(&mut cnt);
            kernel.signal_wait(SIGNAL_TIMER_TOUT, 1).status == OsStatus::EventSignal
        });
        rv_assert!(c, completed, "no completion signal after {} passes", STREAM_ITERATION_CAP);
        rig.stop(kernel, c);

        while receive(&mut cnt) {}
        rv_assert!(c, cnt > 0, "interrupt never sent a message");
        rv_assert!(c, cnt == rig.state.counter.load(), "{} != {}", cnt, rig.state.counter.load());
    });
}

/// State shared by the stream interrupt handler and the pacing timer.
struct StreamState {
    kernel: Kernel,
    checker: Checker,
    queue: MessageQId,
    /// Next value the interrupt expects (receive) or sends (send).
    counter: WordCell,
    /// Remaining ticks of interrupt traffic.
    budget: WordCell,
}

impl StreamState {
    fn receive(&self) {
        let evt = self.kernel.message_get(self.queue, 0);
        if evt.status == OsStatus::EventMessage {
            rv_assert!(self.checker, evt.raw_value() == self.counter.load());
            self.counter.increment();
        } else {
            rv_assert!(self.checker, evt.status == OsStatus::Ok, "{:?}", evt.status);
        }
    }

    fn send(&self) {
        let stat = self.kernel.message_put(self.queue, self.counter.load(), 0);
        if stat == OsStatus::Ok {
            self.counter.increment();
        } else {
            rv_assert!(self.checker, stat == OsStatus::ErrorResource, "{:?}", stat);
        }
    }
}

/// Queue, interrupt line and periodic timer of one continuous stream.
struct StreamRig {
    state: Arc<StreamState>,
    nvic: Arc<Nvic>,
    timer: TimerId,
}

impl StreamRig {
    fn start(kernel: &Kernel, c: &Checker, selector: u32) -> Option<Self> {
        let main: ThreadId = rv_some!(c, kernel.thread_get_id())?;
        let queue = rv_some!(c, kernel.message_create(&MSGQ))?;
        let state = Arc::new(StreamState {
            kernel: kernel.clone(),
            checker: c.clone(),
            queue,
            counter: WordCell::new(0),
            budget: WordCell::new(STREAM_BUDGET),
        });

        let nvic = Arc::new(Nvic::new(kernel, TEST_IRQ_LINES));
        let isr_state = Arc::clone(&state);
        nvic.install(TEST_IRQ, move |selector: u32| match selector {
            ISR_STREAM_RECEIVE => isr_state.receive(),
            ISR_STREAM_SEND => isr_state.send(),
            _ => {}
        });
        nvic.set_selector(TEST_IRQ, selector);
        nvic.enable(TEST_IRQ);

        let (tick_state, tick_nvic) = (Arc::clone(&state), Arc::clone(&nvic));
        let timer = rv_some!(
            c,
            kernel.timer_create(TimerKind::Periodic, move || {
                if tick_state.budget.take(STREAM_PERIOD) > 0 {
                    tick_nvic.set_pending(TEST_IRQ);
                } else {
                    tick_state.kernel.signal_set(main, SIGNAL_TIMER_TOUT);
                }
            })
        )?;

        let rig = Self { state, nvic, timer };
        if !rv_assert!(c, kernel.timer_start(timer, STREAM_PERIOD) == OsStatus::Ok) {
            rig.stop(kernel, c);
            return None;
        }
        Some(rig)
    }

    /// Deletes the timer, masks the line and lets an in-flight tick finish.
    fn stop(&self, kernel: &Kernel, c: &Checker) {
        rv_assert!(c, kernel.timer_delete(self.timer) == OsStatus::Ok);
        self.nvic.disable(TEST_IRQ);
        kernel.delay(STREAM_PERIOD);
        if let Some(main) = kernel.thread_get_id() {
            kernel.signal_clear(main, SIGNAL_TIMER_TOUT);
        }
    }
}
