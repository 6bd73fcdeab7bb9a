//! Thread table and priority-preemptive dispatch.
//!
//! Every kernel thread is backed by a host thread, but only the one recorded
//! as `running` may execute kernel code. All others park on the kernel's
//! condition variable until [`KernelState::dispatch`] selects them.
//!
//! Selection rule: the highest-priority `Ready` thread wins, ties go to the
//! thread that became ready first. A running thread is only displaced by a
//! strictly higher priority, so equal priorities never preempt each other.

use super::msgqueue::{MessageQId, MessageQueue};
use super::thread::{Priority, ThreadId};
use super::timer::{SoftTimer, TimerCallback};

/// Table index of the adopted `main` thread.
pub(crate) const MAIN_THREAD: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// What a blocked thread is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    None,
    Delay,
    /// Signal mask, 0 means "any flag".
    Signal(u32),
    MessageGet(MessageQId),
    /// Pending message value, stored into the queue on admission.
    MessagePut(MessageQId, u32),
}

/// How a blocking call ended, written by whoever woke the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Timeout,
    Message(u32),
    Signals(u32),
    Admitted,
    Terminated,
}

/// Thread control block.
pub(crate) struct Tcb {
    pub id: ThreadId,
    pub name: &'static str,
    pub priority: Priority,
    pub state: ThreadState,
    /// Order in which the thread last became ready (FIFO among equals).
    pub ready_seq: u64,
    pub signals: u32,
    pub wait: Wait,
    /// Tick at which a timed wait expires.
    pub wake_at: Option<u32>,
    pub outcome: Option<WaitOutcome>,
}

impl Tcb {
    pub fn new(id: ThreadId, name: &'static str, priority: Priority) -> Self {
        Self {
            id,
            name,
            priority,
            state: ThreadState::Ready,
            ready_seq: 0,
            signals: 0,
            wait: Wait::None,
            wake_at: None,
            outcome: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state != ThreadState::Terminated
    }
}

/// Mutable kernel state, guarded by the kernel lock.
pub(crate) struct KernelState {
    /// Thread table; `ThreadId(n)` lives at index `n - 1`. Ids are never reused.
    pub threads: Vec<Tcb>,
    pub running: Option<usize>,
    ready_seq: u64,
    /// Queue table; `MessageQId(n)` lives at index `n - 1`.
    pub queues: Vec<MessageQueue>,
    /// Timer table; deleted timers leave a `None` hole.
    pub timers: Vec<Option<SoftTimer>>,
    /// Expired timer callbacks not yet taken by the CPU (the pending timer
    /// interrupt).
    pub pending_timers: Vec<TimerCallback>,
    pub stopped: bool,
}

impl KernelState {
    pub fn new() -> Self {
        Self {
            threads: Vec::new(),
            running: None,
            ready_seq: 0,
            queues: Vec::new(),
            timers: Vec::new(),
            pending_timers: Vec::new(),
            stopped: false,
        }
    }

    pub fn live_threads(&self) -> usize {
        self.threads.iter().filter(|t| t.is_alive()).count()
    }

    /// Table index of a live thread.
    pub fn thread_index(&self, id: ThreadId) -> Option<usize> {
        let idx = (id.raw() as usize).checked_sub(1)?;
        self.threads
            .get(idx)
            .filter(|t| t.is_alive())
            .map(|_| idx)
    }

    pub fn queue_index(&self, id: MessageQId) -> Option<usize> {
        let idx = (id.raw() as usize).checked_sub(1)?;
        (idx < self.queues.len()).then_some(idx)
    }

    /// Appends a new thread in `Ready` state and returns its table index.
    pub fn add_thread(&mut self, name: &'static str, priority: Priority) -> usize {
        let idx = self.threads.len();
        let id = ThreadId::from_raw(idx as u32 + 1);
        self.threads.push(Tcb::new(id, name, priority));
        self.make_ready(idx);
        idx
    }

    /// Moves a thread to the tail of its priority's ready order.
    pub fn make_ready(&mut self, idx: usize) {
        self.ready_seq += 1;
        let tcb = &mut self.threads[idx];
        tcb.state = ThreadState::Ready;
        tcb.ready_seq = self.ready_seq;
        tcb.wait = Wait::None;
        tcb.wake_at = None;
    }

    /// Marks the thread as blocked on `wait`; `wake_at` of `None` waits forever.
    pub fn block(&mut self, idx: usize, wait: Wait, wake_at: Option<u32>) {
        let tcb = &mut self.threads[idx];
        tcb.state = ThreadState::Blocked;
        tcb.wait = wait;
        tcb.wake_at = wake_at;
        tcb.outcome = None;
        if self.running == Some(idx) {
            self.running = None;
        }
    }

    /// Ends a blocking wait with `outcome` and makes the thread ready.
    pub fn wake(&mut self, idx: usize, outcome: WaitOutcome) {
        self.threads[idx].outcome = Some(outcome);
        self.make_ready(idx);
    }

    pub fn terminate(&mut self, idx: usize) {
        let tcb = &mut self.threads[idx];
        if tcb.state == ThreadState::Blocked {
            tcb.outcome = Some(WaitOutcome::Terminated);
        }
        tcb.state = ThreadState::Terminated;
        tcb.wait = Wait::None;
        tcb.wake_at = None;
        if self.running == Some(idx) {
            self.running = None;
        }
    }

    /// Best blocked thread whose wait matches `pred`: highest priority,
    /// then longest waiting.
    pub fn best_waiter(&self, pred: impl Fn(&Wait) -> bool) -> Option<usize> {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == ThreadState::Blocked && pred(&t.wait))
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.ready_seq.cmp(&a.ready_seq))
            })
            .map(|(idx, _)| idx)
    }

    fn highest_ready(&self) -> Option<usize> {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == ThreadState::Ready)
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.ready_seq.cmp(&a.ready_seq))
            })
            .map(|(idx, _)| idx)
    }

    /// Selects the thread that owns the CPU. Returns `true` when the owner
    /// changed and parked threads must re-check their state.
    pub fn dispatch(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        let Some(next) = self.highest_ready() else {
            return false;
        };

        match self.running {
            Some(cur) if self.threads[cur].state == ThreadState::Running => {
                if self.threads[next].priority <= self.threads[cur].priority {
                    return false;
                }
                log::trace!(
                    target: "kernel::sched",
                    "preempt {} by {}",
                    self.threads[cur].name,
                    self.threads[next].name
                );
                self.make_ready(cur);
            }
            _ => {}
        }

        self.threads[next].state = ThreadState::Running;
        self.running = Some(next);
        true
    }

    /// Expires timed waits due at `now`; returns the number of threads woken.
    pub fn expire_waits(&mut self, now: u32) -> usize {
        let due: Vec<usize> = self
            .threads
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.state == ThreadState::Blocked && t.wake_at.is_some_and(|at| tick_reached(now, at))
            })
            .map(|(idx, _)| idx)
            .collect();
        for &idx in &due {
            self.wake(idx, WaitOutcome::Timeout);
        }
        due.len()
    }
}

/// Wrap-safe `now >= at` for tick values less than half the counter range apart.
pub(crate) fn tick_reached(now: u32, at: u32) -> bool {
    (now.wrapping_sub(at) as i32) >= 0
}
