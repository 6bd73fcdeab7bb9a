//! Bounded FIFO message queues of 32-bit words.
//!
//! Storage is a fixed ring that advances `head`/`tail` with modular
//! arithmetic. The queue lives under the kernel lock, so unlike a lock-free
//! ring no slot is sacrificed to tell full from empty: `len` tracks it.
//!
//! Blocking rules:
//! - `put` on a queue with blocked getters hands the word directly to the
//!   best getter (highest priority, then longest waiting),
//! - `get` that frees a slot admits the best blocked putter,
//! - interrupt callers never block: any nonzero timeout is `ErrorIsr`.

use log::trace;

use super::sched::{Wait, WaitOutcome};
use super::status::{OsEvent, OsStatus};
use super::{Caller, Kernel};

/// Opaque queue handle. [`MessageQId::NULL`] never names a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageQId(u32);

impl MessageQId {
    pub const NULL: Self = Self(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Static description of a queue to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQDef {
    pub name: &'static str,
    /// Capacity in words; must be nonzero.
    pub queue_sz: usize,
}

impl MessageQDef {
    pub const fn new(name: &'static str, queue_sz: usize) -> Self {
        Self { name, queue_sz }
    }
}

pub(crate) struct MessageQueue {
    pub name: &'static str,
    slots: Box<[u32]>,
    /// Index of the oldest word.
    tail: usize,
    len: usize,
}

impl MessageQueue {
    fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            slots: vec![0; capacity].into_boxed_slice(),
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends `value`; `false` when full.
    pub fn push(&mut self, value: u32) -> bool {
        if self.len == self.capacity() {
            return false;
        }
        let head = (self.tail + self.len) % self.capacity();
        self.slots[head] = value;
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.tail];
        self.tail = (self.tail + 1) % self.capacity();
        self.len -= 1;
        Some(value)
    }
}

impl Kernel {
    /// Creates a queue. Returns `None` in interrupt context, for a zero
    /// capacity, or when the caller is not a running thread.
    pub fn message_create(&self, def: &MessageQDef) -> Option<MessageQId> {
        let (mut state, caller) = self.inner.enter();
        if !matches!(caller, Caller::Thread(_)) || def.queue_sz == 0 {
            return None;
        }

        state.queues.push(MessageQueue::new(def.name, def.queue_sz));
        let id = MessageQId(state.queues.len() as u32);
        trace!(target: "kernel::msgqueue", "created {} ({} slots)", def.name, def.queue_sz);
        self.inner.leave(state, caller);
        Some(id)
    }

    /// Enqueues `value`, waiting up to `timeout` ticks for room.
    ///
    /// `Ok` on success, `ErrorResource` when full and `timeout` is 0,
    /// `ErrorTimeoutResource` when still full at the deadline,
    /// `ErrorParameter` for an unknown handle, `ErrorIsr` for a nonzero
    /// timeout in interrupt context.
    pub fn message_put(&self, queue: MessageQId, value: u32, timeout: u32) -> OsStatus {
        let (mut state, caller) = self.inner.enter();
        if caller == Caller::Inactive {
            return OsStatus::ErrorOs;
        }
        let Some(q) = state.queue_index(queue) else {
            return OsStatus::ErrorParameter;
        };
        if caller == Caller::Isr && timeout != 0 {
            return OsStatus::ErrorIsr;
        }

        if let Some(getter) = state.best_waiter(|w| *w == Wait::MessageGet(queue)) {
            trace!(
                target: "kernel::msgqueue",
                "{}: hand {} to {}",
                state.queues[q].name,
                value,
                state.threads[getter].name
            );
            state.wake(getter, WaitOutcome::Message(value));
            self.inner.leave(state, caller);
            return OsStatus::Ok;
        }

        if state.queues[q].push(value) {
            self.inner.leave(state, caller);
            return OsStatus::Ok;
        }
        if timeout == 0 {
            return OsStatus::ErrorResource;
        }

        let Caller::Thread(idx) = caller else {
            return OsStatus::ErrorIsr;
        };
        match self
            .inner
            .block_current(&mut state, idx, Wait::MessagePut(queue, value), timeout)
        {
            WaitOutcome::Admitted => OsStatus::Ok,
            WaitOutcome::Timeout => OsStatus::ErrorTimeoutResource,
            _ => OsStatus::ErrorOs,
        }
    }

    /// Dequeues the oldest word, waiting up to `timeout` ticks for one.
    ///
    /// `EventMessage` with the word on success, `Ok` when empty and `timeout`
    /// is 0, `EventTimeout` when still empty at the deadline,
    /// `ErrorParameter` for an unknown handle, `ErrorIsr` for a nonzero
    /// timeout in interrupt context.
    pub fn message_get(&self, queue: MessageQId, timeout: u32) -> OsEvent {
        let (mut state, caller) = self.inner.enter();
        if caller == Caller::Inactive {
            return OsEvent::status(OsStatus::ErrorOs);
        }
        let Some(q) = state.queue_index(queue) else {
            return OsEvent::status(OsStatus::ErrorParameter);
        };
        if caller == Caller::Isr && timeout != 0 {
            return OsEvent::status(OsStatus::ErrorIsr);
        }

        if let Some(value) = state.queues[q].pop() {
            let putter = state.best_waiter(|w| matches!(w, Wait::MessagePut(id, _) if *id == queue));
            if let Some(putter) = putter {
                if let Wait::MessagePut(_, pending) = state.threads[putter].wait {
                    state.queues[q].push(pending);
                }
                state.wake(putter, WaitOutcome::Admitted);
            }
            self.inner.leave(state, caller);
            return OsEvent::message(value);
        }
        if timeout == 0 {
            return OsEvent::status(OsStatus::Ok);
        }

        let Caller::Thread(idx) = caller else {
            return OsEvent::status(OsStatus::ErrorIsr);
        };
        match self
            .inner
            .block_current(&mut state, idx, Wait::MessageGet(queue), timeout)
        {
            WaitOutcome::Message(value) => OsEvent::message(value),
            WaitOutcome::Timeout => OsEvent::status(OsStatus::EventTimeout),
            _ => OsEvent::status(OsStatus::ErrorOs),
        }
    }

    /// Number of words currently stored in `queue`.
    pub fn message_count(&self, queue: MessageQId) -> Option<usize> {
        let state = self.inner.lock();
        state.queue_index(queue).map(|q| state.queues[q].len())
    }
}

