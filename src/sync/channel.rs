//! Cells shared between thread context and interrupt handlers.
//!
//! A validation thread writes a request (selector, handle), raises an IRQ,
//! and reads back what the handler stored. Each cell is a single atomic
//! word, so a handler running on another host thread never observes a torn
//! value. [`EventCell`] publishes its payload before its status.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::kernel::status::{EventValue, OsEvent, OsStatus};
use crate::kernel::thread::ThreadId;
use crate::kernel::MessageQId;

/// Raw word with no meaning as a status code; marks "handler has not run".
pub const UNSET: u32 = u32::MAX;

/// Plain word, e.g. a counter or a flag set.
#[derive(Debug)]
pub struct WordCell(AtomicU32);

impl WordCell {
    pub const fn new(value: u32) -> Self {
        Self(AtomicU32::new(value))
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn store(&self, value: u32) {
        self.0.store(value, Ordering::Release);
    }

    /// Adds one and returns the previous value.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }

    /// Atomically subtracts `amount` (saturating at 0) and returns the previous value.
    pub fn take(&self, amount: u32) -> u32 {
        let mut current = self.load();
        loop {
            let next = current.saturating_sub(amount);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(prev) => return prev,
                Err(seen) => current = seen,
            }
        }
    }
}

impl Default for WordCell {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Status code slot. Starts (and can be reset to) [`UNSET`].
#[derive(Debug)]
pub struct StatusCell(AtomicU32);

impl StatusCell {
    pub const fn new() -> Self {
        Self(AtomicU32::new(UNSET))
    }

    pub fn store(&self, status: OsStatus) {
        self.0.store(status.code(), Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(UNSET, Ordering::Release);
    }

    /// Stored status, `None` while unset.
    pub fn load(&self) -> Option<OsStatus> {
        OsStatus::from_code(self.0.load(Ordering::Acquire))
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

const VALUE_NONE: u8 = 0;
const VALUE_MESSAGE: u8 = 1;
const VALUE_SIGNALS: u8 = 2;

/// Full [`OsEvent`] slot.
#[derive(Debug)]
pub struct EventCell {
    status: StatusCell,
    kind: AtomicU8,
    value: AtomicU32,
}

impl EventCell {
    pub const fn new() -> Self {
        Self {
            status: StatusCell::new(),
            kind: AtomicU8::new(VALUE_NONE),
            value: AtomicU32::new(0),
        }
    }

    pub fn store(&self, event: OsEvent) {
        let (kind, value) = match event.value {
            EventValue::None => (VALUE_NONE, 0),
            EventValue::Message(v) => (VALUE_MESSAGE, v),
            EventValue::Signals(v) => (VALUE_SIGNALS, v),
        };
        self.value.store(value, Ordering::Relaxed);
        self.kind.store(kind, Ordering::Relaxed);
        self.status.store(event.status);
    }

    pub fn reset(&self) {
        self.status.reset();
    }

    pub fn load(&self) -> Option<OsEvent> {
        let status = self.status.load()?;
        let value = self.value.load(Ordering::Relaxed);
        let value = match self.kind.load(Ordering::Relaxed) {
            VALUE_MESSAGE => EventValue::Message(value),
            VALUE_SIGNALS => EventValue::Signals(value),
            _ => EventValue::None,
        };
        Some(OsEvent { status, value })
    }
}

impl Default for EventCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread handle slot, [`ThreadId::NULL`] until stored.
#[derive(Debug, Default)]
pub struct ThreadIdCell(AtomicU32);

impl ThreadIdCell {
    pub fn store(&self, id: ThreadId) {
        self.0.store(id.raw(), Ordering::Release);
    }

    pub fn load(&self) -> ThreadId {
        ThreadId::from_raw(self.0.load(Ordering::Acquire))
    }
}

/// Queue handle slot; holds `None` after a failed create.
#[derive(Debug)]
pub struct QueueIdCell(AtomicU32);

impl QueueIdCell {
    pub const fn new() -> Self {
        Self(AtomicU32::new(UNSET))
    }

    pub fn store(&self, id: Option<MessageQId>) {
        self.0
            .store(id.map_or(0, MessageQId::raw), Ordering::Release);
    }

    pub fn load(&self) -> Option<MessageQId> {
        match self.0.load(Ordering::Acquire) {
            0 | UNSET => None,
            raw => Some(MessageQId::from_raw(raw)),
        }
    }

    /// `true` until the first `store`.
    pub fn is_unset(&self) -> bool {
        self.0.load(Ordering::Acquire) == UNSET
    }
}

impl Default for QueueIdCell {
    fn default() -> Self {
        Self::new()
    }
}
