//! Status and event codes returned by the kernel API.
//!
//! Numbering follows CMSIS-RTOS v1 so that captured results can be compared
//! with reference logs of other implementations.

/// Timeout value meaning "block without deadline".
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Returned by `signal_set`/`signal_clear` when the request is rejected.
///
/// This is also the reserved most-significant signal bit, so a rejected
/// attempt to set that bit reports the attempted value itself.
pub const SIGNAL_ERROR: u32 = 0x8000_0000;

/// Outcome of a kernel call.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsStatus {
    /// Success, or neutral "no data" / "no event" for zero-timeout calls.
    Ok = 0x00,
    /// Signal wait satisfied.
    EventSignal = 0x08,
    /// Message received.
    EventMessage = 0x10,
    /// Deadline elapsed.
    EventTimeout = 0x40,
    /// Null or unknown handle, malformed argument.
    ErrorParameter = 0x80,
    /// Resource not available and no wait was requested.
    ErrorResource = 0x81,
    /// Resource not available within the requested wait.
    ErrorTimeoutResource = 0xC1,
    /// Blocking call attempted from interrupt context.
    ErrorIsr = 0x82,
    /// Value out of range.
    ErrorValue = 0x86,
    /// Unspecified failure.
    ErrorOs = 0xFF,
}

impl OsStatus {
    /// Raw status code.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decodes a raw status code, `None` for codes outside the contract.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0x00 => Some(Self::Ok),
            0x08 => Some(Self::EventSignal),
            0x10 => Some(Self::EventMessage),
            0x40 => Some(Self::EventTimeout),
            0x80 => Some(Self::ErrorParameter),
            0x81 => Some(Self::ErrorResource),
            0xC1 => Some(Self::ErrorTimeoutResource),
            0x82 => Some(Self::ErrorIsr),
            0x86 => Some(Self::ErrorValue),
            0xFF => Some(Self::ErrorOs),
            _ => None,
        }
    }
}

/// Payload carried by an [`OsEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventValue {
    #[default]
    None,
    Message(u32),
    Signals(u32),
}

/// Status plus payload, as returned by `message_get`, `signal_wait` and `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsEvent {
    pub status: OsStatus,
    pub value: EventValue,
}

impl OsEvent {
    pub const fn status(status: OsStatus) -> Self {
        Self {
            status,
            value: EventValue::None,
        }
    }

    pub const fn message(value: u32) -> Self {
        Self {
            status: OsStatus::EventMessage,
            value: EventValue::Message(value),
        }
    }

    pub const fn signals(flags: u32) -> Self {
        Self {
            status: OsStatus::EventSignal,
            value: EventValue::Signals(flags),
        }
    }

    /// Raw payload word (message value or signal flags), 0 when absent.
    pub const fn raw_value(&self) -> u32 {
        match self.value {
            EventValue::None => 0,
            EventValue::Message(v) | EventValue::Signals(v) => v,
        }
    }
}
