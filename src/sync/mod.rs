//! Synchronization helpers for thread/interrupt data exchange.

pub mod channel;
