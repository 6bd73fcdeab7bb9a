//! KAOS RTOS validation library
//!
//! This crate hosts a simulated uniprocessor RTOS kernel (threads, message
//! queues, signal flags, software timers and an interrupt controller model)
//! together with the validation cases that check its CMSIS-RTOS contract.
//! The `kaos_rv` binary runs the suite; integration tests under `tests/`
//! exercise each subsystem directly.

pub mod arch;
pub mod config;
pub mod kernel;
pub mod logging;
pub mod rv;
pub mod sync;
pub mod testing;

pub use kernel::Kernel;
