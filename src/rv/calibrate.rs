//! Timeout boundary calibration.
//!
//! Timing checks never convert ticks to wall time. Instead a case measures a
//! wait that is known to be too short and one known to be too long against
//! the kernel's own tick counter, then requires the measured operation to
//! land strictly between the two.

use crate::kernel::Kernel;

/// Delay just below the 10-tick reference event.
pub const SHORT_REFERENCE: u32 = 9;

/// Delay just above the 10-tick reference event.
pub const LONG_REFERENCE: u32 = 11;

/// Delay after which helper threads act in timing cases.
pub const REFERENCE_EVENT: u32 = 10;

/// Elapsed-tick bounds `(t_min, t_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationWindow {
    pub t_min: u32,
    pub t_max: u32,
}

impl CalibrationWindow {
    /// Measures `delay(short)` and `delay(long)` on the calling thread.
    pub fn measure(kernel: &Kernel, short: u32, long: u32) -> Self {
        let (_, t_min) = elapsed_ticks(kernel, || kernel.delay(short));
        let (_, t_max) = elapsed_ticks(kernel, || kernel.delay(long));
        Self { t_min, t_max }
    }

    /// Window around [`REFERENCE_EVENT`].
    pub fn reference(kernel: &Kernel) -> Self {
        Self::measure(kernel, SHORT_REFERENCE, LONG_REFERENCE)
    }

    /// Strict containment: a tie with either bound is outside.
    pub fn contains(&self, elapsed: u32) -> bool {
        self.t_min < elapsed && elapsed < self.t_max
    }
}

/// Runs `op` and returns its result with the ticks that passed meanwhile.
pub fn elapsed_ticks<R>(kernel: &Kernel, op: impl FnOnce() -> R) -> (R, u32) {
    let start = kernel.sys_tick();
    let result = op();
    (result, kernel.sys_tick().wrapping_sub(start))
}
