//! Kernel and suite configuration.

use thiserror::Error;

/// Default tick rate in Hz.
pub const DEFAULT_TICK_HZ: u32 = 250;

/// Default number of signal flags per thread.
pub const DEFAULT_SIGNAL_COUNT: u8 = 16;

/// Default thread table size (including the adopted main thread).
pub const DEFAULT_MAX_THREADS: usize = 16;

/// Highest usable signal flag count; bit 31 is reserved.
pub const MAX_SIGNAL_COUNT: u8 = 31;

/// Upper bound for the tick rate; beyond this host sleep granularity dominates.
pub const MAX_TICK_HZ: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick rate must be within 1..=10000 Hz, got {0}")]
    TickRate(u32),
    #[error("signal count must be within 1..=31, got {0}")]
    SignalCount(u8),
    #[error("thread table needs room for the main thread, got {0}")]
    MaxThreads(usize),
}

/// Parameters of one simulated kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub tick_hz: u32,
    pub signal_count: u8,
    pub max_threads: usize,
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_hz == 0 || self.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::TickRate(self.tick_hz));
        }
        if self.signal_count == 0 || self.signal_count > MAX_SIGNAL_COUNT {
            return Err(ConfigError::SignalCount(self.signal_count));
        }
        if self.max_threads < 2 {
            return Err(ConfigError::MaxThreads(self.max_threads));
        }
        Ok(())
    }

    /// Mask covering every user-settable signal flag.
    pub const fn signal_mask(&self) -> u32 {
        (1u32 << self.signal_count) - 1
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            signal_count: DEFAULT_SIGNAL_COUNT,
            max_threads: DEFAULT_MAX_THREADS,
        }
    }
}

/// Parameters of one validation run.
#[derive(Debug, Clone, Default)]
pub struct SuiteConfig {
    pub kernel: KernelConfig,
    /// Substring filter on test case names; `None` runs everything.
    pub filter: Option<String>,
    /// Print the captured log lines of a case when it fails.
    pub dump_logs_on_failure: bool,
}

impl SuiteConfig {
    pub fn should_run(&self, name: &str) -> bool {
        match &self.filter {
            None => true,
            Some(pattern) => name.contains(pattern.as_str()),
        }
    }
}
