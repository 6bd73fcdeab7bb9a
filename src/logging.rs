//! Central logging with optional in-memory capture for failure dumps.
//!
//! Records go to an `env_logger` backend (filtered by `RUST_LOG`). While
//! capture is enabled, every record at `Debug` or above is additionally kept
//! as a `target|message` line so a failing case can dump the kernel's view
//! of what happened, regardless of the console filter.

use std::io::{self, Write};
use std::sync::OnceLock;

use env_logger::Env;
use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

const CAPTURE_BUF_SIZE: usize = 256 * 1024;

#[derive(Default)]
struct CaptureState {
    enabled: bool,
    lines: Vec<String>,
    bytes: usize,
    overflow: bool,
}

struct CaptureLogger {
    inner: env_logger::Logger,
    capture: Mutex<CaptureState>,
}

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata) || metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record<'_>) {
        if self.inner.matches(record) {
            self.inner.log(record);
        }
        if record.level() <= LevelFilter::Debug {
            capture_line(&self.capture, record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn capture_line(capture: &Mutex<CaptureState>, record: &Record<'_>) {
    let mut state = capture.lock();
    if !state.enabled {
        return;
    }
    let line = format!("{}|{}", record.target(), record.args());
    if state.bytes + line.len() > CAPTURE_BUF_SIZE {
        state.overflow = true;
        return;
    }
    state.bytes += line.len();
    state.lines.push(line);
}

static LOGGER: OnceLock<CaptureLogger> = OnceLock::new();

/// Installs the global logger. `default_filter` applies when `RUST_LOG` is
/// unset. Returns `false` if some logger was already installed.
pub fn init(default_filter: &str) -> bool {
    let logger = LOGGER.get_or_init(|| CaptureLogger {
        inner: env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
            .format_timestamp_millis()
            .build(),
        capture: Mutex::new(CaptureState::default()),
    });
    let console = logger.inner.filter();
    match log::set_logger(logger) {
        Ok(()) => {
            log::set_max_level(console.max(LevelFilter::Debug));
            true
        }
        Err(_) => false,
    }
}

/// Enable/disable the capture buffer and reset it.
pub fn set_capture_enabled(enabled: bool) {
    let Some(logger) = LOGGER.get() else {
        return;
    };
    let mut state = logger.capture.lock();
    *state = CaptureState {
        enabled,
        ..CaptureState::default()
    };
}

/// Captured messages whose target starts with `target`.
pub fn captured_lines(target: &str) -> Vec<String> {
    let Some(logger) = LOGGER.get() else {
        return Vec::new();
    };
    let state = logger.capture.lock();
    state
        .lines
        .iter()
        .filter_map(|line| line.split_once('|'))
        .filter(|(line_target, _)| line_target.starts_with(target))
        .map(|(_, msg)| msg.to_string())
        .collect()
}

/// Writes the captured messages of one target family to `out`.
pub fn dump_captured(out: &mut impl Write, target: &str) -> io::Result<()> {
    let lines = captured_lines(target);
    if lines.is_empty() {
        return Ok(());
    }
    let overflow = LOGGER
        .get()
        .map(|logger| logger.capture.lock().overflow)
        .unwrap_or(false);

    writeln!(out, "\n--- {} debug ---", target)?;
    for line in &lines {
        writeln!(out, "{}", line)?;
    }
    if overflow {
        writeln!(out, "[... log output truncated ...]")?;
    }
    writeln!(out, "--- end {} debug ---", target)
}
