//! Validation framework for the KAOS RTOS kernel.
//!
//! A validation case is a plain function taking a [`TestContext`]. Unlike
//! unit tests, a case does not stop at the first failed check: every check is
//! recorded through [`rv_assert!`] on the case's [`Checker`], and the
//! verdict is reported once the case returns.
//!
//! ```ignore
//! fn tc_example(ctx: &TestContext) {
//!     ctx.with_kernel(|kernel| {
//!         rv_assert!(ctx.checker, kernel.delay(1) == OsStatus::EventTimeout);
//!     });
//! }
//! ```
//!
//! [`run_suite`] runs each case on its own host thread, so a case is free to
//! start a kernel (which adopts the calling thread as `main`), and a panic
//! inside a case is recorded as a failure instead of ending the run.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::config::{KernelConfig, SuiteConfig};
use crate::kernel::Kernel;
use crate::logging;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub expr: String,
    pub file: &'static str,
    pub line: u32,
    pub note: Option<String>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.expr)?;
        if let Some(note) = &self.note {
            write!(f, " ({})", note)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct CheckerState {
    passed: AtomicU32,
    failures: Mutex<Vec<Failure>>,
}

/// Thread-safe assertion recorder. Clones share the same record, so a
/// checker can be moved into kernel threads and interrupt handlers.
#[derive(Clone, Default)]
pub struct Checker {
    inner: Arc<CheckerState>,
}

impl Checker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one check and returns `cond`.
    pub fn check(&self, cond: bool, expr: &str, file: &'static str, line: u32) -> bool {
        self.check_with(cond, expr, file, line, None)
    }

    pub fn check_with(
        &self,
        cond: bool,
        expr: &str,
        file: &'static str,
        line: u32,
        note: Option<String>,
    ) -> bool {
        if cond {
            self.inner.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            let failure = Failure {
                expr: expr.to_string(),
                file,
                line,
                note,
            };
            warn!(target: "rv", "check failed: {}", failure);
            self.inner.failures.lock().push(failure);
        }
        cond
    }

    pub fn passed(&self) -> u32 {
        self.inner.passed.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.inner.failures.lock().clone()
    }

    pub fn is_clean(&self) -> bool {
        self.inner.failures.lock().is_empty()
    }
}

/// Records a check on a [`Checker`] and evaluates to the condition.
#[macro_export]
macro_rules! rv_assert {
    ($checker:expr, $cond:expr) => {
        $checker.check($cond, stringify!($cond), file!(), line!())
    };
    ($checker:expr, $cond:expr, $($arg:tt)+) => {
        $checker.check_with(
            $cond,
            stringify!($cond),
            file!(),
            line!(),
            Some(format!($($arg)+)),
        )
    };
}

/// Everything a case gets from the runner.
pub struct TestContext {
    pub checker: Checker,
    pub kernel_config: KernelConfig,
}

impl TestContext {
    pub fn new(kernel_config: KernelConfig) -> Self {
        Self {
            checker: Checker::new(),
            kernel_config,
        }
    }

    /// Starts a fresh kernel on the calling thread, runs `body` as its main
    /// thread and shuts the kernel down afterwards.
    pub fn with_kernel(&self, body: impl FnOnce(&Kernel)) {
        match Kernel::start(self.kernel_config) {
            Ok(kernel) => {
                let _stop = ShutdownGuard(&kernel);
                body(&kernel);
            }
            Err(err) => {
                self.checker.check_with(
                    false,
                    "Kernel::start",
                    file!(),
                    line!(),
                    Some(err.to_string()),
                );
            }
        }
    }
}

/// Stops the kernel even when the case body unwinds.
struct ShutdownGuard<'a>(&'a Kernel);

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Case body.
pub type CaseFn = fn(&TestContext);

/// Named validation case.
#[derive(Clone, Copy)]
pub struct TestCase {
    pub name: &'static str,
    pub description: &'static str,
    pub run: CaseFn,
}

/// Anything the runner can execute.
pub trait Testable {
    fn name(&self) -> &str;
    fn run(&self, ctx: &TestContext);
}

impl Testable for TestCase {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, ctx: &TestContext) {
        (self.run)(ctx)
    }
}

/// Outcome of one case.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: String,
    pub passed: u32,
    pub failures: Vec<Failure>,
    pub duration: Duration,
}

impl CaseResult {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub cases: Vec<CaseResult>,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(CaseResult::is_ok)
    }

    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.is_ok()).count()
    }

    pub fn case(&self, name: &str) -> Option<&CaseResult> {
        self.cases.iter().find(|c| c.name == name)
    }

    /// Process exit code of the runner: 0 when every case passed.
    pub fn exit_code(&self) -> u8 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    pub fn write_summary(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "========================================")?;
        writeln!(out, "    KAOS RTOS Validation Report")?;
        writeln!(out, "========================================")?;
        for case in &self.cases {
            let verdict = if case.is_ok() { "ok" } else { "FAILED" };
            writeln!(
                out,
                "  {:<28} [{}] {} checks, {} ms",
                case.name,
                verdict,
                case.passed + case.failures.len() as u32,
                case.duration.as_millis()
            )?;
            for failure in &case.failures {
                writeln!(out, "      {}", failure)?;
            }
        }
        writeln!(out, "========================================")?;
        writeln!(
            out,
            "{} of {} cases passed",
            self.cases.len() - self.failed_count(),
            self.cases.len()
        )?;
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic>".to_string())
}

/// Runs one case on a dedicated host thread.
pub fn run_case<T>(case: &T, kernel_config: KernelConfig) -> CaseResult
where
    T: Testable + Sync,
{
    let ctx = TestContext::new(kernel_config);
    let checker = ctx.checker.clone();
    let started = Instant::now();

    let outcome = thread::scope(|scope| {
        thread::Builder::new()
            .name(case.name().to_string())
            .spawn_scoped(scope, || case.run(&ctx))
            .map(|handle| handle.join())
    });

    match outcome {
        Err(err) => {
            checker.check_with(false, "spawn case thread", file!(), line!(), Some(err.to_string()));
        }
        Ok(Err(payload)) => {
            let note = panic_message(payload.as_ref());
            checker.check_with(false, "case panicked", file!(), line!(), Some(note));
        }
        Ok(Ok(())) => {}
    }

    CaseResult {
        name: case.name().to_string(),
        passed: checker.passed(),
        failures: checker.failures(),
        duration: started.elapsed(),
    }
}

/// Runs every case selected by `config` in order and collects the verdicts.
pub fn run_suite<T>(cases: &[T], config: &SuiteConfig) -> SuiteReport
where
    T: Testable + Sync,
{
    let selected: Vec<&T> = cases.iter().filter(|c| config.should_run(c.name())).collect();
    info!(target: "rv", "running {} of {} cases", selected.len(), cases.len());

    let mut report = SuiteReport::default();
    for case in selected {
        logging::set_capture_enabled(config.dump_logs_on_failure);
        info!(target: "rv", "{} ...", case.name());
        let result = run_case(case, config.kernel);
        if result.is_ok() {
            info!(target: "rv", "{} [ok]", case.name());
        } else {
            error!(target: "rv", "{} [FAILED] {} failed checks", case.name(), result.failures.len());
            if config.dump_logs_on_failure {
                if let Err(err) = logging::dump_captured(&mut io::stderr(), "kernel") {
                    warn!(target: "rv", "failed to dump captured kernel log: {}", err);
                }
            }
        }
        report.cases.push(result);
    }
    logging::set_capture_enabled(false);
    report
}
