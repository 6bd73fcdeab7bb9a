//! KAOS RTOS validation runner.
//!
//! Runs the validation cases against fresh kernel instances and prints a
//! report. Exit code 0 means every selected case passed.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use kaos_rtos_rv::config::{
    KernelConfig, SuiteConfig, DEFAULT_MAX_THREADS, DEFAULT_SIGNAL_COUNT, DEFAULT_TICK_HZ,
};
use kaos_rtos_rv::{logging, rv, testing};

#[derive(Debug, Parser)]
#[command(name = "kaos_rv", about = "Run the KAOS RTOS validation suite")]
struct Cli {
    /// Kernel tick rate in Hz.
    #[arg(long, default_value_t = DEFAULT_TICK_HZ)]
    tick_hz: u32,
    /// Signal flags per thread.
    #[arg(long = "signals", default_value_t = DEFAULT_SIGNAL_COUNT)]
    signal_count: u8,
    /// Thread table size.
    #[arg(long, default_value_t = DEFAULT_MAX_THREADS)]
    max_threads: usize,
    /// Only run cases whose name contains this string.
    #[arg(long)]
    filter: Option<String>,
    /// List the cases and exit.
    #[arg(long)]
    list: bool,
    /// Dump captured kernel logs for failing cases.
    #[arg(long)]
    dump_logs: bool,
}

impl Cli {
    fn suite_config(&self) -> SuiteConfig {
        SuiteConfig {
            kernel: KernelConfig {
                tick_hz: self.tick_hz,
                signal_count: self.signal_count,
                max_threads: self.max_threads,
            },
            filter: self.filter.clone(),
            dump_logs_on_failure: self.dump_logs,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init("info");

    let config = cli.suite_config();
    if let Err(err) = config.kernel.validate() {
        error!(target: "rv", "{}", err);
        eprintln!("kaos_rv: {}", err);
        return ExitCode::from(2);
    }

    if cli.list {
        for case in rv::CASES.iter().filter(|c| config.should_run(c.name)) {
            println!("{:<28} {}", case.name, case.description);
        }
        return ExitCode::SUCCESS;
    }

    let report = testing::run_suite(rv::CASES, &config);
    if let Err(err) = report.write_summary(&mut io::stdout().lock()) {
        eprintln!("kaos_rv: failed to write report: {}", err);
        return ExitCode::from(2);
    }
    ExitCode::from(report.exit_code())
}
