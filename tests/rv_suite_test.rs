//! End-to-end runs of the validation cases against the simulated kernel.

use std::collections::HashSet;
use std::io;

use kaos_rtos_rv::config::{KernelConfig, SuiteConfig};
use kaos_rtos_rv::rv;
use kaos_rtos_rv::testing::{run_case, run_suite, CaseResult};
use serial_test::serial;

fn run_named(name: &str) -> CaseResult {
    let case = rv::find(name).unwrap_or_else(|| panic!("case {} should exist", name));
    run_case(case, KernelConfig::default())
}

fn assert_case_passes(name: &str) {
    let result = run_named(name);
    let failures: Vec<String> = result.failures.iter().map(|f| f.to_string()).collect();
    assert!(result.is_ok(), "{} failed:\n{}", name, failures.join("\n"));
    assert!(result.passed > 0, "{} recorded no checks", name);
}

/// Contract: the catalogue has unique names, each findable by name.
#[test]
fn test_case_catalogue() {
    let names: HashSet<&str> = rv::CASES.iter().map(|c| c.name).collect();
    assert!(names.len() == rv::CASES.len(), "case names must be unique");
    assert!(rv::CASES.len() == 17, "expected 17 cases, found {}", rv::CASES.len());
    for case in rv::CASES {
        assert!(
            rv::find(case.name).is_some_and(|c| c.name == case.name),
            "{} should be findable",
            case.name
        );
        assert!(!case.description.is_empty(), "{} needs a description", case.name);
    }
    assert!(rv::find("TC_Unknown").is_none(), "unknown names are not found");
}

#[test]
#[serial]
fn test_gen_wait_cases() {
    assert_case_passes("TC_GenWaitBasic");
    assert_case_passes("TC_GenWaitInterrupts");
}

#[test]
#[serial]
fn test_msgq_thread_cases() {
    for name in ["TC_MsgQBasic", "TC_MsgQWait", "TC_MsgQCheckTimeout", "TC_MsgQParam"] {
        assert_case_passes(name);
    }
}

#[test]
#[serial]
fn test_msgq_interrupt_cases() {
    for name in ["TC_MsgQInterrupts", "TC_MsgFromThreadToISR", "TC_MsgFromISRToThread"] {
        assert_case_passes(name);
    }
}

#[test]
#[serial]
fn test_signal_thread_cases() {
    for name in [
        "TC_SignalMainThread",
        "TC_SignalChildThread",
        "TC_SignalChildToParent",
        "TC_SignalChildToChild",
        "TC_SignalParam",
    ] {
        assert_case_passes(name);
    }
}

#[test]
#[serial]
fn test_signal_timing_and_interrupt_cases() {
    for name in [
        "TC_SignalWaitTimeout",
        "TC_SignalCheckTimeout",
        "TC_SignalInterrupts",
    ] {
        assert_case_passes(name);
    }
}

/// Contract: signal cases adapt to a narrower flag width.
#[test]
#[serial]
fn test_signal_cases_with_eight_flags() {
    let config = KernelConfig {
        signal_count: 8,
        ..KernelConfig::default()
    };
    for name in ["TC_SignalMainThread", "TC_SignalChildToChild"] {
        let case = rv::find(name).expect("case should exist");
        let result = run_case(case, config);
        assert!(result.is_ok(), "{} failed with 8 flags: {:?}", name, result.failures);
    }
}

/// Contract: the full suite passes and reports exit code 0.
#[test]
#[serial]
fn test_full_suite_passes() {
    let report = run_suite(rv::CASES, &SuiteConfig::default());
    if !report.all_passed() {
        let _ = report.write_summary(&mut io::stderr());
    }
    assert!(report.cases.len() == rv::CASES.len(), "every case should have run");
    assert!(report.all_passed(), "{} cases failed", report.failed_count());
    assert!(report.exit_code() == 0, "exit code must be 0");
}
