//! Lifecycle paths that end the process, observed through the re-exec harness.

use std::sync::{Arc, Mutex};

use testexec::{Context, ExecError, ExitCode, Lifecycle, Reexec};

static REEXEC: Reexec = Reexec::new();

fn announce(label: &'static str) -> impl FnOnce() + Send + 'static {
    move || println!("{label}")
}

/// Position of each label in `output`, panicking if one is missing.
fn positions(output: &str, labels: &[&str]) -> Vec<usize> {
    labels
        .iter()
        .map(|label| output.find(label).unwrap_or_else(|| panic!("{label:?} missing from output:\n{output}")))
        .collect()
}

fn assert_in_order(output: &str, labels: &[&str]) {
    let found = positions(output, labels);
    assert!(found.windows(2).all(|w| w[0] < w[1]), "expected order {labels:?} in output:\n{output}");
}

#[test]
fn fatal_runs_teardown_in_order_then_exits_one() {
    let captured = REEXEC.invoke_and_capture(
        &Context::background(),
        "fatal_runs_teardown_in_order_then_exits_one",
        || {
            let lifecycle = Lifecycle::new();
            lifecycle.register_teardown(announce("teardown A"));
            lifecycle.register_teardown(announce("teardown B"));
            lifecycle.fatal(format_args!("cannot continue: {}", "database gone"));
        },
        Vec::<String>::new(),
    );

    assert!(matches!(captured.result, Err(ExecError::Exit(1))), "got {:?}", captured.result);
    assert_in_order(&captured.output, &["teardown A", "teardown B", "cannot continue: database gone"]);
}

#[test]
fn run_suite_exits_with_runner_code() {
    let captured = REEXEC.invoke_and_capture(
        &Context::background(),
        "run_suite_exits_with_runner_code",
        || {
            let lifecycle = Lifecycle::new();
            lifecycle.register_teardown(announce("teardown first"));
            lifecycle.register_setup(3, announce("setup 3"));
            lifecycle.register_setup(0, announce("setup 0"));
            lifecycle.register_teardown(announce("teardown second"));
            lifecycle.register_setup(1, announce("setup 1"));
            lifecycle.set_reporter(announce("report"));
            lifecycle.run_suite(|| {
                println!("suite body");
                ExitCode(7)
            });
        },
        Vec::<String>::new(),
    );

    assert_eq!(captured.exit_code(), Some(7), "output:\n{}", captured.output);
    assert_in_order(
        &captured.output,
        &["setup 0", "setup 1", "setup 3", "suite body", "report", "teardown first", "teardown second"],
    );
}

#[test]
fn passing_suite_exits_zero() {
    let captured = REEXEC.invoke_and_capture(
        &Context::background(),
        "passing_suite_exits_zero",
        || {
            Lifecycle::new().run_suite(|| true);
        },
        Vec::<String>::new(),
    );
    assert!(captured.success(), "{:?}\n{}", captured.result, captured.output);
}

#[test]
fn fatal_inside_suite_skips_the_rest_but_still_tears_down() {
    let captured = REEXEC.invoke_and_capture(
        &Context::background(),
        "fatal_inside_suite_skips_the_rest_but_still_tears_down",
        || {
            let lifecycle = Arc::new(Lifecycle::new());
            lifecycle.register_teardown(announce("cleanup"));
            lifecycle.set_reporter(announce("report"));
            let inner = lifecycle.clone();
            lifecycle.run_suite(move || -> ExitCode {
                inner.fatal("fixture failed to start");
            });
        },
        Vec::<String>::new(),
    );

    assert_eq!(captured.exit_code(), Some(1));
    assert_in_order(&captured.output, &["cleanup", "fixture failed to start"]);
    assert!(!captured.output.contains("report"), "reporter ran after fatal:\n{}", captured.output);
}

#[test]
fn setup_state_is_visible_to_the_runner() {
    let lifecycle = Lifecycle::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for slot in [6, 2, 4] {
        let seen = seen.clone();
        lifecycle.register_setup(slot, move || seen.lock().unwrap().push(slot));
    }

    let observed = seen.clone();
    let code = lifecycle.run_suite_code(move || observed.lock().unwrap().clone() == [2, 4, 6]);
    assert_eq!(code, ExitCode::SUCCESS);
}
