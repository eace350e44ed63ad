//! End-to-end session runs against shell-script fixtures.
//!
//! Each test lays out scripts in a temp directory, runs a full session with
//! that directory as the working directory, and inspects the summary and the
//! recorded reporter notifications.

#![cfg(unix)]

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tap_harness::core::command::{Coverage, Interpreters};
use tap_harness::core::types::RunOptions;
use tap_harness::exit_codes;
use tap_harness::io::config::HarnessEnv;
use tap_harness::io::report::TapReporter;
use tap_harness::session::{Session, SessionSummary};
use tap_harness::test_support::{
    Event, RecordingReporter, write_file, write_script, write_script_with_mode,
};

fn harness_env(cwd: &Path) -> HarnessEnv {
    HarnessEnv {
        cwd: cwd.to_path_buf(),
        vars: std::env::vars_os().collect(),
        interpreters: Interpreters::default(),
        coverage: None,
    }
}

fn options(roots: &[&str]) -> RunOptions {
    RunOptions {
        roots: roots.iter().map(|root| (*root).to_string()).collect(),
        ..RunOptions::default()
    }
}

fn run(options: RunOptions, env: HarnessEnv) -> (SessionSummary, RecordingReporter) {
    let mut session = Session::new(options, env, RecordingReporter::default());
    let summary = session.run();
    (summary, session.into_reporter())
}

fn names(summary: &SessionSummary) -> Vec<&str> {
    summary.records.iter().map(|record| record.name.as_str()).collect()
}

#[test]
fn directory_runs_children_in_order_and_fails_on_nonzero_exit() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "t/a", "echo 'ok 1 - works'\nexit 0");
    write_script(temp.path(), "t/b", "exit 1");

    let (summary, reporter) = run(options(&["t"]), harness_env(temp.path()));

    assert_eq!(names(&summary), vec!["t/a", "t/b"]);
    assert!(summary.records[0].ok);
    assert!(!summary.records[1].ok);
    assert_eq!(summary.records[1].exit_code, Some(1));
    assert!(!summary.totals.ok);
    assert_eq!(summary.exit_code(), exit_codes::FAILED);

    assert_eq!(reporter.events[0], Event::FileStarted("t".to_string()));
    assert_eq!(reporter.events[1], Event::FileStarted("a".to_string()));
    assert!(matches!(&reporter.events[2], Event::Assertion(a) if a.name == "works"));
    assert_eq!(reporter.finish_count(), 1);
}

#[test]
fn non_executable_file_produces_no_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script_with_mode(temp.path(), "plain", "exit 0", 0o644);

    let (summary, reporter) = run(options(&["plain"]), harness_env(temp.path()));

    assert!(summary.records.is_empty());
    assert!(summary.totals.ok);
    assert!(reporter.records().is_empty());
}

#[test]
fn bailout_kills_child_and_halts_dispatch() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "t/a",
        "echo 'ok 1 - before'\necho 'Bail out! database down'\nexec sleep 30",
    );
    write_script(temp.path(), "t/b", "exit 0");
    write_script(temp.path(), "z", "exit 0");

    let started = Instant::now();
    let (summary, reporter) = run(options(&["t", "z"]), harness_env(temp.path()));

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(summary.records.is_empty());
    assert!(summary.bailed_out);
    assert_eq!(summary.exit_code(), exit_codes::FAILED);

    let notice = reporter
        .events
        .iter()
        .find_map(|event| match event {
            Event::Bailout(notice) => Some(notice),
            _ => None,
        })
        .expect("bailout notice");
    assert_eq!(notice.name, "t/a");
    assert_eq!(notice.reason, "database down");
    assert!(notice.stdout.contains("ok 1 - before"));
    assert!(
        !reporter
            .events
            .iter()
            .any(|event| matches!(event, Event::FileStarted(name) if name == "b" || name == "z"))
    );
    assert_eq!(reporter.finish_count(), 1);
}

#[test]
fn timed_out_child_is_a_failing_record_and_next_file_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "t/a", "exec sleep 30");
    write_script(temp.path(), "t/b", "exit 0");

    let options = RunOptions {
        timeout: Duration::from_millis(300),
        ..options(&["t"])
    };
    let (summary, _) = run(options, harness_env(temp.path()));

    assert_eq!(names(&summary), vec!["t/a", "t/b"]);
    let timed_out = &summary.records[0];
    assert_eq!(timed_out.timed_out, Some(true));
    assert!(!timed_out.ok);
    assert_eq!(timed_out.signal.as_deref(), Some("SIGTERM"));
    assert!(summary.records[1].ok);
}

#[test]
fn empty_directory_completes_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(temp.path().join("empty")).expect("mkdir");

    let (summary, reporter) = run(options(&["empty"]), harness_env(temp.path()));

    assert!(summary.records.is_empty());
    assert!(summary.totals.ok);
    assert_eq!(summary.exit_code(), exit_codes::OK);
    assert_eq!(reporter.finish_count(), 1);
}

#[test]
fn dotfiles_are_skipped_and_nested_dirs_sorted() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "t/b", "exit 0");
    write_script(temp.path(), "t/a", "exit 0");
    write_script(temp.path(), "t/.hidden", "exit 1");
    write_script(temp.path(), "t/sub/c", "exit 0");
    write_script(temp.path(), "t/A", "exit 0");

    let (summary, reporter) = run(options(&["t"]), harness_env(temp.path()));

    assert_eq!(names(&summary), vec!["t/A", "t/a", "t/b", "t/sub/c"]);
    assert!(summary.totals.ok);
    assert!(reporter.events.contains(&Event::FileStarted("sub".to_string())));
    assert!(reporter.events.contains(&Event::FileStarted("c".to_string())));
    assert!(!reporter.events.contains(&Event::FileStarted("sub/c".to_string())));
}

#[test]
fn glob_roots_keep_caller_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "t/one", "exit 0");
    write_script(temp.path(), "t/two", "exit 0");
    write_script(temp.path(), "first", "exit 0");

    let (summary, _) = run(options(&["first", "t/*"]), harness_env(temp.path()));

    assert_eq!(names(&summary), vec!["first", "t/one", "t/two"]);
}

#[test]
fn children_see_marker_and_run_in_their_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_file(temp.path(), "t/fixture.txt", "data");
    write_script(
        temp.path(),
        "t/check",
        "[ \"$TAP\" = \"1\" ] || exit 2\n[ -f fixture.txt ] || exit 3\nexit 0",
    );

    let (summary, _) = run(options(&["t/check"]), harness_env(temp.path()));

    assert_eq!(summary.records.len(), 1);
    assert!(summary.records[0].ok, "record: {:?}", summary.records[0]);
}

#[test]
fn non_utf8_variables_reach_the_child() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "latin",
        "[ \"$LATIN\" = \"$(printf 'caf\\351')\" ] || exit 4\nexit 0",
    );

    let mut env = harness_env(temp.path());
    env.vars.push((
        OsString::from("LATIN"),
        OsString::from_vec(b"caf\xe9".to_vec()),
    ));
    let (summary, _) = run(options(&["latin"]), env);

    assert_eq!(summary.records.len(), 1);
    assert!(summary.records[0].ok, "record: {:?}", summary.records[0]);
}

#[test]
fn stderr_is_surfaced_when_no_assertions_were_seen() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "broken", "echo 'syntax error' >&2\nexit 1");

    let (summary, reporter) = run(options(&["broken"]), harness_env(temp.path()));

    assert_eq!(reporter.diagnostics(), "syntax error\n");
    assert_eq!(
        summary.records[0].stderr_text.as_deref(),
        Some("syntax error\n")
    );
}

#[test]
fn stderr_is_not_surfaced_after_assertions() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "noisy", "echo 'ok 1'\necho 'warning' >&2\nexit 0");

    let (summary, reporter) = run(options(&["noisy"]), harness_env(temp.path()));

    assert!(reporter.diagnostics().is_empty());
    assert!(summary.records[0].ok);
}

#[test]
fn stderr_passthrough_forwards_live() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "chatty", "echo 'hello' >&2\nexit 0");

    let options = RunOptions {
        stderr: true,
        ..options(&["chatty"])
    };
    let (_, reporter) = run(options, harness_env(temp.path()));

    assert_eq!(reporter.diagnostics(), "hello\n");
}

#[test]
fn assertions_fold_into_session_totals() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "mixed",
        concat!(
            "echo 'ok 1 - fine'\n",
            "echo 'not ok 2 - later # TODO soon'\n",
            "echo 'ok 3 # SKIP offline'\n",
            "exit 0",
        ),
    );

    let (summary, reporter) = run(options(&["mixed"]), harness_env(temp.path()));

    assert!(summary.totals.ok);
    assert_eq!(summary.totals.tests, 4);
    assert_eq!(summary.totals.todo, 1);
    assert_eq!(summary.totals.skip, 1);

    let file_totals = reporter
        .events
        .iter()
        .find_map(|event| match event {
            Event::FileResult { totals, .. } => Some(totals.clone()),
            _ => None,
        })
        .expect("file result");
    assert_eq!(file_totals.tests, 4);
}

fn echo_interpreter(dir: &Path) -> PathBuf {
    write_script(dir, "bin/echo-args", "echo \"ok 1 - $*\"")
}

#[test]
fn scripts_run_under_configured_runtime_with_gc_flag() {
    let temp = tempfile::tempdir().expect("tempdir");
    let runtime = echo_interpreter(temp.path());
    write_file(temp.path(), "t/a.js", "");

    let mut env = harness_env(temp.path());
    env.interpreters.node = runtime.to_string_lossy().into_owned();
    let options = RunOptions {
        gc: true,
        ..options(&["t/a.js"])
    };
    let (summary, reporter) = run(options, env);

    assert!(summary.records[0].ok);
    assert!(summary.records[0].command_line.ends_with(r#""--expose-gc" "a.js""#));
    assert!(
        reporter
            .events
            .iter()
            .any(|event| matches!(event, Event::Assertion(a) if a.name == "--expose-gc a.js"))
    );
}

#[test]
fn coverage_rewrites_the_invocation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tool = echo_interpreter(temp.path());
    write_file(temp.path(), "t/a.js", "");

    let mut env = harness_env(temp.path());
    env.coverage = Some(Coverage {
        tool: tool.to_string_lossy().into_owned(),
        entry: PathBuf::from("/opt/tap-harness"),
    });
    let (summary, reporter) = run(options(&["t/a.js"]), env);

    assert!(summary.records[0].ok);
    let expected = format!("run /opt/tap-harness {}", temp.path().join("t/a.js").display());
    assert!(
        reporter
            .events
            .iter()
            .any(|event| matches!(event, Event::Assertion(a) if a.name == expected))
    );
}

#[test]
fn missing_interpreter_is_a_failing_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_file(temp.path(), "a.coffee", "");
    write_script(temp.path(), "b", "exit 0");

    let mut env = harness_env(temp.path());
    env.interpreters.coffee = "/definitely/not/coffee".to_string();
    let (summary, _) = run(options(&["a.coffee", "b"]), env);

    assert_eq!(names(&summary), vec!["a.coffee", "b"]);
    let failed = &summary.records[0];
    assert!(!failed.ok);
    assert!(
        failed
            .error
            .as_deref()
            .is_some_and(|error| error.starts_with("failed to spawn /definitely/not/coffee"))
    );
    assert!(summary.records[1].ok);
}

#[test]
fn tap_report_is_renumbered_and_summarized() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "t/a", "echo 'ok 1 - first'\necho 'ok 2 - second'");
    write_script(temp.path(), "t/b", "echo 'not ok 1 - broken'\nexit 1");

    let reporter = TapReporter::new(Vec::new(), Vec::new(), false);
    let mut session = Session::new(options(&["t"]), harness_env(temp.path()), reporter);
    let summary = session.run();
    let (out, _) = session.into_reporter().into_inner();
    let out = String::from_utf8(out).expect("utf8");

    assert!(!summary.totals.ok);
    assert!(out.contains("# t\n# a\nok 1 first\nok 2 second\nok 3 t/a\n"));
    assert!(out.contains("not ok 4 broken\n"));
    assert!(out.contains("not ok 5 t/b\n  ---\n    exit: 1\n"));
    assert!(out.contains("\n1..5\n# tests 5\n# pass  3\n# fail  2\n"));
    assert!(out.ends_with("# not ok\n"));
}
