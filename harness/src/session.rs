//! Session controller: discovers test files, runs them strictly one at a
//! time, folds their outcomes and finalizes the reporter exactly once.

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::anyhow;
use tracing::{debug, info_span, instrument, warn};

use crate::core::command::{
    child_environment, display_name, record_name, select_command, wrap_with_coverage,
};
use crate::core::lifecycle::SessionState;
use crate::core::protocol::{Consumer, ConsumerEvent};
use crate::core::totals::Totals;
use crate::core::types::{Assertion, OutcomeRecord, RunOptions, TestFile};
use crate::exit_codes;
use crate::io::config::HarnessEnv;
use crate::io::discovery::{self, DiscoveryError};
use crate::io::process::{ChildExit, ChildObserver, ChildResolution, supervise};
use crate::io::report::{BailoutNotice, Reporter};

/// Everything a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub totals: Totals,
    /// Records in dispatch order.
    pub records: Vec<OutcomeRecord>,
    pub bailed_out: bool,
    /// Fatal discovery error, if one ended the session.
    pub error: Option<String>,
}

impl SessionSummary {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.error.is_some() {
            exit_codes::ERROR
        } else if self.bailed_out || !self.totals.ok {
            exit_codes::FAILED
        } else {
            exit_codes::OK
        }
    }
}

/// One run over the configured roots.
pub struct Session<R: Reporter> {
    options: RunOptions,
    env: HarnessEnv,
    reporter: R,
    state: SessionState,
    totals: Totals,
    records: Vec<OutcomeRecord>,
    error: Option<String>,
}

impl<R: Reporter> Session<R> {
    pub fn new(options: RunOptions, env: HarnessEnv, reporter: R) -> Self {
        Self {
            options,
            env,
            reporter,
            state: SessionState::default(),
            totals: Totals::default(),
            records: Vec::new(),
            error: None,
        }
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn into_reporter(self) -> R {
        self.reporter
    }

    /// Expand every root, run every discovered file in order, then finalize.
    #[instrument(skip_all, fields(roots = self.options.roots.len()))]
    pub fn run(&mut self) -> SessionSummary {
        match discovery::expand_roots(&self.options.roots, &self.env.cwd) {
            Ok(files) => {
                debug!(files = files.len(), "discovered files");
                let _ = self.run_files(&files, None);
            }
            Err(err) => self.fail_session(err),
        }
        self.finalize();
        SessionSummary {
            totals: self.totals.clone(),
            records: self.records.clone(),
            bailed_out: self.state.bailed_out(),
            error: self.error.clone(),
        }
    }

    fn finalize(&mut self) {
        if self.state.finalize() {
            self.reporter.finish(&self.totals);
        }
    }

    fn fail_session(&mut self, err: DiscoveryError) {
        let err = anyhow!(err);
        let message = format!("{err:#}");
        warn!(err = %message, "fatal discovery error");
        self.reporter.session_error(&err);
        self.error = Some(message);
    }

    fn run_files(&mut self, files: &[PathBuf], base: Option<&Path>) -> ControlFlow<()> {
        for path in files {
            if self.state.bailed_out() {
                return ControlFlow::Break(());
            }
            self.run_path(path, base)?;
        }
        ControlFlow::Continue(())
    }

    fn run_path(&mut self, path: &Path, base: Option<&Path>) -> ControlFlow<()> {
        let (base_dir, display) = display_name(path, base);
        let name = record_name(path, &self.env.cwd);
        let _span = info_span!("file", name = %name).entered();
        self.reporter.file_started(&display);

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(err = %err, "failed to stat");
                let error = format!("failed to stat {}: {err}", path.display());
                self.resolve_failure(OutcomeRecord::failure(name, error));
                return ControlFlow::Continue(());
            }
        };

        if metadata.is_dir() {
            return match discovery::list_dir(path) {
                Ok(entries) => self.run_files(&entries, Some(path)),
                Err(err) => {
                    let record = OutcomeRecord::failure(name, format!("{:#}", anyhow!(err)));
                    let message = record.error.clone().unwrap_or_default();
                    self.resolve_failure(record);
                    self.reporter.session_error(&anyhow!(message.clone()));
                    self.error = Some(message);
                    ControlFlow::Break(())
                }
            };
        }

        let selected = select_command(
            path,
            &display,
            self.options.gc,
            &self.env.interpreters,
            || is_executable(&metadata),
        );
        let Some((command, args)) = selected else {
            debug!("not executable, skipping");
            return ControlFlow::Continue(());
        };
        let (command, args) = match &self.env.coverage {
            Some(coverage) => wrap_with_coverage(coverage, &base_dir, &display),
            None => (command, args),
        };

        let file = TestFile {
            absolute_path: path.to_path_buf(),
            display_name: display,
            env: child_environment(self.env.vars.iter().cloned()),
            base_dir,
            command,
            args,
        };
        self.execute(&file, name);
        ControlFlow::Continue(())
    }

    /// Run one child to its single resolution.
    fn execute(&mut self, file: &TestFile, name: String) {
        let mut cmd = Command::new(&file.command);
        cmd.args(&file.args)
            .current_dir(&file.base_dir)
            .env_clear()
            .envs(&file.env);

        let mut observer = FileObserver {
            consumer: Consumer::new(),
            reporter: &mut self.reporter,
            totals: &mut self.totals,
            passthrough_stderr: self.options.stderr,
        };
        let resolution = supervise(cmd, self.options.timeout, &mut observer);
        let mut consumer = observer.consumer;
        debug!(
            planned = ?consumer.planned(),
            seen = consumer.totals().tests,
            "child output consumed"
        );

        match resolution {
            Ok(ChildResolution::Exited(exit)) => {
                let record = self.exit_record(file, name, &exit);
                if !exit.stderr.is_empty()
                    && consumer.totals().tests == 0
                    && consumer.totals().ok
                    && !self.options.stderr
                {
                    self.reporter.diagnostic(&exit.stderr);
                }
                consumer.totals_mut().add(&record);
                self.resolve(record, consumer.totals());
            }
            Ok(ChildResolution::BailedOut(bailout)) => {
                self.state.mark_bailed_out();
                self.reporter.bailout(&BailoutNotice {
                    name,
                    reason: bailout.reason,
                    stdout: bailout.stdout,
                    stderr: bailout.stderr,
                });
            }
            Err(err) => {
                let message = format!("failed to spawn {}: {err:#}", file.command);
                warn!(err = %message, "spawn failed");
                let mut record = OutcomeRecord::failure(name, message);
                record.command_line = file.command_line();
                consumer.totals_mut().add(&record);
                self.resolve(record, consumer.totals());
            }
        }
    }

    fn exit_record(&self, file: &TestFile, name: String, exit: &ChildExit) -> OutcomeRecord {
        OutcomeRecord {
            name,
            ok: !exit.timed_out && exit.code == Some(0),
            exit_code: exit.code,
            signal: exit.signal.clone(),
            timed_out: exit.timed_out.then_some(true),
            stderr_text: (!exit.stderr.is_empty()).then(|| exit.stderr.clone()),
            command_line: file.command_line(),
            error: None,
        }
    }

    /// Resolve a file that never produced a child; its per-file totals hold
    /// only this record.
    fn resolve_failure(&mut self, record: OutcomeRecord) {
        let mut file_totals = Totals::default();
        file_totals.add(&record);
        self.resolve(record, &file_totals);
    }

    /// Fold a record into the session and notify the reporter.
    fn resolve(&mut self, record: OutcomeRecord, file_totals: &Totals) {
        debug!(ok = record.ok, "file resolved");
        self.totals.add(&record);
        self.reporter.file_result(&record.name, &record, file_totals);
        self.records.push(record);
    }
}

/// Bridges one child's output into the consumer, the session totals and the
/// reporter.
struct FileObserver<'a, R: Reporter> {
    consumer: Consumer,
    reporter: &'a mut R,
    totals: &'a mut Totals,
    passthrough_stderr: bool,
}

impl<R: Reporter> FileObserver<'_, R> {
    fn forward(&mut self, assertion: &Assertion) {
        self.totals.add_assertion(assertion);
        self.reporter.assertion(assertion);
    }
}

impl<R: Reporter> ChildObserver for FileObserver<'_, R> {
    fn stdout_line(&mut self, line: &str) -> Option<String> {
        match self.consumer.feed(line)? {
            ConsumerEvent::Assertion(assertion) => {
                self.forward(&assertion);
                None
            }
            ConsumerEvent::Bailout(reason) => Some(reason),
        }
    }

    fn stderr_chunk(&mut self, chunk: &str) {
        if self.passthrough_stderr {
            self.reporter.diagnostic(chunk);
        }
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;

    use crate::core::command::{FileMode, Identity, is_executable_by};

    let identity = Identity {
        uid: nix::unistd::getuid().as_raw(),
        gid: nix::unistd::getgid().as_raw(),
    };
    let file = FileMode {
        mode: metadata.mode(),
        uid: metadata.uid(),
        gid: metadata.gid(),
    };
    is_executable_by(file, identity)
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}
