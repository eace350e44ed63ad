//! Runs one child process under a timeout, streaming its output to an observer.
//!
//! stdout and stderr are drained by one reader thread each. Everything else
//! (lifecycle state, timer, observer callbacks, kill decisions) happens on the
//! calling thread, so the first-transition-wins guard in
//! [`ChildLifecycle`] is the only synchronization needed.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::lifecycle::{ChildLifecycle, Timer};

/// How long to keep reading after exit while a stream is still open.
pub const STREAM_GRACE: Duration = Duration::from_millis(500);
/// How long a terminated child gets before it is force-killed.
pub const KILL_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Receives child output on the supervising thread.
pub trait ChildObserver {
    /// One stdout line, newline included if present. Returning `Some(reason)`
    /// requests a bailout.
    fn stdout_line(&mut self, line: &str) -> Option<String>;

    /// A chunk of stderr as it arrives.
    fn stderr_chunk(&mut self, chunk: &str);
}

/// Natural (or timed-out) termination of a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

/// A child stopped because it emitted a fatal directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildBailout {
    pub reason: String,
    pub stdout: String,
    pub stderr: String,
}

/// How a supervised child was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildResolution {
    Exited(ChildExit),
    BailedOut(ChildBailout),
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
enum StreamEvent {
    Data(Stream, Vec<u8>),
    Closed(Stream),
}

/// Spawn `cmd` and supervise it until exactly one resolution.
///
/// Timeout sends a termination signal and the file still resolves through the
/// child's exit, marked as timed out. A bailout requested by the observer
/// kills the child and returns immediately without waiting for its streams.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
pub fn supervise<O: ChildObserver>(
    mut cmd: Command,
    timeout: Duration,
    observer: &mut O,
) -> Result<ChildResolution> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn child")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stdout_tx = tx.clone();
    thread::spawn(move || read_lines(stdout, stdout_tx));
    thread::spawn(move || read_chunks(stderr, tx));

    Supervision {
        child,
        lifecycle: ChildLifecycle::new(),
        timer: Timer::start(timeout),
        killed_at: None,
        stdout: Vec::new(),
        stderr: Vec::new(),
        open_streams: 2,
    }
    .run(&rx, observer)
}

struct Supervision {
    child: Child,
    lifecycle: ChildLifecycle,
    timer: Timer,
    killed_at: Option<Instant>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    open_streams: u8,
}

impl Supervision {
    fn run<O: ChildObserver>(
        mut self,
        rx: &Receiver<StreamEvent>,
        observer: &mut O,
    ) -> Result<ChildResolution> {
        let mut exited: Option<(ExitStatus, Instant)> = None;

        let status = loop {
            if self.timer.fire_if_due() && self.lifecycle.time_out() {
                warn!(pid = self.child.id(), "child timed out, terminating");
                self.terminate();
            }

            match exited {
                Some((status, at)) => {
                    if self.open_streams == 0 || at.elapsed() >= STREAM_GRACE {
                        break status;
                    }
                }
                None => {
                    if let Some(status) = self.child.try_wait().context("poll child")? {
                        debug!(exit_code = ?status.code(), "child exited");
                        self.timer.cancel();
                        exited = Some((status, Instant::now()));
                        continue;
                    }
                    self.escalate_kill();
                }
            }

            let wait = self
                .timer
                .remaining()
                .map_or(POLL_INTERVAL, |remaining| remaining.min(POLL_INTERVAL));

            if self.open_streams == 0 {
                // Both pipes closed but the child is still alive.
                if let Some(status) = self.child.wait_timeout(wait).context("wait for child")? {
                    self.timer.cancel();
                    exited = Some((status, Instant::now()));
                }
                continue;
            }

            match rx.recv_timeout(wait) {
                Ok(event) => {
                    if let Some(reason) = self.handle(event, observer) {
                        return Ok(self.bail_out(reason));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.open_streams = 0,
            }
        };

        // Output that raced the exit still belongs to this child.
        while let Ok(event) = rx.try_recv() {
            if let Some(reason) = self.handle(event, observer) {
                return Ok(self.bail_out(reason));
            }
        }

        let timed_out = self
            .lifecycle
            .complete()
            .ok_or_else(|| anyhow!("child already resolved"))?;
        debug!(exit_code = ?status.code(), timed_out, "child resolved");
        Ok(ChildResolution::Exited(ChildExit {
            code: status.code(),
            signal: signal_name(&status),
            timed_out,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }))
    }

    /// Apply one stream event. Returns a bailout reason if the child must stop.
    fn handle<O: ChildObserver>(&mut self, event: StreamEvent, observer: &mut O) -> Option<String> {
        match event {
            StreamEvent::Data(Stream::Stdout, bytes) => {
                self.stdout.extend_from_slice(&bytes);
                let reason = observer.stdout_line(&String::from_utf8_lossy(&bytes))?;
                self.lifecycle.bail_out().then_some(reason)
            }
            StreamEvent::Data(Stream::Stderr, bytes) => {
                self.stderr.extend_from_slice(&bytes);
                observer.stderr_chunk(&String::from_utf8_lossy(&bytes));
                None
            }
            StreamEvent::Closed(stream) => {
                debug!(?stream, "stream closed");
                self.open_streams = self.open_streams.saturating_sub(1);
                None
            }
        }
    }

    fn bail_out(mut self, reason: String) -> ChildResolution {
        warn!(pid = self.child.id(), reason = %reason, "bailout, killing child");
        self.timer.cancel();
        self.terminate();
        self.reap();
        ChildResolution::BailedOut(ChildBailout {
            reason,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        })
    }

    /// Send the termination signal if the child has not exited yet.
    fn terminate(&mut self) {
        if !matches!(self.child.try_wait(), Ok(None)) {
            return;
        }
        self.killed_at = Some(Instant::now());
        if let Err(err) = send_term(&mut self.child) {
            warn!(err = %err, "failed to signal child");
        }
    }

    /// Force-kill a terminated child that ignored the signal.
    fn escalate_kill(&mut self) {
        if let Some(at) = self.killed_at
            && at.elapsed() >= KILL_GRACE
        {
            warn!(pid = self.child.id(), "child ignored termination, killing");
            if let Err(err) = self.child.kill() {
                warn!(err = %err, "failed to kill child");
            }
            self.killed_at = None;
        }
    }

    /// Wait for a killed child so it does not linger as a zombie.
    fn reap(&mut self) {
        match self.child.wait_timeout(KILL_GRACE) {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(err) = self.child.kill().and_then(|()| self.child.wait().map(drop)) {
                    warn!(err = %err, "failed to reap child");
                }
            }
            Err(err) => warn!(err = %err, "failed to wait for child"),
        }
    }
}

#[cfg(unix)]
fn send_term(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).context("child pid out of range")?;
    signal::kill(Pid::from_raw(pid), Signal::SIGTERM).context("send SIGTERM")?;
    Ok(())
}

#[cfg(not(unix))]
fn send_term(child: &mut Child) -> Result<()> {
    child.kill().context("kill child")
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    let raw = status.signal()?;
    Some(
        nix::sys::signal::Signal::try_from(raw)
            .map(|signal| signal.as_str().to_string())
            .unwrap_or_else(|_| format!("signal {raw}")),
    )
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

/// Forward stdout line by line so the observer sees whole protocol lines.
fn read_lines<R: Read>(reader: R, tx: Sender<StreamEvent>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(StreamEvent::Data(Stream::Stdout, line)).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(err = %err, "failed to read child stdout");
                break;
            }
        }
    }
    let _ = tx.send(StreamEvent::Closed(Stream::Stdout));
}

/// Forward stderr in chunks as they arrive.
fn read_chunks<R: Read>(mut reader: R, tx: Sender<StreamEvent>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if tx
                    .send(StreamEvent::Data(Stream::Stderr, chunk[..n].to_vec()))
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                warn!(err = %err, "failed to read child stderr");
                break;
            }
        }
    }
    let _ = tx.send(StreamEvent::Closed(Stream::Stderr));
}
