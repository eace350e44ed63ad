//! Report producer: the observer contract the session notifies, plus a TAP
//! renderer for it.

use std::io::Write;

use serde_json::Value;
use tracing::warn;

use crate::core::totals::Totals;
use crate::core::types::{Assertion, Directive, OutcomeRecord};

/// Output of a child that emitted a fatal directive, flushed on bailout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BailoutNotice {
    /// File path relative to the working directory.
    pub name: String,
    pub reason: String,
    pub stdout: String,
    pub stderr: String,
}

/// Receives session notifications in dispatch order.
pub trait Reporter {
    /// A file is about to be stat'ed.
    fn file_started(&mut self, display_name: &str);
    /// A parsed assertion from the running child.
    fn assertion(&mut self, assertion: &Assertion);
    /// A file resolved. `totals` are the per-file totals including `record`.
    fn file_result(&mut self, name: &str, record: &OutcomeRecord, totals: &Totals);
    /// Text for the session's diagnostic stream.
    fn diagnostic(&mut self, text: &str);
    fn bailout(&mut self, notice: &BailoutNotice);
    /// Fatal discovery failure.
    fn session_error(&mut self, error: &anyhow::Error);
    /// End of session. Called exactly once.
    fn finish(&mut self, totals: &Totals);
}

/// Renders TAP to `out`, diagnostics to `err`.
pub struct TapReporter<W: Write, E: Write> {
    out: W,
    err: E,
    diag: bool,
    count: u32,
}

impl TapReporter<std::io::Stdout, std::io::Stderr> {
    pub fn stdio(diag: bool) -> Self {
        Self::new(std::io::stdout(), std::io::stderr(), diag)
    }
}

impl<W: Write, E: Write> TapReporter<W, E> {
    pub fn new(out: W, err: E, diag: bool) -> Self {
        Self {
            out,
            err,
            diag,
            count: 0,
        }
    }

    pub fn into_inner(self) -> (W, E) {
        (self.out, self.err)
    }

    fn emit(&mut self, text: &str) {
        if let Err(err) = self.out.write_all(text.as_bytes()).and_then(|()| self.out.flush()) {
            warn!(err = %err, "failed to write report");
        }
    }

    fn emit_err(&mut self, text: &str) {
        if let Err(err) = self.err.write_all(text.as_bytes()).and_then(|()| self.err.flush()) {
            warn!(err = %err, "failed to write diagnostics");
        }
    }

    fn test_point(&mut self, ok: bool, name: &str, directive: Option<&Directive>) -> String {
        self.count += 1;
        let mut line = format!("{}ok {}", if ok { "" } else { "not " }, self.count);
        if !name.is_empty() {
            line.push(' ');
            line.push_str(&name.replace('#', "\\#"));
        }
        match directive {
            Some(Directive::Skip(reason)) => push_directive(&mut line, "SKIP", reason),
            Some(Directive::Todo(reason)) => push_directive(&mut line, "TODO", reason),
            None => {}
        }
        line.push('\n');
        line
    }
}

fn push_directive(line: &mut String, keyword: &str, reason: &str) {
    line.push_str(" # ");
    line.push_str(keyword);
    if !reason.is_empty() {
        line.push(' ');
        line.push_str(reason);
    }
}

/// Render a record's diagnostic fields as an indented YAML block.
///
/// Keys appear in a fixed order: exit, signal, timedOut, stderr, command,
/// error. Absent fields are omitted.
fn yaml_block(record: &OutcomeRecord) -> String {
    let mut block = String::from("  ---\n");
    if let Some(code) = record.exit_code {
        block.push_str(&format!("    exit: {code}\n"));
    }
    if let Some(signal) = &record.signal {
        push_text(&mut block, "signal", signal);
    }
    if let Some(timed_out) = record.timed_out {
        block.push_str(&format!("    timedOut: {timed_out}\n"));
    }
    if let Some(stderr) = &record.stderr_text {
        push_text(&mut block, "stderr", stderr);
    }
    if !record.command_line.is_empty() {
        push_text(&mut block, "command", &record.command_line);
    }
    if let Some(error) = &record.error {
        push_text(&mut block, "error", error);
    }
    block.push_str("  ...\n");
    block
}

/// Multiline text becomes a literal block; anything else a quoted scalar.
fn push_text(block: &mut String, key: &str, text: &str) {
    if text.contains('\n') {
        block.push_str(&format!("    {key}: |\n"));
        for line in text.trim_end_matches('\n').lines() {
            block.push_str(&format!("      {line}\n"));
        }
    } else {
        let quoted = Value::String(text.to_string());
        block.push_str(&format!("    {key}: {quoted}\n"));
    }
}

impl<W: Write, E: Write> Reporter for TapReporter<W, E> {
    fn file_started(&mut self, display_name: &str) {
        self.emit(&format!("# {display_name}\n"));
    }

    fn assertion(&mut self, assertion: &Assertion) {
        let line = self.test_point(assertion.ok, &assertion.name, assertion.directive.as_ref());
        self.emit(&line);
    }

    fn file_result(&mut self, name: &str, record: &OutcomeRecord, _totals: &Totals) {
        let mut text = self.test_point(record.ok, name, None);
        if !record.ok || self.diag {
            text.push_str(&yaml_block(record));
        }
        text.push('\n');
        self.emit(&text);
    }

    fn diagnostic(&mut self, text: &str) {
        self.emit_err(text);
    }

    fn bailout(&mut self, notice: &BailoutNotice) {
        self.emit(&format!("# {}\n", notice.name));
        self.emit_err(&notice.stderr);
        let mut text = notice.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        // The child's own directive is usually already in the flushed output.
        if !text.lines().any(|line| line.starts_with("Bail out!")) {
            text.push_str("Bail out!");
            if !notice.reason.is_empty() {
                text.push(' ');
                text.push_str(&notice.reason);
            }
            text.push('\n');
        }
        self.emit(&text);
    }

    fn session_error(&mut self, error: &anyhow::Error) {
        self.emit_err(&format!("{error:#}\n"));
    }

    fn finish(&mut self, totals: &Totals) {
        let mut text = format!("\n1..{}\n", self.count);
        text.push_str(&format!("# tests {}\n", totals.tests));
        text.push_str(&format!("# pass  {}\n", totals.pass));
        if totals.fail > 0 {
            text.push_str(&format!("# fail  {}\n", totals.fail));
        }
        if totals.skip > 0 {
            text.push_str(&format!("# skip  {}\n", totals.skip));
        }
        if totals.todo > 0 {
            text.push_str(&format!("# todo  {}\n", totals.todo));
        }
        text.push_str(if totals.ok { "\n# ok\n" } else { "\n# not ok\n" });
        self.emit(&text);
    }
}
