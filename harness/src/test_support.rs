//! Test-only helpers: shell-script fixtures and a reporter that records
//! every notification.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::totals::Totals;
use crate::core::types::{Assertion, OutcomeRecord};
use crate::io::report::{BailoutNotice, Reporter};

/// One captured reporter notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    FileStarted(String),
    Assertion(Assertion),
    FileResult {
        name: String,
        record: OutcomeRecord,
        totals: Totals,
    },
    Diagnostic(String),
    Bailout(BailoutNotice),
    SessionError(String),
    Finish(Totals),
}

/// Reporter that keeps notifications in arrival order.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub events: Vec<Event>,
}

impl RecordingReporter {
    /// Records carried by `FileResult` events, in order.
    pub fn records(&self) -> Vec<&OutcomeRecord> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::FileResult { record, .. } => Some(record),
                _ => None,
            })
            .collect()
    }

    /// All diagnostic text, concatenated.
    pub fn diagnostics(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Diagnostic(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn finish_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, Event::Finish(_)))
            .count()
    }
}

impl Reporter for RecordingReporter {
    fn file_started(&mut self, display_name: &str) {
        self.events.push(Event::FileStarted(display_name.to_string()));
    }

    fn assertion(&mut self, assertion: &Assertion) {
        self.events.push(Event::Assertion(assertion.clone()));
    }

    fn file_result(&mut self, name: &str, record: &OutcomeRecord, totals: &Totals) {
        self.events.push(Event::FileResult {
            name: name.to_string(),
            record: record.clone(),
            totals: totals.clone(),
        });
    }

    fn diagnostic(&mut self, text: &str) {
        self.events.push(Event::Diagnostic(text.to_string()));
    }

    fn bailout(&mut self, notice: &BailoutNotice) {
        self.events.push(Event::Bailout(notice.clone()));
    }

    fn session_error(&mut self, error: &anyhow::Error) {
        self.events.push(Event::SessionError(format!("{error:#}")));
    }

    fn finish(&mut self, totals: &Totals) {
        self.events.push(Event::Finish(totals.clone()));
    }
}

/// Write a `#!/bin/sh` script at `dir/name` with the given mode.
#[cfg(unix)]
pub fn write_script_with_mode(dir: &Path, name: &str, body: &str, mode: u32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create script dir");
    }
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod script");
    path
}

/// Write an executable `#!/bin/sh` script at `dir/name`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    write_script_with_mode(dir, name, body, 0o755)
}

/// Write a plain file at `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create file dir");
    }
    fs::write(&path, contents).expect("write file");
    path
}
