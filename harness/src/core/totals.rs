//! Running pass/fail counts.

use serde::Serialize;

use crate::core::types::{Assertion, Directive, OutcomeRecord};

/// Aggregate counts over assertions and file records.
///
/// `ok` is the logical AND of everything folded so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub tests: u32,
    pub pass: u32,
    pub fail: u32,
    pub skip: u32,
    pub todo: u32,
    pub ok: bool,
}

impl Default for Totals {
    fn default() -> Self {
        Self {
            tests: 0,
            pass: 0,
            fail: 0,
            skip: 0,
            todo: 0,
            ok: true,
        }
    }
}

impl Totals {
    /// Fold a file-level outcome.
    pub fn add(&mut self, record: &OutcomeRecord) {
        self.count(record.ok);
    }

    /// Fold a line-level assertion.
    pub fn add_assertion(&mut self, assertion: &Assertion) {
        match assertion.directive {
            Some(Directive::Skip(_)) => self.skip += 1,
            Some(Directive::Todo(_)) => self.todo += 1,
            None => {}
        }
        self.count(assertion.passes());
    }

    fn count(&mut self, ok: bool) {
        self.tests += 1;
        if ok {
            self.pass += 1;
        } else {
            self.fail += 1;
            self.ok = false;
        }
    }
}
