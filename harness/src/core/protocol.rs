//! Streaming consumer for the line protocol (TAP) emitted by test files.
//!
//! The consumer is fed one stdout line at a time and never fails: anything it
//! does not recognize is ignored. It keeps per-file totals.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::totals::Totals;
use crate::core::types::{Assertion, Directive};

static RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(not )?ok(?:\s+(\d+))?(?:\s+-)?(?:\s+(.*?))?\s*$").unwrap()
});
static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.*?)\s*#\s*(skip|todo)\b\s*(.*)$").unwrap());
static PLAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^1\.\.(\d+)").unwrap());
static BAILOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Bail out!\s*(.*?)\s*$").unwrap());

/// Something the consumer observed on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Assertion(Assertion),
    /// Fatal directive; carries the reason (possibly empty).
    Bailout(String),
}

/// Per-child protocol consumer.
#[derive(Debug, Default)]
pub struct Consumer {
    totals: Totals,
    planned: Option<u32>,
    bailed_out: bool,
}

impl Consumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn totals_mut(&mut self) -> &mut Totals {
        &mut self.totals
    }

    pub fn planned(&self) -> Option<u32> {
        self.planned
    }

    /// Consume one line (with or without its trailing newline).
    pub fn feed(&mut self, line: &str) -> Option<ConsumerEvent> {
        if self.bailed_out {
            return None;
        }
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(caps) = BAILOUT_RE.captures(line) {
            self.bailed_out = true;
            let reason = caps.get(1).map_or("", |m| m.as_str());
            return Some(ConsumerEvent::Bailout(reason.to_string()));
        }
        if let Some(caps) = PLAN_RE.captures(line) {
            self.planned = caps[1].parse().ok();
            return None;
        }
        let assertion = parse_result(line)?;
        self.totals.add_assertion(&assertion);
        Some(ConsumerEvent::Assertion(assertion))
    }
}

fn parse_result(line: &str) -> Option<Assertion> {
    let caps = RESULT_RE.captures(line)?;
    let ok = caps.get(1).is_none();
    let id = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let rest = caps.get(3).map_or("", |m| m.as_str());

    let (name, directive) = match DIRECTIVE_RE.captures(rest) {
        Some(d) => {
            let reason = d[3].to_string();
            let directive = if d[2].eq_ignore_ascii_case("skip") {
                Directive::Skip(reason)
            } else {
                Directive::Todo(reason)
            };
            (d[1].to_string(), Some(directive))
        }
        None => (rest.to_string(), None),
    };

    Some(Assertion {
        id,
        ok,
        name,
        directive,
    })
}
