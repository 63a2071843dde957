//! Sample identifier sanitization.
//!
//! Raw identifiers inferred from file names may start with a digit or carry
//! punctuation that downstream tools reject in record labels. [`sanitize_id`]
//! rewrites them into `[A-Za-z0-9]` plus a filler string and keeps the
//! results unique through a [`NameCounter`] owned by the caller.

use std::collections::{HashMap, HashSet};

/// Word prepended to identifiers that start with a digit.
pub const DIGIT_PREFIX: &str = "Sample";

/// Duplicate-name accumulator for one sanitization run.
///
/// Results depend on the order in which identifiers are fed in, so callers
/// should process them in a stable order.
#[derive(Debug, Default, Clone)]
pub struct NameCounter {
    occurrences: HashMap<String, usize>,
    produced: HashSet<String>,
}

impl NameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names handed out so far.
    pub fn len(&self) -> usize {
        self.produced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.produced.is_empty()
    }

    fn claim(&mut self, base: String) -> String {
        let seen = self.occurrences.entry(base.clone()).or_insert(0);
        if *seen == 0 && !self.produced.contains(&base) {
            *seen = 1;
            self.produced.insert(base.clone());
            return base;
        }
        if *seen == 0 {
            *seen = 1;
        }
        loop {
            let candidate = format!("{base}{seen}");
            *seen += 1;
            if self.produced.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Rewrites `raw` into a safe identifier and registers it in `counter`.
///
/// The first occurrence of a base name is returned unchanged; later ones get
/// a numeric suffix starting at `1`.
pub fn sanitize_id(raw: &str, filler: &str, counter: &mut NameCounter) -> String {
    counter.claim(base_name(raw, filler))
}

/// The sanitized form of `raw` before duplicate handling.
pub fn base_name(raw: &str, filler: &str) -> String {
    let mut out = String::with_capacity(raw.len() + DIGIT_PREFIX.len() + filler.len());
    if raw.chars().next().is_some_and(|ch| ch.is_ascii_digit()) {
        out.push_str(DIGIT_PREFIX);
        out.push_str(filler);
    }
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else {
            out.push_str(filler);
        }
    }
    out
}
