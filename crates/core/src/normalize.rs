//! Text normalization: ordered regex rewrite rules and repeated-character limiting.

use std::borrow::Cow;

use regex::Regex;

use crate::error::{Error, Result};

/// A compiled `(pattern, replacement)` rewrite rule.
///
/// The replacement uses the `regex` crate's expansion syntax (`$1`, `${name}`).
#[derive(Debug, Clone)]
pub struct ReplaceRule {
    pattern: Regex,
    replacement: String,
}

impl ReplaceRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let compiled = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: compiled,
            replacement: replacement.into(),
        })
    }

    /// Compile an ordered list of rules from `(pattern, replacement)` pairs.
    pub fn from_pairs<I, P, R>(pairs: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = (P, R)>,
        P: AsRef<str>,
        R: Into<String>,
    {
        pairs
            .into_iter()
            .map(|(pattern, replacement)| Self::new(pattern.as_ref(), replacement))
            .collect()
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Replace every match of the pattern in `text`.
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(text, self.replacement.as_str())
    }
}

/// Truncate runs of an identical character.
///
/// A run of at least `min_run_before_limiting` characters is cut down to
/// `min_run_before_limiting - 1 + max_repeats`; shorter runs are kept. Newline runs
/// are never touched. Either parameter being zero disables limiting.
pub fn limit_repeats(text: &str, max_repeats: usize, min_run_before_limiting: usize) -> String {
    if max_repeats == 0 || min_run_before_limiting == 0 {
        return text.to_string();
    }

    let cap = (min_run_before_limiting - 1).saturating_add(max_repeats);
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&ch) {
            chars.next();
            run += 1;
        }

        let keep = if ch != '\n' && run >= min_run_before_limiting {
            run.min(cap)
        } else {
            run
        };
        out.extend(std::iter::repeat(ch).take(keep));
    }

    out
}

/// Apply `rules` in order (each sees the previous rule's output), then limit repeats.
pub fn normalize(
    text: &str,
    rules: &[ReplaceRule],
    max_repeats: usize,
    min_run_before_limiting: usize,
) -> String {
    let mut out = text.to_string();
    for rule in rules {
        out = rule.apply(&out).into_owned();
    }

    if max_repeats > 0 && min_run_before_limiting > 0 && !out.is_empty() {
        out = limit_repeats(&out, max_repeats, min_run_before_limiting);
    }

    out
}
