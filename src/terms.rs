//! Term/location matcher over cleaned text.
//!
//! Each list is split into single-token entries, matched on word boundaries, and
//! multi-token entries (containing a space), matched as plain substrings. A text
//! matches when it hits at least one entry of list A or B *and* at least one of list C.
//! Everything is compared lowercased.

use crate::clean::truncate_chars;
use ahash::AHashSet;
use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

/// Compiled size cap for one bounded term; list entries come from operator files.
const TERM_REGEX_SIZE_LIMIT: usize = 1 << 20;

fn word_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("word regex"))
}

fn all_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+$").expect("word regex"))
}

/// One entry per line, trimmed; blank lines and `#` comments skipped. Case is kept.
pub fn load_list(path: &Path) -> Result<Vec<String>> {
    let f = File::open(path).with_context(|| format!("open term list {}", path.display()))?;
    let mut out = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line.with_context(|| format!("read term list {}", path.display()))?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        out.push(t.to_string());
    }
    Ok(out)
}

/// [`load_list`], lowercased.
pub fn load_term_list(path: &Path) -> Result<Vec<String>> {
    Ok(load_list(path)?.into_iter().map(|t| t.to_lowercase()).collect())
}

#[derive(Clone, Debug)]
enum Single {
    /// Only word characters: equivalent to being one maximal `\w+` run, so a set lookup suffices.
    Token(String),
    /// Contains non-word characters (`e-mail`, `lgbt+`): needs the real `\b…\b` search.
    Bounded(String, Regex),
}

#[derive(Clone, Debug, Default)]
pub struct TermList {
    singles: Vec<Single>,
    multis: Vec<String>,
}

impl TermList {
    pub fn new<I, S>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = TermList::default();
        for raw in terms {
            let t = raw.as_ref().trim().to_lowercase();
            if t.is_empty() {
                continue;
            }
            if t.contains(' ') {
                list.multis.push(t);
            } else if all_word().is_match(&t) {
                list.singles.push(Single::Token(t));
            } else {
                let re = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&t)))
                    .size_limit(TERM_REGEX_SIZE_LIMIT)
                    .build()
                    .with_context(|| format!("term {:?}", truncate_chars(&t, 40)))?;
                list.singles.push(Single::Bounded(t, re));
            }
        }
        Ok(list)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::new(load_term_list(path)?).with_context(|| format!("term list {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.singles.len() + self.multis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single-token hits (list order) followed by multi-token hits (list order).
    fn hits(&self, lower: &str, tokens: &AHashSet<&str>) -> Vec<String> {
        let mut out = Vec::new();
        for s in &self.singles {
            match s {
                Single::Token(t) if tokens.contains(t.as_str()) => out.push(t.clone()),
                Single::Bounded(t, re) if re.is_match(lower) => out.push(t.clone()),
                _ => {}
            }
        }
        out.extend(self.multis.iter().filter(|m| lower.contains(m.as_str())).cloned());
        out
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    /// Hits from list A followed by hits from list B.
    pub terms: Vec<String>,
    /// Hits from list C.
    pub locations: Vec<String>,
    pub a_hit: bool,
    pub b_hit: bool,
}

/// Stateless matcher over three lists. In the dump stage A = identity terms,
/// B = hate terms, C = locations.
#[derive(Clone, Debug, Default)]
pub struct TermMatcher {
    a: TermList,
    b: TermList,
    c: TermList,
}

impl TermMatcher {
    pub fn new(a: TermList, b: TermList, c: TermList) -> Self {
        Self { a, b, c }
    }

    pub fn from_lists<S: AsRef<str>>(a: &[S], b: &[S], c: &[S]) -> Result<Self> {
        Ok(Self::new(TermList::new(a)?, TermList::new(b)?, TermList::new(c)?))
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.b.is_empty() && self.c.is_empty()
    }

    pub fn check(&self, text: &str) -> MatchResult {
        let lower = text.to_lowercase();
        let tokens: AHashSet<&str> = word_run().find_iter(&lower).map(|m| m.as_str()).collect();

        let a_hits = self.a.hits(&lower, &tokens);
        let b_hits = self.b.hits(&lower, &tokens);
        let locations = self.c.hits(&lower, &tokens);

        let a_hit = !a_hits.is_empty();
        let b_hit = !b_hits.is_empty();
        let mut terms = a_hits;
        terms.extend(b_hits);
        MatchResult {
            matched: !terms.is_empty() && !locations.is_empty(),
            terms,
            locations,
            a_hit,
            b_hit,
        }
    }
}
