//! Record framing and per-format filtering/cleaning.
//!
//! A [`RecordReader`] turns decoded lines into container records and numbers
//! them: one physical line per record for JSONL, one logical CSV record (lines
//! joined while a quoted field is open) for tables, header excluded. Every
//! record counts toward the offset, whatever [`RecordFormat::classify`] later
//! decides about it, so "skip the first N records" is always a valid resume.

use crate::clean::{clean_text, fold_ascii, is_blank_line, is_effectively_blank, truncate_chars};
use crate::config::{normalize_subreddit, AnnotateOptions};
use crate::decoder::LineDecoder;
use crate::error::ItemError;
use crate::terms::{load_list, TermList, TermMatcher};
use ahash::AHashSet;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::VecDeque;
use std::io;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    Lines,
    CsvQuoted,
}

/// Numbered record stream over a [`LineDecoder`].
pub struct RecordReader {
    lines: LineDecoder,
    framing: Framing,
    position: u64,
    // lines handed back after an unterminated quote, read before the decoder
    pending: VecDeque<String>,
}

impl RecordReader {
    pub fn new(lines: LineDecoder, framing: Framing) -> Self {
        Self { lines, framing, position: 0, pending: VecDeque::new() }
    }

    /// Ordinal of the last record handed out.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read one record without numbering it (CSV header).
    pub fn read_preamble(&mut self) -> io::Result<Option<String>> {
        self.next_raw().transpose()
    }

    fn next_line(&mut self) -> Option<io::Result<String>> {
        if let Some(line) = self.pending.pop_front() {
            return Some(Ok(line));
        }
        Some(self.lines.next()?.map(|(_, l)| l))
    }

    fn next_raw(&mut self) -> Option<io::Result<String>> {
        let first = match self.next_line()? {
            Ok(l) => l,
            Err(e) => return Some(Err(e)),
        };
        if self.framing == Framing::Lines {
            return Some(Ok(first));
        }
        let mut state = QuoteState::FieldStart.scan(&first);
        if state != QuoteState::Quoted {
            return Some(Ok(first));
        }
        let mut record = first.clone();
        let mut continued = Vec::new();
        while state == QuoteState::Quoted {
            match self.next_line() {
                Some(Ok(more)) => {
                    state = state.scan(&more);
                    record.push('\n');
                    record.push_str(&more);
                    continued.push(more);
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    // unterminated quote at EOF: the opening line alone is the record,
                    // the lines it swallowed are framed again
                    self.pending.extend(continued);
                    return Some(Ok(first));
                }
            }
        }
        Some(Ok(record))
    }
}

impl Iterator for RecordReader {
    type Item = io::Result<(u64, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match self.next_raw()? {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        self.position += 1;
        Some(Ok((self.position, raw)))
    }
}

/// RFC 4180 quote tracking. A quote opens a quoted field only at the start of a
/// field; anywhere else it is a literal character.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    // saw `"` inside a quoted field: either an escaped quote or the closing one
    QuoteInQuoted,
}

impl QuoteState {
    fn scan(mut self, s: &str) -> Self {
        use QuoteState::*;
        for b in s.bytes() {
            self = match (self, b) {
                (FieldStart, b'"') => Quoted,
                (FieldStart | Unquoted | QuoteInQuoted, b',') => FieldStart,
                (FieldStart | Unquoted, _) => Unquoted,
                (Quoted, b'"') => QuoteInQuoted,
                (Quoted, _) => Quoted,
                (QuoteInQuoted, b'"') => Quoted,
                (QuoteInQuoted, _) => Unquoted,
            };
        }
        self
    }
}

/// What the filter decided for one record.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// Passed through fields plus the text handed to the scorer.
    Keep { fields: Vec<String>, text: String },
    Blank,
    Unparseable,
    Filtered,
}

/// Per-source strategy: column layout and record → row decision.
pub trait RecordFormat: Send {
    fn framing(&self) -> Framing;

    /// Consume any preamble and fix the input columns. Called once per item before streaming.
    fn begin(&mut self, key: &str, reader: &mut RecordReader) -> Result<(), ItemError>;

    /// Columns written before the scorer's own.
    fn columns(&self) -> Vec<String>;

    fn classify(&self, raw: &str) -> Record;
}

// ------------------------------ JSONL dumps -------------------------------------

pub const DUMP_COLUMNS: [&str; 9] = [
    "id",
    "author",
    "created_utc",
    "subreddit",
    "text_original",
    "text_clean",
    "has_lgbt_term",
    "has_hate_term",
    "has_mg_city",
];

/// Typed view of one dump line. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct DumpRecord {
    #[serde(default, deserialize_with = "stringish")]
    pub id: String,
    #[serde(default, deserialize_with = "stringish")]
    pub author: String,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub created_utc: Option<i64>,
    #[serde(default, deserialize_with = "stringish")]
    pub subreddit: String,
    #[serde(default, deserialize_with = "present")]
    pub body: Option<Value>,
    #[serde(default, deserialize_with = "stringish")]
    pub title: String,
    #[serde(default, deserialize_with = "stringish")]
    pub selftext: String,
}

impl DumpRecord {
    /// Comment body when the key exists (even if null), else `title + " " + selftext`.
    pub fn text(&self) -> String {
        match &self.body {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
            None => format!("{} {}", self.title, self.selftext),
        }
    }
}

fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

fn stringish<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEpoch {
    Int(i64),
    Float(f64),
    Text(String),
}

fn epoch_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    use serde::de::Error;
    let Some(raw) = Option::<RawEpoch>::deserialize(d)? else {
        return Ok(None);
    };
    let secs = match raw {
        RawEpoch::Int(i) => i,
        RawEpoch::Float(f) if f.is_finite() => f.trunc() as i64,
        RawEpoch::Text(s) => {
            let t = s.trim();
            match t.parse::<i64>() {
                Ok(i) => i,
                Err(_) => match t.parse::<f64>() {
                    Ok(f) if f.is_finite() => f.trunc() as i64,
                    _ => return Err(D::Error::custom(format!("created_utc not numeric: {s:?}"))),
                },
            }
        }
        RawEpoch::Float(_) => return Err(D::Error::custom("created_utc not finite")),
    };
    Ok(Some(secs))
}

/// Reddit dump lines: subreddit allow-list, text extraction, cleaning, term flags.
pub struct DumpFormat {
    subreddits: AHashSet<String>,
    matcher: TermMatcher,
    require_match: bool,
    human_timestamps: bool,
}

impl DumpFormat {
    pub fn new(subreddits: &[String], matcher: TermMatcher) -> Self {
        Self {
            subreddits: subreddits.iter().map(|s| normalize_subreddit(s)).collect(),
            matcher,
            require_match: false,
            human_timestamps: false,
        }
    }

    /// Build from the options, loading the three term lists from disk.
    pub fn from_options(opts: &AnnotateOptions) -> Result<Self> {
        let load = |p: &Option<std::path::PathBuf>| -> Result<TermList> {
            match p {
                Some(path) => TermList::load(path),
                None => Ok(TermList::default()),
            }
        };
        let matcher = TermMatcher::new(
            load(&opts.identity_terms_path)?,
            load(&opts.hate_terms_path)?,
            load(&opts.location_terms_path)?,
        );
        Ok(Self::new(&opts.subreddits, matcher)
            .with_require_match(opts.require_match)
            .with_human_timestamps(opts.human_readable_timestamps))
    }

    pub fn with_require_match(mut self, yes: bool) -> Self {
        self.require_match = yes;
        self
    }

    pub fn with_human_timestamps(mut self, yes: bool) -> Self {
        self.human_timestamps = yes;
        self
    }

    fn render_time(&self, secs: Option<i64>) -> Option<String> {
        let Some(secs) = secs else {
            return Some(String::new());
        };
        if !self.human_timestamps {
            return Some(secs.to_string());
        }
        OffsetDateTime::from_unix_timestamp(secs).ok()?.format(&Rfc3339).ok()
    }
}

impl RecordFormat for DumpFormat {
    fn framing(&self) -> Framing {
        Framing::Lines
    }

    fn begin(&mut self, _key: &str, _reader: &mut RecordReader) -> Result<(), ItemError> {
        Ok(())
    }

    fn columns(&self) -> Vec<String> {
        DUMP_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    fn classify(&self, raw: &str) -> Record {
        let line = raw.trim();
        if line.is_empty() {
            return Record::Blank;
        }
        let rec: DumpRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => return Record::Unparseable,
        };
        if !self.subreddits.is_empty() && !self.subreddits.contains(&rec.subreddit.to_lowercase()) {
            return Record::Filtered;
        }
        let original = rec.text();
        let clean = clean_text(&original);
        if clean.is_empty() {
            return Record::Filtered;
        }
        let m = self.matcher.check(&clean);
        if self.require_match && !m.matched {
            return Record::Filtered;
        }
        let Some(created) = self.render_time(rec.created_utc) else {
            return Record::Unparseable;
        };
        let flag = |b: bool| if b { "1" } else { "0" }.to_string();
        let fields = vec![
            rec.id,
            rec.author,
            created,
            rec.subreddit,
            original,
            clean.clone(),
            flag(m.a_hit),
            flag(m.b_hit),
            flag(!m.locations.is_empty()),
        ];
        Record::Keep { fields, text: clean }
    }
}

// ------------------------------ Bluesky posts -----------------------------------

pub const BLUESKY_COLUMNS: [&str; 7] = ["platform", "coleta_tipo", "query", "author", "created_at", "cidade", "text"];

/// One collected post. Only these fields are read.
#[derive(Debug, Deserialize)]
pub struct BlueskyPost {
    #[serde(default, deserialize_with = "stringish")]
    pub platform: String,
    #[serde(default, deserialize_with = "stringish")]
    pub coleta_tipo: String,
    #[serde(default, deserialize_with = "stringish")]
    pub query: String,
    #[serde(default, deserialize_with = "stringish")]
    pub author: String,
    #[serde(default, deserialize_with = "stringish")]
    pub created_at: String,
    #[serde(default, deserialize_with = "stringish")]
    pub text: String,
}

/// Collected Bluesky posts: cleaned text of a minimum length that names a place
/// from the list. Places match accent-insensitively as substrings of the
/// folded post text; the first listed place found is reported as written in the list.
pub struct BlueskyFormat {
    places: Vec<(String, String)>,
    min_text_chars: usize,
}

impl BlueskyFormat {
    pub fn new<S: AsRef<str>>(places: &[S], min_text_chars: usize) -> Self {
        let places = places
            .iter()
            .map(|p| (p.as_ref().trim().to_string(), fold_ascii(p.as_ref())))
            .filter(|(_, folded)| !folded.is_empty())
            .collect();
        Self { places, min_text_chars }
    }

    /// The place list is required: posts without a place are never kept.
    pub fn from_options(opts: &AnnotateOptions) -> Result<Self> {
        let path = opts
            .location_terms_path
            .as_deref()
            .ok_or_else(|| anyhow!("bluesky stage needs ANNOTL_LOCATION_TERMS"))?;
        let places = load_list(path)?;
        if places.is_empty() {
            warn!("place list {} is empty; every post will be filtered", path.display());
        }
        Ok(Self::new(&places, opts.min_text_chars))
    }

    pub fn detect_place(&self, text: &str) -> Option<&str> {
        let folded = fold_ascii(text);
        self.places
            .iter()
            .find(|(_, key)| folded.contains(key.as_str()))
            .map(|(original, _)| original.as_str())
    }
}

impl RecordFormat for BlueskyFormat {
    fn framing(&self) -> Framing {
        Framing::Lines
    }

    fn begin(&mut self, _key: &str, _reader: &mut RecordReader) -> Result<(), ItemError> {
        Ok(())
    }

    fn columns(&self) -> Vec<String> {
        BLUESKY_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    fn classify(&self, raw: &str) -> Record {
        let line = raw.trim();
        if line.is_empty() {
            return Record::Blank;
        }
        let post: BlueskyPost = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(_) => return Record::Unparseable,
        };
        let clean = clean_text(&post.text);
        if clean.is_empty() || clean.chars().count() < self.min_text_chars {
            return Record::Filtered;
        }
        let Some(place) = self.detect_place(&post.text) else {
            return Record::Filtered;
        };
        let fields = vec![
            post.platform,
            post.coleta_tipo,
            post.query,
            post.author,
            post.created_at,
            place.to_string(),
            clean.clone(),
        ];
        Record::Keep { fields, text: clean }
    }
}

// ------------------------------ CSV tables --------------------------------------

/// Header-first CSV produced by an earlier stage; the text column is trimmed,
/// `nan` is treated as empty, and rows without text are dropped.
pub struct TableFormat {
    text_column: String,
    max_text_chars: usize,
    header: Vec<String>,
    text_idx: usize,
}

impl TableFormat {
    pub fn new(text_column: impl Into<String>, max_text_chars: usize) -> Self {
        Self {
            text_column: text_column.into(),
            max_text_chars,
            header: Vec::new(),
            text_idx: 0,
        }
    }

    pub fn from_options(opts: &AnnotateOptions) -> Self {
        Self::new(opts.text_column.clone(), opts.max_text_chars)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }
}

/// One CSV record from one framed record. `None` when a quote is left open or the
/// text holds more than one record.
fn parse_csv_record(raw: &str) -> Option<Vec<String>> {
    if QuoteState::FieldStart.scan(raw) == QuoteState::Quoted {
        return None;
    }
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());
    let mut rec = csv::StringRecord::new();
    let fields = match rdr.read_record(&mut rec) {
        Ok(true) => rec.iter().map(str::to_string).collect(),
        Ok(false) => return Some(Vec::new()),
        Err(_) => return None,
    };
    match rdr.read_record(&mut rec) {
        Ok(false) => Some(fields),
        _ => None,
    }
}

impl RecordFormat for TableFormat {
    fn framing(&self) -> Framing {
        Framing::CsvQuoted
    }

    fn begin(&mut self, key: &str, reader: &mut RecordReader) -> Result<(), ItemError> {
        let raw = reader.read_preamble()?.unwrap_or_default();
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        let header = parse_csv_record(raw).unwrap_or_default();
        let idx = header.iter().position(|h| h.trim() == self.text_column);
        match idx {
            Some(i) => {
                self.header = header;
                self.text_idx = i;
                Ok(())
            }
            None => Err(ItemError::MissingColumn {
                key: key.to_string(),
                column: self.text_column.clone(),
                available: header,
            }),
        }
    }

    fn columns(&self) -> Vec<String> {
        self.header.clone()
    }

    fn classify(&self, raw: &str) -> Record {
        if is_blank_line(raw) {
            return Record::Blank;
        }
        let Some(mut fields) = parse_csv_record(raw) else {
            return Record::Unparseable;
        };
        if fields.len() > self.header.len() {
            return Record::Unparseable;
        }
        fields.resize(self.header.len(), String::new());
        if is_effectively_blank(&fields) {
            return Record::Blank;
        }
        let text = fields[self.text_idx].trim().to_string();
        if text.is_empty() || text == "nan" {
            return Record::Blank;
        }
        let scored = truncate_chars(&text, self.max_text_chars).to_string();
        fields[self.text_idx] = text;
        Record::Keep { fields, text: scored }
    }
}
