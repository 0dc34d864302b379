use crate::date::YearMonth;
use crate::naming::Naming;
use crate::store::join_key;
use crate::util::RetryPolicy;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which instance of the annotation workflow to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Raw `.zst` dump → filtered/cleaned/flagged CSV (`X_BR.csv`).
    Dump,
    /// Lexicon compound sentiment (`X_vader.csv`).
    Vader,
    /// Hostility probability + thresholded label (`X_tybyria.csv`).
    Tybyria,
    /// 5-class star rating mapped to polarity (`X_sentiment.csv`).
    Stars,
    /// Collected Bluesky posts (`.jsonl`) → place-filtered cleaned CSV (`X_processed.csv`).
    Bluesky,
}

impl FromStr for Stage {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dump" | "reddit" => Ok(Stage::Dump),
            "vader" | "lexicon" => Ok(Stage::Vader),
            "tybyria" | "hostility" => Ok(Stage::Tybyria),
            "stars" | "bert" | "sentiment" => Ok(Stage::Stars),
            "bluesky" | "bsky" => Ok(Stage::Bluesky),
            other => Err(anyhow!("unknown stage '{other}' (expected dump|vader|tybyria|stars|bluesky)")),
        }
    }
}

/// Everything a run needs, built once at process start and passed by reference.
#[derive(Clone, Debug)]
pub struct AnnotateOptions {
    pub stage: Stage,

    // storage layout
    pub storage_root: PathBuf,
    pub input_prefix: String,
    pub output_prefix: String,
    pub checkpoint_prefix: String,
    pub tag: String,
    pub input_suffix: String,         // e.g. ".zst", "_BR.csv"
    pub name_pattern: Option<Regex>,  // extra filter on base names, e.g. ^RC_2025-
    pub denylist: Vec<String>,        // base names never processed
    pub start: Option<YearMonth>,     // inclusive, matched against YYYY-MM in the name
    pub end: Option<YearMonth>,       // inclusive

    // batching / cadence
    pub batch_size: usize,
    pub checkpoint_every: u64,        // records per checkpoint
    pub log_every: u64,               // records per progress line

    // scoring
    pub threshold: f64,
    pub max_text_chars: usize,
    pub min_text_chars: usize,        // shorter cleaned texts are filtered (bluesky)
    pub text_column: String,
    pub model_command: Option<String>,
    pub lexicon_path: Option<PathBuf>,

    // dump filtering
    pub hate_terms_path: Option<PathBuf>,
    pub identity_terms_path: Option<PathBuf>,
    pub location_terms_path: Option<PathBuf>,
    pub subreddits: Vec<String>,      // normalized lowercase, no "r/"
    pub require_match: bool,
    pub human_readable_timestamps: bool,
    pub require_zstd: bool,

    // local scratch + IO tuning
    pub work_dir: PathBuf,
    pub read_chunk_bytes: usize,
    pub write_buffer_bytes: usize,
    pub keep_scratch: bool,
    pub low_memory_fraction: f64,
    pub retry: RetryPolicy,

    // operability
    pub progress: bool,
    pub notify_command: Option<String>,
}

const PREFIX_BASE: &str = "rede social";

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self::default_for(Stage::Vader)
    }
}

impl AnnotateOptions {
    /// Stage defaults, matching the historical per-script constants.
    pub fn default_for(stage: Stage) -> Self {
        let mut o = Self {
            stage,
            storage_root: PathBuf::from("./data"),
            input_prefix: join_key(PREFIX_BASE, "processed/"),
            output_prefix: join_key(PREFIX_BASE, "analysis/"),
            checkpoint_prefix: join_key(PREFIX_BASE, "tmp/"),
            tag: String::new(),
            input_suffix: ".csv".into(),
            name_pattern: None,
            denylist: Vec::new(),
            start: None,
            end: None,
            batch_size: 32,
            checkpoint_every: 128,
            log_every: 1_000_000,
            threshold: 0.30,
            max_text_chars: 512,
            min_text_chars: 0,
            text_column: "text_original".into(),
            model_command: None,
            lexicon_path: None,
            hate_terms_path: None,
            identity_terms_path: None,
            location_terms_path: None,
            subreddits: Vec::new(),
            require_match: false,
            human_readable_timestamps: false,
            require_zstd: false,
            work_dir: PathBuf::from("./_work_annotl"),
            read_chunk_bytes: 1 << 20,
            write_buffer_bytes: 256 * 1024,
            keep_scratch: false,
            low_memory_fraction: 0.10,
            retry: RetryPolicy::default(),
            progress: true,
            notify_command: None,
        };
        match stage {
            Stage::Dump => {
                o.input_prefix = join_key(PREFIX_BASE, "raw/");
                o.output_prefix = join_key(PREFIX_BASE, "processed/");
                o.tag = "BR".into();
                o.input_suffix = ".zst".into();
                o.batch_size = 1024;
                o.checkpoint_every = 100_000;
                o.text_column = "text_clean".into();
                o.require_zstd = true;
            }
            Stage::Vader => {
                o.output_prefix = join_key(PREFIX_BASE, "analysis/vader/");
                o.tag = "vader".into();
                o.input_suffix = "_BR.csv".into();
                o.batch_size = 1000;
                o.checkpoint_every = 100_000;
                o.text_column = "text_clean".into();
            }
            Stage::Tybyria => {
                o.tag = "tybyria".into();
            }
            Stage::Stars => {
                o.output_prefix = join_key(PREFIX_BASE, "analysis/sentiment/");
                o.tag = "sentiment".into();
            }
            Stage::Bluesky => {
                o.input_prefix = join_key(PREFIX_BASE, "bluesky/raw/");
                o.output_prefix = join_key(PREFIX_BASE, "bluesky/processed/");
                o.tag = "processed".into();
                o.input_suffix = ".jsonl".into();
                o.batch_size = 1024;
                o.checkpoint_every = 100_000;
                o.text_column = "text".into();
                o.min_text_chars = 10;
            }
        }
        o
    }

    /// Stage defaults overridden by `ANNOTL_*` environment variables.
    pub fn from_env(stage: Stage) -> Result<Self> {
        Self::from_lookup(stage, |k| std::env::var(k).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(stage: Stage, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut o = Self::default_for(stage);

        if let Some(base) = get("ANNOTL_PREFIX_BASE") {
            let rebase = |p: &str| p.strip_prefix(PREFIX_BASE).map(|rest| format!("{}{rest}", base.trim_end_matches('/')));
            o.input_prefix = rebase(&o.input_prefix).unwrap_or(o.input_prefix);
            o.output_prefix = rebase(&o.output_prefix).unwrap_or(o.output_prefix);
            o.checkpoint_prefix = rebase(&o.checkpoint_prefix).unwrap_or(o.checkpoint_prefix);
        }
        if let Some(v) = get("ANNOTL_ROOT") { o.storage_root = PathBuf::from(v); }
        if let Some(v) = get("ANNOTL_INPUT_PREFIX") { o.input_prefix = v; }
        if let Some(v) = get("ANNOTL_OUTPUT_PREFIX") { o.output_prefix = v; }
        if let Some(v) = get("ANNOTL_CHECKPOINT_PREFIX") { o.checkpoint_prefix = v; }
        if let Some(v) = get("ANNOTL_INPUT_SUFFIX") { o.input_suffix = v; }
        if let Some(v) = get("ANNOTL_NAME_PATTERN") {
            o.name_pattern = Some(Regex::new(&v).with_context(|| format!("ANNOTL_NAME_PATTERN={v}"))?);
        }
        if let Some(v) = get("ANNOTL_SKIP_FILES") { o.denylist = split_list(&v); }
        if let Some(v) = get("ANNOTL_START") { o.start = Some(v.parse().map_err(|e| anyhow!("ANNOTL_START={v}: {e}"))?); }
        if let Some(v) = get("ANNOTL_END") { o.end = Some(v.parse().map_err(|e| anyhow!("ANNOTL_END={v}: {e}"))?); }

        if let Some(v) = get("ANNOTL_BATCH_SIZE") { o.batch_size = parse_num("ANNOTL_BATCH_SIZE", &v)?; }
        if let Some(v) = get("ANNOTL_CHECKPOINT_EVERY") { o.checkpoint_every = parse_num("ANNOTL_CHECKPOINT_EVERY", &v)?; }
        if let Some(v) = get("ANNOTL_LOG_EVERY") { o.log_every = parse_num("ANNOTL_LOG_EVERY", &v)?; }
        if let Some(v) = get("ANNOTL_THRESHOLD") { o.threshold = parse_num("ANNOTL_THRESHOLD", &v)?; }
        if let Some(v) = get("ANNOTL_MAX_TEXT_CHARS") { o.max_text_chars = parse_num("ANNOTL_MAX_TEXT_CHARS", &v)?; }
        if let Some(v) = get("ANNOTL_MIN_TEXT_CHARS") { o.min_text_chars = parse_num("ANNOTL_MIN_TEXT_CHARS", &v)?; }
        if let Some(v) = get("ANNOTL_TEXT_COL") { o.text_column = v; }
        if let Some(v) = get("ANNOTL_MODEL_CMD") { o.model_command = Some(v); }
        if let Some(v) = get("ANNOTL_LEXICON") { o.lexicon_path = Some(PathBuf::from(v)); }

        if let Some(v) = get("ANNOTL_HATE_TERMS") { o.hate_terms_path = Some(PathBuf::from(v)); }
        if let Some(v) = get("ANNOTL_IDENTITY_TERMS") { o.identity_terms_path = Some(PathBuf::from(v)); }
        if let Some(v) = get("ANNOTL_LOCATION_TERMS") { o.location_terms_path = Some(PathBuf::from(v)); }
        if let Some(v) = get("ANNOTL_SUBREDDITS") { o = o.with_subreddits(split_list(&v)); }
        if let Some(v) = get("ANNOTL_SUBREDDITS_FILE") {
            let subs = crate::terms::load_term_list(Path::new(&v))?;
            o = o.with_subreddits(subs);
        }
        if let Some(v) = get("ANNOTL_REQUIRE_MATCH") { o.require_match = parse_bool(&v); }
        if let Some(v) = get("ANNOTL_HUMAN_TIMESTAMPS") { o.human_readable_timestamps = parse_bool(&v); }

        if let Some(v) = get("ANNOTL_WORK_DIR") { o.work_dir = PathBuf::from(v); }
        if let Some(v) = get("ANNOTL_KEEP_SCRATCH") { o.keep_scratch = parse_bool(&v); }
        if let Some(v) = get("ANNOTL_RETRIES") { o.retry.attempts = parse_num("ANNOTL_RETRIES", &v)?; }
        if let Some(v) = get("ANNOTL_RETRY_BASE_MS") {
            o.retry.base_delay = Duration::from_millis(parse_num("ANNOTL_RETRY_BASE_MS", &v)?);
        }
        if let Some(v) = get("ANNOTL_PROGRESS") { o.progress = parse_bool(&v); }
        if let Some(v) = get("ANNOTL_NOTIFY_CMD") { o.notify_command = Some(v); }

        Ok(o.normalized())
    }

    /// Clamp values that would make the loop degenerate.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.checkpoint_every = self.checkpoint_every.max(1);
        self.log_every = self.log_every.max(1);
        self.read_chunk_bytes = self.read_chunk_bytes.max(4 * 1024);
        self.write_buffer_bytes = self.write_buffer_bytes.max(8 * 1024);
        self.denylist.sort();
        self.denylist.dedup();
        self
    }

    pub fn naming(&self) -> Naming {
        Naming::new(&self.tag, &self.output_prefix, &self.checkpoint_prefix)
    }

    // -------- builder --------
    pub fn with_storage_root(mut self, root: impl AsRef<Path>) -> Self { self.storage_root = root.as_ref().to_path_buf(); self }
    pub fn with_prefixes(mut self, input: impl Into<String>, output: impl Into<String>, checkpoint: impl Into<String>) -> Self {
        self.input_prefix = input.into();
        self.output_prefix = output.into();
        self.checkpoint_prefix = checkpoint.into();
        self
    }
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self { self.tag = tag.into(); self }
    pub fn with_input_suffix(mut self, suffix: impl Into<String>) -> Self { self.input_suffix = suffix.into(); self }
    pub fn with_name_pattern(mut self, re: Regex) -> Self { self.name_pattern = Some(re); self }
    pub fn with_denylist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denylist = names.into_iter().map(Into::into).collect();
        self.denylist.sort();
        self.denylist.dedup();
        self
    }
    pub fn with_date_range(mut self, start: Option<YearMonth>, end: Option<YearMonth>) -> Self { self.start = start; self.end = end; self }
    pub fn with_batch_size(mut self, n: usize) -> Self { self.batch_size = n.max(1); self }
    pub fn with_checkpoint_every(mut self, n: u64) -> Self { self.checkpoint_every = n.max(1); self }
    pub fn with_log_every(mut self, n: u64) -> Self { self.log_every = n.max(1); self }
    pub fn with_threshold(mut self, t: f64) -> Self { self.threshold = t; self }
    pub fn with_max_text_chars(mut self, n: usize) -> Self { self.max_text_chars = n; self }
    pub fn with_min_text_chars(mut self, n: usize) -> Self { self.min_text_chars = n; self }
    pub fn with_text_column(mut self, col: impl Into<String>) -> Self { self.text_column = col.into(); self }
    pub fn with_term_lists(mut self, hate: impl AsRef<Path>, identity: impl AsRef<Path>, location: impl AsRef<Path>) -> Self {
        self.hate_terms_path = Some(hate.as_ref().to_path_buf());
        self.identity_terms_path = Some(identity.as_ref().to_path_buf());
        self.location_terms_path = Some(location.as_ref().to_path_buf());
        self
    }
    pub fn with_subreddits<I, S>(mut self, subs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut v: Vec<String> = subs.into_iter().map(|s| normalize_subreddit(s.as_ref())).filter(|s| !s.is_empty()).collect();
        v.sort();
        v.dedup();
        self.subreddits = v;
        self
    }
    pub fn with_require_match(mut self, yes: bool) -> Self { self.require_match = yes; self }
    pub fn with_human_timestamps(mut self, yes: bool) -> Self { self.human_readable_timestamps = yes; self }
    pub fn with_require_zstd(mut self, yes: bool) -> Self { self.require_zstd = yes; self }
    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self { self.work_dir = dir.as_ref().to_path_buf(); self }
    pub fn with_read_chunk(mut self, bytes: usize) -> Self { self.read_chunk_bytes = bytes.max(4 * 1024); self }
    pub fn with_keep_scratch(mut self, yes: bool) -> Self { self.keep_scratch = yes; self }
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self { self.retry = policy; self }
    pub fn with_progress(mut self, yes: bool) -> Self { self.progress = yes; self }
    pub fn with_notify_command(mut self, cmd: impl Into<String>) -> Self { self.notify_command = Some(cmd.into()); self }
}

/// Lowercase, trimmed, without a leading `r/`.
pub fn normalize_subreddit(s: &str) -> String {
    let s = s.trim().to_lowercase();
    match s.strip_prefix("r/") {
        Some(rest) => rest.to_string(),
        None => s,
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c == ';')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_num<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.replace(['_', ','], "")
        .parse::<T>()
        .map_err(|e| anyhow!("{key}={raw}: {e}"))
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
