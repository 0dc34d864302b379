#![allow(dead_code)]

use annotl::{AnnotateOptions, BatchScorer, BlobStore, MemoryStore, ProbabilityModel, Stage, StoreResult};
use parking_lot::Mutex;
use serde_json::json;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// zstd-compress JSONL lines in memory (one `\n` after each line).
pub fn zst_bytes(lines: &[String]) -> Vec<u8> {
    let mut enc = zstd::stream::write::Encoder::new(Vec::new(), 3).unwrap();
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap()
}

/// Write a compressed `.zst` file containing the provided JSONL lines.
pub fn write_zst_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = File::create(path).unwrap();
    f.write_all(&zst_bytes(lines)).unwrap();
}

/// Header line plus one line per row, `\n`-terminated.
pub fn csv_text(header: &str, rows: &[String]) -> String {
    let mut s = String::from(header);
    s.push('\n');
    for r in rows {
        s.push_str(r);
        s.push('\n');
    }
    s
}

/// `id,text` table with `n` rows: `r1,text number 1` ...
pub fn numbered_table(n: usize) -> (String, Vec<String>) {
    let rows: Vec<String> = (1..=n).map(|i| format!("r{i},text number {i}")).collect();
    (csv_text("id,text", &rows), rows)
}

/// One Reddit comment line.
pub fn comment(id: &str, subreddit: &str, body: &str, created_utc: serde_json::Value) -> String {
    json!({
        "id": id, "author": format!("user_{id}"), "subreddit": subreddit,
        "body": body, "created_utc": created_utc, "score": 1
    })
    .to_string()
}

/// One Reddit submission line (no `body`, text comes from title + selftext).
pub fn submission(id: &str, subreddit: &str, title: &str, selftext: &str) -> String {
    json!({
        "id": id, "author": format!("user_{id}"), "subreddit": subreddit,
        "title": title, "selftext": selftext, "created_utc": 1740787200
    })
    .to_string()
}

/// Term list files under `dir`: identity, hate, locations.
pub fn write_term_lists(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let identity = dir.join("identity.txt");
    let hate = dir.join("hate.txt");
    let places = dir.join("places.txt");
    fs::write(&identity, "# identity terms\nlgbt\ngay\n\n").unwrap();
    fs::write(&hate, "odio\ndiscurso de odio\n").unwrap();
    fs::write(&places, "belo horizonte\nuberlandia\n").unwrap();
    (hate, identity, places)
}

/// Options for a CSV stage over `in/` → `out/` with checkpoints in `tmp/`.
pub fn table_opts(work_dir: &Path) -> AnnotateOptions {
    AnnotateOptions::default_for(Stage::Tybyria)
        .with_prefixes("in/", "out/", "tmp/")
        .with_tag("test")
        .with_input_suffix(".csv")
        .with_text_column("text")
        .with_work_dir(work_dir)
        .with_progress(false)
}

/// Output rows (header excluded) of a stored CSV blob.
pub fn stored_rows(store: &dyn BlobStore, key: &str) -> Vec<Vec<String>> {
    let bytes = store.get(key).unwrap().expect("output blob");
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes.as_slice());
    rdr.records().map(|r| r.unwrap().iter().map(str::to_string).collect()).collect()
}

pub fn stored_header(store: &dyn BlobStore, key: &str) -> Vec<String> {
    let bytes = store.get(key).unwrap().expect("output blob");
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes.as_slice());
    rdr.headers().unwrap().iter().map(str::to_string).collect()
}

/// Checkpoint values written to `key`, in order.
pub fn checkpoint_writes(store: &MemoryStore, key: &str) -> Vec<u64> {
    store
        .puts()
        .into_iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| String::from_utf8(v).unwrap().parse().unwrap())
        .collect()
}

// ----------------------------- scorers -----------------------------------------

/// Deterministic: one `len` column, plus a log of every text it saw.
#[derive(Clone, Default)]
pub struct LengthScorer {
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl BatchScorer for LengthScorer {
    fn columns(&self) -> Vec<String> {
        vec!["len".into()]
    }

    fn score_batch(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<String>>> {
        self.seen.lock().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| vec![t.chars().count().to_string()]).collect())
    }
}

/// Succeeds for `ok_batches` batches, then fails every call.
pub struct FailingScorer {
    pub ok_batches: usize,
    pub calls: usize,
}

impl BatchScorer for FailingScorer {
    fn columns(&self) -> Vec<String> {
        vec!["len".into()]
    }

    fn score_batch(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<String>>> {
        self.calls += 1;
        if self.calls > self.ok_batches {
            anyhow::bail!("simulated out of memory");
        }
        Ok(texts.iter().map(|t| vec![t.len().to_string()]).collect())
    }
}

/// Fixed probabilities per call, one copy per text.
pub struct FixedModel(pub Vec<f64>);

impl ProbabilityModel for FixedModel {
    fn predict(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
        Ok(texts.iter().map(|_| self.0.clone()).collect())
    }
}

// ----------------------------- crashing input -------------------------------------

/// Hands out `limit` bytes, then fails like a dropped connection.
pub struct FailAfter {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for FailAfter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "simulated stream crash"));
        }
        let cap = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..cap])?;
        if n == 0 {
            return Ok(0);
        }
        self.remaining -= n;
        Ok(n)
    }
}

/// Store whose reads of `key` break after `limit` bytes; everything else passes through.
pub struct CrashingStore {
    pub inner: Arc<MemoryStore>,
    pub key: String,
    pub limit: usize,
}

impl BlobStore for CrashingStore {
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list(prefix)
    }
    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key)
    }
    fn open(&self, key: &str) -> StoreResult<Box<dyn Read + Send>> {
        if key != self.key {
            return self.inner.open(key);
        }
        let bytes = self.inner.get(key)?.unwrap_or_default();
        Ok(Box::new(FailAfter { inner: Cursor::new(bytes), remaining: self.limit }))
    }
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        self.inner.put(key, bytes)
    }
    fn upload(&self, key: &str, local: &Path) -> StoreResult<()> {
        self.inner.upload(key, local)
    }
    fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key)
    }
}
