//! Checkpointed streaming annotation of work items.
//!
//! One item at a time, one batch at a time. Records are numbered by
//! [`RecordReader`]; every `checkpoint_every` records the in-flight batch is
//! scored and written, the partial output is fsynced, a local [`CommitMarker`]
//! is written, and only then the checkpoint blob moves forward. On restart the
//! checkpoint is trusted only when the marker agrees with it, and the partial
//! output is cut back to the committed length, so rows written after the last
//! commit are never kept and never duplicated.

use crate::checkpoint::{CheckpointStore, CommitMarker};
use crate::config::{AnnotateOptions, Stage};
use crate::decoder::{LineDecoder, MagicPolicy};
use crate::enumerate::plan_work_items;
use crate::error::ItemError;
use crate::mem::MemoryGuard;
use crate::naming::WorkItem;
use crate::notify::{best_effort, CommandNotifier, Notifier};
use crate::progress::{make_count_progress, make_line_spinner, maybe};
use crate::records::{BlueskyFormat, DumpFormat, Record, RecordFormat, RecordReader, TableFormat};
use crate::scorer::BatchScorer;
use crate::sink::SinkWriter;
use crate::store::BlobStore;
use crate::util::{fmt_count, init_tracing_once, remove_with_backoff};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Operator abort flag, checked between records.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag on Ctrl-C. The listener runs on its own thread with a
    /// single-threaded runtime; the pipeline itself stays blocking.
    pub fn listen_for_ctrl_c(&self) -> Result<()> {
        let flag = self.clone();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build signal runtime")?;
        std::thread::Builder::new()
            .name("annotl-signal".into())
            .spawn(move || {
                rt.block_on(async {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received; stopping at the next record boundary");
                        flag.trigger();
                    }
                })
            })
            .context("spawn signal thread")?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemState {
    NotStarted,
    Skip,
    Resuming,
    Fresh,
    Streaming,
    Finalizing,
    Done,
}

/// Counters for one item, covering the records read in this run (after the resume skip).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ItemStats {
    pub resumed_from: u64,
    pub total_records: u64,
    pub records: u64,
    pub written: u64,
    pub blank: u64,
    pub unparseable: u64,
    pub filtered: u64,
}

impl ItemStats {
    pub fn dropped(&self) -> u64 {
        self.blank + self.unparseable + self.filtered
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Output already existed; input untouched.
    Skipped,
    Completed(ItemStats),
}

#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<(String, ItemStats)>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn rows_written(&self) -> u64 {
        self.completed.iter().map(|(_, s)| s.written).sum()
    }

    fn log(&self, elapsed_min: f64) {
        info!(
            "run finished in {elapsed_min:.1} min: {} completed, {} skipped (already done), {} failed, {} rows written",
            self.completed.len(),
            self.skipped.len(),
            self.failed.len(),
            fmt_count(self.rows_written())
        );
        for (name, err) in &self.failed {
            error!("  failed: {name}: {err}");
        }
    }
}

/// Texts waiting for the scorer, with the cells they will be written next to.
struct Batch {
    fields: Vec<Vec<String>>,
    texts: Vec<String>,
}

impl Batch {
    fn with_capacity(n: usize) -> Self {
        Self { fields: Vec::with_capacity(n), texts: Vec::with_capacity(n) }
    }

    fn len(&self) -> usize {
        self.texts.len()
    }

    /// Score and append; rows are not durable until the next commit.
    fn flush(
        &mut self,
        scorer: &mut dyn BatchScorer,
        sink: &mut SinkWriter,
        key: &str,
        committed: u64,
    ) -> Result<u64, ItemError> {
        if self.texts.is_empty() {
            return Ok(0);
        }
        let scorer_err = |source: anyhow::Error| ItemError::Scorer { key: key.to_string(), offset: committed, source: source.into() };
        let scores = scorer.score_batch(&self.texts).map_err(scorer_err)?;
        if scores.len() != self.texts.len() {
            return Err(scorer_err(anyhow!("scorer returned {} results for {} texts", scores.len(), self.texts.len())));
        }
        for (fields, cells) in self.fields.iter().zip(&scores) {
            sink.write_row(fields.iter().chain(cells))?;
        }
        let n = self.texts.len() as u64;
        self.fields.clear();
        self.texts.clear();
        Ok(n)
    }
}

pub struct Annotator {
    store: Arc<dyn BlobStore>,
    scorer: Box<dyn BatchScorer>,
    format: Box<dyn RecordFormat>,
    opts: AnnotateOptions,
    notifier: Option<Box<dyn Notifier>>,
    interrupt: Interrupt,
}

impl Annotator {
    /// Record format follows the stage: dump lines for [`Stage::Dump`], posts for
    /// [`Stage::Bluesky`], CSV tables otherwise.
    pub fn new(store: Arc<dyn BlobStore>, scorer: Box<dyn BatchScorer>, opts: AnnotateOptions) -> Result<Self> {
        let format: Box<dyn RecordFormat> = match opts.stage {
            Stage::Dump => Box::new(DumpFormat::from_options(&opts)?),
            Stage::Bluesky => Box::new(BlueskyFormat::from_options(&opts)?),
            _ => Box::new(TableFormat::from_options(&opts)),
        };
        let notifier = opts
            .notify_command
            .as_deref()
            .map(|cmd| Box::new(CommandNotifier::new(cmd)) as Box<dyn Notifier>);
        Ok(Self { store, scorer, format, opts, notifier, interrupt: Interrupt::new() })
    }

    // -------- Builder methods --------
    pub fn format(mut self, format: Box<dyn RecordFormat>) -> Self { self.format = format; self }
    pub fn notifier(mut self, notifier: Box<dyn Notifier>) -> Self { self.notifier = Some(notifier); self }
    pub fn interrupt(mut self, interrupt: Interrupt) -> Self { self.interrupt = interrupt; self }
    pub fn batch_size(mut self, n: usize) -> Self { self.opts = self.opts.with_batch_size(n); self }
    pub fn checkpoint_every(mut self, n: u64) -> Self { self.opts = self.opts.with_checkpoint_every(n); self }
    pub fn log_every(mut self, n: u64) -> Self { self.opts = self.opts.with_log_every(n); self }
    pub fn work_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_work_dir(dir); self }
    pub fn keep_scratch(mut self, yes: bool) -> Self { self.opts = self.opts.with_keep_scratch(yes); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }

    pub fn options(&self) -> &AnnotateOptions {
        &self.opts
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    fn ensure_work_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.opts.work_dir).with_context(|| format!("mkdir {}", self.opts.work_dir.display()))?;
        Ok(self.opts.work_dir.clone())
    }

    /// Pending items, then each one in order. Per-item failures are logged and
    /// collected; only an interrupt stops the run.
    pub fn run(&mut self) -> Result<RunSummary, ItemError> {
        init_tracing_once();
        let started = Instant::now();
        let items = plan_work_items(self.store.as_ref(), &self.opts)?;
        let mut summary = RunSummary::default();
        if items.is_empty() {
            info!("nothing pending under {}", self.opts.input_prefix);
            return Ok(summary);
        }

        let pb = maybe(self.opts.progress, || make_count_progress(items.len() as u64, "annotating"));
        for item in &items {
            let name = item.name().to_string();
            match self.process_item(item) {
                Ok(ItemOutcome::Skipped) => summary.skipped.push(name),
                Ok(ItemOutcome::Completed(stats)) => summary.completed.push((name, stats)),
                Err(e) if e.is_interrupt() => {
                    if let Some(pb) = &pb {
                        pb.abandon_with_message("interrupted");
                    }
                    best_effort(self.notifier.as_deref(), &format!("annotl interrupted during {name}"));
                    return Err(e);
                }
                Err(e) => summary.failed.push((name, e.to_string())),
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }

        summary.log(started.elapsed().as_secs_f64() / 60.0);
        best_effort(
            self.notifier.as_deref(),
            &format!(
                "annotl run finished: {} completed, {} skipped, {} failed",
                summary.completed.len(),
                summary.skipped.len(),
                summary.failed.len()
            ),
        );
        Ok(summary)
    }

    /// Drive one item from `NotStarted` to `Done`. Errors are logged with the
    /// state they happened in and returned to the caller.
    pub fn process_item(&mut self, item: &WorkItem) -> Result<ItemOutcome, ItemError> {
        let mut state = ItemState::NotStarted;
        let res = self.drive(item, &mut state);
        match &res {
            Err(e) if e.is_interrupt() => warn!("[{}] interrupted while {state:?}", item.name()),
            Err(e) => error!("[{}] failed while {state:?}: {e}", item.name()),
            Ok(_) => {}
        }
        res
    }

    fn drive(&mut self, item: &WorkItem, state: &mut ItemState) -> Result<ItemOutcome, ItemError> {
        let name = item.name().to_string();
        let mut enter = |s: ItemState| {
            debug!("[{name}] {:?} -> {s:?}", *state);
            *state = s;
        };

        if self.store.exists(&item.output_id)? {
            enter(ItemState::Skip);
            info!("[{name}] output exists: {} (skip)", item.output_id);
            return Ok(ItemOutcome::Skipped);
        }
        if self.interrupt.is_set() {
            return Err(ItemError::Interrupted);
        }

        let ckpts = CheckpointStore::new(self.store.as_ref());
        let saved = ckpts.read(&item.checkpoint_id);
        let work_dir = self.ensure_work_dir()?;
        let partial = item.partial_path(&work_dir);
        let marker = item.marker_path(&work_dir);

        let policy = if self.opts.require_zstd { MagicPolicy::RequireZstd } else { MagicPolicy::Detect };
        let source = self.store.open(&item.source_id)?;
        let lines = LineDecoder::open(&item.source_id, source, policy, self.opts.read_chunk_bytes)?;
        let mut records = RecordReader::new(lines, self.format.framing());
        self.format.begin(&item.source_id, &mut records)?;

        let buffer = self.opts.write_buffer_bytes;
        let (mut sink, mut committed) = match resumable(saved, &partial, &marker) {
            Some(m) => {
                enter(ItemState::Resuming);
                info!("[{name}] resuming after record {} ({} rows kept)", fmt_count(m.offset), fmt_count(m.rows_written));
                (SinkWriter::resume(&partial, m.output_bytes, m.rows_written, buffer)?, m.offset)
            }
            None => {
                enter(ItemState::Fresh);
                if saved > 0 {
                    warn!("[{name}] checkpoint {saved} has no matching local partial output; starting fresh");
                    ckpts.delete(&item.checkpoint_id)?;
                } else {
                    info!("[{name}] starting new output");
                }
                CommitMarker::remove(&marker)?;
                let mut header = self.format.columns();
                header.extend(self.scorer.columns());
                (SinkWriter::create(&partial, &header, buffer)?, 0)
            }
        };

        enter(ItemState::Streaming);
        let mut stats = ItemStats { resumed_from: committed, ..ItemStats::default() };
        let mut batch = Batch::with_capacity(self.opts.batch_size);
        let mut mem = MemoryGuard::new(self.opts.low_memory_fraction);
        let spinner = maybe(self.opts.progress, || make_line_spinner(&name));
        let started = Instant::now();
        let log_every = self.opts.log_every;

        for next in &mut records {
            let (pos, raw) = next?;
            if self.interrupt.is_set() {
                return Err(ItemError::Interrupted);
            }
            if pos <= committed {
                if pos % log_every.saturating_mul(2) == 0 {
                    info!("[{name}] skipping: {} records...", fmt_count(pos));
                }
                continue;
            }

            stats.records += 1;
            match self.format.classify(&raw) {
                Record::Keep { fields, text } => {
                    batch.fields.push(fields);
                    batch.texts.push(text);
                }
                Record::Blank => stats.blank += 1,
                Record::Unparseable => stats.unparseable += 1,
                Record::Filtered => stats.filtered += 1,
            }

            if batch.len() >= self.opts.batch_size {
                stats.written += batch.flush(self.scorer.as_mut(), &mut sink, &item.source_id, committed)?;
            }
            if pos - committed >= self.opts.checkpoint_every {
                stats.written += batch.flush(self.scorer.as_mut(), &mut sink, &item.source_id, committed)?;
                commit(&mut sink, &marker, &ckpts, &item.checkpoint_id, pos)?;
                committed = pos;
            }
            if pos % log_every == 0 {
                info!(
                    "[{name}] read {} records, {} rows written ({:.1} min)",
                    fmt_count(pos),
                    fmt_count(sink.rows_written()),
                    started.elapsed().as_secs_f64() / 60.0
                );
            }
            if let Some(sp) = &spinner {
                sp.inc(1);
            }
            mem.maybe_throttle();
        }
        let total = records.position();
        stats.total_records = total;
        if let Some(sp) = spinner {
            sp.finish_and_clear();
        }
        if self.interrupt.is_set() {
            return Err(ItemError::Interrupted);
        }

        enter(ItemState::Finalizing);
        stats.written += batch.flush(self.scorer.as_mut(), &mut sink, &item.source_id, committed)?;
        if total != committed {
            commit(&mut sink, &marker, &ckpts, &item.checkpoint_id, total)?;
        }
        let (_, rows) = sink.finish()?;

        self.store.upload(&item.output_id, &partial)?;
        ckpts.delete(&item.checkpoint_id)?;
        if !self.opts.keep_scratch {
            for path in [&partial, &marker] {
                if let Err(e) = remove_with_backoff(path) {
                    warn!("[{name}] could not remove scratch {}: {e:#}", path.display());
                }
            }
        }

        enter(ItemState::Done);
        info!(
            "[{name}] done: {} records, {} rows in output, {} dropped ({} blank, {} unparseable, {} filtered), {:.1} min -> {}",
            fmt_count(total),
            fmt_count(rows),
            fmt_count(stats.dropped()),
            fmt_count(stats.blank),
            fmt_count(stats.unparseable),
            fmt_count(stats.filtered),
            started.elapsed().as_secs_f64() / 60.0,
            item.output_id
        );
        if mem.throttled() > 0 {
            debug!("[{name}] throttled {} times on low memory", mem.throttled());
        }
        best_effort(self.notifier.as_deref(), &format!("annotl: {name} done ({} rows)", rows));
        Ok(ItemOutcome::Completed(stats))
    }
}

/// Durable local rows, then the marker, then the checkpoint blob.
fn commit(
    sink: &mut SinkWriter,
    marker: &Path,
    ckpts: &CheckpointStore<'_>,
    checkpoint_id: &str,
    offset: u64,
) -> Result<(), ItemError> {
    let bytes = sink.commit()?;
    CommitMarker::new(offset, bytes, sink.rows_written()).save(marker)?;
    ckpts.write(checkpoint_id, offset)?;
    debug!("checkpoint {checkpoint_id} = {offset}");
    Ok(())
}

/// Marker that agrees with the checkpoint, over a partial output at least as long as committed.
fn resumable(saved: u64, partial: &Path, marker: &Path) -> Option<CommitMarker> {
    if saved == 0 {
        return None;
    }
    let m = CommitMarker::load(marker)?;
    if m.offset != saved {
        return None;
    }
    let len = fs::metadata(partial).ok()?.len();
    (len >= m.output_bytes).then_some(m)
}
