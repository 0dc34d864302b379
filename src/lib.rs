mod config;
mod date;
mod naming;
mod enumerate;
mod error;
mod store;

mod decoder;
mod clean;
mod terms;
mod records;

mod scorer;
mod checkpoint;
mod sink;
mod notify;

mod progress;
mod util;
mod mem;
mod pipeline;
mod integrity;

pub use crate::config::{normalize_subreddit, AnnotateOptions, Stage};
pub use crate::date::YearMonth;
pub use crate::error::{ItemError, StoreError};
pub use crate::naming::{stem, Naming, WorkItem};
pub use crate::enumerate::plan_work_items;
pub use crate::pipeline::{Annotator, Interrupt, ItemOutcome, ItemState, ItemStats, RunSummary};

// Blob boundary: trait, backends and the retry wrapper.
pub use crate::store::{base_name, join_key, BlobStore, LocalStore, MemoryStore, Retrying, StoreResult};

// Streaming input: magic sniffing, line decoding, record framing and filtering.
pub use crate::decoder::{hex_bytes, quick_validate, validate_full, Compression, LineDecoder, MagicPolicy, GZIP_MAGIC, ZSTD_MAGIC};
pub use crate::clean::{clean_text, fold_ascii, is_blank_line, is_effectively_blank, truncate_chars};
pub use crate::terms::{load_list, load_term_list, MatchResult, TermList, TermMatcher};
pub use crate::records::{
    BlueskyFormat, BlueskyPost, DumpFormat, DumpRecord, Framing, Record, RecordFormat, RecordReader, TableFormat,
    BLUESKY_COLUMNS, DUMP_COLUMNS,
};

// Scorers and their label policies.
pub use crate::scorer::{
    compound_label, fmt_float, hostility_label, stars_to_label, stars_to_polarity, BatchScorer, CommandModel,
    HostilityScorer, LexiconScorer, PassThrough, ProbabilityModel, Sentiment, StarScorer,
};
pub use crate::scorer::for_stage as scorer_for_stage;

// Resume state and output.
pub use crate::checkpoint::{parse_checkpoint, CheckpointStore, CommitMarker};
pub use crate::sink::SinkWriter;

pub use crate::notify::{best_effort, CommandNotifier, NoopNotifier, Notifier};
pub use crate::integrity::IntegrityMode;
pub use crate::mem::MemoryGuard;

//export robust file ops and retry policy from util so binaries can import from crate root.
pub use crate::util::{create_with_backoff, fmt_count, init_tracing_once, remove_with_backoff, replace_file_atomic_backoff, write_atomic, RetryPolicy};
