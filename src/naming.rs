//! Deterministic name derivation for one work item.
//!
//! Given an input `…/X.ext` and a stage tag `T`:
//! - output:     `<output_prefix>/X_T.csv`
//! - checkpoint: `<checkpoint_prefix>/X_T_checkpoint.txt`
//! - scratch:    `X_T.partial.csv` and `X_T.commit.json` under the local work dir

use crate::store::{base_name, join_key};
use std::path::{Path, PathBuf};

/// Where a stage writes, and under which tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Naming {
    pub tag: String,
    pub output_prefix: String,
    pub checkpoint_prefix: String,
}

impl Naming {
    pub fn new(tag: impl Into<String>, output_prefix: impl Into<String>, checkpoint_prefix: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            output_prefix: output_prefix.into(),
            checkpoint_prefix: checkpoint_prefix.into(),
        }
    }

    pub fn output_id(&self, source_id: &str) -> String {
        join_key(&self.output_prefix, &format!("{}_{}.csv", stem(source_id), self.tag))
    }

    pub fn checkpoint_id(&self, source_id: &str) -> String {
        join_key(&self.checkpoint_prefix, &format!("{}_{}_checkpoint.txt", stem(source_id), self.tag))
    }

    pub fn item(&self, source_id: impl Into<String>) -> WorkItem {
        let source_id = source_id.into();
        WorkItem {
            output_id: self.output_id(&source_id),
            checkpoint_id: self.checkpoint_id(&source_id),
            scratch_stem: format!("{}_{}", stem(&source_id), self.tag),
            source_id,
        }
    }
}

/// Base name without its extension; a `.csv`/`.jsonl` left under a compression
/// extension is stripped too (`X.csv.gz` → `X`).
pub fn stem(source_id: &str) -> &str {
    let name = base_name(source_id);
    let once = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => return name,
    };
    for inner in [".csv", ".jsonl", ".json", ".ndjson"] {
        match once.strip_suffix(inner) {
            Some(s) if !s.is_empty() => return s,
            _ => {}
        }
    }
    once
}

/// One input artifact scheduled for annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub source_id: String,
    pub output_id: String,
    pub checkpoint_id: String,
    scratch_stem: String,
}

impl WorkItem {
    pub fn name(&self) -> &str {
        base_name(&self.source_id)
    }

    /// Local partial output (append target while the item is in progress).
    pub fn partial_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("{}.partial.csv", self.scratch_stem))
    }

    /// Local record pairing the partial output's committed length with the checkpoint.
    pub fn marker_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("{}.commit.json", self.scratch_stem))
    }
}
