//! Error taxonomy for the blob boundary and for per-item processing.
//!
//! Blob operations fail with [`StoreError`]; everything that can go wrong while
//! annotating one work item is an [`ItemError`]. The run loop treats every
//! `ItemError` as "log and continue with the next item" except
//! [`ItemError::Interrupted`], which halts the whole run.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(String),

    /// Worth retrying (timeouts, sharing violations, flaky mounts).
    #[error("transient storage failure on {key}: {source}")]
    Transient {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("storage failure on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("storage unavailable on {key} after {attempts} attempts: {last}")]
    Unavailable {
        key: String,
        attempts: usize,
        last: String,
    },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("corrupt or unsupported input {key}: leading bytes [{magic}]")]
    CorruptInput { key: String, magic: String },

    #[error("{key} has no column '{column}' (columns: {available:?})")]
    MissingColumn {
        key: String,
        column: String,
        available: Vec<String>,
    },

    #[error("scorer failed on {key} (committed offset {offset}): {source}")]
    Scorer {
        key: String,
        offset: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ItemError {
    /// True for the one failure that must stop the run instead of skipping the item.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ItemError::Interrupted)
    }
}
