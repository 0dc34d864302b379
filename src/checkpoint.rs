//! Resume state for one work item.
//!
//! The durable half is a blob holding a single integer: records already consumed.
//! The local half is a [`CommitMarker`] next to the partial output, pairing that
//! integer with the byte length the partial output had when it was committed.

use crate::error::StoreError;
use crate::store::BlobStore;
use crate::util::{remove_with_backoff, write_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Integer checkpoint blobs over any [`BlobStore`].
pub struct CheckpointStore<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    /// Consumed-record count, or 0 when the blob is missing, unreadable or not a number.
    /// Thousands separators (`1,234`) are accepted.
    pub fn read(&self, key: &str) -> u64 {
        let bytes = match self.store.get(key) {
            Ok(Some(b)) => b,
            Ok(None) => return 0,
            Err(e) => {
                warn!("checkpoint {key} unreadable ({e}); starting from 0");
                return 0;
            }
        };
        parse_checkpoint(&String::from_utf8_lossy(&bytes)).unwrap_or_else(|| {
            warn!("checkpoint {key} is not a number; starting from 0");
            0
        })
    }

    pub fn write(&self, key: &str, value: u64) -> Result<(), StoreError> {
        self.store.put(key, value.to_string().as_bytes())
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key)
    }
}

pub fn parse_checkpoint(raw: &str) -> Option<u64> {
    raw.trim().replace(',', "").parse().ok()
}

/// What the last commit of a partial output looked like.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMarker {
    pub offset: u64,
    pub output_bytes: u64,
    pub rows_written: u64,
    pub committed_at: String,
}

impl CommitMarker {
    pub fn new(offset: u64, output_bytes: u64, rows_written: u64) -> Self {
        let committed_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        Self { offset, output_bytes, rows_written, committed_at }
    }

    /// `None` when missing or unreadable; a bad marker simply means "start fresh".
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(m) => Some(m),
            Err(e) => {
                debug!("ignoring unreadable commit marker {}: {e}", path.display());
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("serialize commit marker")?;
        write_atomic(path, &bytes)
    }

    pub fn remove(path: &Path) -> Result<()> {
        remove_with_backoff(path)
    }
}
