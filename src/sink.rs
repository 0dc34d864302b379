//! Local partial output: header once, rows appended, durable commits.

use crate::util::create_with_backoff;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub struct SinkWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows_written: u64,
}

fn builder(buffer_bytes: usize) -> csv::WriterBuilder {
    let mut b = csv::WriterBuilder::new();
    b.buffer_capacity(buffer_bytes.max(8 * 1024))
        .terminator(csv::Terminator::Any(b'\n'))
        .flexible(false);
    b
}

impl SinkWriter {
    /// New file (truncating any leftover) with `header` as the first record.
    pub fn create(path: &Path, header: &[String], buffer_bytes: usize) -> Result<Self> {
        let file = create_with_backoff(path)?;
        let mut writer = builder(buffer_bytes).from_writer(file);
        writer
            .write_record(header)
            .with_context(|| format!("write header {}", path.display()))?;
        writer.flush().with_context(|| format!("flush {}", path.display()))?;
        Ok(Self { path: path.to_path_buf(), writer, rows_written: 0 })
    }

    /// Reopen a partial output for appending, cutting it back to the last committed length.
    /// No header is written; `rows_written` continues from the committed count.
    pub fn resume(path: &Path, committed_bytes: u64, rows_written: u64, buffer_bytes: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("open for append {}", path.display()))?;
        file.set_len(committed_bytes)
            .with_context(|| format!("truncate {} to {committed_bytes}", path.display()))?;
        let writer = builder(buffer_bytes).has_headers(false).from_writer(file);
        Ok(Self { path: path.to_path_buf(), writer, rows_written })
    }

    pub fn write_row<'a, I>(&mut self, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        self.writer
            .write_record(cells)
            .with_context(|| format!("write row to {}", self.path.display()))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and fsync; returns the durable byte length.
    pub fn commit(&mut self) -> Result<u64> {
        self.writer.flush().with_context(|| format!("flush {}", self.path.display()))?;
        let file = self.writer.get_ref();
        file.sync_data().with_context(|| format!("sync {}", self.path.display()))?;
        Ok(file.metadata().with_context(|| format!("stat {}", self.path.display()))?.len())
    }

    /// Final commit; consumes the writer so the file is closed before upload.
    pub fn finish(mut self) -> Result<(u64, u64)> {
        let bytes = self.commit()?;
        Ok((bytes, self.rows_written))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
