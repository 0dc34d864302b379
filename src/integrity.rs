use crate::decoder::{quick_validate, validate_full, MagicPolicy};
use crate::enumerate::plan_work_items;
use crate::pipeline::Annotator;
use crate::progress::{make_count_progress, maybe};
use crate::util::init_tracing_once;
use anyhow::Result;
use tracing::{info, warn};

/// Mode for integrity checks.
#[derive(Clone, Copy, Debug)]
pub enum IntegrityMode {
    /// Decode only the first `sample_bytes` (decompressed) per item.
    /// Fast and catches early corruption; cannot detect late/trailing corruption.
    Quick { sample_bytes: u64 },
    /// Decode entire stream; slowest but most thorough (validates checksums).
    Full,
}

impl Annotator {
    /// Check every pending input under the configured prefix. Returns
    /// `(source_id, error_message)` for inputs that failed.
    ///
    /// Progress displays one tick per item (not per byte) to avoid noisy output.
    pub fn check_integrity(&self, mode: IntegrityMode) -> Result<Vec<(String, String)>> {
        init_tracing_once();
        let opts = self.options();
        let items = plan_work_items(self.store(), opts)?;
        let policy = if opts.require_zstd { MagicPolicy::RequireZstd } else { MagicPolicy::Detect };

        let label = match mode {
            IntegrityMode::Quick { .. } => "Integrity (quick)",
            IntegrityMode::Full => "Integrity (full)",
        };
        let pb = maybe(opts.progress, || make_count_progress(items.len() as u64, label));

        let mut errors = Vec::new();
        for item in &items {
            let res = self.store().open(&item.source_id).map_err(Into::into).and_then(|reader| match mode {
                IntegrityMode::Quick { sample_bytes } => quick_validate(&item.source_id, reader, policy, sample_bytes),
                IntegrityMode::Full => validate_full(&item.source_id, reader, policy),
            });
            if let Err(e) = res {
                warn!("[{}] integrity check failed: {e}", item.name());
                errors.push((item.source_id.clone(), e.to_string()));
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }
        info!("{label}: {} checked, {} failed", items.len(), errors.len());
        Ok(errors)
    }
}
