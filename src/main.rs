use anyhow::{Context, Result};
use annotl::{init_tracing_once, scorer_for_stage, AnnotateOptions, Annotator, Interrupt, LocalStore, Retrying, Stage};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> Result<ExitCode> {
    init_tracing_once();

    let stage: Stage = std::env::var("ANNOTL_STAGE")
        .unwrap_or_else(|_| "dump".to_string())
        .parse()?;
    let opts = AnnotateOptions::from_env(stage)?;
    tracing::info!(
        "stage {stage:?}: {} -> {} (tag {}, batch {}, checkpoint every {})",
        opts.input_prefix,
        opts.output_prefix,
        opts.tag,
        opts.batch_size,
        opts.checkpoint_every
    );

    let store = Arc::new(Retrying::new(LocalStore::new(&opts.storage_root), opts.retry));
    let scorer = scorer_for_stage(&opts).context("building scorer")?;

    let interrupt = Interrupt::new();
    interrupt.listen_for_ctrl_c()?;

    let mut annotator = Annotator::new(store, scorer, opts)?.interrupt(interrupt);
    let summary = annotator.run()?;

    println!(
        "completed {}, skipped {}, failed {}",
        summary.completed.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(if summary.failed.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
