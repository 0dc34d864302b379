//! Progress reporting: a count bar over work items and a line spinner for the item in flight.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
}

/// Items processed out of total, with a label.
pub fn make_count_progress(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(style(
        "{spinner:.green} {msg} {pos}/{len} [{bar:.cyan/blue}] {percent:>3}%  \
         elapsed: {elapsed_precise}  eta: {eta_precise}",
    ));
    if !label.is_empty() {
        pb.set_message(label.to_string());
    }
    pb.enable_steady_tick(TICK);
    pb
}

/// Unbounded record counter for one work item (total line count is unknown while streaming).
pub fn make_line_spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(style("{spinner:.green} {msg} {human_pos} records  {per_sec}  elapsed: {elapsed_precise}"));
    pb.set_message(label.to_string());
    pb.enable_steady_tick(TICK);
    pb
}

/// Optional bar: `None` when progress is disabled, so callers can `if let Some(pb)`.
pub fn maybe<F: FnOnce() -> ProgressBar>(enabled: bool, make: F) -> Option<ProgressBar> {
    enabled.then(make)
}
