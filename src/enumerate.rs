use crate::config::AnnotateOptions;
use crate::date::YearMonth;
use crate::error::StoreError;
use crate::naming::WorkItem;
use crate::store::{base_name, BlobStore};
use ahash::AHashSet;
use tracing::{debug, info};

/// Pending work under `opts.input_prefix`, sorted by key.
///
/// Keeps keys ending in `input_suffix` whose base name passes the optional
/// name pattern, is not denylisted, and (when a date range is set) carries a
/// `YYYY-MM` inside the range. Items whose output already exists are left out.
/// Nothing pending is an empty list, not an error.
pub fn plan_work_items(store: &dyn BlobStore, opts: &AnnotateOptions) -> Result<Vec<WorkItem>, StoreError> {
    let naming = opts.naming();
    let denied: AHashSet<&str> = opts.denylist.iter().map(String::as_str).collect();
    let done: AHashSet<String> = store.list(&opts.output_prefix)?.into_iter().collect();
    let dated = opts.start.is_some() || opts.end.is_some();

    let mut keys = store.list(&opts.input_prefix)?;
    keys.sort();

    let own_suffix = format!("_{}.csv", opts.tag);
    let mut items = Vec::new();
    let mut already_done = 0usize;
    for key in keys {
        let name = base_name(&key);
        // our own outputs when input and output share a prefix
        if !name.ends_with(&opts.input_suffix) || name.ends_with(&own_suffix) {
            continue;
        }
        if let Some(re) = &opts.name_pattern {
            if !re.is_match(name) {
                continue;
            }
        }
        if denied.contains(name) {
            debug!("{name}: denylisted");
            continue;
        }
        if dated {
            match YearMonth::from_name(name) {
                Some(ym) if ym.within(opts.start, opts.end) => {}
                _ => continue,
            }
        }
        let item = naming.item(key.as_str());
        if done.contains(&item.output_id) {
            already_done += 1;
            continue;
        }
        items.push(item);
    }
    info!("{} pending item(s) under {} ({already_done} already annotated)", items.len(), opts.input_prefix);
    Ok(items)
}
