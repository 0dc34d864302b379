#[path = "common/mod.rs"]
mod common;

use annotl::{
    plan_work_items, AnnotateOptions, Annotator, BlobStore, ItemOutcome, MemoryStore, PassThrough, Stage, YearMonth,
    DUMP_COLUMNS,
};
use common::*;
use regex::Regex;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const RAW: &str = "raw/RC_2025-03.zst";
const OUT: &str = "processed/RC_2025-03_BR.csv";

fn dump_opts(work: &Path, lists: &Path) -> AnnotateOptions {
    let (hate, identity, places) = write_term_lists(lists);
    AnnotateOptions::default_for(Stage::Dump)
        .with_prefixes("raw/", "processed/", "tmp/")
        .with_subreddits(["brasil", "r/BH"])
        .with_term_lists(hate, identity, places)
        .with_work_dir(work)
        .with_batch_size(4)
        .with_checkpoint_every(5)
        .with_progress(false)
}

/// Nine raw lines covering every drop reason:
/// - kept: c1 (hate term + city), s1 (identity term + city, from title/selftext), c4 (no terms)
/// - filtered: c2 (other subreddit), c3 (nothing left after cleaning), c6 (null body)
/// - blank: one empty line
/// - unparseable: broken JSON, non-numeric created_utc
fn dump_lines() -> Vec<String> {
    vec![
        comment("c1", "brasil", "Odio em Belo Horizonte! http://x.com 123", json!(1740787200)),
        comment("c2", "programming", "belo horizonte odio", json!(1740787200)),
        String::new(),
        "{not json".to_string(),
        submission("s1", "BH", "Parada LGBT", "em Uberlandia"),
        comment("c3", "brasil", "🙂🙂 !!!", json!(1740787200)),
        comment("c4", "Brasil", "bom dia", json!("1740787200.5")),
        comment("c5", "brasil", "bom dia", json!("yesterday")),
        json!({"id": "c6", "subreddit": "brasil", "body": null, "created_utc": 1740787200}).to_string(),
    ]
}

fn store_with_dump() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert(RAW, zst_bytes(&dump_lines()));
    store
}

/// Dump stage end to end: subreddit allow-list, text extraction, cleaning and flags.
/// Conservation: written + blank + unparseable + filtered == raw lines.
#[test]
fn dump_rows_are_filtered_cleaned_and_flagged() {
    let store = store_with_dump();
    let work = tempfile::tempdir().unwrap();
    let lists = tempfile::tempdir().unwrap();
    let opts = dump_opts(work.path(), lists.path());

    let mut a = Annotator::new(store.clone(), Box::new(PassThrough), opts).unwrap();
    let summary = a.run().unwrap();
    assert_eq!(summary.completed.len(), 1);
    let stats = summary.completed[0].1;
    assert_eq!(stats.written, 3);
    assert_eq!(stats.blank, 1);
    assert_eq!(stats.unparseable, 2);
    assert_eq!(stats.filtered, 3);
    assert_eq!(stats.written + stats.dropped(), dump_lines().len() as u64);

    assert_eq!(stored_header(&*store, OUT), DUMP_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>());
    let rows = stored_rows(&*store, OUT);
    let ids: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(ids, ["c1", "s1", "c4"]);

    // c1: hate term + city; URL and digits gone from text_clean
    assert_eq!(rows[0][2], "1740787200");
    assert_eq!(rows[0][4], "Odio em Belo Horizonte! http://x.com 123");
    assert_eq!(rows[0][5], "odio em belo horizonte");
    assert_eq!(&rows[0][6..], ["0", "1", "1"]);

    // s1: text comes from title + selftext
    assert_eq!(rows[1][4], "Parada LGBT em Uberlandia");
    assert_eq!(&rows[1][6..], ["1", "0", "1"]);

    // c4: numeric-string timestamp accepted and truncated to whole seconds
    assert_eq!(rows[2][2], "1740787200");
    assert_eq!(&rows[2][6..], ["0", "0", "0"]);
}

/// `require_match(true)` keeps only records with a term hit AND a location hit.
#[test]
fn require_match_keeps_only_term_and_city_hits() {
    let store = store_with_dump();
    let work = tempfile::tempdir().unwrap();
    let lists = tempfile::tempdir().unwrap();
    let opts = dump_opts(work.path(), lists.path()).with_require_match(true);

    let mut a = Annotator::new(store.clone(), Box::new(PassThrough), opts).unwrap();
    a.run().unwrap();
    let ids: Vec<String> = stored_rows(&*store, OUT).into_iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids, ["c1", "s1"]);
}

/// Human-readable timestamps render created_utc as RFC3339.
#[test]
fn human_timestamps_render_rfc3339() {
    let store = store_with_dump();
    let work = tempfile::tempdir().unwrap();
    let lists = tempfile::tempdir().unwrap();
    let opts = dump_opts(work.path(), lists.path()).with_human_timestamps(true);

    let mut a = Annotator::new(store.clone(), Box::new(PassThrough), opts).unwrap();
    a.run().unwrap();
    let rows = stored_rows(&*store, OUT);
    assert_eq!(rows[0][2], "2025-03-01T00:00:00Z");
}

/// A non-zstd `.zst` fails fast as corrupt input; the run still completes the other item.
#[test]
fn corrupt_magic_fails_item_but_not_run() {
    let store = store_with_dump();
    store.insert("raw/RC_2025-04.zst", "this is plain text, not zstd\n");
    let work = tempfile::tempdir().unwrap();
    let lists = tempfile::tempdir().unwrap();
    let opts = dump_opts(work.path(), lists.path());

    let mut a = Annotator::new(store.clone(), Box::new(PassThrough), opts).unwrap();
    let summary = a.run().unwrap();
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "RC_2025-04.zst");
    assert!(summary.failed[0].1.contains("corrupt"), "{}", summary.failed[0].1);
    assert!(store.exists(OUT).unwrap());
    assert!(!store.exists("processed/RC_2025-04_BR.csv").unwrap());
}

/// Planning honours suffix, name pattern, denylist, date range and existing outputs.
#[test]
fn planning_filters_and_orders_candidates() {
    let store = MemoryStore::new();
    for key in [
        "raw/RC_2025-03.zst",
        "raw/RC_2024-12.zst",
        "raw/RC_2025-01.zst",
        "raw/RS_2025-03.zst",
        "raw/RC_2025-02.zst",
        "raw/notes.txt",
    ] {
        store.insert(key, "x");
    }
    store.insert("processed/RC_2025-02_BR.csv", "done");

    let base = AnnotateOptions::default_for(Stage::Dump)
        .with_prefixes("raw/", "processed/", "tmp/")
        .with_name_pattern(Regex::new("^RC_").unwrap());

    let names = |opts: &AnnotateOptions| -> Vec<String> {
        plan_work_items(&store, opts).unwrap().into_iter().map(|i| i.name().to_string()).collect()
    };

    assert_eq!(names(&base), ["RC_2024-12.zst", "RC_2025-01.zst", "RC_2025-03.zst"]);

    let denied = base.clone().with_denylist(["RC_2025-01.zst"]);
    assert_eq!(names(&denied), ["RC_2024-12.zst", "RC_2025-03.zst"]);

    let dated = base.clone().with_date_range(Some(YearMonth::new(2025, 1)), None);
    assert_eq!(names(&dated), ["RC_2025-01.zst", "RC_2025-03.zst"]);

    let nothing = base.with_date_range(Some(YearMonth::new(2030, 1)), None);
    assert!(plan_work_items(&store, &nothing).unwrap().is_empty(), "nothing pending is not an error");
}

/// Dump resumption counts every raw line (blank and unparseable included) toward the offset.
#[test]
fn dump_resume_skips_raw_lines_including_dropped_ones() {
    let store = store_with_dump();
    let work = tempfile::tempdir().unwrap();
    let lists = tempfile::tempdir().unwrap();
    let opts = dump_opts(work.path(), lists.path());
    let item = opts.naming().item(RAW);

    let mut a = Annotator::new(store.clone(), Box::new(PassThrough), opts).unwrap();
    let ItemOutcome::Completed(stats) = a.process_item(&item).unwrap() else { panic!("expected completion") };
    assert_eq!(stats.total_records, 9);
    assert_eq!(checkpoint_writes(&store, "tmp/RC_2025-03_BR_checkpoint.txt"), vec![5, 9]);
}
