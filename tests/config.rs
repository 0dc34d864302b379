use annotl::{stem, AnnotateOptions, Naming, Stage, YearMonth};
use std::collections::HashMap;
use std::time::Duration;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |k| map.get(k).cloned()
}

/// Each stage carries its own layout and cadence defaults.
#[test]
fn stage_defaults() {
    let dump = AnnotateOptions::default_for(Stage::Dump);
    assert_eq!(dump.input_prefix, "rede social/raw/");
    assert_eq!(dump.output_prefix, "rede social/processed/");
    assert_eq!(dump.tag, "BR");
    assert_eq!(dump.input_suffix, ".zst");
    assert!(dump.require_zstd);

    let vader = AnnotateOptions::default_for(Stage::Vader);
    assert_eq!(vader.input_suffix, "_BR.csv");
    assert_eq!(vader.text_column, "text_clean");
    assert_eq!((vader.batch_size, vader.checkpoint_every), (1000, 100_000));

    let tyb = AnnotateOptions::default_for(Stage::Tybyria);
    assert_eq!((tyb.batch_size, tyb.checkpoint_every), (32, 128));
    assert_eq!(tyb.threshold, 0.30);
    assert_eq!(tyb.max_text_chars, 512);
    assert_eq!(tyb.text_column, "text_original");

    let bsky = AnnotateOptions::default_for(Stage::Bluesky);
    assert_eq!(bsky.input_prefix, "rede social/bluesky/raw/");
    assert_eq!(bsky.output_prefix, "rede social/bluesky/processed/");
    assert_eq!(bsky.input_suffix, ".jsonl");
    assert_eq!(bsky.min_text_chars, 10);
    assert!(!bsky.require_zstd);
}

#[test]
fn stage_names_parse() {
    assert_eq!("Dump".parse::<Stage>().unwrap(), Stage::Dump);
    assert_eq!(" hostility ".parse::<Stage>().unwrap(), Stage::Tybyria);
    assert_eq!("bert".parse::<Stage>().unwrap(), Stage::Stars);
    assert_eq!("BSKY".parse::<Stage>().unwrap(), Stage::Bluesky);
    assert!("sentiment-ish".parse::<Stage>().is_err());
}

/// Environment overrides: numbers with separators, lists, booleans, dates, rebased prefixes.
#[test]
fn env_overrides_apply() {
    let opts = AnnotateOptions::from_lookup(
        Stage::Tybyria,
        lookup(&[
            ("ANNOTL_PREFIX_BASE", "social/"),
            ("ANNOTL_BATCH_SIZE", "64"),
            ("ANNOTL_CHECKPOINT_EVERY", "1_000"),
            ("ANNOTL_THRESHOLD", "0.5"),
            ("ANNOTL_SKIP_FILES", "RC_2025-01_BR.csv; RC_2025-01_BR.csv, RC_2024-12_BR.csv"),
            ("ANNOTL_START", "2024-12"),
            ("ANNOTL_END", "2025-02"),
            ("ANNOTL_SUBREDDITS", "r/Brasil, BH"),
            ("ANNOTL_REQUIRE_MATCH", "yes"),
            ("ANNOTL_PROGRESS", "0"),
            ("ANNOTL_RETRIES", "7"),
            ("ANNOTL_RETRY_BASE_MS", "25"),
            ("ANNOTL_MODEL_CMD", "  "),
        ]),
    )
    .unwrap();

    assert_eq!(opts.input_prefix, "social/processed/");
    assert_eq!(opts.checkpoint_prefix, "social/tmp/");
    assert_eq!(opts.batch_size, 64);
    assert_eq!(opts.checkpoint_every, 1000);
    assert_eq!(opts.threshold, 0.5);
    assert_eq!(opts.denylist, ["RC_2024-12_BR.csv", "RC_2025-01_BR.csv"]);
    assert_eq!(opts.start, Some(YearMonth::new(2024, 12)));
    assert_eq!(opts.end, Some(YearMonth::new(2025, 2)));
    assert_eq!(opts.subreddits, ["bh", "brasil"]);
    assert!(opts.require_match);
    assert!(!opts.progress);
    assert_eq!(opts.retry.attempts, 7);
    assert_eq!(opts.retry.base_delay, Duration::from_millis(25));
    assert_eq!(opts.model_command, None, "blank values are ignored");
}

#[test]
fn bad_env_values_are_errors() {
    assert!(AnnotateOptions::from_lookup(Stage::Vader, lookup(&[("ANNOTL_BATCH_SIZE", "lots")])).is_err());
    assert!(AnnotateOptions::from_lookup(Stage::Vader, lookup(&[("ANNOTL_START", "2025-13")])).is_err());
    assert!(AnnotateOptions::from_lookup(Stage::Vader, lookup(&[("ANNOTL_NAME_PATTERN", "(")])).is_err());
}

/// Zero batch size or cadence would stall the loop; they are clamped to 1.
#[test]
fn degenerate_values_are_clamped() {
    let opts = AnnotateOptions::from_lookup(
        Stage::Vader,
        lookup(&[("ANNOTL_BATCH_SIZE", "0"), ("ANNOTL_CHECKPOINT_EVERY", "0")]),
    )
    .unwrap();
    assert_eq!(opts.batch_size, 1);
    assert_eq!(opts.checkpoint_every, 1);
}

/// Output, checkpoint and scratch names derive from the input stem and the tag.
#[test]
fn names_derive_from_stem_and_tag() {
    let naming = Naming::new("vader", "rede social/analysis/vader/", "rede social/tmp/");
    let item = naming.item("rede social/processed/RC_2025-02_BR.csv");
    assert_eq!(item.output_id, "rede social/analysis/vader/RC_2025-02_BR_vader.csv");
    assert_eq!(item.checkpoint_id, "rede social/tmp/RC_2025-02_BR_vader_checkpoint.txt");
    assert_eq!(item.name(), "RC_2025-02_BR.csv");

    let work = std::path::Path::new("/scratch");
    assert_eq!(item.partial_path(work), work.join("RC_2025-02_BR_vader.partial.csv"));
    assert_eq!(item.marker_path(work), work.join("RC_2025-02_BR_vader.commit.json"));

    assert_eq!(stem("raw/RC_2025-03.zst"), "RC_2025-03");
    assert_eq!(stem("dump.csv.gz"), "dump");
    assert_eq!(stem(".hidden"), ".hidden");
}

#[test]
fn year_month_from_names() {
    assert_eq!(YearMonth::from_name("RC_2025-03_BR.csv"), Some(YearMonth::new(2025, 3)));
    assert_eq!(YearMonth::from_name("notes-2025-13.txt"), None);
    assert_eq!(YearMonth::from_name("undated.zst"), None);
    let m = YearMonth::new(2025, 3);
    assert!(m.within(Some(YearMonth::new(2025, 3)), Some(YearMonth::new(2025, 3))));
    assert!(!m.within(None, Some(YearMonth::new(2025, 2))));
    assert_eq!(m.to_string(), "2025-03");
}
