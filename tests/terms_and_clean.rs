#[path = "common/mod.rs"]
mod common;

use annotl::{clean_text, is_blank_line, is_effectively_blank, load_term_list, truncate_chars, TermList, TermMatcher};
use common::*;

/// Terms come back as A hits then B hits; a multi-word entry counts for both B and C.
#[test]
fn matcher_reports_terms_and_locations() {
    let m = TermMatcher::from_lists(&["abc"], &["new york"], &["new york"]).unwrap();
    let r = m.check("I live in new york and it's abc");
    assert!(r.matched);
    assert_eq!(r.terms, ["abc", "new york"]);
    assert_eq!(r.locations, ["new york"]);
    assert!(r.a_hit && r.b_hit);
}

/// Single-token entries need word boundaries; multi-token entries are plain substrings.
#[test]
fn single_tokens_respect_word_boundaries() {
    let m = TermMatcher::from_lists(&["abc"], &[] as &[&str], &["sao paulo"]).unwrap();
    let r = m.check("abcdef em sao paulo");
    assert!(r.terms.is_empty());
    assert!(!r.matched, "a location alone is not a match");

    let m = TermMatcher::from_lists(&["gay"], &["odio contra"], &["sao paulo"]).unwrap();
    let r = m.check("xodio contrario em sao paulos");
    assert_eq!(r.terms, ["odio contra"], "multi-token entries match inside words");
    assert_eq!(r.locations, ["sao paulo"]);
    assert!(r.matched && !r.a_hit && r.b_hit);
}

/// Entries with non-word characters still match on their own.
#[test]
fn punctuated_single_tokens_use_boundaries() {
    let list = TermList::new(["e-mail", "  LGBT  ", ""]).unwrap();
    assert_eq!(list.len(), 2);
    let m = TermMatcher::new(list, TermList::default(), TermList::new(["bh"]).unwrap());
    let r = m.check("mande um e-mail sobre lgbt em bh");
    assert_eq!(r.terms, ["e-mail", "lgbt"]);
    assert!(m.check("mande um xe-mailx em bh").terms.is_empty());
}

/// No term hit and no location hit: nothing matched, flags false.
#[test]
fn empty_text_matches_nothing() {
    let m = TermMatcher::from_lists(&["a"], &["b"], &["c"]).unwrap();
    let r = m.check("");
    assert!(!r.matched && !r.a_hit && !r.b_hit);
    assert!(r.terms.is_empty() && r.locations.is_empty());
}

/// Term files: trimmed, lowercased, `#` comments and blank lines skipped.
#[test]
fn term_lists_load_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let (hate, identity, places) = write_term_lists(dir.path());
    assert_eq!(load_term_list(&identity).unwrap(), ["lgbt", "gay"]);
    assert_eq!(load_term_list(&hate).unwrap(), ["odio", "discurso de odio"]);
    assert_eq!(TermList::load(&places).unwrap().len(), 2);
    assert!(load_term_list(&dir.path().join("missing.txt")).is_err());
}

/// An entry too large to compile is an error naming the list, not a panic.
#[test]
fn oversized_term_is_rejected() {
    let huge = format!("{}-x", "a".repeat(2_000_000));
    let err = TermList::new(["ok", huge.as_str()]).unwrap_err();
    assert!(format!("{err:#}").contains("term \"aaaa"), "{err:#}");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("places.txt");
    std::fs::write(&path, format!("belo horizonte\n{huge}\n")).unwrap();
    let err = TermList::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("places.txt"), "{err:#}");
}

/// Cleaning strips URLs, emoji, punctuation and digits, then lowercases and collapses spaces.
#[test]
fn clean_text_normalizes() {
    assert_eq!(clean_text("Veja https://t.co/xyz AGORA!!! 🙂 2024"), "veja agora");
    assert_eq!(clean_text("www.exemplo.com.br"), "");
    assert_eq!(clean_text("São   Paulo,\tBH"), "são paulo bh");
    assert_eq!(clean_text("   "), "");
}

#[test]
fn blank_line_detection() {
    for blank in ["", "   ", ";;;;", r#",,"","#, "\t,\r"] {
        assert!(is_blank_line(blank), "{blank:?} is blank");
    }
    assert!(!is_blank_line("a,,"));
    assert!(is_effectively_blank(&["", "  ", "\t"]));
    assert!(!is_effectively_blank(&["", "x"]));
}

/// Truncation counts characters, not bytes; 0 disables it.
#[test]
fn truncate_counts_chars() {
    assert_eq!(truncate_chars("ação", 2), "aç");
    assert_eq!(truncate_chars("abc", 10), "abc");
    assert_eq!(truncate_chars("abc", 0), "abc");
}
