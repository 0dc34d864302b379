//! Text normalization applied before matching and scoring, plus blank-row detection.

use regex::Regex;
use std::sync::OnceLock;

struct Patterns {
    url: Regex,
    symbol: Regex,
    punct: Regex,
    digits: Regex,
    spaces: Regex,
    blank_line: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| Patterns {
        url: Regex::new(r"http\S+|www\S+").expect("url regex"),
        symbol: Regex::new(r"\p{So}").expect("symbol regex"),
        punct: Regex::new(r"[^\w\s]").expect("punct regex"),
        digits: Regex::new(r"\d+").expect("digits regex"),
        spaces: Regex::new(r"\s+").expect("spaces regex"),
        blank_line: Regex::new(r#"^[\s,;"]*$"#).expect("blank regex"),
    })
}

/// Strip URLs, symbols/emoji, punctuation and digits; lowercase; collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let p = patterns();
    let s = p.url.replace_all(text, "");
    let s = p.symbol.replace_all(&s, "");
    let s = p.punct.replace_all(&s, " ");
    let s = p.digits.replace_all(&s, " ");
    let s = s.to_lowercase();
    p.spaces.replace_all(&s, " ").trim().to_string()
}

/// Whitespace and bare separators only (`;;;;`, `,,"",`).
pub fn is_blank_line(line: &str) -> bool {
    patterns().blank_line.is_match(line)
}

/// Every field strips to the empty string.
pub fn is_effectively_blank<S: AsRef<str>>(fields: &[S]) -> bool {
    fields.iter().all(|f| f.as_ref().trim().is_empty())
}

/// Cut to at most `max_chars` characters (0 = no limit), on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

fn fold_char(c: char) -> Option<char> {
    Some(match c {
        'a'..='z' => c,
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'ď' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'ğ' => 'g',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'ĺ' | 'ľ' => 'l',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ō' | 'ő' => 'o',
        'ŕ' | 'ř' => 'r',
        'ś' | 'š' | 'ş' => 's',
        'ť' | 'ţ' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => 'u',
        'ý' | 'ÿ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    })
}

/// Accent-insensitive key for place matching: lowercase, Latin diacritics folded
/// to the base letter, other non-ASCII dropped, ASCII that is not `a-z` turned
/// into a space, whitespace collapsed. `"Uberlândia-MG"` becomes `"uberlandia mg"`.
pub fn fold_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_whitespace() {
            out.push(' ');
        } else if let Some(f) = fold_char(c) {
            out.push(f);
        } else if c.is_ascii() {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
