use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// "YYYY-MM" as found in dump names (`RC_2025-03.zst`, `RC_2025-03_BR.csv`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: u16,
    pub month: u8, // 1..=12
}

impl YearMonth {
    pub fn new(year: u16, month: u8) -> Self {
        assert!((1..=12).contains(&month), "Month must be 1..=12");
        Self { year, month }
    }

    /// First `YYYY-MM` token in a file name, if any.
    pub fn from_name(name: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})").expect("static regex"));
        re.captures_iter(name).find_map(|caps| {
            let year: u16 = caps[1].parse().ok()?;
            let month: u8 = caps[2].parse().ok()?;
            (1..=12).contains(&month).then_some(Self { year, month })
        })
    }

    /// Inclusive on both ends; an open end accepts everything on that side.
    pub fn within(self, start: Option<YearMonth>, end: Option<YearMonth>) -> bool {
        start.map_or(true, |s| self >= s) && end.map_or(true, |e| self <= e)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s.trim().split_once('-').ok_or("expected YYYY-MM")?;
        let year: u16 = y.parse().map_err(|_| "invalid year")?;
        let month: u8 = m.parse().map_err(|_| "invalid month")?;
        if !(1..=12).contains(&month) {
            return Err("month must be 01..12".into());
        }
        Ok(Self { year, month })
    }
}
