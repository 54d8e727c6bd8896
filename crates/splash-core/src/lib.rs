//! Core domain model and value normalisation for Splash Utilities.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "splash-core";

/// Nation code of rows owned by the organisation.
pub const DEFAULT_HOME_NATION: &str = "CAN";

/// Roster level at which the SDMS id is authoritative.
pub const INTERNATIONAL_LEVEL: &str = "Int";

/// Sport-class values that mean "not classified".
pub const UNCLASSIFIED_SPORT_CLASSES: [&str; 8] = ["NE", "PSPI", "PSVI", "PSII", "PI", "II", "VI", ""];

/// Authoritative athlete record from the active roster feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Canonical licence number (decimal digits, no leading zeros).
    pub snc_id: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub s: Option<String>,
    pub sb: Option<String>,
    pub sm: Option<String>,
    pub exceptions: Option<String>,
    pub sdms_id: Option<String>,
    pub level: Option<String>,
    pub nation: Option<String>,
}

impl RosterEntry {
    pub fn sport_class_s(&self) -> String {
        normalize_sport_class(self.s.as_deref())
    }

    pub fn sport_class_sb(&self) -> String {
        normalize_sport_class(self.sb.as_deref())
    }

    pub fn sport_class_sm(&self) -> String {
        normalize_sport_class(self.sm.as_deref())
    }

    pub fn canonical_sdms_id(&self) -> String {
        canonical_sdms_id(self.sdms_id.as_deref())
    }

    pub fn is_international(&self) -> bool {
        self.level.as_deref().map(str::trim) == Some(INTERNATIONAL_LEVEL)
    }
}

/// Club row from the local store `CLUB` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubRow {
    pub club_id: i64,
    pub code: Option<String>,
    pub name: Option<String>,
    pub nation: Option<String>,
    pub region: Option<String>,
}

/// Athlete row from the local store `ATHLETE` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AthleteRow {
    pub athlete_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub license: Option<String>,
    pub handicap_ex: Option<String>,
    pub handicap_s: Option<String>,
    pub handicap_sb: Option<String>,
    pub handicap_sm: Option<String>,
    pub sdms_id: Option<String>,
    pub nation: Option<String>,
}

impl AthleteRow {
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
    }

    /// Licence as used for the roster join.
    pub fn join_key(&self) -> Option<&str> {
        self.license
            .as_deref()
            .map(str::trim)
            .filter(|license| !license.is_empty())
    }
}

/// Row of the club reference CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubCsvRecord {
    #[serde(rename = "Club Code")]
    pub club_code: String,
    #[serde(rename = "Province", default)]
    pub province: Option<String>,
    #[serde(rename = "Club Name", default)]
    pub club_name: Option<String>,
    #[serde(rename = "Preferred Club Name", default)]
    pub preferred_club_name: Option<String>,
}

impl ClubCsvRecord {
    /// Preferred name worth applying: present and longer than one character.
    pub fn usable_preferred_name(&self) -> Option<&str> {
        self.preferred_club_name
            .as_deref()
            .filter(|name| name.chars().count() > 1)
    }
}

/// Prior names of one athlete, captured before a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    #[serde(rename = "ATHLETEID")]
    pub athlete_id: i64,
    #[serde(rename = "FIRSTNAME")]
    pub first_name: String,
    #[serde(rename = "LASTNAME")]
    pub last_name: String,
}

/// Competitive level carried by roster entries, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParaLevel {
    One,
    Two,
    Three,
    International,
}

impl ParaLevel {
    pub const ALL: [ParaLevel; 4] = [
        ParaLevel::One,
        ParaLevel::Two,
        ParaLevel::Three,
        ParaLevel::International,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParaLevel::One => "1",
            ParaLevel::Two => "2",
            ParaLevel::Three => "3",
            ParaLevel::International => INTERNATIONAL_LEVEL,
        }
    }

    /// Whether a raw roster level is at or above `self`. Unknown or missing
    /// levels never qualify.
    pub fn admits(&self, raw_level: Option<&str>) -> bool {
        raw_level
            .and_then(|level| level.trim().parse::<ParaLevel>().ok())
            .is_some_and(|level| level >= *self)
    }
}

impl fmt::Display for ParaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownParaLevel(pub String);

impl fmt::Display for UnknownParaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown para level {:?} (expected 1, 2, 3 or Int)", self.0)
    }
}

impl std::error::Error for UnknownParaLevel {}

impl FromStr for ParaLevel {
    type Err = UnknownParaLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParaLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| UnknownParaLevel(s.to_string()))
    }
}

/// Outcome of looking up one join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match<'a, T> {
    Unique(&'a T),
    Missing,
    Duplicate(usize),
}

impl<'a, T> Match<'a, T> {
    pub fn unique(self) -> Option<&'a T> {
        match self {
            Match::Unique(item) => Some(item),
            Match::Missing | Match::Duplicate(_) => None,
        }
    }
}

/// Join index over external records; only exactly-one matches are usable.
#[derive(Debug)]
pub struct MatchIndex<'a, T> {
    by_key: HashMap<&'a str, Vec<&'a T>>,
}

impl<'a, T> MatchIndex<'a, T> {
    pub fn build(items: &'a [T], key: impl Fn(&'a T) -> &'a str) -> Self {
        let mut by_key: HashMap<&'a str, Vec<&'a T>> = HashMap::new();
        for item in items {
            by_key.entry(key(item)).or_default().push(item);
        }
        Self { by_key }
    }

    pub fn lookup(&self, key: &str) -> Match<'a, T> {
        match self.by_key.get(key).map(Vec::as_slice) {
            None | Some([]) => Match::Missing,
            Some([item]) => Match::Unique(*item),
            Some(items) => Match::Duplicate(items.len()),
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Reduce a numeric identifier to plain decimal digits without leading zeros.
/// Returns `None` when the input carries no digits at all.
pub fn canonical_number_string(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let integral = match raw.split_once('.') {
        Some((whole, fraction)) if fraction.chars().all(|c| c == '0') => whole,
        _ => raw,
    };
    let digits: String = integral.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    })
}

/// Placeholder or missing sport classes collapse to "0".
pub fn normalize_sport_class(raw: Option<&str>) -> String {
    match raw {
        None => "0".to_string(),
        Some(value) if UNCLASSIFIED_SPORT_CLASSES.contains(&value) => "0".to_string(),
        Some(value) => value.to_string(),
    }
}

pub fn canonical_sdms_id(raw: Option<&str>) -> String {
    raw.and_then(canonical_number_string)
        .unwrap_or_else(|| "0".to_string())
}

/// Drop a trailing single-character token ("Jane K" -> "Jane"). Names with a
/// single token are never emptied.
pub fn strip_trailing_initial(first_name: &str) -> Option<String> {
    let tokens: Vec<&str> = first_name.split_whitespace().collect();
    match tokens.split_last() {
        Some((last, rest)) if !rest.is_empty() && last.chars().count() == 1 => Some(rest.join(" ")),
        _ => None,
    }
}

/// Blank text and NULL are the same value for comparisons.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn is_domestic(nation: Option<&str>, home_nation: &str) -> bool {
    nation.is_some_and(|nation| nation.trim() == home_nation)
}
