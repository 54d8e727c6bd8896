//! External reference sources: active roster feed, club CSV import and the
//! name rollback log.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use splash_core::{canonical_number_string, ClubCsvRecord, RollbackRecord, RosterEntry};
use splash_storage::{FetchError, HttpClientConfig, HttpFetcher};
use thiserror::Error;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "splash-adapters";

pub const ACTIVE_ROSTER_URL: &str = "https://rankings.edey.org/api/ActiveRoster";
pub const ROSTER_USER_AGENT: &str = "Chrome/126.0.0.0";

pub const ROLLBACK_HEADER: [&str; 3] = ["ATHLETEID", "FIRSTNAME", "LASTNAME"];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{} not found", path.display())]
    NotFound { path: PathBuf },
    #[error("i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv {}: {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("parsing roster json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] FetchError),
}

impl AdapterError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            AdapterError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            AdapterError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        let missing = matches!(
            source.kind(),
            csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound
        );
        if missing {
            AdapterError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            AdapterError::Csv {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Provider of the authoritative roster. Implementations swallow failures:
/// an empty list means "no data", and callers abort on it.
#[async_trait]
pub trait RosterSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch_active_roster(&self) -> Vec<RosterEntry>;
}

/// Roster feed wire shape. Every field may arrive as string, number or null.
#[derive(Debug, Deserialize)]
struct RawRosterEntry {
    #[serde(rename = "SNC_ID", default, deserialize_with = "lenient_string")]
    snc_id: Option<String>,
    #[serde(rename = "Given_Name", default, deserialize_with = "lenient_string")]
    given_name: Option<String>,
    #[serde(rename = "Family_Name", default, deserialize_with = "lenient_string")]
    family_name: Option<String>,
    #[serde(rename = "S", default, deserialize_with = "lenient_string")]
    s: Option<String>,
    #[serde(rename = "SB", default, deserialize_with = "lenient_string")]
    sb: Option<String>,
    #[serde(rename = "SM", default, deserialize_with = "lenient_string")]
    sm: Option<String>,
    #[serde(rename = "Exceptions", default, deserialize_with = "lenient_string")]
    exceptions: Option<String>,
    #[serde(rename = "SDMS_ID", default, deserialize_with = "lenient_string")]
    sdms_id: Option<String>,
    #[serde(rename = "Level", default, deserialize_with = "lenient_string")]
    level: Option<String>,
    #[serde(
        rename = "Nation",
        alias = "Nationality",
        default,
        deserialize_with = "lenient_string"
    )]
    nation: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => None,
        JsonValue::String(text) => Some(text),
        JsonValue::Number(number) => Some(number.to_string()),
        JsonValue::Bool(flag) => Some(flag.to_string()),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    })
}

impl RawRosterEntry {
    fn into_entry(self) -> Option<RosterEntry> {
        let snc_id = self.snc_id.as_deref().and_then(canonical_number_string)?;
        Some(RosterEntry {
            snc_id,
            given_name: self.given_name,
            family_name: self.family_name,
            s: self.s,
            sb: self.sb,
            sm: self.sm,
            exceptions: self.exceptions,
            sdms_id: self.sdms_id,
            level: self.level,
            nation: self.nation,
        })
    }
}

/// Parse the roster feed body, canonicalising every `SNC_ID`.
pub fn parse_roster_json(bytes: &[u8]) -> Result<Vec<RosterEntry>, AdapterError> {
    let raw: Vec<RawRosterEntry> = serde_json::from_slice(bytes)?;
    let total = raw.len();
    let entries: Vec<RosterEntry> = raw
        .into_iter()
        .filter_map(|entry| {
            let given = entry.given_name.clone().unwrap_or_default();
            let family = entry.family_name.clone().unwrap_or_default();
            let parsed = entry.into_entry();
            if parsed.is_none() {
                warn!(given = %given, family = %family, "roster entry without a usable SNC_ID dropped");
            }
            parsed
        })
        .collect();
    if entries.len() != total {
        warn!(dropped = total - entries.len(), "roster entries dropped");
    }
    Ok(entries)
}

/// HTTP client for the live roster endpoint.
#[derive(Debug, Clone)]
pub struct ActiveRosterClient {
    http: HttpFetcher,
    url: String,
}

impl ActiveRosterClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_url(ACTIVE_ROSTER_URL)
    }

    pub fn with_url(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            user_agent: Some(ROSTER_USER_AGENT.to_string()),
            accept: Some("*/*".to_string()),
            ..Default::default()
        })?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub async fn try_fetch(&self) -> Result<Vec<RosterEntry>, AdapterError> {
        let response = self.http.fetch_bytes(&self.url).await?;
        parse_roster_json(&response.body)
    }
}

#[async_trait]
impl RosterSource for ActiveRosterClient {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_active_roster(&self) -> Vec<RosterEntry> {
        match self.try_fetch().await {
            Ok(roster) => {
                info!(total = roster.len(), "active roster retrieved");
                roster
            }
            Err(err) => {
                error!(url = %self.url, error = %err, "error retrieving active roster");
                Vec::new()
            }
        }
    }
}

/// Fixed roster, e.g. a saved copy of the feed.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    label: String,
    entries: Vec<RosterEntry>,
}

impl StaticRoster {
    pub fn new(label: impl Into<String>, entries: Vec<RosterEntry>) -> Self {
        Self {
            label: label.into(),
            entries,
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| AdapterError::io(path, err))?;
        Ok(Self::new(path.display().to_string(), parse_roster_json(&bytes)?))
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }
}

#[async_trait]
impl RosterSource for StaticRoster {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn fetch_active_roster(&self) -> Vec<RosterEntry> {
        info!(source = %self.label, total = self.entries.len(), "active roster loaded");
        self.entries.clone()
    }
}

/// Read the club reference file (header-driven columns).
pub fn read_club_csv(path: impl AsRef<Path>) -> Result<Vec<ClubCsvRecord>, AdapterError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|err| AdapterError::csv(path, err))?;
    reader
        .deserialize::<ClubCsvRecord>()
        .map(|row| row.map_err(|err| AdapterError::csv(path, err)))
        .collect()
}

/// Appends prior names to the rollback log, flushing every record. Existing
/// records are never rewritten.
pub struct RollbackLogWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    written: usize,
}

impl RollbackLogWriter {
    /// Opens `path` for appending; the header is written only when the file
    /// is new or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| AdapterError::io(parent, err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| AdapterError::io(&path, err))?;
        let is_empty = file
            .metadata()
            .map_err(|err| AdapterError::io(&path, err))?
            .len()
            == 0;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_empty {
            writer
                .write_record(ROLLBACK_HEADER)
                .map_err(|err| AdapterError::csv(&path, err))?;
            writer.flush().map_err(|err| AdapterError::io(&path, err))?;
        }
        Ok(Self {
            path,
            writer,
            written: 0,
        })
    }

    pub fn append(&mut self, record: &RollbackRecord) -> Result<(), AdapterError> {
        self.writer
            .write_record([
                record.athlete_id.to_string().as_str(),
                record.first_name.as_str(),
                record.last_name.as_str(),
            ])
            .map_err(|err| AdapterError::csv(&self.path, err))?;
        self.writer
            .flush()
            .map_err(|err| AdapterError::io(&self.path, err))?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

/// One data line of a rollback log; malformed lines carry the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackLine {
    pub line: u64,
    pub record: Result<RollbackRecord, String>,
}

/// Read a rollback log, skipping the header row. Columns are positional.
pub fn read_rollback_log(path: impl AsRef<Path>) -> Result<Vec<RollbackLine>, AdapterError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| AdapterError::csv(path, err))?;

    let mut lines = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        // header is line 1
        let line = idx as u64 + 2;
        let record = match row {
            Ok(row) => parse_rollback_row(&row),
            Err(err) => Err(err.to_string()),
        };
        lines.push(RollbackLine { line, record });
    }
    Ok(lines)
}

fn parse_rollback_row(row: &csv::StringRecord) -> Result<RollbackRecord, String> {
    if row.len() < 3 {
        return Err(format!("expected 3 columns, found {}", row.len()));
    }
    let athlete_id = row[0]
        .trim()
        .parse::<i64>()
        .map_err(|err| format!("bad athlete id {:?}: {err}", &row[0]))?;
    Ok(RollbackRecord {
        athlete_id,
        first_name: row[1].to_string(),
        last_name: row[2].to_string(),
    })
}
