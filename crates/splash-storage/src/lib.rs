//! Local record store access + HTTP fetch utilities for Splash Utilities.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use splash_core::{AthleteRow, ClubRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "splash-storage";

/// Driver name written into connection strings when none is configured.
pub const DEFAULT_DRIVER: &str = "{SQLite3 ODBC Driver}";

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` keeps the transport default.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub accept: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(accept) = &config.accept {
            let mut headers = HeaderMap::new();
            headers.insert(
                ACCEPT,
                HeaderValue::from_str(accept).context("building accept header")?,
            );
            builder = builder.default_headers(headers);
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Single GET; any non-2xx status is an error. No retries.
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            debug!(bytes = body.len(), "fetched");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid connection string {input:?}: {reason}")]
    InvalidConnectionString { input: String, reason: String },
    #[error("cannot connect to {connection}: {source}")]
    Connection {
        connection: String,
        source: sqlx::Error,
    },
    #[error("query failed [{statement}]: {source}")]
    Query {
        statement: String,
        source: sqlx::Error,
    },
    #[error("update failed [{statement}]: {source}")]
    Execute {
        statement: String,
        source: sqlx::Error,
    },
    #[error("closing database: {0}")]
    Close(#[source] sqlx::Error),
}

/// `DRIVER={driver};DBQ={path};` as stored in the settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub driver: String,
    pub path: PathBuf,
}

impl ConnectionString {
    pub fn new(driver: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            driver: driver.into(),
            path: path.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidConnectionString {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut driver = None;
        let mut path = None;
        for pair in split_attributes(input) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("attribute without '='"))?;
            match key.trim().to_ascii_uppercase().as_str() {
                "DRIVER" => driver = Some(value.trim().to_string()),
                "DBQ" => path = Some(PathBuf::from(value.trim())),
                _ => {}
            }
        }

        let path = path.ok_or_else(|| invalid("missing DBQ"))?;
        if path.as_os_str().is_empty() {
            return Err(invalid("empty DBQ"));
        }
        Ok(Self {
            driver: driver.unwrap_or_else(|| DEFAULT_DRIVER.to_string()),
            path,
        })
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DRIVER={};DBQ={};", self.driver, self.path.display())
    }
}

// Semicolons inside `{...}` belong to the value.
fn split_attributes(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Positional parameter for [`SplashDb::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(Option<String>),
    Integer(i64),
}

impl SqlParam {
    pub fn text(value: impl Into<String>) -> Self {
        SqlParam::Text(Some(value.into()))
    }

    pub fn null() -> Self {
        SqlParam::Text(None)
    }
}

/// Athlete columns the reconciliation jobs rewrite one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AthleteField {
    HandicapEx,
    HandicapS,
    HandicapSb,
    HandicapSm,
    SdmsId,
}

impl AthleteField {
    pub fn column(&self) -> &'static str {
        match self {
            AthleteField::HandicapEx => "HANDICAPEX",
            AthleteField::HandicapS => "HANDICAPS",
            AthleteField::HandicapSb => "HANDICAPSB",
            AthleteField::HandicapSm => "HANDICAPSM",
            AthleteField::SdmsId => "SDMSID",
        }
    }
}

const SELECT_CLUBS: &str = "SELECT CLUBID, CAST(CODE AS TEXT) AS CODE, CAST(NAME AS TEXT) AS NAME, \
     CAST(NATION AS TEXT) AS NATION, CAST(REGION AS TEXT) AS REGION FROM CLUB";

const SELECT_ATHLETES: &str = "SELECT ATHLETEID, CAST(FIRSTNAME AS TEXT) AS FIRSTNAME, \
     CAST(LASTNAME AS TEXT) AS LASTNAME, CAST(LICENSE AS TEXT) AS LICENSE, \
     CAST(HANDICAPEX AS TEXT) AS HANDICAPEX, CAST(HANDICAPS AS TEXT) AS HANDICAPS, \
     CAST(HANDICAPSB AS TEXT) AS HANDICAPSB, CAST(HANDICAPSM AS TEXT) AS HANDICAPSM, \
     CAST(SDMSID AS TEXT) AS SDMSID, CAST(NATION AS TEXT) AS NATION FROM ATHLETE";

const CREATE_TABLES: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS CLUB (
        CLUBID INTEGER PRIMARY KEY,
        CODE TEXT,
        NAME TEXT,
        NATION TEXT,
        REGION TEXT
    )",
    "CREATE TABLE IF NOT EXISTS ATHLETE (
        ATHLETEID INTEGER PRIMARY KEY,
        FIRSTNAME TEXT,
        LASTNAME TEXT,
        LICENSE TEXT,
        HANDICAPEX TEXT,
        HANDICAPS TEXT,
        HANDICAPSB TEXT,
        HANDICAPSM TEXT,
        SDMSID TEXT,
        NATION TEXT
    )",
];

/// One connection to the meet database. Every `execute` commits on its own.
#[derive(Debug)]
pub struct SplashDb {
    conn: SqliteConnection,
    connection_string: ConnectionString,
}

impl SplashDb {
    pub async fn connect(driver: &str, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open(&ConnectionString::new(driver, path.as_ref())).await
    }

    /// Opens an existing database file; a missing file is a connection error.
    pub async fn open(connection_string: &ConnectionString) -> Result<Self, StoreError> {
        let conn = SqliteConnectOptions::new()
            .filename(&connection_string.path)
            .create_if_missing(false)
            .connect()
            .await
            .map_err(|source| StoreError::Connection {
                connection: connection_string.to_string(),
                source,
            })?;
        debug!(connection = %connection_string, "database opened");
        Ok(Self {
            conn,
            connection_string: connection_string.clone(),
        })
    }

    /// Creates an empty database with the CLUB and ATHLETE tables.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let connection_string = ConnectionString::new(DEFAULT_DRIVER, path.as_ref());
        let conn = SqliteConnectOptions::new()
            .filename(&connection_string.path)
            .create_if_missing(true)
            .connect()
            .await
            .map_err(|source| StoreError::Connection {
                connection: connection_string.to_string(),
                source,
            })?;
        let mut db = Self {
            conn,
            connection_string,
        };
        for statement in CREATE_TABLES {
            db.execute(statement, &[]).await?;
        }
        Ok(db)
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    pub async fn query(&mut self, sql: &str) -> Result<Vec<SqliteRow>, StoreError> {
        sqlx::query(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|source| StoreError::Query {
                statement: sql.to_string(),
                source,
            })
    }

    /// Runs one statement and returns the number of rows it touched.
    pub async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, StoreError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlParam::Text(value) => query.bind(value.clone()),
                SqlParam::Integer(value) => query.bind(*value),
            };
        }
        let result = query
            .execute(&mut self.conn)
            .await
            .map_err(|source| StoreError::Execute {
                statement: sql.to_string(),
                source,
            })?;
        Ok(result.rows_affected())
    }

    pub async fn clubs(&mut self) -> Result<Vec<ClubRow>, StoreError> {
        let rows = self.query(SELECT_CLUBS).await?;
        rows.iter()
            .map(club_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| StoreError::Query {
                statement: SELECT_CLUBS.to_string(),
                source,
            })
    }

    pub async fn athletes(&mut self) -> Result<Vec<AthleteRow>, StoreError> {
        self.read_athletes(SELECT_ATHLETES.to_string()).await
    }

    /// Athletes ordered by last name, then first name.
    pub async fn athletes_by_name(&mut self) -> Result<Vec<AthleteRow>, StoreError> {
        self.read_athletes(format!("{SELECT_ATHLETES} ORDER BY LASTNAME, FIRSTNAME"))
            .await
    }

    async fn read_athletes(&mut self, sql: String) -> Result<Vec<AthleteRow>, StoreError> {
        let rows = self.query(&sql).await?;
        rows.iter()
            .map(athlete_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| StoreError::Query {
                statement: sql,
                source,
            })
    }

    pub async fn set_club_region(&mut self, club_id: i64, region: Option<&str>) -> Result<u64, StoreError> {
        self.execute(
            "UPDATE CLUB SET REGION = ? WHERE CLUBID = ?",
            &[SqlParam::Text(region.map(str::to_string)), SqlParam::Integer(club_id)],
        )
        .await
    }

    pub async fn set_club_name(&mut self, club_id: i64, name: &str) -> Result<u64, StoreError> {
        self.execute(
            "UPDATE CLUB SET NAME = ? WHERE CLUBID = ?",
            &[SqlParam::text(name), SqlParam::Integer(club_id)],
        )
        .await
    }

    pub async fn set_athlete_field(
        &mut self,
        athlete_id: i64,
        field: AthleteField,
        value: Option<&str>,
    ) -> Result<u64, StoreError> {
        let sql = format!("UPDATE ATHLETE SET {} = ? WHERE ATHLETEID = ?", field.column());
        self.execute(
            &sql,
            &[SqlParam::Text(value.map(str::to_string)), SqlParam::Integer(athlete_id)],
        )
        .await
    }

    pub async fn set_athlete_names(
        &mut self,
        athlete_id: i64,
        first_name: &str,
        last_name: &str,
    ) -> Result<u64, StoreError> {
        self.execute(
            "UPDATE ATHLETE SET FIRSTNAME = ?, LASTNAME = ? WHERE ATHLETEID = ?",
            &[
                SqlParam::text(first_name),
                SqlParam::text(last_name),
                SqlParam::Integer(athlete_id),
            ],
        )
        .await
    }

    pub async fn set_athlete_first_name(&mut self, athlete_id: i64, first_name: &str) -> Result<u64, StoreError> {
        self.execute(
            "UPDATE ATHLETE SET FIRSTNAME = ? WHERE ATHLETEID = ?",
            &[SqlParam::text(first_name), SqlParam::Integer(athlete_id)],
        )
        .await
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await.map_err(StoreError::Close)
    }
}

fn club_from_row(row: &SqliteRow) -> Result<ClubRow, sqlx::Error> {
    Ok(ClubRow {
        club_id: row.try_get("CLUBID")?,
        code: row.try_get("CODE")?,
        name: row.try_get("NAME")?,
        nation: row.try_get("NATION")?,
        region: row.try_get("REGION")?,
    })
}

fn athlete_from_row(row: &SqliteRow) -> Result<AthleteRow, sqlx::Error> {
    Ok(AthleteRow {
        athlete_id: row.try_get("ATHLETEID")?,
        first_name: row.try_get("FIRSTNAME")?,
        last_name: row.try_get("LASTNAME")?,
        license: row.try_get("LICENSE")?,
        handicap_ex: row.try_get("HANDICAPEX")?,
        handicap_s: row.try_get("HANDICAPS")?,
        handicap_sb: row.try_get("HANDICAPSB")?,
        handicap_sm: row.try_get("HANDICAPSM")?,
        sdms_id: row.try_get("SDMSID")?,
        nation: row.try_get("NATION")?,
    })
}
