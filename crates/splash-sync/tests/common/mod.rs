#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use splash_adapters::{RosterSource, StaticRoster};
use splash_core::{AthleteRow, ClubRow, RosterEntry};
use splash_storage::{AthleteField, ConnectionString, SplashDb, SqlParam};
use splash_sync::{JobContext, JobSettings, WriteMode};
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
    pub db_path: PathBuf,
}

impl Workspace {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("meet.sqlite");
        SplashDb::create(&db_path)
            .await
            .expect("create db")
            .close()
            .await
            .expect("close db");
        Self { dir, db_path }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn settings(&self, write_mode: WriteMode) -> JobSettings {
        JobSettings {
            connection: ConnectionString::new("{SQLite3 ODBC Driver}", &self.db_path),
            csv_file: self.path("ClubList.csv"),
            rollback_file: self.path("rollback.csv"),
            write_mode,
            update_sdms: false,
            para_level: "3".to_string(),
            home_nation: "CAN".to_string(),
        }
    }

    pub fn context(&self, write_mode: WriteMode, roster: Vec<RosterEntry>) -> JobContext {
        context_with(self.settings(write_mode), roster)
    }

    pub async fn db(&self) -> SplashDb {
        SplashDb::connect("{SQLite3 ODBC Driver}", &self.db_path)
            .await
            .expect("open db")
    }

    pub async fn add_club(&self, id: i64, code: &str, name: &str, nation: &str, region: Option<&str>) {
        let mut db = self.db().await;
        db.execute(
            "INSERT INTO CLUB (CLUBID, CODE, NAME, NATION, REGION) VALUES (?, ?, ?, ?, ?)",
            &[
                SqlParam::Integer(id),
                SqlParam::text(code),
                SqlParam::text(name),
                SqlParam::text(nation),
                SqlParam::Text(region.map(str::to_string)),
            ],
        )
        .await
        .expect("insert club");
        db.close().await.expect("close db");
    }

    pub async fn add_athlete(&self, id: i64, first: &str, last: &str, license: &str, nation: &str) {
        let mut db = self.db().await;
        db.execute(
            "INSERT INTO ATHLETE (ATHLETEID, FIRSTNAME, LASTNAME, LICENSE, NATION) VALUES (?, ?, ?, ?, ?)",
            &[
                SqlParam::Integer(id),
                SqlParam::text(first),
                SqlParam::text(last),
                SqlParam::text(license),
                SqlParam::text(nation),
            ],
        )
        .await
        .expect("insert athlete");
        db.close().await.expect("close db");
    }

    pub async fn set_field(&self, id: i64, field: AthleteField, value: &str) {
        let mut db = self.db().await;
        db.set_athlete_field(id, field, Some(value))
            .await
            .expect("set field");
        db.close().await.expect("close db");
    }

    pub async fn athlete(&self, id: i64) -> AthleteRow {
        let mut db = self.db().await;
        let athletes = db.athletes().await.expect("read athletes");
        db.close().await.expect("close db");
        athletes
            .into_iter()
            .find(|athlete| athlete.athlete_id == id)
            .expect("athlete present")
    }

    pub async fn club(&self, id: i64) -> ClubRow {
        let mut db = self.db().await;
        let clubs = db.clubs().await.expect("read clubs");
        db.close().await.expect("close db");
        clubs
            .into_iter()
            .find(|club| club.club_id == id)
            .expect("club present")
    }

    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).expect("write file");
        path
    }
}

pub fn context_with(settings: JobSettings, roster: Vec<RosterEntry>) -> JobContext {
    let source: Arc<dyn RosterSource> = Arc::new(StaticRoster::new("test roster", roster));
    JobContext::new(settings, source)
}

pub fn roster_entry(snc_id: &str, given: &str, family: &str) -> RosterEntry {
    RosterEntry {
        snc_id: snc_id.to_string(),
        given_name: Some(given.to_string()),
        family_name: Some(family.to_string()),
        s: None,
        sb: None,
        sm: None,
        exceptions: None,
        sdms_id: None,
        level: Some("3".to_string()),
        nation: Some("CAN".to_string()),
    }
}

pub fn read_text(path: &Path) -> String {
    std::fs::read_to_string(path).expect("read file")
}
