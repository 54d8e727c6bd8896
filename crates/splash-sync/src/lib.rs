//! Reconciliation jobs: club, para classification, para name, rollback and
//! trailing-initial fixes applied to a meet database.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use splash_adapters::{AdapterError, RosterSource};
use splash_storage::{ConnectionString, StoreError};
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

mod jobs;
pub mod runner;
pub mod settings;

pub use runner::{JobHandle, JobRunner, RunnerError};
pub use settings::{Settings, SettingsError};

pub const CRATE_NAME: &str = "splash-sync";

/// Counter names used in [`JobReport::counters`]. Counts are staged changes;
/// whether they were written depends on [`JobReport::write_mode`].
pub mod counters {
    pub const REGIONS_UPDATED: &str = "regions_updated";
    pub const CLUB_NAMES_UPDATED: &str = "club_names_updated";
    pub const UNMATCHED: &str = "unmatched";
    pub const AMBIGUOUS: &str = "ambiguous";
    pub const MISMATCHES: &str = "mismatches";
    pub const FIELD_UPDATES: &str = "field_updates";
    pub const BELOW_MIN_LEVEL: &str = "below_min_level";
    pub const NAMES_UPDATED: &str = "names_updated";
    pub const ROLLBACK_RECORDS: &str = "rollback_records";
    pub const RESTORED: &str = "restored";
    pub const SUPERSEDED: &str = "superseded";
    pub const NOT_FOUND: &str = "not_found";
    pub const FAILED_ROWS: &str = "failed_rows";
    pub const INITIALS_REMOVED: &str = "initials_removed";
}

/// Whether detected changes are written or only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    DryRun,
    Live,
}

impl WriteMode {
    /// Maps the `update_database` setting.
    pub fn from_update_flag(update_database: bool) -> Self {
        if update_database {
            WriteMode::Live
        } else {
            WriteMode::DryRun
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, WriteMode::Live)
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteMode::DryRun => "dry-run",
            WriteMode::Live => "live",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    UpdateClubs,
    UpdatePara,
    UpdateParaNames,
    RollbackNames,
    RemoveInitials,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::UpdateClubs => "update-clubs",
            JobKind::UpdatePara => "update-para",
            JobKind::UpdateParaNames => "update-para-names",
            JobKind::RollbackNames => "rollback-names",
            JobKind::RemoveInitials => "remove-initials",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings snapshot taken when a job starts. Jobs never write settings.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub connection: ConnectionString,
    pub csv_file: PathBuf,
    pub rollback_file: PathBuf,
    pub write_mode: WriteMode,
    pub update_sdms: bool,
    /// Raw `para_level`; validated by the para classification job.
    pub para_level: String,
    pub home_nation: String,
}

impl JobSettings {
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self {
            connection: ConnectionString::new(
                settings.get_str("splash_db_driver")?,
                settings.get_str("splash_db")?,
            ),
            csv_file: PathBuf::from(settings.get_str("csv_file")?),
            rollback_file: PathBuf::from(settings.get_str("rollback_file")?),
            write_mode: WriteMode::from_update_flag(settings.get_bool("update_database")?),
            update_sdms: settings.get_bool("update_sdms")?,
            para_level: settings.get_str("para_level")?.to_string(),
            home_nation: settings.get_str("home_nation")?.trim().to_string(),
        })
    }
}

/// Everything a job needs; cloned into the background task.
#[derive(Clone)]
pub struct JobContext {
    pub settings: JobSettings,
    pub roster: Arc<dyn RosterSource>,
}

impl JobContext {
    pub fn new(settings: JobSettings, roster: Arc<dyn RosterSource>) -> Self {
        Self { settings, roster }
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("settings", &self.settings)
            .field("roster", &self.roster.describe())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("no active roster")]
    EmptyRoster,
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct JobCounters(BTreeMap<&'static str, usize>);

impl JobCounters {
    pub fn bump(&mut self, name: &'static str) {
        *self.0.entry(name).or_default() += 1;
    }

    pub fn get(&self, name: &str) -> usize {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.0.iter().map(|(name, count)| (*name, *count))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: JobKind,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub write_mode: WriteMode,
    pub outcome: JobOutcome,
    pub counters: JobCounters,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Completed
    }

    pub fn summary_line(&self) -> String {
        let status = match &self.outcome {
            JobOutcome::Completed => "completed".to_string(),
            JobOutcome::Failed { error } => format!("failed ({error})"),
        };
        let counts = self
            .counters
            .iter()
            .map(|(name, count)| format!("{name}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} {}: run_id={} mode={} {}",
            self.job, status, self.run_id, self.write_mode, counts
        )
        .trim_end()
        .to_string()
    }
}

/// Run one job to completion. Failures are logged and folded into the
/// report; nothing is raised to the caller.
pub async fn run_job(kind: JobKind, ctx: &JobContext) -> JobReport {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let write_mode = ctx.settings.write_mode;
    let mut tally = JobCounters::default();

    let span = info_span!("job", job = kind.name(), %run_id);
    let result = async {
        info!(mode = %write_mode, "job started");
        let result = jobs::dispatch(kind, ctx, &mut tally).await;
        match &result {
            Ok(()) => info!("job finished"),
            Err(err) => error!(error = %err, "job aborted"),
        }
        result
    }
    .instrument(span)
    .await;

    JobReport {
        job: kind,
        run_id,
        started_at,
        finished_at: Utc::now(),
        write_mode,
        outcome: match result {
            Ok(()) => JobOutcome::Completed,
            Err(err) => JobOutcome::Failed {
                error: err.to_string(),
            },
        },
        counters: tally,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_lists_counters_in_order() {
        let mut tally = JobCounters::default();
        tally.bump(counters::REGIONS_UPDATED);
        tally.bump(counters::CLUB_NAMES_UPDATED);
        tally.bump(counters::REGIONS_UPDATED);
        let report = JobReport {
            job: JobKind::UpdateClubs,
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            write_mode: WriteMode::DryRun,
            outcome: JobOutcome::Completed,
            counters: tally,
        };
        assert_eq!(
            report.summary_line(),
            "update-clubs completed: run_id=00000000-0000-0000-0000-000000000000 mode=dry-run club_names_updated=1 regions_updated=2"
        );
        assert_eq!(report.counters.get(counters::UNMATCHED), 0);
    }

    #[test]
    fn update_flag_selects_write_mode() {
        assert_eq!(WriteMode::from_update_flag(false), WriteMode::DryRun);
        assert!(WriteMode::from_update_flag(true).is_live());
    }
}
