use splash_adapters::RollbackLogWriter;
use splash_core::{is_domestic, non_blank, RollbackRecord};
use splash_storage::SplashDb;
use tracing::{debug, info};

use super::{close_store, fetch_roster, open_store, roster_index, roster_match};
use crate::{counters, JobContext, JobCounters, JobError};

/// Adopt roster given/family names, logging prior names for rollback.
pub(super) async fn run(ctx: &JobContext, tally: &mut JobCounters) -> Result<(), JobError> {
    let mut db = open_store(&ctx.settings).await?;
    let result = reconcile(&mut db, ctx, tally).await;
    close_store(db).await;
    result
}

async fn reconcile(db: &mut SplashDb, ctx: &JobContext, tally: &mut JobCounters) -> Result<(), JobError> {
    let settings = &ctx.settings;
    let roster = fetch_roster(ctx).await?;
    info!(total = roster.len(), "active roster fetched");
    let athletes = db.athletes().await?;
    info!(total = athletes.len(), "athletes read");

    let mut rollback_log: Option<RollbackLogWriter> = None;
    let index = roster_index(&roster);
    for athlete in &athletes {
        if !is_domestic(athlete.nation.as_deref(), &settings.home_nation) {
            continue;
        }
        let Some(entry) = roster_match(&index, athlete, tally) else {
            continue;
        };
        let (Some(given), Some(family)) = (
            non_blank(entry.given_name.as_deref()),
            non_blank(entry.family_name.as_deref()),
        ) else {
            debug!(license = %entry.snc_id, "roster entry without a full name, skipped");
            continue;
        };

        let first = athlete.first_name.as_deref().unwrap_or_default();
        let last = athlete.last_name.as_deref().unwrap_or_default();
        if first == given && last == family {
            continue;
        }

        let writer = match rollback_log.take() {
            Some(writer) => writer,
            None => {
                let writer = RollbackLogWriter::open(&settings.rollback_file)?;
                info!(path = %writer.path().display(), "rollback log opened");
                writer
            }
        };
        let writer = rollback_log.insert(writer);
        writer.append(&RollbackRecord {
            athlete_id: athlete.athlete_id,
            first_name: first.to_string(),
            last_name: last.to_string(),
        })?;
        tally.bump(counters::ROLLBACK_RECORDS);
        tally.bump(counters::NAMES_UPDATED);

        if settings.write_mode.is_live() {
            db.set_athlete_names(athlete.athlete_id, given, family).await?;
            info!(
                athlete_id = athlete.athlete_id,
                from = %format!("{first} {last}"),
                to = %format!("{given} {family}"),
                "athlete renamed"
            );
        } else {
            info!(
                athlete_id = athlete.athlete_id,
                from = %format!("{first} {last}"),
                to = %format!("{given} {family}"),
                "would rename athlete"
            );
        }
    }

    info!(
        names = tally.get(counters::NAMES_UPDATED),
        rollback_records = rollback_log.as_ref().map_or(0, RollbackLogWriter::written),
        "para name update complete"
    );
    Ok(())
}
