use std::collections::HashSet;

use splash_adapters::{read_rollback_log, RollbackLine};
use splash_storage::SplashDb;
use tracing::{debug, error, info, warn};

use super::{close_store, open_store};
use crate::{counters, JobContext, JobCounters, JobError};

/// Restore names from a rollback log. Only the earliest record per athlete is
/// applied, so stacked runs restore the names from before the first rename.
/// Bad lines and failed updates are logged and skipped; the remaining lines
/// are still applied.
pub(super) async fn run(ctx: &JobContext, tally: &mut JobCounters) -> Result<(), JobError> {
    let settings = &ctx.settings;
    info!(path = %settings.rollback_file.display(), "reading rollback log");
    let lines = read_rollback_log(&settings.rollback_file)?;

    let mut db = open_store(settings).await?;
    restore(&mut db, &lines, settings.write_mode.is_live(), tally).await;
    close_store(db).await;

    info!(
        restored = tally.get(counters::RESTORED),
        failed = tally.get(counters::FAILED_ROWS),
        "rollback complete"
    );
    Ok(())
}

async fn restore(db: &mut SplashDb, lines: &[RollbackLine], live: bool, tally: &mut JobCounters) {
    let mut seen = HashSet::new();
    for line in lines {
        let record = match &line.record {
            Ok(record) => record,
            Err(reason) => {
                error!(line = line.line, %reason, "unreadable rollback record");
                tally.bump(counters::FAILED_ROWS);
                continue;
            }
        };
        tally.bump(counters::ROLLBACK_RECORDS);
        if !seen.insert(record.athlete_id) {
            debug!(athlete_id = record.athlete_id, line = line.line, "later record for athlete, skipped");
            tally.bump(counters::SUPERSEDED);
            continue;
        }

        if !live {
            info!(
                athlete_id = record.athlete_id,
                first_name = %record.first_name,
                last_name = %record.last_name,
                "would restore athlete name"
            );
            tally.bump(counters::RESTORED);
            continue;
        }

        match db
            .set_athlete_names(record.athlete_id, &record.first_name, &record.last_name)
            .await
        {
            Ok(0) => {
                warn!(athlete_id = record.athlete_id, line = line.line, "athlete not found");
                tally.bump(counters::NOT_FOUND);
            }
            Ok(_) => {
                info!(
                    athlete_id = record.athlete_id,
                    first_name = %record.first_name,
                    last_name = %record.last_name,
                    "athlete name restored"
                );
                tally.bump(counters::RESTORED);
            }
            Err(err) => {
                error!(athlete_id = record.athlete_id, line = line.line, error = %err, "restore failed");
                tally.bump(counters::FAILED_ROWS);
            }
        }
    }
}
