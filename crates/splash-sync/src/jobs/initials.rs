use splash_core::{is_domestic, strip_trailing_initial};
use splash_storage::SplashDb;
use tracing::{error, info};

use super::{close_store, open_store};
use crate::{counters, JobContext, JobCounters, JobError, JobSettings};

/// Drop trailing middle initials from first names ("Jane K" -> "Jane").
/// The first failed update aborts the run.
pub(super) async fn run(ctx: &JobContext, tally: &mut JobCounters) -> Result<(), JobError> {
    let mut db = open_store(&ctx.settings).await?;
    let result = clean(&mut db, &ctx.settings, tally).await;
    close_store(db).await;
    result
}

async fn clean(db: &mut SplashDb, settings: &JobSettings, tally: &mut JobCounters) -> Result<(), JobError> {
    let athletes = db.athletes_by_name().await?;
    info!(total = athletes.len(), "athletes read");

    for athlete in &athletes {
        if !is_domestic(athlete.nation.as_deref(), &settings.home_nation) {
            continue;
        }
        let Some(current) = athlete.first_name.as_deref() else {
            continue;
        };
        let Some(cleaned) = strip_trailing_initial(current) else {
            continue;
        };
        tally.bump(counters::INITIALS_REMOVED);

        if settings.write_mode.is_live() {
            if let Err(err) = db.set_athlete_first_name(athlete.athlete_id, &cleaned).await {
                error!(
                    athlete_id = athlete.athlete_id,
                    from = current,
                    to = %cleaned,
                    error = %err,
                    "first name update failed, stopping"
                );
                return Err(err.into());
            }
            info!(athlete_id = athlete.athlete_id, from = current, to = %cleaned, "trailing initial removed");
        } else {
            info!(athlete_id = athlete.athlete_id, from = current, to = %cleaned, "would remove trailing initial");
        }
    }

    info!(removed = tally.get(counters::INITIALS_REMOVED), "trailing initial cleanup complete");
    Ok(())
}
