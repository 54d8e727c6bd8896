mod clubs;
mod initials;
mod para;
mod para_names;
mod rollback;

use splash_core::{canonical_number_string, AthleteRow, Match, MatchIndex, RosterEntry};
use splash_storage::SplashDb;
use tracing::{debug, info, warn};

use crate::{counters, JobContext, JobCounters, JobError, JobKind, JobSettings};

pub(crate) async fn dispatch(kind: JobKind, ctx: &JobContext, tally: &mut JobCounters) -> Result<(), JobError> {
    match kind {
        JobKind::UpdateClubs => clubs::run(ctx, tally).await,
        JobKind::UpdatePara => para::run(ctx, tally).await,
        JobKind::UpdateParaNames => para_names::run(ctx, tally).await,
        JobKind::RollbackNames => rollback::run(ctx, tally).await,
        JobKind::RemoveInitials => initials::run(ctx, tally).await,
    }
}

async fn open_store(settings: &JobSettings) -> Result<SplashDb, JobError> {
    info!(connection = %settings.connection, "opening database");
    Ok(SplashDb::open(&settings.connection).await?)
}

/// Close errors are logged; they never replace the job result.
async fn close_store(db: SplashDb) {
    if let Err(err) = db.close().await {
        warn!(error = %err, "error closing database");
    }
}

async fn fetch_roster(ctx: &JobContext) -> Result<Vec<RosterEntry>, JobError> {
    let roster = ctx.roster.fetch_active_roster().await;
    if roster.is_empty() {
        return Err(JobError::EmptyRoster);
    }
    Ok(roster)
}

fn roster_index(roster: &[RosterEntry]) -> MatchIndex<'_, RosterEntry> {
    MatchIndex::build(roster, |entry| entry.snc_id.as_str())
}

/// Unique roster entry for a local athlete. Athletes without a roster entry
/// are expected (non-para), so only duplicates are worth a warning.
fn roster_match<'a>(
    index: &MatchIndex<'a, RosterEntry>,
    athlete: &AthleteRow,
    tally: &mut JobCounters,
) -> Option<&'a RosterEntry> {
    let Some(license) = athlete.join_key().and_then(canonical_number_string) else {
        tally.bump(counters::UNMATCHED);
        return None;
    };
    match index.lookup(&license) {
        Match::Unique(entry) => Some(entry),
        Match::Missing => {
            debug!(athlete = %athlete.display_name(), %license, "not on active roster");
            tally.bump(counters::UNMATCHED);
            None
        }
        Match::Duplicate(matches) => {
            warn!(
                athlete = %athlete.display_name(),
                %license,
                matches,
                "licence appears more than once on active roster, skipped"
            );
            tally.bump(counters::AMBIGUOUS);
            None
        }
    }
}
