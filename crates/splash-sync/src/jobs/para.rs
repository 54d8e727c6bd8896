use splash_core::{canonical_sdms_id, is_domestic, non_blank, AthleteRow, ParaLevel, RosterEntry};
use splash_storage::{AthleteField, SplashDb};
use tracing::{info, warn};

use super::{close_store, fetch_roster, open_store, roster_index, roster_match};
use crate::{counters, JobContext, JobCounters, JobError, JobSettings};

pub(super) async fn run(ctx: &JobContext, tally: &mut JobCounters) -> Result<(), JobError> {
    let settings = &ctx.settings;
    let min_level = settings
        .para_level
        .trim()
        .parse::<ParaLevel>()
        .map_err(|err| JobError::InvalidSetting {
            key: "para_level",
            reason: err.to_string(),
        })?;

    let mut db = open_store(settings).await?;
    let result = reconcile(&mut db, ctx, min_level, tally).await;
    close_store(db).await;
    result
}

async fn reconcile(
    db: &mut SplashDb,
    ctx: &JobContext,
    min_level: ParaLevel,
    tally: &mut JobCounters,
) -> Result<(), JobError> {
    let settings = &ctx.settings;
    let roster = fetch_roster(ctx).await?;
    info!(total = roster.len(), "active roster fetched");
    let athletes = db.athletes().await?;
    info!(total = athletes.len(), "athletes read");

    let index = roster_index(&roster);
    for athlete in &athletes {
        if !is_domestic(athlete.nation.as_deref(), &settings.home_nation) {
            continue;
        }
        let Some(entry) = roster_match(&index, athlete, tally) else {
            continue;
        };
        sync_athlete(db, settings, min_level, athlete, entry, tally).await?;
    }

    info!(
        mismatches = tally.get(counters::MISMATCHES),
        updates = tally.get(counters::FIELD_UPDATES),
        below_min_level = tally.get(counters::BELOW_MIN_LEVEL),
        "para classification update complete"
    );
    Ok(())
}

/// One classification field of an athlete compared against the roster.
struct FieldCheck<'a> {
    field: AthleteField,
    local: Option<&'a str>,
    roster: Option<String>,
    writable: bool,
}

async fn sync_athlete(
    db: &mut SplashDb,
    settings: &JobSettings,
    min_level: ParaLevel,
    athlete: &AthleteRow,
    entry: &RosterEntry,
    tally: &mut JobCounters,
) -> Result<(), JobError> {
    let mut checks = vec![
        FieldCheck {
            field: AthleteField::HandicapEx,
            local: non_blank(athlete.handicap_ex.as_deref()),
            roster: non_blank(entry.exceptions.as_deref()).map(str::to_string),
            writable: true,
        },
        FieldCheck {
            field: AthleteField::HandicapS,
            local: athlete.handicap_s.as_deref(),
            roster: Some(entry.sport_class_s()),
            writable: true,
        },
        FieldCheck {
            field: AthleteField::HandicapSb,
            local: athlete.handicap_sb.as_deref(),
            roster: Some(entry.sport_class_sb()),
            writable: true,
        },
        FieldCheck {
            field: AthleteField::HandicapSm,
            local: athlete.handicap_sm.as_deref(),
            roster: Some(entry.sport_class_sm()),
            writable: true,
        },
    ];
    if entry.is_international() {
        let local_sdms = canonical_sdms_id(athlete.sdms_id.as_deref());
        let roster_sdms = entry.canonical_sdms_id();
        if local_sdms != roster_sdms {
            checks.push(FieldCheck {
                field: AthleteField::SdmsId,
                local: athlete.sdms_id.as_deref(),
                roster: Some(roster_sdms),
                writable: settings.update_sdms,
            });
        }
    }

    let name = athlete.display_name();
    for check in checks {
        let roster_value = check.roster.as_deref();
        // SDMS ids were already compared in canonical form
        if check.field != AthleteField::SdmsId && check.local == roster_value {
            continue;
        }
        tally.bump(counters::MISMATCHES);
        warn!(
            athlete = %name,
            field = check.field.column(),
            local = check.local.unwrap_or_default(),
            roster = roster_value.unwrap_or_default(),
            "classification mismatch"
        );
        if !check.writable {
            continue;
        }
        tally.bump(counters::FIELD_UPDATES);
        if settings.write_mode.is_live() {
            db.set_athlete_field(athlete.athlete_id, check.field, roster_value)
                .await?;
            info!(athlete = %name, field = check.field.column(), "classification updated");
        } else {
            info!(athlete = %name, field = check.field.column(), "would update classification");
        }
    }

    if !min_level.admits(entry.level.as_deref()) {
        tally.bump(counters::BELOW_MIN_LEVEL);
        warn!(
            athlete = %name,
            level = entry.level.as_deref().unwrap_or_default(),
            min_level = %min_level,
            "athlete below minimum para level"
        );
    }
    Ok(())
}
