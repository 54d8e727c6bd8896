use splash_adapters::read_club_csv;
use splash_core::{is_domestic, non_blank, ClubCsvRecord, Match, MatchIndex};
use splash_storage::SplashDb;
use tracing::{error, info};

use super::{close_store, open_store};
use crate::{counters, JobContext, JobCounters, JobError, JobSettings};

/// Region (province) and preferred-name sync for domestic clubs.
pub(super) async fn run(ctx: &JobContext, tally: &mut JobCounters) -> Result<(), JobError> {
    let settings = &ctx.settings;
    info!(csv = %settings.csv_file.display(), "reading club csv");
    let records = read_club_csv(&settings.csv_file)?;
    info!(total = records.len(), "club csv read");

    let mut db = open_store(settings).await?;
    let result = reconcile(&mut db, &records, settings, tally).await;
    close_store(db).await;
    result
}

async fn reconcile(
    db: &mut SplashDb,
    records: &[ClubCsvRecord],
    settings: &JobSettings,
    tally: &mut JobCounters,
) -> Result<(), JobError> {
    let clubs = db.clubs().await?;
    info!(total = clubs.len(), "clubs read");

    let index = MatchIndex::build(records, |record| record.club_code.trim());
    let live = settings.write_mode.is_live();

    for club in &clubs {
        if !is_domestic(club.nation.as_deref(), &settings.home_nation) {
            continue;
        }
        let code = club.code.as_deref().unwrap_or_default().trim();
        let record = match index.lookup(code) {
            Match::Unique(record) => record,
            Match::Missing => {
                error!(club_code = code, "club code not found in csv");
                tally.bump(counters::UNMATCHED);
                continue;
            }
            Match::Duplicate(matches) => {
                error!(club_code = code, matches, "club code listed more than once in csv");
                tally.bump(counters::AMBIGUOUS);
                continue;
            }
        };

        let province = non_blank(record.province.as_deref());
        if non_blank(club.region.as_deref()) != province {
            tally.bump(counters::REGIONS_UPDATED);
            if live {
                db.set_club_region(club.club_id, province).await?;
                info!(club_code = code, province = province.unwrap_or_default(), "club region updated");
            } else {
                info!(club_code = code, province = province.unwrap_or_default(), "would update club region");
            }
        }

        if let Some(preferred) = record.usable_preferred_name() {
            if club.name.as_deref() != Some(preferred) {
                tally.bump(counters::CLUB_NAMES_UPDATED);
                let current = club.name.as_deref().unwrap_or_default();
                if live {
                    db.set_club_name(club.club_id, preferred).await?;
                    info!(club_code = code, from = current, to = preferred, "club renamed to preferred name");
                } else {
                    info!(club_code = code, from = current, to = preferred, "would rename club to preferred name");
                }
            }
        }
    }

    info!(
        regions = tally.get(counters::REGIONS_UPDATED),
        names = tally.get(counters::CLUB_NAMES_UPDATED),
        "club update complete"
    );
    Ok(())
}
