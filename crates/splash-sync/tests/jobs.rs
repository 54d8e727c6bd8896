mod common;

use common::{context_with, read_text, roster_entry, Workspace};
use splash_core::RosterEntry;
use splash_storage::AthleteField;
use splash_sync::{counters, run_job, JobKind, JobOutcome, WriteMode};

const CLUB_CSV: &str = "\
Club Code,Province,Club Name,Preferred Club Name
ABC,BC,Alpha Swim Club,Alpha Club
DUP,ON,Dup One,
DUP,QC,Dup Two,
XYZ,AB,Foreign Club,Foreign Preferred
SAME,QC,Same Club,X
";

async fn seed_clubs(ws: &Workspace) {
    ws.write_file("ClubList.csv", CLUB_CSV);
    ws.add_club(1, "ABC", "Alpha Swim Club", "CAN", Some("ON")).await;
    ws.add_club(2, "DUP", "Dup Club", "CAN", None).await;
    ws.add_club(3, "XYZ", "Foreign Club", "USA", None).await;
    ws.add_club(4, "MISS", "Missing Club", "CAN", Some("MB")).await;
    ws.add_club(5, "SAME", "Same Club", "CAN", Some("QC")).await;
}

#[tokio::test]
async fn club_sync_applies_region_and_preferred_name() {
    let ws = Workspace::new().await;
    seed_clubs(&ws).await;

    let report = run_job(JobKind::UpdateClubs, &ws.context(WriteMode::Live, vec![])).await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.counters.get(counters::REGIONS_UPDATED), 1);
    assert_eq!(report.counters.get(counters::CLUB_NAMES_UPDATED), 1);
    assert_eq!(report.counters.get(counters::AMBIGUOUS), 1);
    assert_eq!(report.counters.get(counters::UNMATCHED), 1);

    let alpha = ws.club(1).await;
    assert_eq!(alpha.region.as_deref(), Some("BC"));
    assert_eq!(alpha.name.as_deref(), Some("Alpha Club"));
    assert_eq!(ws.club(2).await.region, None);
    let foreign = ws.club(3).await;
    assert_eq!(foreign.region, None);
    assert_eq!(foreign.name.as_deref(), Some("Foreign Club"));
    assert_eq!(ws.club(4).await.region.as_deref(), Some("MB"));
    assert_eq!(ws.club(5).await.name.as_deref(), Some("Same Club"));

    let again = run_job(JobKind::UpdateClubs, &ws.context(WriteMode::Live, vec![])).await;
    assert!(again.is_success());
    assert_eq!(again.counters.get(counters::REGIONS_UPDATED), 0);
    assert_eq!(again.counters.get(counters::CLUB_NAMES_UPDATED), 0);
}

#[tokio::test]
async fn club_sync_dry_run_reports_without_writing() {
    let ws = Workspace::new().await;
    seed_clubs(&ws).await;

    let report = run_job(JobKind::UpdateClubs, &ws.context(WriteMode::DryRun, vec![])).await;
    assert!(report.is_success());
    assert_eq!(report.write_mode, WriteMode::DryRun);
    assert_eq!(report.counters.get(counters::REGIONS_UPDATED), 1);

    let alpha = ws.club(1).await;
    assert_eq!(alpha.region.as_deref(), Some("ON"));
    assert_eq!(alpha.name.as_deref(), Some("Alpha Swim Club"));
}

#[tokio::test]
async fn club_sync_without_csv_aborts() {
    let ws = Workspace::new().await;
    ws.add_club(1, "ABC", "Alpha Swim Club", "CAN", Some("ON")).await;

    let report = run_job(JobKind::UpdateClubs, &ws.context(WriteMode::Live, vec![])).await;
    match &report.outcome {
        JobOutcome::Failed { error } => assert!(error.contains("not found"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(ws.club(1).await.region.as_deref(), Some("ON"));
}

/// Athletes:
/// 1 CAN licence 00123, S=0 SB=5: SB, SM and SDMS differ from the roster.
/// 2 USA, differs but foreign.
/// 3 CAN, licence listed twice on the roster.
/// 4 CAN, matches but below the minimum level.
/// 5 CAN, not on the roster.
async fn seed_para(ws: &Workspace) -> Vec<RosterEntry> {
    ws.add_athlete(1, "Jon", "Smith", "00123", "CAN").await;
    ws.set_field(1, AthleteField::HandicapS, "0").await;
    ws.set_field(1, AthleteField::HandicapSb, "5").await;
    ws.add_athlete(2, "Ann", "Lee", "124", "USA").await;
    ws.set_field(2, AthleteField::HandicapSb, "1").await;
    ws.add_athlete(3, "Max", "Roe", "125", "CAN").await;
    ws.add_athlete(4, "Kim", "Poe", "126", "CAN").await;
    for field in [AthleteField::HandicapS, AthleteField::HandicapSb, AthleteField::HandicapSm] {
        ws.set_field(4, field, "0").await;
    }
    ws.add_athlete(5, "Lou", "Doe", "999", "CAN").await;

    vec![
        RosterEntry {
            s: Some("NE".to_string()),
            sb: Some("6".to_string()),
            sm: Some("7".to_string()),
            sdms_id: Some("4567.0".to_string()),
            level: Some("Int".to_string()),
            ..roster_entry("123", "Jon", "Smith")
        },
        RosterEntry {
            sb: Some("9".to_string()),
            ..roster_entry("124", "Ann", "Lee")
        },
        RosterEntry {
            sb: Some("9".to_string()),
            ..roster_entry("125", "Max", "Roe")
        },
        RosterEntry {
            sb: Some("9".to_string()),
            ..roster_entry("125", "Maxine", "Roe")
        },
        RosterEntry {
            level: Some("1".to_string()),
            ..roster_entry("126", "Kim", "Poe")
        },
    ]
}

#[tokio::test]
async fn para_sync_updates_classes_but_not_sdms_without_flag() {
    let ws = Workspace::new().await;
    let roster = seed_para(&ws).await;

    let report = run_job(JobKind::UpdatePara, &ws.context(WriteMode::Live, roster)).await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.counters.get(counters::MISMATCHES), 3);
    assert_eq!(report.counters.get(counters::FIELD_UPDATES), 2);
    assert_eq!(report.counters.get(counters::AMBIGUOUS), 1);
    assert_eq!(report.counters.get(counters::UNMATCHED), 1);
    assert_eq!(report.counters.get(counters::BELOW_MIN_LEVEL), 1);

    let jon = ws.athlete(1).await;
    assert_eq!(jon.handicap_s.as_deref(), Some("0"));
    assert_eq!(jon.handicap_sb.as_deref(), Some("6"));
    assert_eq!(jon.handicap_sm.as_deref(), Some("7"));
    assert_eq!(jon.handicap_ex, None);
    assert_eq!(jon.sdms_id, None);

    assert_eq!(ws.athlete(2).await.handicap_sb.as_deref(), Some("1"));
    assert_eq!(ws.athlete(3).await.handicap_sb, None);
}

#[tokio::test]
async fn para_sync_with_sdms_flag_is_idempotent() {
    let ws = Workspace::new().await;
    let roster = seed_para(&ws).await;
    let mut settings = ws.settings(WriteMode::Live);
    settings.update_sdms = true;

    let first = run_job(JobKind::UpdatePara, &context_with(settings.clone(), roster.clone())).await;
    assert!(first.is_success());
    assert_eq!(first.counters.get(counters::FIELD_UPDATES), 3);
    assert_eq!(ws.athlete(1).await.sdms_id.as_deref(), Some("4567"));

    let second = run_job(JobKind::UpdatePara, &context_with(settings, roster)).await;
    assert!(second.is_success());
    assert_eq!(second.counters.get(counters::MISMATCHES), 0);
    assert_eq!(second.counters.get(counters::FIELD_UPDATES), 0);
}

#[tokio::test]
async fn para_sync_dry_run_leaves_store_untouched() {
    let ws = Workspace::new().await;
    let roster = seed_para(&ws).await;

    let report = run_job(JobKind::UpdatePara, &ws.context(WriteMode::DryRun, roster)).await;
    assert!(report.is_success());
    assert_eq!(report.counters.get(counters::FIELD_UPDATES), 2);

    let jon = ws.athlete(1).await;
    assert_eq!(jon.handicap_sb.as_deref(), Some("5"));
    assert_eq!(jon.handicap_sm, None);
}

#[tokio::test]
async fn placeholder_class_matches_local_zero() {
    let ws = Workspace::new().await;
    ws.add_athlete(7, "Eve", "Ng", "700", "CAN").await;
    for field in [AthleteField::HandicapS, AthleteField::HandicapSb, AthleteField::HandicapSm] {
        ws.set_field(7, field, "0").await;
    }
    let roster = vec![RosterEntry {
        s: Some("NE".to_string()),
        sb: Some("PI".to_string()),
        ..roster_entry("700", "Eve", "Ng")
    }];

    let report = run_job(JobKind::UpdatePara, &ws.context(WriteMode::Live, roster)).await;
    assert!(report.is_success());
    assert_eq!(report.counters.get(counters::MISMATCHES), 0);
}

#[tokio::test]
async fn empty_roster_aborts_para_sync() {
    let ws = Workspace::new().await;
    seed_para(&ws).await;

    let report = run_job(JobKind::UpdatePara, &ws.context(WriteMode::Live, vec![])).await;
    assert_eq!(
        report.outcome,
        JobOutcome::Failed {
            error: "no active roster".to_string()
        }
    );
    assert_eq!(report.counters.get(counters::FIELD_UPDATES), 0);
    assert_eq!(ws.athlete(1).await.handicap_sb.as_deref(), Some("5"));
}

#[tokio::test]
async fn invalid_para_level_aborts() {
    let ws = Workspace::new().await;
    let roster = seed_para(&ws).await;
    let mut settings = ws.settings(WriteMode::Live);
    settings.para_level = "7".to_string();

    let report = run_job(JobKind::UpdatePara, &context_with(settings, roster)).await;
    match &report.outcome {
        JobOutcome::Failed { error } => assert!(error.contains("para_level"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

async fn seed_names(ws: &Workspace) -> Vec<RosterEntry> {
    ws.add_athlete(1, "Jon", "Smith", "123", "CAN").await;
    ws.add_athlete(2, "Ann", "Lee", "200", "CAN").await;
    ws.add_athlete(3, "Bob", "Ray", "300", "USA").await;
    vec![
        roster_entry("123", "Jonathan", "Smith"),
        roster_entry("200", "Ann", "Lee"),
        roster_entry("300", "Robert", "Ray"),
    ]
}

#[tokio::test]
async fn para_names_then_rollback_restores_original_names() {
    let ws = Workspace::new().await;
    let roster = seed_names(&ws).await;

    let report = run_job(JobKind::UpdateParaNames, &ws.context(WriteMode::Live, roster)).await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.counters.get(counters::NAMES_UPDATED), 1);
    assert_eq!(ws.athlete(1).await.first_name.as_deref(), Some("Jonathan"));
    assert_eq!(ws.athlete(3).await.first_name.as_deref(), Some("Bob"));
    assert_eq!(
        read_text(&ws.path("rollback.csv")),
        "ATHLETEID,FIRSTNAME,LASTNAME\n1,Jon,Smith\n"
    );

    let rollback = run_job(JobKind::RollbackNames, &ws.context(WriteMode::Live, vec![])).await;
    assert!(rollback.is_success(), "{rollback:?}");
    assert_eq!(rollback.counters.get(counters::RESTORED), 1);
    let jon = ws.athlete(1).await;
    assert_eq!(jon.first_name.as_deref(), Some("Jon"));
    assert_eq!(jon.last_name.as_deref(), Some("Smith"));
}

#[tokio::test]
async fn para_names_dry_run_still_writes_rollback_log() {
    let ws = Workspace::new().await;
    let roster = seed_names(&ws).await;

    let report = run_job(JobKind::UpdateParaNames, &ws.context(WriteMode::DryRun, roster)).await;
    assert!(report.is_success());
    assert_eq!(report.counters.get(counters::ROLLBACK_RECORDS), 1);
    assert_eq!(ws.athlete(1).await.first_name.as_deref(), Some("Jon"));
    assert!(read_text(&ws.path("rollback.csv")).ends_with("1,Jon,Smith\n"));
}

#[tokio::test]
async fn rollback_continues_past_bad_lines() {
    let ws = Workspace::new().await;
    ws.add_athlete(1, "Jonathan", "Smith", "123", "CAN").await;
    ws.write_file(
        "rollback.csv",
        "ATHLETEID,FIRSTNAME,LASTNAME\nabc,X,Y\n1,Jon,Smith\n999,No,Body\n2,Short\n",
    );

    let report = run_job(JobKind::RollbackNames, &ws.context(WriteMode::Live, vec![])).await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.counters.get(counters::FAILED_ROWS), 2);
    assert_eq!(report.counters.get(counters::RESTORED), 1);
    assert_eq!(report.counters.get(counters::NOT_FOUND), 1);
    assert_eq!(ws.athlete(1).await.first_name.as_deref(), Some("Jon"));
}

#[tokio::test]
async fn rollback_without_log_aborts() {
    let ws = Workspace::new().await;
    let report = run_job(JobKind::RollbackNames, &ws.context(WriteMode::Live, vec![])).await;
    assert!(!report.is_success());
}

#[tokio::test]
async fn trailing_initials_are_removed_from_domestic_rows() {
    let ws = Workspace::new().await;
    ws.add_athlete(5, "Jane K", "Doe", "501", "CAN").await;
    ws.add_athlete(6, "Jane Anne", "Doe", "502", "CAN").await;
    ws.add_athlete(7, "K", "Solo", "503", "CAN").await;
    ws.add_athlete(8, "Tom B", "Ray", "504", "USA").await;

    let report = run_job(JobKind::RemoveInitials, &ws.context(WriteMode::Live, vec![])).await;
    assert!(report.is_success());
    assert_eq!(report.counters.get(counters::INITIALS_REMOVED), 1);
    assert_eq!(ws.athlete(5).await.first_name.as_deref(), Some("Jane"));
    assert_eq!(ws.athlete(6).await.first_name.as_deref(), Some("Jane Anne"));
    assert_eq!(ws.athlete(7).await.first_name.as_deref(), Some("K"));
    assert_eq!(ws.athlete(8).await.first_name.as_deref(), Some("Tom B"));
}

#[tokio::test]
async fn trailing_initials_dry_run_changes_nothing() {
    let ws = Workspace::new().await;
    ws.add_athlete(5, "Jane K", "Doe", "501", "CAN").await;

    let report = run_job(JobKind::RemoveInitials, &ws.context(WriteMode::DryRun, vec![])).await;
    assert_eq!(report.counters.get(counters::INITIALS_REMOVED), 1);
    assert_eq!(ws.athlete(5).await.first_name.as_deref(), Some("Jane K"));
}

#[tokio::test]
async fn missing_database_fails_the_job() {
    let ws = Workspace::new().await;
    let mut settings = ws.settings(WriteMode::Live);
    settings.connection = splash_storage::ConnectionString::new("{SQLite3 ODBC Driver}", ws.path("absent.sqlite"));

    let report = run_job(JobKind::RemoveInitials, &context_with(settings, vec![])).await;
    match &report.outcome {
        JobOutcome::Failed { error } => assert!(error.contains("cannot connect"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!ws.path("absent.sqlite").exists());
}

#[tokio::test]
async fn exception_codes_are_set_and_cleared_from_roster() {
    let ws = Workspace::new().await;
    ws.add_athlete(10, "Ida", "Fox", "1010", "CAN").await;
    ws.add_athlete(11, "Ned", "Fox", "1011", "CAN").await;
    for id in [10, 11] {
        for field in [AthleteField::HandicapS, AthleteField::HandicapSb, AthleteField::HandicapSm] {
            ws.set_field(id, field, "0").await;
        }
    }
    ws.set_field(11, AthleteField::HandicapEx, "ABC").await;
    let roster = vec![
        RosterEntry {
            exceptions: Some("ABC".to_string()),
            ..roster_entry("1010", "Ida", "Fox")
        },
        roster_entry("1011", "Ned", "Fox"),
    ];

    let report = run_job(JobKind::UpdatePara, &ws.context(WriteMode::Live, roster)).await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.counters.get(counters::MISMATCHES), 2);
    assert_eq!(report.counters.get(counters::FIELD_UPDATES), 2);
    assert_eq!(ws.athlete(10).await.handicap_ex.as_deref(), Some("ABC"));
    assert_eq!(ws.athlete(11).await.handicap_ex, None);
}

#[tokio::test]
async fn stacked_name_syncs_roll_back_to_first_names() {
    let ws = Workspace::new().await;
    let roster = seed_names(&ws).await;
    let log_path = ws.path("rollback.csv");

    let first = run_job(JobKind::UpdateParaNames, &ws.context(WriteMode::Live, roster.clone())).await;
    assert!(first.is_success(), "{first:?}");
    let after_first = read_text(&log_path);
    assert_eq!(after_first, "ATHLETEID,FIRSTNAME,LASTNAME\n1,Jon,Smith\n");

    let preview = run_job(JobKind::UpdateParaNames, &ws.context(WriteMode::DryRun, roster)).await;
    assert!(preview.is_success());
    assert_eq!(preview.counters.get(counters::NAMES_UPDATED), 0);
    assert_eq!(read_text(&log_path), after_first);

    let renamed = vec![roster_entry("123", "Johnny", "Smith")];
    let second = run_job(JobKind::UpdateParaNames, &ws.context(WriteMode::Live, renamed)).await;
    assert_eq!(second.counters.get(counters::NAMES_UPDATED), 1);
    assert_eq!(ws.athlete(1).await.first_name.as_deref(), Some("Johnny"));
    assert_eq!(
        read_text(&log_path),
        "ATHLETEID,FIRSTNAME,LASTNAME\n1,Jon,Smith\n1,Jonathan,Smith\n"
    );

    let rollback = run_job(JobKind::RollbackNames, &ws.context(WriteMode::Live, vec![])).await;
    assert!(rollback.is_success(), "{rollback:?}");
    assert_eq!(rollback.counters.get(counters::RESTORED), 1);
    assert_eq!(rollback.counters.get(counters::SUPERSEDED), 1);
    assert_eq!(ws.athlete(1).await.first_name.as_deref(), Some("Jon"));
}

#[tokio::test]
async fn rollback_dry_run_leaves_names_unchanged() {
    let ws = Workspace::new().await;
    ws.add_athlete(1, "Jonathan", "Smith", "123", "CAN").await;
    ws.write_file("rollback.csv", "ATHLETEID,FIRSTNAME,LASTNAME\n1,Jon,Smith\n");

    let report = run_job(JobKind::RollbackNames, &ws.context(WriteMode::DryRun, vec![])).await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.counters.get(counters::RESTORED), 1);
    let athlete = ws.athlete(1).await;
    assert_eq!(athlete.first_name.as_deref(), Some("Jonathan"));
    assert_eq!(athlete.last_name.as_deref(), Some("Smith"));
}

#[tokio::test]
async fn trailing_initial_cleanup_stops_at_first_failed_update() {
    let ws = Workspace::new().await;
    ws.add_athlete(5, "Amy K", "Adams", "501", "CAN").await;
    ws.add_athlete(6, "Bea L", "Brown", "502", "CAN").await;
    ws.add_athlete(7, "Cal M", "Clark", "503", "CAN").await;
    let mut db = ws.db().await;
    db.execute(
        "CREATE TRIGGER lock_brown BEFORE UPDATE OF FIRSTNAME ON ATHLETE \
         WHEN OLD.ATHLETEID = 6 BEGIN SELECT RAISE(ABORT, 'row locked'); END",
        &[],
    )
    .await
    .expect("create trigger");
    db.close().await.expect("close db");

    let report = run_job(JobKind::RemoveInitials, &ws.context(WriteMode::Live, vec![])).await;
    match &report.outcome {
        JobOutcome::Failed { error } => assert!(error.contains("row locked"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(ws.athlete(5).await.first_name.as_deref(), Some("Amy"));
    assert_eq!(ws.athlete(6).await.first_name.as_deref(), Some("Bea L"));
    assert_eq!(ws.athlete(7).await.first_name.as_deref(), Some("Cal M"));
}
