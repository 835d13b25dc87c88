use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use harvest_core::compliance::{calculate_payroll, PickerShift, WageRates};
use harvest_core::config::HarvestConfig;
use harvest_core::dead_letter::{DeadLetterOperator, DiscardScope};
use harvest_core::models::FailureInfo;
use harvest_core::sync::{SyncReport, SyncTrigger};
use harvest_core::{
    BucketRecord, HarvestSettings, Picker, PickerStatus, QualityGrade, QueueOperation,
};
use pretty_assertions::assert_eq;

use crate::cli::{Cli, Commands, CompletionShell, DlqCommands, GradeArg, ScopeArg};
use crate::commands::common::{
    format_relative_time, is_affirmative, parse_entry_id, Context,
};
use crate::commands::completions::run_completions;
use crate::commands::config::{merge_config_init, redacted_config, ConfigInit};
use crate::commands::crew::{format_crew_lines, run_crew};
use crate::commands::dlq::{discard_count, format_dead_letter_lines};
use crate::commands::field::{run_check_in, run_scan};
use crate::commands::payroll::format_payroll_lines;
use crate::commands::settings::SettingsPatch;
use crate::commands::sync::format_sync_report;
use crate::error::CliError;

fn context_in(dir: &tempfile::TempDir) -> Context {
    Context::load(
        Some(dir.path().join("config.json")),
        Some(dir.path().join("harvest.db")),
        Some("orchard-test".to_string()),
    )
    .unwrap()
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn parses_scan_with_grade() {
    let cli = Cli::try_parse_from(["harvest", "scan", "P-7", "--grade", "reject"]).unwrap();
    match cli.command {
        Commands::Scan { code, grade } => {
            assert_eq!(code, "P-7");
            assert_eq!(grade, GradeArg::Reject);
            assert_eq!(QualityGrade::from(grade), QualityGrade::Reject);
        }
        _ => panic!("expected scan"),
    }
}

#[test]
fn parses_discard_all_with_global_flags() {
    let cli = Cli::try_parse_from([
        "harvest",
        "dlq",
        "discard-all",
        "--scope",
        "all",
        "--yes",
        "--db-path",
        "/tmp/h.db",
    ])
    .unwrap();

    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/h.db")));
    match cli.command {
        Commands::Dlq {
            command: DlqCommands::DiscardAll { scope, yes },
        } => {
            assert_eq!(scope, ScopeArg::All);
            assert!(yes);
        }
        _ => panic!("expected dlq discard-all"),
    }
}

#[test]
fn confirmation_answers() {
    assert!(is_affirmative("y\n"));
    assert!(is_affirmative(" YES "));
    assert!(!is_affirmative(""));
    assert!(!is_affirmative("no"));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 49 * 60 * 60_000, now), "2d ago");
}

#[test]
fn entry_ids_must_be_uuids() {
    assert!(parse_entry_id(" 0190a8b2-3c4d-7e5f-8a9b-0c1d2e3f4a5b ").is_ok());
    assert!(matches!(
        parse_entry_id("nope"),
        Err(CliError::InvalidEntryId(_))
    ));
}

#[test]
fn config_init_merges_over_stored_values() {
    let stored = HarvestConfig {
        supabase_url: Some("https://old.supabase.co".to_string()),
        supabase_anon_key: Some("old-key".to_string()),
        orchard_id: Some("orchard-1".to_string()),
        ..HarvestConfig::default()
    };

    let merged = merge_config_init(
        &stored,
        ConfigInit {
            supabase_url: Some(" https://new.supabase.co/ ".to_string()),
            dead_letter_threshold: Some(25),
            ..ConfigInit::default()
        },
    )
    .unwrap();

    assert_eq!(merged.supabase_url.as_deref(), Some("https://new.supabase.co"));
    assert_eq!(merged.supabase_anon_key.as_deref(), Some("old-key"));
    assert_eq!(merged.orchard_id.as_deref(), Some("orchard-1"));
    assert_eq!(merged.dead_letter_threshold, 25);
}

#[test]
fn config_init_rejects_bad_url_and_threshold() {
    let stored = HarvestConfig::default();
    assert!(merge_config_init(
        &stored,
        ConfigInit {
            supabase_url: Some("project.supabase.co".to_string()),
            ..ConfigInit::default()
        }
    )
    .is_err());
    assert!(merge_config_init(
        &stored,
        ConfigInit {
            dead_letter_threshold: Some(0),
            ..ConfigInit::default()
        }
    )
    .is_err());
}

#[test]
fn config_show_redacts_keys() {
    let config = HarvestConfig {
        supabase_anon_key: Some("eyJhbGciOiJIUzI1NiJ9.secret".to_string()),
        ..HarvestConfig::default()
    };
    assert_eq!(
        redacted_config(&config).supabase_anon_key.as_deref(),
        Some("eyJhbG...")
    );
}

#[test]
fn settings_patch_keeps_unset_values() {
    let current = HarvestSettings {
        updated_at: 42,
        ..HarvestSettings::for_orchard("orchard-1")
    };
    assert!(SettingsPatch::default().is_empty());

    let patched = SettingsPatch {
        piece_rate: Some(7.25),
        ..SettingsPatch::default()
    }
    .apply_to(&current);

    assert!((patched.piece_rate - 7.25).abs() < f64::EPSILON);
    assert!((patched.min_wage_rate - current.min_wage_rate).abs() < f64::EPSILON);
    assert_eq!(patched.updated_at, 42);
}

#[test]
fn sync_report_summary() {
    let report = SyncReport {
        attempted: 3,
        synced: 1,
        retried: 1,
        dead_lettered: 1,
        remaining: 1,
        went_offline: false,
    };
    assert_eq!(
        format_sync_report(&report),
        "Synced 1 of 3 attempted; 1 left in queue, 1 will be retried, 1 moved to the dead-letter queue"
    );
}

#[test]
fn payroll_table_has_totals_row() {
    let rates = WageRates {
        piece_rate: 6.50,
        min_wage_rate: 23.50,
    };
    let summary = calculate_payroll(
        &[PickerShift {
            picker_id: "id".to_string(),
            picker_code: "P-1".to_string(),
            name: "Aroha".to_string(),
            buckets: 5,
            hours: 8.0,
            minutes_since_break: 0,
            meal_break_taken: true,
        }],
        rates,
    );

    let lines = format_payroll_lines(&summary);
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains("155.50"));
    assert!(lines[2].contains("TOTAL"));
    assert!(lines[2].ends_with("188.00"));
}

#[test]
fn crew_lines_align_codes() {
    let mut long = Picker::new("P-10042", "Mere", "o");
    long.status = PickerStatus::Break;
    let lines = format_crew_lines(&[Picker::new("P-1", "Aroha", "o"), long]);

    assert_eq!(lines[0].find("active"), lines[1].find("break"));
}

#[test]
fn completions_are_written_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harvest.bash");

    run_completions(CompletionShell::Bash, Some(&path)).unwrap();

    let script = std::fs::read_to_string(path).unwrap();
    assert!(script.contains("harvest"));
}

#[test]
fn context_prefers_flags() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(&dir);

    assert_eq!(context.db_path, dir.path().join("harvest.db"));
    assert_eq!(context.orchard_id().unwrap(), "orchard-test");
}

#[tokio::test(flavor = "multi_thread")]
async fn field_commands_queue_work() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(&dir);

    run_crew(
        &context,
        crate::cli::CrewCommands::Add {
            code: "P-1".to_string(),
            name: vec!["Aroha".to_string(), "Ngata".to_string()],
        },
    )
    .await
    .unwrap();
    let duplicate = run_crew(
        &context,
        crate::cli::CrewCommands::Add {
            code: "P-1".to_string(),
            name: vec!["Someone".to_string()],
        },
    )
    .await;
    assert!(matches!(duplicate, Err(CliError::DuplicatePicker(_))));

    let before_check_in = run_scan(&context, "P-1", QualityGrade::A).await;
    assert!(matches!(
        before_check_in,
        Err(CliError::Core(harvest_core::Error::ScanRejected(_)))
    ));

    run_check_in(&context, "P-1").await.unwrap();
    run_scan(&context, "P-1", QualityGrade::A).await.unwrap();

    let db = context.open_database().await.unwrap();
    let picker = db
        .find_picker_by_code("orchard-test", "P-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(picker.name, "Aroha Ngata");
    assert_eq!(picker.total_buckets_today, 1);
    assert_eq!(db.queue_len().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_letter_lines_group_by_severity() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(&dir);
    let db = context.open_database().await.unwrap();

    let entry = db
        .enqueue(QueueOperation::BucketScan(BucketRecord::new(
            "picker-1",
            "orchard-test",
            QualityGrade::A,
            1_000,
        )))
        .await
        .unwrap();
    let failure = FailureInfo {
        code: Some("23503".to_string()),
        message: "insert violates foreign key constraint".to_string(),
    };
    for _ in 0..12 {
        db.increment_retry(&entry.id, &failure).await.unwrap();
    }

    let report = DeadLetterOperator::new(db, SyncTrigger::new())
        .report()
        .await
        .unwrap();
    let lines = format_dead_letter_lines(&report, 2_000);

    assert_eq!(lines[0], "Warning (1)");
    assert!(lines[1].contains(&entry.id.to_string()));
    assert!(lines[1].contains(" 12 attempts"));
}

#[tokio::test(flavor = "multi_thread")]
async fn discard_all_count_includes_never_failed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(&dir);
    let db = context.open_database().await.unwrap();

    let failing = db
        .enqueue(QueueOperation::BucketScan(BucketRecord::new(
            "picker-1",
            "orchard-test",
            QualityGrade::A,
            1_000,
        )))
        .await
        .unwrap();
    db.enqueue(QueueOperation::BucketScan(BucketRecord::new(
        "picker-2",
        "orchard-test",
        QualityGrade::B,
        1_000,
    )))
    .await
    .unwrap();
    let failure = FailureInfo {
        code: None,
        message: "timeout".to_string(),
    };
    for _ in 0..50 {
        db.increment_retry(&failing.id, &failure).await.unwrap();
    }

    assert_eq!(discard_count(&db, DiscardScope::Critical).await.unwrap(), 1);
    assert_eq!(discard_count(&db, DiscardScope::All).await.unwrap(), 2);
}
