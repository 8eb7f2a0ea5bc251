#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use nomorenoise_kernel_contracts::complaint::{
    ComplaintInput, ComplaintScope, ComplaintStatus, NoiseIntensity, UserId,
};
use nomorenoise_kernel_contracts::feed::COMPLAINTS_TOPIC;
use nomorenoise_kernel_contracts::MonotonicTimeNs;
use nomorenoise_storage::complaints::{ComplaintStore, StorageError};
use nomorenoise_storage::feed::ChangeFeed;
use nomorenoise_storage::repo::ComplaintRepo;

fn temp_journal(tag: &str) -> PathBuf {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be >= unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("nomorenoise_journal_{tag}_{seed}.jsonl"))
}

fn input(owner: &str) -> ComplaintInput {
    ComplaintInput::v1(
        UserId::new(owner).unwrap(),
        "construction".to_string(),
        "jackhammer at 6am".to_string(),
        NoiseIntensity::Medium,
        "Elm St".to_string(),
        Some("555-0100".to_string()),
        Some(12.34),
        Some(56.78),
    )
    .unwrap()
}

#[test]
fn at_journal_db_01_reopen_restores_records_and_status() {
    let path = temp_journal("restore");
    let id = {
        let mut s = ComplaintStore::open_with_journal(&path, ChangeFeed::new()).unwrap();
        let id = s.create_complaint_row(input("user_a"), MonotonicTimeNs(10)).unwrap();
        s.create_complaint_row(input("user_b"), MonotonicTimeNs(20)).unwrap();
        s.update_complaint_status_row(&id, ComplaintStatus::InProgress, MonotonicTimeNs(30))
            .unwrap();
        id
    };

    let lines = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count();
    assert_eq!(lines, 3);

    let reopened = ComplaintStore::open_with_journal(&path, ChangeFeed::new()).unwrap();
    assert_eq!(reopened.len(), 2);
    let row = reopened.complaint_row(&id).unwrap();
    assert_eq!(row.status, ComplaintStatus::InProgress);
    assert_eq!(row.contact.as_deref(), Some("555-0100"));
    assert_eq!(row.latitude, Some(12.34));
    assert_eq!(reopened.status_ledger_rows().len(), 1);
    let all = reopened.complaint_rows(&ComplaintScope::All);
    assert_eq!(all[0].owner_id, UserId::new("user_b").unwrap());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn at_journal_db_02_replay_publishes_nothing_and_new_ids_do_not_collide() {
    let path = temp_journal("replay");
    let first_id = {
        let mut s = ComplaintStore::open_with_journal(&path, ChangeFeed::new()).unwrap();
        s.create_complaint_row(input("user_a"), MonotonicTimeNs(10)).unwrap()
    };

    let feed = ChangeFeed::new();
    let mut sub = feed.subscribe(COMPLAINTS_TOPIC).unwrap();
    let mut s = ComplaintStore::open_with_journal(&path, feed).unwrap();
    assert!(sub.try_recv().is_none());

    let second_id = s.create_complaint_row(input("user_a"), MonotonicTimeNs(5)).unwrap();
    assert_ne!(first_id, second_id);
    assert!(
        s.complaint_row(&second_id).unwrap().created_at
            > s.complaint_row(&first_id).unwrap().created_at
    );
    assert_eq!(sub.try_recv().unwrap().unwrap().complaint_id(), &second_id);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn at_journal_db_03_corrupt_line_fails_open() {
    let path = temp_journal("corrupt");
    std::fs::write(&path, "{not json}\n").unwrap();
    assert!(matches!(
        ComplaintStore::open_with_journal(&path, ChangeFeed::new()),
        Err(StorageError::Journal(_))
    ));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn at_journal_db_04_unknown_schema_version_fails_open() {
    let path = temp_journal("schema");
    std::fs::write(
        &path,
        "{\"schema_version\":9,\"entry\":{\"op\":\"status_updated\",\"complaint_id\":\"cmp_1\",\"status\":\"resolved\",\"updated_at\":1}}\n",
    )
    .unwrap();
    let err = ComplaintStore::open_with_journal(&path, ChangeFeed::new()).unwrap_err();
    assert!(err.to_string().contains("schema_version=9"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn at_journal_db_05_every_append_lands_as_one_whole_line() {
    let path = temp_journal("whole_lines");
    {
        let mut s = ComplaintStore::open_with_journal(&path, ChangeFeed::new()).unwrap();
        let id = s.create_complaint_row(input("user_a"), MonotonicTimeNs(10)).unwrap();
        s.update_complaint_status_row(&id, ComplaintStatus::Resolved, MonotonicTimeNs(20))
            .unwrap();
    }
    {
        let mut s = ComplaintStore::open_with_journal(&path, ChangeFeed::new()).unwrap();
        s.create_complaint_row(input("user_b"), MonotonicTimeNs(30)).unwrap();
    }

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.ends_with('\n'));
    let lines: Vec<&str> = raw.split_terminator('\n').collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["schema_version"], 1);
    }

    let reopened = ComplaintStore::open_with_journal(&path, ChangeFeed::new()).unwrap();
    assert_eq!(reopened.len(), 2);
    let _ = std::fs::remove_file(&path);
}
