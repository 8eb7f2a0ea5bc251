#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use nomorenoise_kernel_contracts::complaint::{
    ComplaintInput, ComplaintStatus, NoiseIntensity, UserId,
};
use nomorenoise_kernel_contracts::feed::{ChangeEvent, ChangeEventKind, COMPLAINTS_TOPIC};
use nomorenoise_kernel_contracts::MonotonicTimeNs;
use nomorenoise_storage::complaints::ComplaintStore;
use nomorenoise_storage::feed::FeedSubscription;
use nomorenoise_storage::repo::ComplaintRepo;

fn input(owner: &str) -> ComplaintInput {
    ComplaintInput::v1(
        UserId::new(owner).unwrap(),
        "traffic".to_string(),
        "loud trucks at night".to_string(),
        NoiseIntensity::High,
        "12.34,56.78".to_string(),
        None,
        None,
        None,
    )
    .unwrap()
}

fn drain(sub: &mut FeedSubscription) -> Vec<ChangeEvent> {
    let mut out = Vec::new();
    while let Some(next) = sub.try_recv() {
        out.push(next.unwrap());
    }
    out
}

#[test]
fn at_feed_db_01_one_event_per_committed_mutation() {
    let mut s = ComplaintStore::new_in_memory();
    let mut sub = s.subscribe_complaint_feed(COMPLAINTS_TOPIC).unwrap();

    let id = s.create_complaint_row(input("user_u"), MonotonicTimeNs(1)).unwrap();
    s.update_complaint_status_row(&id, ComplaintStatus::Resolved, MonotonicTimeNs(2))
        .unwrap();

    let events = drain(&mut sub);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, ChangeEventKind::Created);
    assert_eq!(events[0].record.status, ComplaintStatus::Submitted);
    assert_eq!(events[1].kind, ChangeEventKind::Updated);
    assert_eq!(events[1].record.status, ComplaintStatus::Resolved);
    assert_eq!(events[1].complaint_id(), &id);
}

#[test]
fn at_feed_db_02_failed_mutations_emit_nothing() {
    let mut s = ComplaintStore::new_in_memory();
    let mut sub = s.subscribe_complaint_feed(COMPLAINTS_TOPIC).unwrap();

    let mut bad = input("user_u");
    bad.location = String::new();
    assert!(s.create_complaint_row(bad, MonotonicTimeNs(1)).is_err());
    let missing = nomorenoise_kernel_contracts::complaint::ComplaintId::new("cmp_x").unwrap();
    assert!(s
        .update_complaint_status_row(&missing, ComplaintStatus::Resolved, MonotonicTimeNs(2))
        .is_err());

    assert!(drain(&mut sub).is_empty());
}

#[test]
fn at_feed_db_03_racing_admin_updates_reach_every_subscriber_in_commit_order() {
    let store = Arc::new(Mutex::new(ComplaintStore::new_in_memory()));
    let (id, mut sub_one, mut sub_two) = {
        let mut s = store.lock().unwrap();
        let id = s.create_complaint_row(input("user_u"), MonotonicTimeNs(1)).unwrap();
        let one = s.subscribe_complaint_feed(COMPLAINTS_TOPIC).unwrap();
        let two = s.subscribe_complaint_feed(COMPLAINTS_TOPIC).unwrap();
        (id, one, two)
    };

    // Admin A commits first, admin B second.
    store
        .lock()
        .unwrap()
        .update_complaint_status_row(&id, ComplaintStatus::InProgress, MonotonicTimeNs(2))
        .unwrap();
    store
        .lock()
        .unwrap()
        .update_complaint_status_row(&id, ComplaintStatus::Resolved, MonotonicTimeNs(3))
        .unwrap();

    assert_eq!(
        store.lock().unwrap().complaint_row(&id).unwrap().status,
        ComplaintStatus::Resolved
    );
    for sub in [&mut sub_one, &mut sub_two] {
        let statuses: Vec<(ChangeEventKind, ComplaintStatus)> = drain(sub)
            .into_iter()
            .map(|e| (e.kind, e.record.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (ChangeEventKind::Updated, ComplaintStatus::InProgress),
                (ChangeEventKind::Updated, ComplaintStatus::Resolved),
            ]
        );
    }
}

#[test]
fn at_feed_db_04_concurrent_writers_keep_per_subscriber_order() {
    let store = Arc::new(Mutex::new(ComplaintStore::new_in_memory()));
    let mut sub = store
        .lock()
        .unwrap()
        .subscribe_complaint_feed(COMPLAINTS_TOPIC)
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|w| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..25u64 {
                    store
                        .lock()
                        .unwrap()
                        .create_complaint_row(input(&format!("user_{w}")), MonotonicTimeNs(i + 1))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let events = drain(&mut sub);
    assert_eq!(events.len(), 100);
    for pair in events.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1);
        assert!(pair[1].record.created_at > pair[0].record.created_at);
    }
}

#[test]
fn at_feed_db_05_released_subscription_stops_delivery() {
    let mut s = ComplaintStore::new_in_memory();
    let mut sub = s.subscribe_complaint_feed(COMPLAINTS_TOPIC).unwrap();
    s.create_complaint_row(input("user_u"), MonotonicTimeNs(1)).unwrap();
    assert_eq!(drain(&mut sub).len(), 1);

    sub.cancel();
    assert_eq!(s.feed().subscriber_count(), 0);
    s.create_complaint_row(input("user_u"), MonotonicTimeNs(2)).unwrap();
    assert!(matches!(sub.try_recv(), Some(Err(_))));
}
