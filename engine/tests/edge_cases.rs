//! Edge case tests for tasksync-engine
//!
//! These tests cover boundary conditions, unusual inputs, and ordering
//! properties of the replay plan.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use tasksync_engine::{
    merge_remote_listing, normalize_task, parse_task_listing, replay_order, CreateOp, DeleteOp,
    IdentityMap, MonotonicClock, OutboxOperation, QueuedOp, Task, TaskBarrier, TaskPatch,
    TaskPayload, TaskStatus, UpdateOp,
};

fn payload(title: &str) -> TaskPayload {
    TaskPayload {
        title: title.into(),
        description: "d".into(),
        status: TaskStatus::Pending,
    }
}

fn update(op_id: &str, client_id: &str, ts: u64, status: TaskStatus) -> OutboxOperation {
    OutboxOperation::Update(UpdateOp::new(
        op_id,
        client_id,
        None,
        TaskPatch::status(status),
        ts,
    ))
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn unicode_titles_survive_normalization() {
    let now = Utc.timestamp_opt(0, 0).unwrap();
    let titles = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    for (i, title) in titles.iter().enumerate() {
        let task = normalize_task(&json!({"_id": i, "title": title}), now).unwrap();
        assert_eq!(task.title, *title, "Failed for: {}", title);
        assert_eq!(task.id, i.to_string());
    }
}

#[test]
fn empty_string_identifier_falls_back_to_id() {
    let now = Utc.timestamp_opt(0, 0).unwrap();
    let task = normalize_task(&json!({"_id": "", "id": "srv-3"}), now).unwrap();
    assert_eq!(task.id, "srv-3");
}

#[test]
fn one_bad_listing_entry_fails_the_listing() {
    let now = Utc.timestamp_opt(0, 0).unwrap();
    let result = parse_task_listing(&json!([{"_id": "a"}, {"title": "no id"}]), now);
    assert!(result.is_err());
}

// ============================================================================
// Ordering Edge Cases
// ============================================================================

#[test]
fn later_status_wins_after_replay() {
    // Two queued updates for the same task, inserted out of order.
    let entries = vec![
        QueuedOp::new(update("op-b", "c-1", 200, TaskStatus::InProgress)),
        QueuedOp::new(update("op-a", "c-1", 100, TaskStatus::Done)),
    ];

    let mut task = Task::new_local("c-1", "t", "d", Utc.timestamp_opt(0, 0).unwrap());
    for entry in replay_order(entries) {
        if let OutboxOperation::Update(op) = &entry.operation {
            task.apply_patch(&op.payload);
        }
    }

    assert_eq!(task.status, TaskStatus::InProgress);
}

#[test]
fn clock_timestamps_keep_enqueue_order() {
    let mut clock = MonotonicClock::new();
    let stamps: Vec<u64> = (0..100).map(|_| clock.tick(1_000)).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn barrier_after_failed_create_holds_dependent_update() {
    let create = OutboxOperation::Create(CreateOp::new("op-1", "c-1", payload("t"), 100));
    let later = update("op-2", "c-1", 200, TaskStatus::Done);
    let other = OutboxOperation::Delete(DeleteOp::new("op-3", Some("c-2".into()), None, 300));

    let mut barrier = TaskBarrier::new();
    barrier.hold(&create);

    assert!(!barrier.admits(&later));
    assert!(barrier.admits(&other));
}

#[test]
fn merge_without_anything() {
    let merged = merge_remote_listing(vec![], vec![], &IdentityMap::new(), &[]);
    assert!(merged.tasks.is_empty());
    assert!(merged.adopted.is_empty());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn replay_order_is_sorted_by_timestamp(stamps in proptest::collection::vec(0u64..1_000, 0..50)) {
        let entries: Vec<QueuedOp> = stamps
            .iter()
            .enumerate()
            .map(|(i, ts)| {
                QueuedOp::new(OutboxOperation::Create(CreateOp::new(
                    format!("op-{i:03}"),
                    format!("c-{}", i % 5),
                    payload("t"),
                    *ts,
                )))
            })
            .collect();

        let ordered = replay_order(entries);
        prop_assert_eq!(ordered.len(), stamps.len());
        for pair in ordered.windows(2) {
            prop_assert!(pair[0].operation.timestamp() <= pair[1].operation.timestamp());
        }
    }

    #[test]
    fn replay_order_is_independent_of_insertion_order(
        stamps in proptest::collection::vec(0u64..100, 1..30),
        rotate in 0usize..30,
    ) {
        let entries: Vec<QueuedOp> = stamps
            .iter()
            .enumerate()
            .map(|(i, ts)| QueuedOp::new(update(&format!("op-{i:03}"), "c-1", *ts, TaskStatus::Done)))
            .collect();

        let mut rotated = entries.clone();
        let len = rotated.len();
        rotated.rotate_left(rotate % len);

        prop_assert_eq!(replay_order(entries), replay_order(rotated));
    }

    #[test]
    fn last_update_in_time_decides_status(flags in proptest::collection::vec(any::<bool>(), 1..20)) {
        let statuses: Vec<TaskStatus> = flags
            .iter()
            .map(|done| if *done { TaskStatus::Done } else { TaskStatus::InProgress })
            .collect();

        // Insert newest first so the log order is the reverse of time order.
        let entries: Vec<QueuedOp> = statuses
            .iter()
            .enumerate()
            .rev()
            .map(|(i, status)| QueuedOp::new(update(&format!("op-{i:03}"), "c-1", i as u64 * 10, *status)))
            .collect();

        let mut task = Task::new_local("c-1", "t", "d", Utc.timestamp_opt(0, 0).unwrap());
        for entry in replay_order(entries) {
            if let OutboxOperation::Update(op) = &entry.operation {
                task.apply_patch(&op.payload);
            }
        }

        prop_assert_eq!(Some(task.status), statuses.last().copied());
    }
}
