//! Rebuilding the local snapshot from a remote listing.
//!
//! After the outbox drain, the remote listing is canonical. The local
//! snapshot is rebuilt from it, except that work still waiting in the outbox
//! stays visible: queued creations are kept, queued deletions stay hidden,
//! and queued updates are overlaid.

use crate::{IdentityMap, OutboxOperation, ServerId, Task};
use std::collections::HashSet;

/// Result of merging a remote listing into the local snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedSnapshot {
    /// The new content of the local snapshot
    pub tasks: Vec<Task>,
    /// Remote tasks with no client mapping yet; they map to themselves
    pub adopted: Vec<ServerId>,
}

/// Merge the remote listing with local state and still-queued operations.
///
/// `pending` must hold the operations still in the outbox after the drain.
pub fn merge_remote_listing(
    remote: Vec<Task>,
    local: Vec<Task>,
    mapping: &IdentityMap,
    pending: &[OutboxOperation],
) -> MergedSnapshot {
    let mut ordered: Vec<&OutboxOperation> = pending.iter().collect();
    ordered.sort();

    let deleted: HashSet<&str> = ordered
        .iter()
        .filter_map(|op| match op {
            OutboxOperation::Delete(delete) => Some(delete),
            _ => None,
        })
        .flat_map(|delete| {
            delete
                .client_id
                .iter()
                .chain(delete.server_id.iter())
                .map(String::as_str)
        })
        .collect();

    let mut merged = MergedSnapshot::default();
    let mut remote_ids: HashSet<ServerId> = HashSet::new();

    for task in remote.into_iter().filter(|t| !t.deleted) {
        remote_ids.insert(task.id.clone());

        let client_id = match mapping.client_id(&task.id) {
            Some(client_id) => client_id.clone(),
            None => {
                merged.adopted.push(task.id.clone());
                task.id.clone()
            }
        };

        if deleted.contains(client_id.as_str()) || deleted.contains(task.id.as_str()) {
            continue;
        }

        let mut task = task.with_client_id(client_id);
        for op in &ordered {
            if let OutboxOperation::Update(update) = op {
                if update.client_id == task.client_id {
                    task.apply_patch(&update.payload);
                }
            }
        }
        merged.tasks.push(task);
    }

    for task in local {
        if !mapping.is_resolved(&task.client_id)
            && !remote_ids.contains(&task.id)
            && !deleted.contains(task.client_id.as_str())
        {
            merged.tasks.push(task);
        }
    }

    merged
        .tasks
        .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeleteOp, TaskPatch, TaskStatus, UpdateOp};
    use chrono::{TimeZone, Utc};

    fn task(id: &str, client_id: &str, secs: i64) -> Task {
        let mut task = Task::new_local(client_id, "title", "desc", Utc.timestamp_opt(secs, 0).unwrap());
        task.id = id.to_string();
        task
    }

    #[test]
    fn restores_client_ids_through_mapping() {
        let mut mapping = IdentityMap::new();
        mapping.insert("c-1", "srv-1").unwrap();

        let merged = merge_remote_listing(vec![task("srv-1", "srv-1", 10)], vec![], &mapping, &[]);

        assert_eq!(merged.tasks.len(), 1);
        assert_eq!(merged.tasks[0].id, "srv-1");
        assert_eq!(merged.tasks[0].client_id, "c-1");
        assert!(merged.adopted.is_empty());
    }

    #[test]
    fn adopts_unknown_remote_tasks() {
        let merged = merge_remote_listing(
            vec![task("srv-7", "srv-7", 10)],
            vec![],
            &IdentityMap::new(),
            &[],
        );

        assert_eq!(merged.adopted, vec!["srv-7"]);
        assert_eq!(merged.tasks[0].client_id, "srv-7");
    }

    #[test]
    fn keeps_unsynced_local_tasks() {
        let local = vec![task("c-2", "c-2", 20)];
        let merged = merge_remote_listing(vec![], local, &IdentityMap::new(), &[]);

        assert_eq!(merged.tasks.len(), 1);
        assert_eq!(merged.tasks[0].id, "c-2");
    }

    #[test]
    fn drops_resolved_local_tasks_missing_remotely() {
        let mut mapping = IdentityMap::new();
        mapping.insert("c-1", "srv-1").unwrap();

        let merged = merge_remote_listing(vec![], vec![task("srv-1", "c-1", 10)], &mapping, &[]);
        assert!(merged.tasks.is_empty());
    }

    #[test]
    fn hides_pending_deletes_and_overlays_updates() {
        let mut mapping = IdentityMap::new();
        mapping.insert("c-1", "srv-1").unwrap();
        mapping.insert("c-2", "srv-2").unwrap();

        let pending = vec![
            OutboxOperation::Delete(DeleteOp::new("op-1", Some("c-1".into()), None, 100)),
            OutboxOperation::Update(UpdateOp::new(
                "op-3",
                "c-2",
                Some("srv-2".into()),
                TaskPatch::status(TaskStatus::InProgress),
                300,
            )),
            OutboxOperation::Update(UpdateOp::new(
                "op-2",
                "c-2",
                Some("srv-2".into()),
                TaskPatch::status(TaskStatus::Done),
                200,
            )),
        ];

        let merged = merge_remote_listing(
            vec![task("srv-1", "srv-1", 10), task("srv-2", "srv-2", 20)],
            vec![],
            &mapping,
            &pending,
        );

        assert_eq!(merged.tasks.len(), 1);
        assert_eq!(merged.tasks[0].id, "srv-2");
        assert_eq!(merged.tasks[0].status, TaskStatus::InProgress);
    }

    #[test]
    fn skips_remote_tombstones() {
        let mut gone = task("srv-1", "srv-1", 10);
        gone.deleted = true;

        let merged = merge_remote_listing(vec![gone], vec![], &IdentityMap::new(), &[]);
        assert!(merged.tasks.is_empty());
        assert!(merged.adopted.is_empty());
    }

    #[test]
    fn newest_first() {
        let merged = merge_remote_listing(
            vec![task("srv-1", "srv-1", 10), task("srv-2", "srv-2", 30)],
            vec![task("c-3", "c-3", 20)],
            &IdentityMap::new(),
            &[],
        );

        let ids: Vec<_> = merged.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["srv-2", "c-3", "srv-1"]);
    }
}
