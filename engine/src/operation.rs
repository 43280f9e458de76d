//! Outbox operation types.
//!
//! Every user mutation appends exactly one operation to the outbox. Operations
//! are never edited in place; they are removed once their effect is confirmed
//! remotely (or known to be moot).

use crate::{ClientId, OperationId, ServerId, TaskPatch, TaskPayload, Timestamp};
use serde::{Deserialize, Serialize};

/// A queued task creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOp {
    /// Operation ID
    pub op_id: OperationId,
    /// Client identity of the task being created
    pub client_id: ClientId,
    /// POST body
    pub payload: TaskPayload,
    /// Enqueue time, the replay ordering key
    pub timestamp: Timestamp,
}

/// A queued task update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOp {
    /// Operation ID
    pub op_id: OperationId,
    /// Client identity of the task
    pub client_id: ClientId,
    /// Server identity, if it was known at enqueue time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    /// PUT body
    pub payload: TaskPatch,
    /// Enqueue time, the replay ordering key
    pub timestamp: Timestamp,
}

/// A queued task deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOp {
    /// Operation ID
    pub op_id: OperationId,
    /// Client identity of the task, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Server identity, if it was known at enqueue time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    /// Enqueue time, the replay ordering key
    pub timestamp: Timestamp,
}

/// An entry of the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OutboxOperation {
    Create(CreateOp),
    Update(UpdateOp),
    Delete(DeleteOp),
}

/// Discriminant of an [`OutboxOperation`], as stored in the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(OperationKind::Create),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OutboxOperation {
    /// Get the operation ID.
    pub fn op_id(&self) -> &OperationId {
        match self {
            OutboxOperation::Create(op) => &op.op_id,
            OutboxOperation::Update(op) => &op.op_id,
            OutboxOperation::Delete(op) => &op.op_id,
        }
    }

    /// Get the client identity this operation targets, if any.
    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            OutboxOperation::Create(op) => Some(&op.client_id),
            OutboxOperation::Update(op) => Some(&op.client_id),
            OutboxOperation::Delete(op) => op.client_id.as_ref(),
        }
    }

    /// Get the server identity recorded at enqueue time, if any.
    pub fn server_id(&self) -> Option<&ServerId> {
        match self {
            OutboxOperation::Create(_) => None,
            OutboxOperation::Update(op) => op.server_id.as_ref(),
            OutboxOperation::Delete(op) => op.server_id.as_ref(),
        }
    }

    /// Get the timestamp of this operation.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            OutboxOperation::Create(op) => op.timestamp,
            OutboxOperation::Update(op) => op.timestamp,
            OutboxOperation::Delete(op) => op.timestamp,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OutboxOperation::Create(_) => OperationKind::Create,
            OutboxOperation::Update(_) => OperationKind::Update,
            OutboxOperation::Delete(_) => OperationKind::Delete,
        }
    }

    /// Key identifying the logical task for per-task ordering.
    ///
    /// The client id when present, otherwise the server id.
    pub fn task_key(&self) -> Option<&str> {
        self.client_id()
            .or_else(|| self.server_id())
            .map(String::as_str)
    }
}

impl CreateOp {
    /// Create a new create operation.
    pub fn new(
        op_id: impl Into<OperationId>,
        client_id: impl Into<ClientId>,
        payload: TaskPayload,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            client_id: client_id.into(),
            payload,
            timestamp,
        }
    }
}

impl UpdateOp {
    /// Create a new update operation.
    pub fn new(
        op_id: impl Into<OperationId>,
        client_id: impl Into<ClientId>,
        server_id: Option<ServerId>,
        payload: TaskPatch,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            client_id: client_id.into(),
            server_id,
            payload,
            timestamp,
        }
    }
}

impl DeleteOp {
    /// Create a new delete operation.
    pub fn new(
        op_id: impl Into<OperationId>,
        client_id: Option<ClientId>,
        server_id: Option<ServerId>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            client_id,
            server_id,
            timestamp,
        }
    }
}

/// Replay ordering: `(timestamp, op_id)`.
///
/// The timestamp is the only semantic key; the op id only breaks exact ties
/// so the order is total and deterministic.
impl Ord for OutboxOperation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.timestamp().cmp(&other.timestamp()) {
            std::cmp::Ordering::Equal => self.op_id().cmp(other.op_id()),
            other => other,
        }
    }
}

impl PartialOrd for OutboxOperation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskStatus;

    fn payload() -> TaskPayload {
        TaskPayload {
            title: "Buy milk".into(),
            description: "2 litres".into(),
            status: TaskStatus::Pending,
        }
    }

    #[test]
    fn create_op() {
        let op = CreateOp::new("op-1", "c-1", payload(), 1000);

        assert_eq!(op.op_id, "op-1");
        assert_eq!(op.client_id, "c-1");
        assert_eq!(op.timestamp, 1000);
    }

    #[test]
    fn operation_accessors() {
        let update = OutboxOperation::Update(UpdateOp::new(
            "op-2",
            "c-1",
            Some("srv-1".into()),
            TaskPatch::status(TaskStatus::Done),
            2000,
        ));

        assert_eq!(update.op_id(), "op-2");
        assert_eq!(update.client_id().map(String::as_str), Some("c-1"));
        assert_eq!(update.server_id().map(String::as_str), Some("srv-1"));
        assert_eq!(update.timestamp(), 2000);
        assert_eq!(update.kind(), OperationKind::Update);
    }

    #[test]
    fn delete_task_key_falls_back_to_server_id() {
        let delete =
            OutboxOperation::Delete(DeleteOp::new("op-3", None, Some("srv-9".into()), 3000));
        assert_eq!(delete.task_key(), Some("srv-9"));

        let orphan = OutboxOperation::Delete(DeleteOp::new("op-4", None, None, 3000));
        assert_eq!(orphan.task_key(), None);
    }

    #[test]
    fn ordering_by_timestamp_then_op_id() {
        let early = OutboxOperation::Create(CreateOp::new("op-z", "c-1", payload(), 100));
        let late = OutboxOperation::Create(CreateOp::new("op-a", "c-2", payload(), 200));
        assert!(early < late);

        let tie_a = OutboxOperation::Create(CreateOp::new("op-a", "c-1", payload(), 100));
        assert!(tie_a < early);
    }

    #[test]
    fn kind_round_trips_through_column_name() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationKind::parse("upsert"), None);
    }

    #[test]
    fn serialization_is_tagged() {
        let op = OutboxOperation::Delete(DeleteOp::new("op-3", Some("c-1".into()), None, 3000));

        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"op\":\"delete\""));
        assert!(json.contains("\"clientId\":\"c-1\""));
        assert!(!json.contains("serverId"));

        let parsed: OutboxOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, parsed);
    }
}
