//! Database operations for the outbox table.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tasksync_engine::{
    CreateOp, DeleteOp, OperationKind, OutboxOperation, QueuedOp, TaskPatch, TaskPayload,
    Timestamp, UpdateOp,
};

/// A stored outbox row from the database.
#[derive(Debug)]
pub struct StoredEntry {
    pub op_id: String,
    pub kind: String,
    pub client_id: Option<String>,
    pub server_id: Option<String>,
    pub payload: Option<String>,
    pub timestamp: i64,
    pub attempts: i64,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    pub in_flight: bool,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntry {
            op_id: row.try_get("op_id")?,
            kind: row.try_get("kind")?,
            client_id: row.try_get("client_id")?,
            server_id: row.try_get("server_id")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("timestamp")?,
            attempts: row.try_get("attempts")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            last_error: row.try_get("last_error")?,
            in_flight: row.try_get("in_flight")?,
        })
    }
}

impl StoredEntry {
    /// Convert database row to an engine operation.
    pub fn to_operation(&self) -> Result<OutboxOperation, sqlx::Error> {
        let kind = OperationKind::parse(&self.kind)
            .ok_or_else(|| decode_error(format!("Unknown operation kind: {}", self.kind)))?;
        let timestamp = self.timestamp as Timestamp;

        match kind {
            OperationKind::Create => {
                let client_id = self.required_client_id()?;
                let payload: TaskPayload = self.decode_payload()?;
                Ok(OutboxOperation::Create(CreateOp::new(
                    &self.op_id,
                    client_id,
                    payload,
                    timestamp,
                )))
            }
            OperationKind::Update => {
                let client_id = self.required_client_id()?;
                let payload: TaskPatch = self.decode_payload()?;
                Ok(OutboxOperation::Update(UpdateOp::new(
                    &self.op_id,
                    client_id,
                    self.server_id.clone(),
                    payload,
                    timestamp,
                )))
            }
            OperationKind::Delete => Ok(OutboxOperation::Delete(DeleteOp::new(
                &self.op_id,
                self.client_id.clone(),
                self.server_id.clone(),
                timestamp,
            ))),
        }
    }

    /// Convert database row to an entry with its delivery bookkeeping.
    pub fn to_queued(&self) -> Result<QueuedOp, sqlx::Error> {
        Ok(QueuedOp {
            operation: self.to_operation()?,
            attempts: self.attempts.max(0) as u32,
            next_attempt_at: self.next_attempt_at.max(0) as Timestamp,
            last_error: self.last_error.clone(),
            in_flight: self.in_flight,
        })
    }

    fn required_client_id(&self) -> Result<&str, sqlx::Error> {
        self.client_id
            .as_deref()
            .ok_or_else(|| decode_error(format!("{} entry {} without client_id", self.kind, self.op_id)))
    }

    fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, sqlx::Error> {
        let raw = self
            .payload
            .as_deref()
            .ok_or_else(|| decode_error(format!("{} entry {} without payload", self.kind, self.op_id)))?;
        serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

const SELECT_ENTRIES: &str = r#"
    SELECT op_id, kind, client_id, server_id, payload, timestamp,
           attempts, next_attempt_at, last_error, in_flight
    FROM outbox
"#;

/// Append an operation to the outbox.
pub async fn insert_entry(
    conn: &mut SqliteConnection,
    op: &OutboxOperation,
) -> Result<(), sqlx::Error> {
    let payload = match op {
        OutboxOperation::Create(c) => Some(serde_json::to_string(&c.payload)),
        OutboxOperation::Update(u) => Some(serde_json::to_string(&u.payload)),
        OutboxOperation::Delete(_) => None,
    }
    .transpose()
    .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO outbox (op_id, kind, client_id, server_id, payload, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(op.op_id())
    .bind(op.kind().as_str())
    .bind(op.client_id().map(String::as_str))
    .bind(op.server_id().map(String::as_str))
    .bind(payload)
    .bind(op.timestamp() as i64)
    .execute(conn)
    .await?;

    Ok(())
}

/// Load the whole outbox in replay order.
pub async fn load_entries(conn: &mut SqliteConnection) -> Result<Vec<QueuedOp>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StoredEntry>(&format!(
        "{SELECT_ENTRIES} ORDER BY timestamp ASC, op_id ASC"
    ))
    .fetch_all(conn)
    .await?;

    rows.iter().map(StoredEntry::to_queued).collect()
}

/// Remove an entry. Returns whether it was still there.
pub async fn remove_entry(conn: &mut SqliteConnection, op_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM outbox WHERE op_id = ?")
        .bind(op_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Remove the pending, unclaimed `create` of a client id.
///
/// Returns the removed op id. A claimed entry is being POSTed right now and
/// is left alone.
pub async fn take_unclaimed_create(
    conn: &mut SqliteConnection,
    client_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let op_id: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT op_id FROM outbox
        WHERE kind = 'create' AND client_id = ? AND in_flight = 0
        ORDER BY timestamp ASC, op_id ASC
        LIMIT 1
        "#,
    )
    .bind(client_id)
    .fetch_optional(&mut *conn)
    .await?;

    match op_id {
        Some((op_id,)) => {
            remove_entry(conn, &op_id).await?;
            Ok(Some(op_id))
        }
        None => Ok(None),
    }
}

/// Remove every unclaimed entry of a client id.
pub async fn remove_unclaimed_for(
    conn: &mut SqliteConnection,
    client_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM outbox WHERE client_id = ? AND in_flight = 0")
        .bind(client_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Remove every pending `create` of a client id.
pub async fn remove_creates_for(
    conn: &mut SqliteConnection,
    client_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM outbox WHERE kind = 'create' AND client_id = ?")
        .bind(client_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Whether an entry of the given kind is queued for a client id.
pub async fn has_pending(
    conn: &mut SqliteConnection,
    client_id: &str,
    kind: OperationKind,
) -> Result<bool, sqlx::Error> {
    let result: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM outbox WHERE client_id = ? AND kind = ?)",
    )
    .bind(client_id)
    .bind(kind.as_str())
    .fetch_one(conn)
    .await?;

    Ok(result.0)
}

/// Claim an entry for an immediate-apply attempt.
///
/// Returns false if the entry is gone or already claimed.
pub async fn claim_entry(conn: &mut SqliteConnection, op_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE outbox SET in_flight = 1 WHERE op_id = ? AND in_flight = 0")
        .bind(op_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Claim an entry only if it is the oldest one queued for its task.
///
/// The task is the entry's client id, or its server id when it has none.
/// Returns false if the entry is gone, already claimed, or waiting behind
/// an earlier operation on the same task.
pub async fn claim_in_order(conn: &mut SqliteConnection, op_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE outbox SET in_flight = 1
        WHERE op_id = ? AND in_flight = 0
          AND NOT EXISTS (
            SELECT 1 FROM outbox AS earlier
            WHERE (
                (outbox.client_id IS NOT NULL AND earlier.client_id = outbox.client_id)
                OR (outbox.client_id IS NULL AND earlier.server_id = outbox.server_id)
            )
            AND (
                earlier.timestamp < outbox.timestamp
                OR (earlier.timestamp = outbox.timestamp AND earlier.op_id < outbox.op_id)
            )
          )
        "#,
    )
    .bind(op_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn release_claim(conn: &mut SqliteConnection, op_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE outbox SET in_flight = 0 WHERE op_id = ?")
        .bind(op_id)
        .execute(conn)
        .await?;

    Ok(())
}

/// Release claims left behind by attempts that were cancelled.
pub async fn release_all_claims(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE outbox SET in_flight = 0 WHERE in_flight = 1")
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Record a rejection and schedule the next attempt.
pub async fn record_rejection(
    conn: &mut SqliteConnection,
    op_id: &str,
    attempts: u32,
    next_attempt_at: Timestamp,
    last_error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox
        SET attempts = ?, next_attempt_at = ?, last_error = ?, in_flight = 0
        WHERE op_id = ?
        "#,
    )
    .bind(i64::from(attempts))
    .bind(next_attempt_at as i64)
    .bind(last_error)
    .bind(op_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Number of queued entries.
pub async fn count_entries(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox")
        .fetch_one(conn)
        .await?;

    Ok(result.0.max(0) as u64)
}

/// Largest enqueue timestamp in the outbox.
pub async fn max_timestamp(conn: &mut SqliteConnection) -> Result<Option<Timestamp>, sqlx::Error> {
    let result: (Option<i64>,) = sqlx::query_as("SELECT MAX(timestamp) FROM outbox")
        .fetch_one(conn)
        .await?;

    Ok(result.0.map(|ts| ts.max(0) as Timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStore;
    use tasksync_engine::TaskStatus;

    fn create(op_id: &str, client_id: &str, ts: Timestamp) -> OutboxOperation {
        OutboxOperation::Create(CreateOp::new(
            op_id,
            client_id,
            TaskPayload {
                title: "Buy milk".into(),
                description: "2 litres".into(),
                status: TaskStatus::Pending,
            },
            ts,
        ))
    }

    #[tokio::test]
    async fn entries_load_in_timestamp_order() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();

        let update = OutboxOperation::Update(UpdateOp::new(
            "op-2",
            "c-1",
            Some("srv-1".into()),
            TaskPatch::status(TaskStatus::Done),
            200,
        ));
        let delete = OutboxOperation::Delete(DeleteOp::new("op-3", None, Some("srv-9".into()), 50));
        insert_entry(&mut conn, &update).await.unwrap();
        insert_entry(&mut conn, &create("op-1", "c-1", 100)).await.unwrap();
        insert_entry(&mut conn, &delete).await.unwrap();

        let entries = load_entries(&mut conn).await.unwrap();
        let ops: Vec<OutboxOperation> = entries.into_iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec![delete, create("op-1", "c-1", 100), update]);
    }

    #[tokio::test]
    async fn claimed_create_is_not_taken() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();

        insert_entry(&mut conn, &create("op-1", "c-1", 100)).await.unwrap();
        assert!(claim_entry(&mut conn, "op-1").await.unwrap());
        assert!(!claim_entry(&mut conn, "op-1").await.unwrap());

        assert_eq!(take_unclaimed_create(&mut conn, "c-1").await.unwrap(), None);

        release_claim(&mut conn, "op-1").await.unwrap();
        assert_eq!(
            take_unclaimed_create(&mut conn, "c-1").await.unwrap(),
            Some("op-1".to_string())
        );
        assert_eq!(count_entries(&mut conn).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejection_bookkeeping() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();

        insert_entry(&mut conn, &create("op-1", "c-1", 100)).await.unwrap();
        claim_entry(&mut conn, "op-1").await.unwrap();
        record_rejection(&mut conn, "op-1", 2, 5_000, "422: bad")
            .await
            .unwrap();

        let entry = load_entries(&mut conn).await.unwrap().remove(0);
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.next_attempt_at, 5_000);
        assert_eq!(entry.last_error.as_deref(), Some("422: bad"));
        assert!(!entry.in_flight);
    }

    #[tokio::test]
    async fn in_order_claim_waits_for_earlier_entries() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();

        let update = |op_id: &str, ts| {
            OutboxOperation::Update(UpdateOp::new(
                op_id,
                "c-1",
                Some("srv-1".into()),
                TaskPatch::status(TaskStatus::Done),
                ts,
            ))
        };
        insert_entry(&mut conn, &update("op-b", 100)).await.unwrap();
        insert_entry(&mut conn, &update("op-c", 200)).await.unwrap();
        insert_entry(&mut conn, &update("op-a", 200)).await.unwrap();
        insert_entry(&mut conn, &create("op-x", "c-2", 50)).await.unwrap();

        assert!(!claim_in_order(&mut conn, "op-c").await.unwrap());
        assert!(!claim_in_order(&mut conn, "op-a").await.unwrap());
        // Other tasks do not interfere.
        assert!(claim_in_order(&mut conn, "op-x").await.unwrap());

        remove_entry(&mut conn, "op-b").await.unwrap();
        assert!(!claim_in_order(&mut conn, "op-c").await.unwrap());
        assert!(claim_in_order(&mut conn, "op-a").await.unwrap());
        assert!(!claim_in_order(&mut conn, "op-a").await.unwrap());
    }

    #[tokio::test]
    async fn in_order_claim_keys_deletes_by_server_id() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();

        let delete = |op_id: &str, ts| {
            OutboxOperation::Delete(DeleteOp::new(op_id, None, Some("srv-9".into()), ts))
        };
        insert_entry(&mut conn, &delete("op-1", 10)).await.unwrap();
        insert_entry(&mut conn, &delete("op-2", 20)).await.unwrap();

        assert!(!claim_in_order(&mut conn, "op-2").await.unwrap());
        assert!(claim_in_order(&mut conn, "op-1").await.unwrap());
    }

    #[tokio::test]
    async fn unclaimed_entries_of_a_client_are_removed() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();

        insert_entry(&mut conn, &create("op-1", "c-1", 100)).await.unwrap();
        let update = OutboxOperation::Update(UpdateOp::new(
            "op-2",
            "c-1",
            None,
            TaskPatch::status(TaskStatus::Done),
            200,
        ));
        insert_entry(&mut conn, &update).await.unwrap();
        insert_entry(&mut conn, &create("op-3", "c-2", 300)).await.unwrap();
        claim_entry(&mut conn, "op-1").await.unwrap();

        assert_eq!(remove_unclaimed_for(&mut conn, "c-1").await.unwrap(), 1);
        assert_eq!(count_entries(&mut conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pending_queries() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();

        assert_eq!(max_timestamp(&mut conn).await.unwrap(), None);

        insert_entry(&mut conn, &create("op-1", "c-1", 100)).await.unwrap();
        insert_entry(&mut conn, &create("op-2", "c-1", 300)).await.unwrap();

        assert!(has_pending(&mut conn, "c-1", OperationKind::Create).await.unwrap());
        assert!(!has_pending(&mut conn, "c-1", OperationKind::Delete).await.unwrap());
        assert_eq!(max_timestamp(&mut conn).await.unwrap(), Some(300));

        claim_entry(&mut conn, "op-2").await.unwrap();
        assert_eq!(release_all_claims(&mut conn).await.unwrap(), 1);
        assert_eq!(remove_creates_for(&mut conn, "c-1").await.unwrap(), 2);
    }
}
