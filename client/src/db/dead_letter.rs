//! Database operations for the dead_letter table.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tasksync_engine::{OutboxOperation, QueuedOp, Timestamp};

/// An operation that used up its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub operation: OutboxOperation,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failed_at: Timestamp,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for DeadLetter {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let operation: String = row.try_get("operation")?;
        let attempts: i64 = row.try_get("attempts")?;
        let failed_at: i64 = row.try_get("failed_at")?;

        Ok(DeadLetter {
            operation: serde_json::from_str(&operation)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            attempts: attempts.max(0) as u32,
            last_error: row.try_get("last_error")?,
            failed_at: failed_at.max(0) as Timestamp,
        })
    }
}

/// Move an entry from the outbox to the dead-letter table.
pub async fn bury_entry(
    conn: &mut SqliteConnection,
    entry: &QueuedOp,
    failed_at: Timestamp,
) -> Result<(), sqlx::Error> {
    let operation =
        serde_json::to_string(&entry.operation).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO dead_letter (op_id, client_id, operation, attempts, last_error, failed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (op_id) DO NOTHING
        "#,
    )
    .bind(entry.operation.op_id())
    .bind(entry.operation.client_id().map(String::as_str))
    .bind(operation)
    .bind(i64::from(entry.attempts))
    .bind(entry.last_error.as_deref())
    .bind(failed_at as i64)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM outbox WHERE op_id = ?")
        .bind(entry.operation.op_id())
        .execute(conn)
        .await?;

    Ok(())
}

/// All dead letters, oldest failure first.
pub async fn list_dead_letters(conn: &mut SqliteConnection) -> Result<Vec<DeadLetter>, sqlx::Error> {
    sqlx::query_as::<_, DeadLetter>(
        r#"
        SELECT op_id, operation, attempts, last_error, failed_at
        FROM dead_letter
        ORDER BY failed_at ASC, op_id ASC
        "#,
    )
    .fetch_all(conn)
    .await
}

/// Whether an operation of a client id was given up on.
pub async fn is_buried(conn: &mut SqliteConnection, client_id: &str) -> Result<bool, sqlx::Error> {
    let result: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM dead_letter WHERE client_id = ?)")
            .bind(client_id)
            .fetch_one(conn)
            .await?;

    Ok(result.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_entries, insert_entry, LocalStore};
    use tasksync_engine::DeleteOp;

    #[tokio::test]
    async fn bury_moves_entry_out_of_outbox() {
        let store = LocalStore::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();

        let op = OutboxOperation::Delete(DeleteOp::new("op-1", Some("c-1".into()), None, 100));
        insert_entry(&mut tx, &op).await.unwrap();

        let mut entry = QueuedOp::new(op.clone());
        entry.attempts = 8;
        entry.last_error = Some("403: forbidden".into());
        bury_entry(&mut tx, &entry, 9_000).await.unwrap();
        tx.commit().await.unwrap();

        let mut conn = store.acquire().await.unwrap();
        assert_eq!(count_entries(&mut conn).await.unwrap(), 0);
        assert!(is_buried(&mut conn, "c-1").await.unwrap());
        assert!(!is_buried(&mut conn, "c-2").await.unwrap());

        let letters = list_dead_letters(&mut conn).await.unwrap();
        assert_eq!(
            letters,
            vec![DeadLetter {
                operation: op,
                attempts: 8,
                last_error: Some("403: forbidden".into()),
                failed_at: 9_000,
            }]
        );
    }
}
