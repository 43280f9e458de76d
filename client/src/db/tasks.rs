//! Database operations for the tasks table (the local snapshot).

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tasksync_engine::{Task, TaskStatus};

/// A stored task row from the database.
#[derive(Debug)]
pub struct StoredTask {
    pub id: String,
    pub client_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredTask {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredTask {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            deleted: row.try_get("deleted")?,
        })
    }
}

impl StoredTask {
    /// Convert database row to an engine Task.
    pub fn into_task(self) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status: TaskStatus::from_wire(&self.status),
            client_id: self.client_id,
            created_at: self.created_at,
            deleted: self.deleted,
        }
    }
}

/// Insert or replace a task.
pub async fn upsert_task(conn: &mut SqliteConnection, task: &Task) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO tasks (id, client_id, title, description, status, created_at, deleted)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            client_id = excluded.client_id,
            title = excluded.title,
            description = excluded.description,
            status = excluded.status,
            created_at = excluded.created_at,
            deleted = excluded.deleted
        "#,
    )
    .bind(&task.id)
    .bind(&task.client_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_wire())
    .bind(task.created_at)
    .bind(task.deleted)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a task by its current identifier.
pub async fn get_task(conn: &mut SqliteConnection, id: &str) -> Result<Option<Task>, sqlx::Error> {
    let row = sqlx::query_as::<_, StoredTask>(
        r#"
        SELECT id, client_id, title, description, status, created_at, deleted
        FROM tasks
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(StoredTask::into_task))
}

/// Get the task of a logical client identity, whatever its current id.
pub async fn find_task_by_client_id(
    conn: &mut SqliteConnection,
    client_id: &str,
) -> Result<Option<Task>, sqlx::Error> {
    let row = sqlx::query_as::<_, StoredTask>(
        r#"
        SELECT id, client_id, title, description, status, created_at, deleted
        FROM tasks
        WHERE client_id = ?
        LIMIT 1
        "#,
    )
    .bind(client_id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(StoredTask::into_task))
}

/// Get the whole snapshot, newest first.
pub async fn list_tasks(conn: &mut SqliteConnection) -> Result<Vec<Task>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StoredTask>(
        r#"
        SELECT id, client_id, title, description, status, created_at, deleted
        FROM tasks
        WHERE deleted = 0
        "#,
    )
    .fetch_all(conn)
    .await?;

    let mut tasks: Vec<Task> = rows.into_iter().map(StoredTask::into_task).collect();
    // created_at is stored as text; order on the parsed value
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    Ok(tasks)
}

/// Remove every snapshot row of a logical task.
pub async fn delete_task(
    conn: &mut SqliteConnection,
    id: &str,
    client_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ? OR client_id = ?")
        .bind(id)
        .bind(client_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Bulk replace the snapshot.
pub async fn replace_tasks(conn: &mut SqliteConnection, tasks: &[Task]) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM tasks").execute(&mut *conn).await?;
    for task in tasks {
        upsert_task(&mut *conn, task).await?;
    }
    Ok(())
}
