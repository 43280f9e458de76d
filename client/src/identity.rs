//! Identity resolution: binding a client id to its server identity.

use crate::db;
use crate::error::Result;
use sqlx::SqliteConnection;
use tasksync_engine::{check_mapping, IdentityMap, Resolution, Task};

/// Record that `client_id` is known to the server as `server_task.id`.
///
/// Must run inside the caller's transaction. Writes the mapping under
/// first-write-wins, replaces the local snapshot entry of `client_id` (if it
/// still has one) with the server's version, and drops any pending `create`
/// for the same client id. A different existing mapping is a
/// `MappingViolation` and nothing is written.
pub async fn resolve(
    conn: &mut SqliteConnection,
    client_id: &str,
    server_task: &Task,
) -> Result<Resolution> {
    let existing = db::get_server_id(&mut *conn, client_id).await?;
    let resolution = match check_mapping(client_id, existing.as_deref(), &server_task.id) {
        Ok(resolution) => resolution,
        Err(err) => {
            tracing::error!(client_id, server_id = %server_task.id, "identity mapping violation");
            return Err(err.into());
        }
    };

    if resolution == Resolution::Inserted {
        db::insert_mapping(&mut *conn, client_id, &server_task.id).await?;
    }

    // A task deleted while its create was in flight stays deleted.
    if let Some(local) = db::find_task_by_client_id(&mut *conn, client_id).await? {
        db::delete_task(&mut *conn, &local.id, client_id).await?;
        let mut task = server_task.clone().with_client_id(client_id);
        task.deleted = false;
        db::upsert_task(&mut *conn, &task).await?;
    }

    let dropped = db::remove_creates_for(&mut *conn, client_id).await?;
    tracing::debug!(
        client_id,
        server_id = %server_task.id,
        ?resolution,
        dropped_creates = dropped,
        "resolved task identity"
    );

    Ok(resolution)
}

/// Record a remote task first seen in a listing as its own client identity.
pub async fn adopt(conn: &mut SqliteConnection, server_id: &str) -> Result<Resolution> {
    let existing = db::get_server_id(&mut *conn, server_id).await?;
    let resolution = check_mapping(server_id, existing.as_deref(), server_id)?;
    if resolution == Resolution::Inserted {
        db::insert_mapping(conn, server_id, server_id).await?;
    }
    Ok(resolution)
}

/// Load the mapping table.
pub async fn load_identity_map(conn: &mut SqliteConnection) -> Result<IdentityMap> {
    let rows = db::load_mapping(conn).await?;
    Ok(IdentityMap::from_rows(rows)?)
}
