//! Database operations for the mapping table.

use sqlx::SqliteConnection;

/// Server id a client id resolved to, if any.
pub async fn get_server_id(
    conn: &mut SqliteConnection,
    client_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT server_id FROM mapping WHERE client_id = ?")
        .bind(client_id)
        .fetch_optional(conn)
        .await?;

    Ok(row.map(|(server_id,)| server_id))
}

/// Write a new mapping row.
///
/// Callers check first-write-wins beforehand; the primary key turns a
/// racing second insert into an error instead of an overwrite.
pub async fn insert_mapping(
    conn: &mut SqliteConnection,
    client_id: &str,
    server_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO mapping (client_id, server_id) VALUES (?, ?)")
        .bind(client_id)
        .bind(server_id)
        .execute(conn)
        .await?;

    Ok(())
}

/// All mapping rows.
pub async fn load_mapping(conn: &mut SqliteConnection) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as("SELECT client_id, server_id FROM mapping ORDER BY client_id")
        .fetch_all(conn)
        .await
}
