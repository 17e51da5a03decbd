use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

// seq is the arrival order; id is the uuid handed to clients.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT    NOT NULL UNIQUE,
    room_id    TEXT    NOT NULL,
    user_id    TEXT    NOT NULL,
    username   TEXT    NOT NULL,
    content    TEXT    NOT NULL,
    created_at TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_room_seq ON messages (room_id, seq);
"#;

/// Opens the pool and makes sure the schema exists.
///
/// An in-memory database lives and dies with its connection, so such urls
/// always get a single-connection pool.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let max_connections = if is_in_memory(url) { 1 } else { max_connections };
    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;

    migrate(&db_pool).await?;
    Ok(db_pool)
}

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA)
        .execute(db_pool)
        .await?;
    Ok(())
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
